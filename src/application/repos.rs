//! Store traits describing the read-only enrollment driver.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::application::resilience::{ReadConcern, ReadPreference};
use crate::domain::entities::{Grade, Semester, Student, Subject, Teacher};

#[derive(Debug, Clone, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("database timeout")]
    Timeout,
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }

    pub fn unavailable(err: impl std::fmt::Display) -> Self {
        Self::Unavailable(err.to_string())
    }

    /// Whether retrying the same read may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, RepoError::Timeout | RepoError::Unavailable(_))
    }
}

/// Per-call read settings handed to the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadOptions {
    pub preference: ReadPreference,
    pub concern: ReadConcern,
    pub timeout: Duration,
}

/// Equality predicates on the grade collection. `None` means "any".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GradeFilter {
    pub semester_id: Option<i64>,
    pub subject_code: Option<String>,
}

impl GradeFilter {
    pub fn matches(&self, grade: &Grade) -> bool {
        self.semester_id.is_none_or(|id| grade.semester_id == id)
            && self
                .subject_code
                .as_deref()
                .is_none_or(|code| grade.subject_code == code)
    }
}

/// Phase-one request: one page of student identifiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdQuery {
    pub filter: GradeFilter,
    pub offset: u64,
    pub limit: u32,
}

/// Phase-one response.
///
/// `student_ids` are ordered by student name then identifier. The counts are not
/// bounded by the page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdPage {
    pub student_ids: Vec<i64>,
    pub matching_grades: u64,
    pub matching_students: u64,
}

/// Phase-two request: the full join for a bounded identifier set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinQuery {
    pub filter: GradeFilter,
    pub student_ids: Vec<i64>,
}

/// A grade with each reference looked up. A `None` marks a reference that did not
/// resolve.
#[derive(Debug, Clone, PartialEq)]
pub struct GradeLookup {
    pub grade: Grade,
    pub student: Option<Student>,
    pub subject: Option<Subject>,
    pub teacher: Option<Teacher>,
    pub semester: Option<Semester>,
}

#[async_trait]
pub trait ClassListStore: Send + Sync {
    async fn select_student_ids(
        &self,
        query: &IdQuery,
        options: &ReadOptions,
    ) -> Result<IdPage, RepoError>;

    async fn join_details(
        &self,
        query: &JoinQuery,
        options: &ReadOptions,
    ) -> Result<Vec<GradeLookup>, RepoError>;

    async fn distinct_subject_codes(&self, options: &ReadOptions)
    -> Result<Vec<String>, RepoError>;

    async fn distinct_semester_ids(&self, options: &ReadOptions) -> Result<Vec<i64>, RepoError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grade(semester_id: i64, subject_code: &str) -> Grade {
        Grade {
            id: 1,
            student_id: 1,
            subject_code: subject_code.to_string(),
            teacher_id: 1,
            semester_id,
            value: None,
        }
    }

    #[test]
    fn empty_filter_matches_everything() {
        assert!(GradeFilter::default().matches(&grade(3, "CS103")));
    }

    #[test]
    fn filter_requires_every_present_predicate() {
        let filter = GradeFilter {
            semester_id: Some(1),
            subject_code: Some("CS101".to_string()),
        };
        assert!(filter.matches(&grade(1, "CS101")));
        assert!(!filter.matches(&grade(2, "CS101")));
        assert!(!filter.matches(&grade(1, "CS102")));
    }

    #[test]
    fn only_timeouts_and_outages_are_transient() {
        assert!(RepoError::Timeout.is_transient());
        assert!(RepoError::unavailable("replica down").is_transient());
        assert!(!RepoError::from_persistence("syntax error").is_transient());
    }
}
