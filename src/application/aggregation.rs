//! Two-phase class-list aggregation.
//!
//! Phase one asks the store for one page of student identifiers plus unbounded
//! match counts, touching only indexed predicates. Phase two joins the full
//! detail for that bounded identifier set and unwinds it into rows.

use std::collections::HashMap;
use std::sync::Arc;

use metrics::counter;
use tracing::{debug, instrument};

use crate::application::error::ReportError;
use crate::application::filter::FilterSignature;
use crate::application::repos::{ClassListStore, GradeFilter, GradeLookup, IdQuery, JoinQuery};
use crate::application::resilience::ResiliencePolicy;
use crate::domain::entities::ClassListRow;

const PHASE_ONE: &str = "phase1.select_ids";
const PHASE_TWO: &str = "phase2.join";
const METRIC_JOIN_GAPS_TOTAL: &str = "classlist_join_gaps_total";

/// Rows and counts for a single page.
#[derive(Debug, Clone, PartialEq)]
pub struct PageFetch {
    pub rows: Vec<ClassListRow>,
    /// Grade records matching the filter, across all pages.
    pub total_matching: u64,
    /// Distinct students matching the filter, across all pages.
    pub total_students: u64,
    /// Lookups dropped because a reference did not resolve.
    pub dropped_rows: usize,
}

#[derive(Clone)]
pub struct TwoPhaseAggregator {
    store: Arc<dyn ClassListStore>,
    policy: ResiliencePolicy,
}

impl TwoPhaseAggregator {
    pub fn new(store: Arc<dyn ClassListStore>, policy: ResiliencePolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> &ResiliencePolicy {
        &self.policy
    }

    pub fn store(&self) -> &Arc<dyn ClassListStore> {
        &self.store
    }

    #[instrument(skip(self), fields(signature = %signature))]
    pub async fn fetch_page(&self, signature: &FilterSignature) -> Result<PageFetch, ReportError> {
        let filter = signature.scope.to_grade_filter();
        let id_query = IdQuery {
            filter: filter.clone(),
            offset: signature.offset(),
            limit: signature.page_size,
        };

        let store = &self.store;
        let query = &id_query;
        let ids = self
            .policy
            .run(PHASE_ONE, |options| async move {
                store.select_student_ids(query, &options).await
            })
            .await?;

        if ids.student_ids.is_empty() {
            debug!(
                total_matching = ids.matching_grades,
                "phase one selected no students; skipping join"
            );
            return Ok(PageFetch {
                rows: Vec::new(),
                total_matching: ids.matching_grades,
                total_students: ids.matching_students,
                dropped_rows: 0,
            });
        }

        let join_query = JoinQuery {
            filter,
            student_ids: ids.student_ids.clone(),
        };
        let query = &join_query;
        let lookups = self
            .policy
            .run(PHASE_TWO, |options| async move {
                store.join_details(query, &options).await
            })
            .await?;

        let (rows, dropped_rows) = assemble_rows(&ids.student_ids, &join_query.filter, lookups);
        if dropped_rows > 0 {
            counter!(METRIC_JOIN_GAPS_TOTAL).increment(dropped_rows as u64);
        }

        debug!(
            students = ids.student_ids.len(),
            rows = rows.len(),
            dropped_rows,
            total_matching = ids.matching_grades,
            "class list page assembled"
        );

        Ok(PageFetch {
            rows,
            total_matching: ids.matching_grades,
            total_students: ids.matching_students,
            dropped_rows,
        })
    }
}

/// Turn joined lookups into ordered rows.
///
/// Rows follow the phase-one student order, then subject code. Lookups with an
/// unresolved reference are dropped and counted; lookups outside the page or the
/// filter are discarded silently.
pub fn assemble_rows(
    student_order: &[i64],
    filter: &GradeFilter,
    lookups: Vec<GradeLookup>,
) -> (Vec<ClassListRow>, usize) {
    let rank: HashMap<i64, usize> = student_order
        .iter()
        .enumerate()
        .map(|(position, id)| (*id, position))
        .collect();

    let mut dropped = 0;
    let mut ranked = Vec::with_capacity(lookups.len());

    for lookup in lookups {
        let Some(&position) = rank.get(&lookup.grade.student_id) else {
            continue;
        };
        if !filter.matches(&lookup.grade) {
            continue;
        }

        match (
            &lookup.student,
            &lookup.subject,
            &lookup.teacher,
            &lookup.semester,
        ) {
            (Some(student), Some(subject), Some(teacher), Some(semester)) => {
                let row = ClassListRow::resolve(&lookup.grade, student, subject, teacher, semester);
                ranked.push((position, row));
            }
            _ => {
                dropped += 1;
                debug!(
                    grade_id = lookup.grade.id,
                    student_missing = lookup.student.is_none(),
                    subject_missing = lookup.subject.is_none(),
                    teacher_missing = lookup.teacher.is_none(),
                    semester_missing = lookup.semester.is_none(),
                    "dropping grade with unresolved reference"
                );
            }
        }
    }

    ranked.sort_by(|(a_rank, a), (b_rank, b)| {
        a_rank
            .cmp(b_rank)
            .then_with(|| a.subject_code.cmp(&b.subject_code))
            .then_with(|| a.semester_id.cmp(&b.semester_id))
            .then_with(|| a.grade_id.cmp(&b.grade_id))
    });

    let mut rows: Vec<ClassListRow> = ranked.into_iter().map(|(_, row)| row).collect();
    rows.dedup_by_key(|row| row.grade_id);
    (rows, dropped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::{Grade, Semester, Student, Subject, Teacher};

    fn lookup(grade_id: i64, student_id: i64, subject_code: &str, value: Option<f64>) -> GradeLookup {
        GradeLookup {
            grade: Grade {
                id: grade_id,
                student_id,
                subject_code: subject_code.to_string(),
                teacher_id: 7,
                semester_id: 1,
                value,
            },
            student: Some(Student {
                id: student_id,
                name: format!("Student {student_id}"),
                course: "BSIT".to_string(),
                year_level: 2,
            }),
            subject: Some(Subject {
                code: subject_code.to_string(),
                description: format!("{subject_code} description"),
                units: 3,
            }),
            teacher: Some(Teacher {
                id: 7,
                name: "Santos".to_string(),
            }),
            semester: Some(Semester {
                id: 1,
                term: "FirstSem".to_string(),
                school_year: 2023,
            }),
        }
    }

    #[test]
    fn rows_follow_phase_one_order_then_subject_code() {
        let lookups = vec![
            lookup(1, 10, "CS102", Some(2.0)),
            lookup(2, 20, "CS101", Some(1.5)),
            lookup(3, 10, "CS101", None),
        ];

        let (rows, dropped) = assemble_rows(&[20, 10], &GradeFilter::default(), lookups);

        assert_eq!(dropped, 0);
        let order: Vec<(i64, &str)> = rows
            .iter()
            .map(|row| (row.student_id, row.subject_code.as_str()))
            .collect();
        assert_eq!(order, vec![(20, "CS101"), (10, "CS101"), (10, "CS102")]);
        assert_eq!(rows[1].grade, None);
    }

    #[test]
    fn unresolved_references_are_dropped_and_counted() {
        let mut orphan = lookup(1, 10, "CS101", Some(1.0));
        orphan.student = None;
        let mut no_teacher = lookup(2, 20, "CS101", Some(1.0));
        no_teacher.teacher = None;
        let intact = lookup(3, 30, "CS101", Some(3.0));

        let (rows, dropped) = assemble_rows(
            &[10, 20, 30],
            &GradeFilter::default(),
            vec![orphan, no_teacher, intact],
        );

        assert_eq!(dropped, 2);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].student_id, 30);
    }

    #[test]
    fn lookups_outside_page_or_filter_are_ignored() {
        let filter = GradeFilter {
            semester_id: None,
            subject_code: Some("CS101".to_string()),
        };
        let lookups = vec![
            lookup(1, 10, "CS101", Some(1.0)),
            lookup(2, 10, "CS105", Some(1.0)),
            lookup(3, 99, "CS101", Some(1.0)),
        ];

        let (rows, dropped) = assemble_rows(&[10], &filter, lookups);

        assert_eq!(dropped, 0);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].grade_id, 1);
    }

    #[test]
    fn duplicate_lookups_collapse() {
        let lookups = vec![lookup(5, 10, "CS101", None), lookup(5, 10, "CS101", None)];
        let (rows, _) = assemble_rows(&[10], &GradeFilter::default(), lookups);
        assert_eq!(rows.len(), 1);
    }
}
