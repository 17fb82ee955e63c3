//! In-process class list store loaded from a JSON dataset.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::info;

use crate::application::repos::{
    ClassListStore, GradeLookup, IdPage, IdQuery, JoinQuery, ReadOptions, RepoError,
};
use crate::domain::entities::{Grade, Semester, Student, Subject, Teacher};
use crate::infra::error::InfraError;

/// The five collections, as stored on disk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Dataset {
    pub students: Vec<Student>,
    pub subjects: Vec<Subject>,
    pub teachers: Vec<Teacher>,
    pub semesters: Vec<Semester>,
    pub grades: Vec<Grade>,
}

impl Dataset {
    pub async fn from_json_file(path: &Path) -> Result<Self, InfraError> {
        let raw = tokio::fs::read_to_string(path).await?;
        serde_json::from_str(&raw)
            .map_err(|err| InfraError::dataset(path.display().to_string(), err.to_string()))
    }
}

#[derive(Debug, Default)]
struct Indexed {
    students: HashMap<i64, Student>,
    subjects: HashMap<String, Subject>,
    teachers: HashMap<i64, Teacher>,
    semesters: HashMap<i64, Semester>,
    grades: Vec<Grade>,
}

impl From<Dataset> for Indexed {
    fn from(dataset: Dataset) -> Self {
        Self {
            students: dataset
                .students
                .into_iter()
                .map(|student| (student.id, student))
                .collect(),
            subjects: dataset
                .subjects
                .into_iter()
                .map(|subject| (subject.code.clone(), subject))
                .collect(),
            teachers: dataset
                .teachers
                .into_iter()
                .map(|teacher| (teacher.id, teacher))
                .collect(),
            semesters: dataset
                .semesters
                .into_iter()
                .map(|semester| (semester.id, semester))
                .collect(),
            grades: dataset.grades,
        }
    }
}

/// Store backed by a dataset held in memory.
///
/// Read options are accepted but have nothing to route; every read sees the
/// current dataset.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    data: RwLock<Indexed>,
}

impl InMemoryStore {
    pub fn new(dataset: Dataset) -> Self {
        Self {
            data: RwLock::new(dataset.into()),
        }
    }

    pub async fn load(path: &Path) -> Result<Self, InfraError> {
        let dataset = Dataset::from_json_file(path).await?;
        info!(
            path = %path.display(),
            students = dataset.students.len(),
            grades = dataset.grades.len(),
            "loaded class list dataset"
        );
        Ok(Self::new(dataset))
    }

    /// Swap in a new dataset, as an external loader would.
    pub async fn replace(&self, dataset: Dataset) {
        *self.data.write().await = dataset.into();
    }
}

#[async_trait]
impl ClassListStore for InMemoryStore {
    async fn select_student_ids(
        &self,
        query: &IdQuery,
        _options: &ReadOptions,
    ) -> Result<IdPage, RepoError> {
        let data = self.data.read().await;

        let mut matching_grades = 0_u64;
        let mut student_ids = HashSet::new();
        for grade in data.grades.iter().filter(|grade| query.filter.matches(grade)) {
            matching_grades += 1;
            if data.students.contains_key(&grade.student_id) {
                student_ids.insert(grade.student_id);
            }
        }

        let mut students: Vec<&Student> = student_ids
            .iter()
            .filter_map(|id| data.students.get(id))
            .collect();
        students.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));

        let offset = usize::try_from(query.offset).unwrap_or(usize::MAX);
        let page = students
            .iter()
            .skip(offset)
            .take(query.limit as usize)
            .map(|student| student.id)
            .collect();

        Ok(IdPage {
            student_ids: page,
            matching_grades,
            matching_students: students.len() as u64,
        })
    }

    async fn join_details(
        &self,
        query: &JoinQuery,
        _options: &ReadOptions,
    ) -> Result<Vec<GradeLookup>, RepoError> {
        let data = self.data.read().await;
        let wanted: HashSet<i64> = query.student_ids.iter().copied().collect();

        Ok(data
            .grades
            .iter()
            .filter(|grade| wanted.contains(&grade.student_id) && query.filter.matches(grade))
            .map(|grade| GradeLookup {
                grade: grade.clone(),
                student: data.students.get(&grade.student_id).cloned(),
                subject: data.subjects.get(&grade.subject_code).cloned(),
                teacher: data.teachers.get(&grade.teacher_id).cloned(),
                semester: data.semesters.get(&grade.semester_id).cloned(),
            })
            .collect())
    }

    async fn distinct_subject_codes(
        &self,
        _options: &ReadOptions,
    ) -> Result<Vec<String>, RepoError> {
        let data = self.data.read().await;
        let codes: BTreeSet<&str> = data
            .grades
            .iter()
            .map(|grade| grade.subject_code.as_str())
            .collect();
        Ok(codes.into_iter().map(str::to_string).collect())
    }

    async fn distinct_semester_ids(&self, _options: &ReadOptions) -> Result<Vec<i64>, RepoError> {
        let data = self.data.read().await;
        let ids: BTreeSet<i64> = data.grades.iter().map(|grade| grade.semester_id).collect();
        Ok(ids.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::repos::GradeFilter;
    use crate::application::resilience::ResiliencePolicy;

    fn dataset() -> Dataset {
        serde_json::from_value(serde_json::json!({
            "students": [
                { "id": 1, "name": "Cruz", "course": "BSCS", "year_level": 1 },
                { "id": 2, "name": "Abad", "course": "BSIT", "year_level": 2 },
                { "id": 3, "name": "Bautista", "course": "BSCS", "year_level": 3 }
            ],
            "subjects": [
                { "code": "CS101", "description": "Intro to Computing", "units": 3 },
                { "code": "CS102", "description": "Programming 1", "units": 4 }
            ],
            "teachers": [ { "id": 10, "name": "Reyes" } ],
            "semesters": [ { "id": 1, "term": "FirstSem", "school_year": 2023 } ],
            "grades": [
                { "id": 100, "student_id": 1, "subject_code": "CS101", "teacher_id": 10, "semester_id": 1, "value": 1.5 },
                { "id": 101, "student_id": 2, "subject_code": "CS101", "teacher_id": 10, "semester_id": 1, "value": 2.0 },
                { "id": 102, "student_id": 3, "subject_code": "CS102", "teacher_id": 10, "semester_id": 2 },
                { "id": 103, "student_id": 99, "subject_code": "CS101", "teacher_id": 10, "semester_id": 1, "value": 3.0 }
            ]
        }))
        .expect("dataset")
    }

    fn options() -> ReadOptions {
        ResiliencePolicy::default().read_options()
    }

    #[tokio::test]
    async fn student_page_is_ordered_by_name_and_skips_orphans() {
        let store = InMemoryStore::new(dataset());
        let query = IdQuery {
            filter: GradeFilter {
                semester_id: Some(1),
                subject_code: Some("CS101".to_string()),
            },
            offset: 0,
            limit: 10,
        };

        let page = store
            .select_student_ids(&query, &options())
            .await
            .expect("page");

        assert_eq!(page.student_ids, vec![2, 1]);
        assert_eq!(page.matching_grades, 3);
        assert_eq!(page.matching_students, 2);
    }

    #[tokio::test]
    async fn offset_and_limit_cut_the_student_list() {
        let store = InMemoryStore::new(dataset());
        let query = IdQuery {
            filter: GradeFilter::default(),
            offset: 1,
            limit: 1,
        };

        let page = store
            .select_student_ids(&query, &options())
            .await
            .expect("page");

        assert_eq!(page.student_ids, vec![3]);
        assert_eq!(page.matching_students, 3);
    }

    #[tokio::test]
    async fn join_reports_unresolved_references_as_none() {
        let store = InMemoryStore::new(dataset());
        let query = JoinQuery {
            filter: GradeFilter::default(),
            student_ids: vec![3],
        };

        let lookups = store.join_details(&query, &options()).await.expect("join");

        assert_eq!(lookups.len(), 1);
        assert!(lookups[0].student.is_some());
        assert!(lookups[0].semester.is_none());
        assert_eq!(lookups[0].grade.value, None);
    }

    #[tokio::test]
    async fn distinct_values_are_sorted() {
        let store = InMemoryStore::new(dataset());
        assert_eq!(
            store.distinct_subject_codes(&options()).await.expect("codes"),
            vec!["CS101".to_string(), "CS102".to_string()]
        );
        assert_eq!(
            store.distinct_semester_ids(&options()).await.expect("ids"),
            vec![1, 2]
        );
    }

    #[tokio::test]
    async fn replacing_the_dataset_is_visible_to_later_reads() {
        let store = InMemoryStore::new(dataset());
        store.replace(Dataset::default()).await;
        assert!(
            store
                .distinct_subject_codes(&options())
                .await
                .expect("codes")
                .is_empty()
        );
    }
}
