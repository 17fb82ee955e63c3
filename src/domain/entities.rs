//! Domain entities mirrored from the enrollment store.
//!
//! All records are owned by external loaders; the engine only reads them.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Student {
    pub id: i64,
    pub name: String,
    pub course: String,
    pub year_level: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    pub code: String,
    pub description: String,
    pub units: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Teacher {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Semester {
    pub id: i64,
    pub term: String,
    pub school_year: i32,
}

impl Semester {
    /// Human readable label, e.g. `FirstSem 2023`.
    pub fn label(&self) -> String {
        format!("{} {}", self.term, self.school_year)
    }
}

/// Join edge between a student, a subject, a teacher and a semester.
///
/// `value` is `None` while the grade has not been posted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Grade {
    pub id: i64,
    pub student_id: i64,
    pub subject_code: String,
    pub teacher_id: i64,
    pub semester_id: i64,
    #[serde(default)]
    pub value: Option<f64>,
}

/// One fully resolved (student, subject, grade) row of a class list page.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassListRow {
    pub grade_id: i64,
    pub student_id: i64,
    pub student_name: String,
    pub course: String,
    pub year_level: i32,
    pub subject_code: String,
    pub subject_description: String,
    pub units: i32,
    pub teacher_name: String,
    pub grade: Option<f64>,
    pub semester_id: i64,
    pub semester_label: String,
}

impl ClassListRow {
    /// Resolve a grade against its referenced records.
    pub fn resolve(
        grade: &Grade,
        student: &Student,
        subject: &Subject,
        teacher: &Teacher,
        semester: &Semester,
    ) -> Self {
        Self {
            grade_id: grade.id,
            student_id: student.id,
            student_name: student.name.clone(),
            course: student.course.clone(),
            year_level: student.year_level,
            subject_code: subject.code.clone(),
            subject_description: subject.description.clone(),
            units: subject.units,
            teacher_name: teacher.name.clone(),
            grade: grade.value.filter(|value| value.is_finite()),
            semester_id: semester.id,
            semester_label: semester.label(),
        }
    }

    /// The grade, if posted and finite.
    pub fn graded_value(&self) -> Option<f64> {
        self.grade.filter(|value| value.is_finite())
    }
}
