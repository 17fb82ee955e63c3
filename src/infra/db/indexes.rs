//! Indexes backing the two query phases.

use sqlx::postgres::PgPool;
use tracing::info;

use crate::application::repos::RepoError;

use super::util::map_sqlx_error;

/// Name and definition of every index the class list queries rely on.
pub const INDEXES: &[(&str, &str)] = &[
    (
        "grades_semester_subject_idx",
        "CREATE INDEX IF NOT EXISTS grades_semester_subject_idx ON grades (semester_id, subject_code)",
    ),
    (
        "grades_subject_idx",
        "CREATE INDEX IF NOT EXISTS grades_subject_idx ON grades (subject_code)",
    ),
    (
        "grades_student_idx",
        "CREATE INDEX IF NOT EXISTS grades_student_idx ON grades (student_id)",
    ),
    (
        "students_name_idx",
        "CREATE INDEX IF NOT EXISTS students_name_idx ON students (name, id)",
    ),
];

/// Create any missing index on the primary. Safe to run repeatedly.
pub async fn ensure_indexes(pool: &PgPool) -> Result<Vec<&'static str>, RepoError> {
    let mut ensured = Vec::with_capacity(INDEXES.len());
    for (name, statement) in INDEXES {
        sqlx::query(*statement)
            .execute(pool)
            .await
            .map_err(map_sqlx_error)?;
        info!(index = *name, "index ensured");
        ensured.push(*name);
    }
    Ok(ensured)
}
