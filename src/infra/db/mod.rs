//! Postgres-backed class list store.
//!
//! Expects the tables `students(id, name, course, year_level)`,
//! `subjects(code, description, units)`, `teachers(id, name)`,
//! `semesters(id, term, school_year)` and
//! `grades(id, student_id, subject_code, teacher_id, semester_id, value)`.
//! References are not enforced by foreign keys; the joins below are all LEFT
//! joins so a dangling reference surfaces as a gap instead of vanishing.

mod indexes;
mod util;

pub use indexes::{INDEXES, ensure_indexes};
pub use util::map_sqlx_error;

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use async_trait::async_trait;
use sqlx::{
    Postgres, QueryBuilder, Transaction,
    postgres::{PgPool, PgPoolOptions},
};
use tracing::{debug, warn};

use crate::application::repos::{
    ClassListStore, GradeFilter, GradeLookup, IdPage, IdQuery, JoinQuery, ReadOptions, RepoError,
};
use crate::application::resilience::{ReadConcern, ReadPreference};
use crate::config::DatabaseSettings;
use crate::domain::entities::{Grade, Semester, Student, Subject, Teacher};

#[derive(Clone)]
pub struct PostgresStore {
    primary: PgPool,
    replicas: Arc<Vec<PgPool>>,
    next_replica: Arc<AtomicUsize>,
}

impl PostgresStore {
    pub fn new(primary: PgPool, replicas: Vec<PgPool>) -> Self {
        Self {
            primary,
            replicas: Arc::new(replicas),
            next_replica: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Connect the primary eagerly and replicas lazily, so an unreachable
    /// replica only costs a failover at read time.
    pub async fn connect(settings: &DatabaseSettings, url: &str) -> Result<Self, sqlx::Error> {
        let max_connections = settings.max_connections.get();
        let primary = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;

        let mut replicas = Vec::with_capacity(settings.replica_urls.len());
        for replica_url in &settings.replica_urls {
            replicas.push(
                PgPoolOptions::new()
                    .max_connections(max_connections)
                    .connect_lazy(replica_url)?,
            );
        }

        Ok(Self::new(primary, replicas))
    }

    pub fn primary(&self) -> &PgPool {
        &self.primary
    }

    /// Pools to try, in order, for a read under `preference`.
    fn candidates(&self, preference: ReadPreference) -> Vec<&PgPool> {
        let start = if self.replicas.is_empty() {
            0
        } else {
            self.next_replica.fetch_add(1, Ordering::Relaxed) % self.replicas.len()
        };
        let rotated = self
            .replicas
            .iter()
            .cycle()
            .skip(start)
            .take(self.replicas.len());

        let mut pools = Vec::with_capacity(self.replicas.len() + 1);
        if preference.prefers_replicas() {
            pools.extend(rotated);
            if preference.allows_failover() {
                pools.push(&self.primary);
            }
        } else {
            pools.push(&self.primary);
            if preference.allows_failover() {
                pools.extend(rotated);
            }
        }
        pools
    }

    async fn begin_read(
        &self,
        options: &ReadOptions,
    ) -> Result<Transaction<'static, Postgres>, RepoError> {
        let mut last_error = None;

        for pool in self.candidates(options.preference) {
            match pool.begin().await {
                Ok(mut tx) => {
                    configure_read(&mut tx, options).await?;
                    return Ok(tx);
                }
                Err(err) => {
                    let mapped = map_sqlx_error(err);
                    if !mapped.is_transient() {
                        return Err(mapped);
                    }
                    warn!(
                        preference = options.preference.as_str(),
                        error = %mapped,
                        "read pool unavailable, trying next member"
                    );
                    last_error = Some(mapped);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            RepoError::unavailable(format!(
                "no pool can serve read preference `{}`",
                options.preference.as_str()
            ))
        }))
    }
}

fn isolation_level(concern: ReadConcern) -> &'static str {
    match concern {
        ReadConcern::Local | ReadConcern::Available => "READ COMMITTED",
        ReadConcern::Majority | ReadConcern::Snapshot => "REPEATABLE READ",
        ReadConcern::Linearizable => "SERIALIZABLE",
    }
}

async fn configure_read(
    tx: &mut Transaction<'static, Postgres>,
    options: &ReadOptions,
) -> Result<(), RepoError> {
    let statement = format!(
        "SET TRANSACTION ISOLATION LEVEL {} READ ONLY",
        isolation_level(options.concern)
    );
    sqlx::query(&statement)
        .execute(&mut **tx)
        .await
        .map_err(map_sqlx_error)?;

    sqlx::query("SELECT set_config('statement_timeout', $1, true)")
        .bind(options.timeout.as_millis().to_string())
        .execute(&mut **tx)
        .await
        .map_err(map_sqlx_error)?;

    Ok(())
}

fn push_grade_filter<'q>(qb: &mut QueryBuilder<'q, Postgres>, filter: &'q GradeFilter) {
    if let Some(semester_id) = filter.semester_id {
        qb.push(" AND g.semester_id = ");
        qb.push_bind(semester_id);
    }
    if let Some(subject_code) = filter.subject_code.as_ref() {
        qb.push(" AND g.subject_code = ");
        qb.push_bind(subject_code);
    }
}

fn convert_count(value: i64) -> Result<u64, RepoError> {
    value
        .try_into()
        .map_err(|_| RepoError::from_persistence("count exceeds supported range"))
}

#[derive(sqlx::FromRow)]
struct CountsRow {
    matching_grades: i64,
    matching_students: i64,
}

#[derive(sqlx::FromRow)]
struct JoinedRow {
    grade_id: i64,
    student_id: i64,
    subject_code: String,
    teacher_id: i64,
    semester_id: i64,
    value: Option<f64>,
    student_name: Option<String>,
    student_course: Option<String>,
    student_year_level: Option<i32>,
    subject_found: Option<String>,
    subject_description: Option<String>,
    subject_units: Option<i32>,
    teacher_name: Option<String>,
    semester_term: Option<String>,
    semester_school_year: Option<i32>,
}

impl From<JoinedRow> for GradeLookup {
    fn from(row: JoinedRow) -> Self {
        let student = match (row.student_name, row.student_course, row.student_year_level) {
            (Some(name), Some(course), Some(year_level)) => Some(Student {
                id: row.student_id,
                name,
                course,
                year_level,
            }),
            _ => None,
        };
        let subject = match (row.subject_found, row.subject_description, row.subject_units) {
            (Some(code), Some(description), Some(units)) => Some(Subject {
                code,
                description,
                units,
            }),
            _ => None,
        };
        let teacher = row.teacher_name.map(|name| Teacher {
            id: row.teacher_id,
            name,
        });
        let semester = match (row.semester_term, row.semester_school_year) {
            (Some(term), Some(school_year)) => Some(Semester {
                id: row.semester_id,
                term,
                school_year,
            }),
            _ => None,
        };

        GradeLookup {
            grade: Grade {
                id: row.grade_id,
                student_id: row.student_id,
                subject_code: row.subject_code,
                teacher_id: row.teacher_id,
                semester_id: row.semester_id,
                value: row.value,
            },
            student,
            subject,
            teacher,
            semester,
        }
    }
}

#[async_trait]
impl ClassListStore for PostgresStore {
    async fn select_student_ids(
        &self,
        query: &IdQuery,
        options: &ReadOptions,
    ) -> Result<IdPage, RepoError> {
        let mut tx = self.begin_read(options).await?;

        let mut counts = QueryBuilder::<Postgres>::new(
            "SELECT COUNT(*) AS matching_grades, COUNT(DISTINCT s.id) AS matching_students \
             FROM grades g LEFT JOIN students s ON s.id = g.student_id WHERE TRUE",
        );
        push_grade_filter(&mut counts, &query.filter);
        let counts = counts
            .build_query_as::<CountsRow>()
            .fetch_one(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

        let mut page = QueryBuilder::<Postgres>::new(
            "SELECT s.id FROM students s WHERE EXISTS (\
             SELECT 1 FROM grades g WHERE g.student_id = s.id",
        );
        push_grade_filter(&mut page, &query.filter);
        page.push(") ORDER BY s.name, s.id OFFSET ");
        page.push_bind(i64::try_from(query.offset).unwrap_or(i64::MAX));
        page.push(" LIMIT ");
        page.push_bind(i64::from(query.limit));

        let student_ids = page
            .build_query_scalar::<i64>()
            .fetch_all(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

        tx.commit().await.map_err(map_sqlx_error)?;

        debug!(
            selected = student_ids.len(),
            matching_grades = counts.matching_grades,
            "selected student page"
        );

        Ok(IdPage {
            student_ids,
            matching_grades: convert_count(counts.matching_grades)?,
            matching_students: convert_count(counts.matching_students)?,
        })
    }

    async fn join_details(
        &self,
        query: &JoinQuery,
        options: &ReadOptions,
    ) -> Result<Vec<GradeLookup>, RepoError> {
        if query.student_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut tx = self.begin_read(options).await?;

        let mut qb = QueryBuilder::<Postgres>::new(
            "SELECT g.id AS grade_id, g.student_id, g.subject_code, g.teacher_id, \
             g.semester_id, g.value, \
             s.name AS student_name, s.course AS student_course, \
             s.year_level AS student_year_level, \
             sub.code AS subject_found, sub.description AS subject_description, \
             sub.units AS subject_units, \
             t.name AS teacher_name, \
             sem.term AS semester_term, sem.school_year AS semester_school_year \
             FROM grades g \
             LEFT JOIN students s ON s.id = g.student_id \
             LEFT JOIN subjects sub ON sub.code = g.subject_code \
             LEFT JOIN teachers t ON t.id = g.teacher_id \
             LEFT JOIN semesters sem ON sem.id = g.semester_id \
             WHERE g.student_id = ANY(",
        );
        qb.push_bind(query.student_ids.as_slice());
        qb.push(")");
        push_grade_filter(&mut qb, &query.filter);
        qb.push(" ORDER BY s.name, g.student_id, g.subject_code, g.semester_id, g.id");

        let rows = qb
            .build_query_as::<JoinedRow>()
            .fetch_all(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

        tx.commit().await.map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(GradeLookup::from).collect())
    }

    async fn distinct_subject_codes(
        &self,
        options: &ReadOptions,
    ) -> Result<Vec<String>, RepoError> {
        let mut tx = self.begin_read(options).await?;
        let codes = sqlx::query_scalar::<_, String>(
            "SELECT DISTINCT subject_code FROM grades ORDER BY subject_code",
        )
        .fetch_all(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;
        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(codes)
    }

    async fn distinct_semester_ids(&self, options: &ReadOptions) -> Result<Vec<i64>, RepoError> {
        let mut tx = self.begin_read(options).await?;
        let ids = sqlx::query_scalar::<_, i64>(
            "SELECT DISTINCT semester_id FROM grades ORDER BY semester_id",
        )
        .fetch_all(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;
        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(ids)
    }
}
