//! Test-local store wrappers and a small enrollment dataset.

#![allow(dead_code)]

use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use classlist::application::filter::PageLimits;
use classlist::application::report::ClassListService;
use classlist::application::repos::{
    ClassListStore, GradeLookup, IdPage, IdQuery, JoinQuery, ReadOptions, RepoError,
};
use classlist::application::resilience::ResiliencePolicy;
use classlist::cache::CacheConfig;
use classlist::infra::memory::{Dataset, InMemoryStore};

/// Two CS101 sections in semester 1, one CS102 section in semester 2.
///
/// Grade 9 belongs to student 99, which does not exist. Grade 10 references
/// teacher 77, which does not exist either.
pub fn fixture() -> Dataset {
    serde_json::from_value(serde_json::json!({
        "students": [
            { "id": 1, "name": "Dizon", "course": "BSCS", "year_level": 1 },
            { "id": 2, "name": "Abad", "course": "BSIT", "year_level": 2 },
            { "id": 3, "name": "Cruz", "course": "BSCS", "year_level": 1 },
            { "id": 4, "name": "Bautista", "course": "BSCS", "year_level": 3 },
            { "id": 5, "name": "Evangelista", "course": "BSIT", "year_level": 1 }
        ],
        "subjects": [
            { "code": "CS101", "description": "Intro to Computing", "units": 3 },
            { "code": "CS102", "description": "Programming 1", "units": 4 }
        ],
        "teachers": [
            { "id": 10, "name": "Reyes" },
            { "id": 11, "name": "Santos" }
        ],
        "semesters": [
            { "id": 1, "term": "FirstSem", "school_year": 2023 },
            { "id": 2, "term": "SecondSem", "school_year": 2023 }
        ],
        "grades": [
            { "id": 1, "student_id": 1, "subject_code": "CS101", "teacher_id": 10, "semester_id": 1, "value": 1.5 },
            { "id": 2, "student_id": 2, "subject_code": "CS101", "teacher_id": 10, "semester_id": 1, "value": 1.0 },
            { "id": 3, "student_id": 3, "subject_code": "CS101", "teacher_id": 10, "semester_id": 1, "value": 2.5 },
            { "id": 4, "student_id": 4, "subject_code": "CS101", "teacher_id": 10, "semester_id": 1 },
            { "id": 5, "student_id": 1, "subject_code": "CS102", "teacher_id": 11, "semester_id": 2, "value": 2.0 },
            { "id": 6, "student_id": 2, "subject_code": "CS102", "teacher_id": 11, "semester_id": 2, "value": 1.75 },
            { "id": 7, "student_id": 5, "subject_code": "CS102", "teacher_id": 11, "semester_id": 2, "value": 3.0 },
            { "id": 8, "student_id": 5, "subject_code": "CS101", "teacher_id": 10, "semester_id": 1, "value": 1.25 },
            { "id": 9, "student_id": 99, "subject_code": "CS101", "teacher_id": 10, "semester_id": 1, "value": 2.0 },
            { "id": 10, "student_id": 3, "subject_code": "CS102", "teacher_id": 77, "semester_id": 2, "value": 1.5 }
        ]
    }))
    .expect("fixture dataset")
}

pub fn fast_policy() -> ResiliencePolicy {
    ResiliencePolicy {
        operation_timeout: Duration::from_secs(5),
        max_retries: 2,
        backoff_base: Duration::from_millis(1),
        backoff_max: Duration::from_millis(4),
        ..ResiliencePolicy::default()
    }
}

pub fn service(store: Arc<dyn ClassListStore>) -> ClassListService {
    service_with(store, CacheConfig::default(), Duration::from_secs(30))
}

pub fn service_with(
    store: Arc<dyn ClassListStore>,
    cache: CacheConfig,
    request_timeout: Duration,
) -> ClassListService {
    ClassListService::new(
        store,
        fast_policy(),
        &cache,
        PageLimits::default(),
        request_timeout,
    )
}

/// Counts calls per phase before delegating.
pub struct Counting<S> {
    inner: S,
    selects: AtomicUsize,
    joins: AtomicUsize,
    option_reads: AtomicUsize,
}

impl<S> Counting<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            selects: AtomicUsize::new(0),
            joins: AtomicUsize::new(0),
            option_reads: AtomicUsize::new(0),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn selects(&self) -> usize {
        self.selects.load(Ordering::SeqCst)
    }

    pub fn joins(&self) -> usize {
        self.joins.load(Ordering::SeqCst)
    }

    pub fn option_reads(&self) -> usize {
        self.option_reads.load(Ordering::SeqCst)
    }

    pub fn total(&self) -> usize {
        self.selects() + self.joins() + self.option_reads()
    }
}

#[async_trait]
impl<S: ClassListStore> ClassListStore for Counting<S> {
    async fn select_student_ids(
        &self,
        query: &IdQuery,
        options: &ReadOptions,
    ) -> Result<IdPage, RepoError> {
        self.selects.fetch_add(1, Ordering::SeqCst);
        self.inner.select_student_ids(query, options).await
    }

    async fn join_details(
        &self,
        query: &JoinQuery,
        options: &ReadOptions,
    ) -> Result<Vec<GradeLookup>, RepoError> {
        self.joins.fetch_add(1, Ordering::SeqCst);
        self.inner.join_details(query, options).await
    }

    async fn distinct_subject_codes(
        &self,
        options: &ReadOptions,
    ) -> Result<Vec<String>, RepoError> {
        self.option_reads.fetch_add(1, Ordering::SeqCst);
        self.inner.distinct_subject_codes(options).await
    }

    async fn distinct_semester_ids(&self, options: &ReadOptions) -> Result<Vec<i64>, RepoError> {
        self.option_reads.fetch_add(1, Ordering::SeqCst);
        self.inner.distinct_semester_ids(options).await
    }
}

/// Reports every read as unavailable while the outage flag is set.
pub struct Failing<S> {
    inner: S,
    outage: AtomicBool,
}

impl<S> Failing<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            outage: AtomicBool::new(false),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn set_outage(&self, down: bool) {
        self.outage.store(down, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), RepoError> {
        if self.outage.load(Ordering::SeqCst) {
            Err(RepoError::unavailable("connection refused"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl<S: ClassListStore> ClassListStore for Failing<S> {
    async fn select_student_ids(
        &self,
        query: &IdQuery,
        options: &ReadOptions,
    ) -> Result<IdPage, RepoError> {
        self.check()?;
        self.inner.select_student_ids(query, options).await
    }

    async fn join_details(
        &self,
        query: &JoinQuery,
        options: &ReadOptions,
    ) -> Result<Vec<GradeLookup>, RepoError> {
        self.check()?;
        self.inner.join_details(query, options).await
    }

    async fn distinct_subject_codes(
        &self,
        options: &ReadOptions,
    ) -> Result<Vec<String>, RepoError> {
        self.check()?;
        self.inner.distinct_subject_codes(options).await
    }

    async fn distinct_semester_ids(&self, options: &ReadOptions) -> Result<Vec<i64>, RepoError> {
        self.check()?;
        self.inner.distinct_semester_ids(options).await
    }
}

/// Holds phase-one reads until the gate is opened.
pub struct Gated<S> {
    inner: S,
    open: watch::Sender<bool>,
    arrived: AtomicUsize,
}

impl<S> Gated<S> {
    pub fn new(inner: S) -> Self {
        let (open, _) = watch::channel(false);
        Self {
            inner,
            open,
            arrived: AtomicUsize::new(0),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn open(&self) {
        self.open.send_replace(true);
    }

    /// Number of phase-one reads that reached the gate.
    pub fn arrived(&self) -> usize {
        self.arrived.load(Ordering::SeqCst)
    }

    async fn wait(&self) {
        self.arrived.fetch_add(1, Ordering::SeqCst);
        let mut open = self.open.subscribe();
        let _ = open.wait_for(|open| *open).await;
    }
}

#[async_trait]
impl<S: ClassListStore> ClassListStore for Gated<S> {
    async fn select_student_ids(
        &self,
        query: &IdQuery,
        options: &ReadOptions,
    ) -> Result<IdPage, RepoError> {
        self.wait().await;
        self.inner.select_student_ids(query, options).await
    }

    async fn join_details(
        &self,
        query: &JoinQuery,
        options: &ReadOptions,
    ) -> Result<Vec<GradeLookup>, RepoError> {
        self.inner.join_details(query, options).await
    }

    async fn distinct_subject_codes(
        &self,
        options: &ReadOptions,
    ) -> Result<Vec<String>, RepoError> {
        self.inner.distinct_subject_codes(options).await
    }

    async fn distinct_semester_ids(&self, options: &ReadOptions) -> Result<Vec<i64>, RepoError> {
        self.inner.distinct_semester_ids(options).await
    }
}

pub fn memory() -> InMemoryStore {
    InMemoryStore::new(fixture())
}

/// Poll until `condition` holds, yielding to other tasks in between.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..1_000 {
        if condition() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition never became true");
}
