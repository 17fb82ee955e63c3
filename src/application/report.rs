//! Class-list report service: normalizer, cache, engine and statistics.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use classlist_api_types::{
    ClassListResponse, ClassListRowView, ClassSummaryView, FilterOptionsResponse, FiltersView,
    PaginationView, StatsView,
};
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::application::aggregation::TwoPhaseAggregator;
use crate::application::error::ReportError;
use crate::application::filter::{FilterSignature, PageLimits, RawReportParams, normalize};
use crate::application::pagination::PaginationMeta;
use crate::application::repos::ClassListStore;
use crate::application::resilience::ResiliencePolicy;
use crate::cache::{CacheConfig, FlightError, TtlCache};
use crate::domain::entities::ClassListRow;
use crate::domain::stats::{ClassStats, compute_stats, round2};

const REPORT_CACHE: &str = "report";
const OPTIONS_CACHE: &str = "options";

/// Teacher, subject and semester shown above a class list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassSummary {
    pub instructor: String,
    pub subject_code: String,
    pub subject: String,
    pub semester: String,
}

impl ClassSummary {
    fn from_row(row: &ClassListRow) -> Self {
        Self {
            instructor: row.teacher_name.clone(),
            subject_code: row.subject_code.clone(),
            subject: row.subject_description.clone(),
            semester: row.semester_label.clone(),
        }
    }
}

/// One computed page, as stored in the report cache.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassListReport {
    #[serde(skip)]
    pub signature: FilterSignature,
    pub rows: Vec<ClassListRow>,
    pub stats: ClassStats,
    pub pagination: PaginationMeta,
    pub summary: Option<ClassSummary>,
    pub dropped_rows: usize,
}

impl ClassListReport {
    pub fn to_response(&self) -> ClassListResponse {
        ClassListResponse {
            rows: self.rows.iter().map(row_view).collect(),
            pagination: PaginationView {
                page: self.pagination.page,
                page_size: self.pagination.page_size,
                total_pages: self.pagination.total_pages,
                total_matching: self.pagination.total_matching,
                total_students: self.pagination.total_students,
                has_next: self.pagination.has_next(),
                has_prev: self.pagination.has_prev(),
            },
            stats: StatsView {
                average: self.stats.average.map(round2),
                weighted_average: self.stats.weighted_average.map(round2),
                above_average: self.stats.above_average,
                below_average: self.stats.below_average,
                graded: self.stats.graded,
                enrolled: self.stats.enrolled,
            },
            summary: self.summary.as_ref().map(|summary| ClassSummaryView {
                instructor: summary.instructor.clone(),
                subject_code: summary.subject_code.clone(),
                subject: summary.subject.clone(),
                semester: summary.semester.clone(),
            }),
            filters: FiltersView {
                semester: self.signature.scope.semester(),
                subject: self.signature.scope.subject().map(str::to_string),
            },
            dropped_rows: self.dropped_rows,
        }
    }
}

fn row_view(row: &ClassListRow) -> ClassListRowView {
    ClassListRowView {
        student_id: row.student_id,
        name: row.student_name.clone(),
        course: row.course.clone(),
        year_level: row.year_level,
        subject_code: row.subject_code.clone(),
        description: row.subject_description.clone(),
        units: row.units,
        teacher: row.teacher_name.clone(),
        grade: row.grade.into(),
        semester: row.semester_label.clone(),
    }
}

/// Values for the subject and semester drop-downs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FilterOptions {
    pub subjects: Vec<String>,
    pub semesters: Vec<i64>,
}

impl FilterOptions {
    pub fn to_response(&self) -> FilterOptionsResponse {
        FilterOptionsResponse {
            subjects: self.subjects.clone(),
            semesters: self.semesters.clone(),
        }
    }
}

/// Entry point for class-list reads.
///
/// Owns both caches; every request is bounded by `request_timeout` on the
/// caller's side only.
#[derive(Clone)]
pub struct ClassListService {
    aggregator: TwoPhaseAggregator,
    reports: TtlCache<FilterSignature, ClassListReport, ReportError>,
    options: TtlCache<(), FilterOptions, ReportError>,
    limits: PageLimits,
    request_timeout: Duration,
}

impl ClassListService {
    pub fn new(
        store: Arc<dyn ClassListStore>,
        policy: ResiliencePolicy,
        cache: &CacheConfig,
        limits: PageLimits,
        request_timeout: Duration,
    ) -> Self {
        Self {
            aggregator: TwoPhaseAggregator::new(store, policy),
            reports: TtlCache::new(REPORT_CACHE, cache),
            options: TtlCache::new(OPTIONS_CACHE, cache),
            limits,
            request_timeout,
        }
    }

    pub fn from_settings(store: Arc<dyn ClassListStore>, settings: &crate::config::Settings) -> Self {
        Self::new(
            store,
            ResiliencePolicy::from(&settings.resilience),
            &CacheConfig::from(&settings.cache),
            PageLimits::from(&settings.report),
            settings.report.request_timeout,
        )
    }

    pub fn normalize(&self, raw: &RawReportParams) -> FilterSignature {
        normalize(raw, self.limits)
    }

    /// Normalize `raw` and return its page.
    pub async fn report(&self, raw: &RawReportParams) -> Result<Arc<ClassListReport>, ReportError> {
        self.report_for(self.normalize(raw)).await
    }

    #[instrument(skip(self), fields(signature = %signature))]
    pub async fn report_for(
        &self,
        signature: FilterSignature,
    ) -> Result<Arc<ClassListReport>, ReportError> {
        let aggregator = self.aggregator.clone();
        let key = signature.clone();
        let lookup = self.reports.get_or_compute(signature, move || async move {
            build_report(&aggregator, key).await
        });
        self.bounded(lookup).await
    }

    #[instrument(skip(self))]
    pub async fn filter_options(&self) -> Result<Arc<FilterOptions>, ReportError> {
        let aggregator = self.aggregator.clone();
        let lookup = self.options.get_or_compute((), move || async move {
            load_filter_options(&aggregator).await
        });
        self.bounded(lookup).await
    }

    /// Drop every cached report and option list.
    pub fn invalidate_all(&self) {
        self.reports.invalidate_all();
        self.options.invalidate_all();
        info!("class list caches invalidated");
    }

    /// Remove expired entries from both caches.
    pub fn sweep_expired(&self) -> usize {
        self.reports.sweep_expired() + self.options.sweep_expired()
    }

    pub fn cached_reports(&self) -> usize {
        self.reports.len()
    }

    async fn bounded<T>(
        &self,
        lookup: impl Future<Output = Result<Arc<T>, FlightError<ReportError>>>,
    ) -> Result<Arc<T>, ReportError> {
        match tokio::time::timeout(self.request_timeout, lookup).await {
            Ok(result) => result.map_err(ReportError::from),
            Err(_) => {
                warn!(
                    timeout_ms = self.request_timeout.as_millis() as u64,
                    "request gave up waiting for class list"
                );
                Err(ReportError::RequestTimeout(self.request_timeout))
            }
        }
    }
}

async fn build_report(
    aggregator: &TwoPhaseAggregator,
    signature: FilterSignature,
) -> Result<ClassListReport, ReportError> {
    let page = aggregator.fetch_page(&signature).await?;
    let stats = compute_stats(&page.rows);
    let pagination = PaginationMeta::new(&signature, page.total_matching, page.total_students);
    let summary = page.rows.first().map(ClassSummary::from_row);

    Ok(ClassListReport {
        signature,
        rows: page.rows,
        stats,
        pagination,
        summary,
        dropped_rows: page.dropped_rows,
    })
}

async fn load_filter_options(aggregator: &TwoPhaseAggregator) -> Result<FilterOptions, ReportError> {
    let store = aggregator.store();
    let policy = aggregator.policy();

    let (mut subjects, mut semesters) = tokio::try_join!(
        policy.run("options.subjects", |options| async move {
            store.distinct_subject_codes(&options).await
        }),
        policy.run("options.semesters", |options| async move {
            store.distinct_semester_ids(&options).await
        }),
    )?;

    subjects.sort();
    subjects.dedup();
    semesters.sort_unstable();
    semesters.dedup();

    Ok(FilterOptions {
        subjects,
        semesters,
    })
}
