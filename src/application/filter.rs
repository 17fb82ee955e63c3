//! Filter normalization.
//!
//! Raw request parameters are reduced to a [`FilterSignature`], the only key the
//! report cache ever sees. Malformed input falls back to "any" or the default and
//! is never surfaced to the caller.

use std::fmt;

use thiserror::Error;
use tracing::debug;

use crate::application::repos::GradeFilter;

pub const DEFAULT_PAGE_SIZE: u32 = 25;
pub const MAX_PAGE_SIZE: u32 = 50;

const ALL_SEMESTERS_SENTINEL: &str = "-- all semesters --";
const ALL_SUBJECTS_SENTINEL: &str = "-- all subjects --";

/// Unnormalized query parameters as received from the HTTP surface or CLI.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawReportParams {
    pub semester: Option<String>,
    pub subject: Option<String>,
    pub page: Option<String>,
    pub page_size: Option<String>,
}

impl RawReportParams {
    /// Fold raw query pairs into parameters. A repeated key keeps its last
    /// value; `pageSize`, `page_size` and `limit` name the same field.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut params = Self::default();
        for (key, value) in pairs {
            let slot = match key.as_ref() {
                "semester" => &mut params.semester,
                "subject" => &mut params.subject,
                "page" => &mut params.page,
                "pageSize" | "page_size" | "limit" => &mut params.page_size,
                other => {
                    debug!(key = other, "ignoring unknown report parameter");
                    continue;
                }
            };
            *slot = Some(value.into());
        }
        params
    }
}

/// Default and ceiling for the page size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageLimits {
    pub default_size: u32,
    pub max_size: u32,
}

impl Default for PageLimits {
    fn default() -> Self {
        Self {
            default_size: DEFAULT_PAGE_SIZE,
            max_size: MAX_PAGE_SIZE,
        }
    }
}

impl From<&crate::config::ReportSettings> for PageLimits {
    fn from(settings: &crate::config::ReportSettings) -> Self {
        Self {
            default_size: settings.default_page_size.get(),
            max_size: settings.max_page_size.get(),
        }
    }
}

/// Which of the two optional predicates are present.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FilterScope {
    All,
    Semester(i64),
    Subject(String),
    SemesterSubject(i64, String),
}

impl FilterScope {
    pub fn new(semester: Option<i64>, subject: Option<String>) -> Self {
        match (semester, subject) {
            (None, None) => FilterScope::All,
            (Some(semester), None) => FilterScope::Semester(semester),
            (None, Some(subject)) => FilterScope::Subject(subject),
            (Some(semester), Some(subject)) => FilterScope::SemesterSubject(semester, subject),
        }
    }

    pub fn semester(&self) -> Option<i64> {
        match self {
            FilterScope::Semester(id) | FilterScope::SemesterSubject(id, _) => Some(*id),
            FilterScope::All | FilterScope::Subject(_) => None,
        }
    }

    pub fn subject(&self) -> Option<&str> {
        match self {
            FilterScope::Subject(code) | FilterScope::SemesterSubject(_, code) => {
                Some(code.as_str())
            }
            FilterScope::All | FilterScope::Semester(_) => None,
        }
    }

    pub fn to_grade_filter(&self) -> GradeFilter {
        GradeFilter {
            semester_id: self.semester(),
            subject_code: self.subject().map(str::to_string),
        }
    }
}

/// Canonical, order-independent key for one report page.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FilterSignature {
    pub scope: FilterScope,
    /// One-based page number.
    pub page: u32,
    pub page_size: u32,
}

impl FilterSignature {
    pub fn new(scope: FilterScope, page: u32, page_size: u32) -> Self {
        Self {
            scope,
            page: page.max(1),
            page_size: page_size.max(1),
        }
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.page_size)
    }
}

impl fmt::Display for FilterSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.scope.semester() {
            Some(id) => write!(f, "semester={id}")?,
            None => f.write_str("semester=any")?,
        }
        match self.scope.subject() {
            Some(code) => write!(f, ",subject={code}")?,
            None => f.write_str(",subject=any")?,
        }
        write!(f, ",page={},size={}", self.page, self.page_size)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("semester `{0}` is not a numeric identifier")]
    InvalidSemester(String),
    #[error("page `{0}` is not a positive integer")]
    InvalidPage(String),
    #[error("page size `{0}` is not a positive integer")]
    InvalidPageSize(String),
}

/// Reduce raw parameters to a signature, defaulting anything malformed.
pub fn normalize(raw: &RawReportParams, limits: PageLimits) -> FilterSignature {
    let semester = absorb("semester", parse_semester(raw.semester.as_deref())).flatten();
    let subject = parse_subject(raw.subject.as_deref());
    let page = absorb("page", parse_positive(raw.page.as_deref(), ValidationError::InvalidPage))
        .flatten()
        .unwrap_or(1);
    let page_size = absorb(
        "page_size",
        parse_positive(raw.page_size.as_deref(), ValidationError::InvalidPageSize),
    )
    .flatten()
    .unwrap_or(limits.default_size)
    .min(limits.max_size);

    FilterSignature::new(FilterScope::new(semester, subject), page, page_size)
}

fn absorb<T>(field: &'static str, parsed: Result<T, ValidationError>) -> Option<T> {
    match parsed {
        Ok(value) => Some(value),
        Err(error) => {
            debug!(field, error = %error, "ignoring malformed filter parameter");
            None
        }
    }
}

fn is_wildcard(value: &str, sentinel: &str) -> bool {
    value.is_empty()
        || value.eq_ignore_ascii_case("any")
        || value.eq_ignore_ascii_case("all")
        || value.eq_ignore_ascii_case(sentinel)
}

fn parse_semester(raw: Option<&str>) -> Result<Option<i64>, ValidationError> {
    let Some(value) = raw.map(str::trim) else {
        return Ok(None);
    };
    if is_wildcard(value, ALL_SEMESTERS_SENTINEL) {
        return Ok(None);
    }
    value
        .parse::<i64>()
        .map(Some)
        .map_err(|_| ValidationError::InvalidSemester(value.to_string()))
}

fn parse_subject(raw: Option<&str>) -> Option<String> {
    let value = raw?.trim();
    (!is_wildcard(value, ALL_SUBJECTS_SENTINEL)).then(|| value.to_string())
}

fn parse_positive(
    raw: Option<&str>,
    invalid: fn(String) -> ValidationError,
) -> Result<Option<u32>, ValidationError> {
    let Some(value) = raw.map(str::trim).filter(|value| !value.is_empty()) else {
        return Ok(None);
    };
    match value.parse::<u32>() {
        Ok(0) | Err(_) => Err(invalid(value.to_string())),
        Ok(parsed) => Ok(Some(parsed)),
    }
}
