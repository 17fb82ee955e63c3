//! Request and response shapes for the classlist JSON API.
//!
//! The server builds these from its internal report payload; clients and tests
//! deserialize them.

use serde::{Deserialize, Serialize};

/// Label used on the wire for a row that has no grade yet.
pub const UNGRADED: &str = "ungraded";

/// Body of `GET /api/classlist`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassListResponse {
    pub rows: Vec<ClassListRowView>,
    pub pagination: PaginationView,
    pub stats: StatsView,
    pub summary: Option<ClassSummaryView>,
    pub filters: FiltersView,
    /// Rows dropped from this page because a reference did not resolve.
    pub dropped_rows: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassListRowView {
    pub student_id: i64,
    pub name: String,
    pub course: String,
    pub year_level: i32,
    pub subject_code: String,
    pub description: String,
    pub units: i32,
    pub teacher: String,
    pub grade: GradeView,
    pub semester: String,
}

/// A grade value, or the literal `"ungraded"`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "GradeRepr", into = "GradeRepr")]
pub enum GradeView {
    Graded(f64),
    Ungraded,
}

impl GradeView {
    pub fn value(&self) -> Option<f64> {
        match self {
            GradeView::Graded(value) => Some(*value),
            GradeView::Ungraded => None,
        }
    }
}

impl From<Option<f64>> for GradeView {
    fn from(value: Option<f64>) -> Self {
        value.map_or(Self::Ungraded, Self::Graded)
    }
}

/// Wire shape of [`GradeView`].
#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum GradeRepr {
    Number(f64),
    Label(String),
}

impl From<GradeView> for GradeRepr {
    fn from(grade: GradeView) -> Self {
        match grade {
            GradeView::Graded(value) => GradeRepr::Number(value),
            GradeView::Ungraded => GradeRepr::Label(UNGRADED.to_string()),
        }
    }
}

impl TryFrom<GradeRepr> for GradeView {
    type Error = String;

    fn try_from(repr: GradeRepr) -> Result<Self, Self::Error> {
        match repr {
            GradeRepr::Number(value) => Ok(GradeView::Graded(value)),
            GradeRepr::Label(label) if label == UNGRADED => Ok(GradeView::Ungraded),
            GradeRepr::Label(label) => Err(format!(
                "expected a number or \"{UNGRADED}\", found \"{label}\""
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaginationView {
    pub page: u32,
    pub page_size: u32,
    pub total_pages: u64,
    pub total_matching: u64,
    pub total_students: u64,
    pub has_next: bool,
    pub has_prev: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsView {
    /// Mean of graded rows rounded to two decimals; `null` when nothing is graded.
    pub average: Option<f64>,
    pub weighted_average: Option<f64>,
    pub above_average: usize,
    pub below_average: usize,
    pub graded: usize,
    pub enrolled: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassSummaryView {
    pub instructor: String,
    pub subject_code: String,
    pub subject: String,
    pub semester: String,
}

/// Echo of the normalized filter; `null` means "any".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FiltersView {
    pub semester: Option<i64>,
    pub subject: Option<String>,
}

/// Body of `GET /api/classlist/options`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterOptionsResponse {
    pub subjects: Vec<String>,
    pub semesters: Vec<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiErrorBody {
    pub error: ApiErrorMessage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiErrorMessage {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}
