use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use classlist_api_types::{ApiErrorBody, ApiErrorMessage};

use crate::application::error::{ErrorReport, ReportError};

pub mod codes {
    pub const NOT_FOUND: &str = "not_found";
    pub const STORE_UNAVAILABLE: &str = "store_unavailable";
    pub const REQUEST_TIMEOUT: &str = "request_timeout";
    pub const STORE_ERROR: &str = "store_error";
    pub const ABANDONED: &str = "computation_abandoned";
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: &'static str,
    hint: Option<String>,
    report: ErrorReport,
}

impl ApiError {
    pub fn new(
        source: &'static str,
        status: StatusCode,
        code: &'static str,
        message: &'static str,
        hint: Option<String>,
    ) -> Self {
        let report = ErrorReport::from_message(
            source,
            status,
            format!("{code}: {}", hint.as_deref().unwrap_or(message)),
        );
        Self {
            status,
            code,
            message,
            hint,
            report,
        }
    }

    pub fn not_found(source: &'static str) -> Self {
        Self::new(
            source,
            StatusCode::NOT_FOUND,
            codes::NOT_FOUND,
            "Resource not found",
            None,
        )
    }

    /// Map a report failure; the full error chain goes to the log, not the body.
    pub fn from_report(source: &'static str, error: &ReportError) -> Self {
        let (status, code, message, hint) = match error {
            ReportError::TransientStore { .. } => (
                StatusCode::SERVICE_UNAVAILABLE,
                codes::STORE_UNAVAILABLE,
                "Class list store is unavailable",
                Some("retry shortly".to_string()),
            ),
            ReportError::RequestTimeout(timeout) => (
                StatusCode::GATEWAY_TIMEOUT,
                codes::REQUEST_TIMEOUT,
                "Class list request timed out",
                Some(format!("gave up after {} ms", timeout.as_millis())),
            ),
            ReportError::Store { .. } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                codes::STORE_ERROR,
                "Class list query failed",
                None,
            ),
            ReportError::Abandoned => (
                StatusCode::INTERNAL_SERVER_ERROR,
                codes::ABANDONED,
                "Class list computation was abandoned",
                None,
            ),
        };

        Self {
            status,
            code,
            message,
            hint,
            report: ErrorReport::from_error(source, status, error),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn code(&self) -> &'static str {
        self.code
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiErrorBody {
            error: ApiErrorMessage {
                code: self.code.to_string(),
                message: self.message.to_string(),
                hint: self.hint,
            },
        };
        let mut response = (self.status, Json(body)).into_response();
        self.report.attach(&mut response);
        response
    }
}
