use std::error::Error as StdError;
use std::time::Duration;

use axum::{http::StatusCode, response::Response};
use thiserror::Error;

use crate::application::repos::RepoError;
use crate::cache::FlightError;
use crate::infra::error::InfraError;

#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub source: &'static str,
    pub status: StatusCode,
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(source: &'static str, status: StatusCode, error: &dyn StdError) -> Self {
        let mut messages = Vec::new();
        messages.push(error.to_string());
        let mut current = error.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        Self {
            source,
            status,
            messages,
        }
    }

    pub fn from_message(
        source: &'static str,
        status: StatusCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            source,
            status,
            messages: vec![message.into()],
        }
    }

    pub fn attach(self, response: &mut Response) {
        response.extensions_mut().insert(self);
    }
}

/// Failure of a class-list computation or of the caller's wait for one.
///
/// Cloned to every single-flight waiter, so all of them observe the same error.
#[derive(Debug, Clone, Error)]
pub enum ReportError {
    #[error("store unavailable during `{operation}` after {attempts} attempt(s)")]
    TransientStore {
        operation: &'static str,
        attempts: u32,
        source: RepoError,
    },
    #[error("store query `{operation}` failed")]
    Store {
        operation: &'static str,
        source: RepoError,
    },
    #[error("report computation ended without publishing a result")]
    Abandoned,
    #[error("report request timed out after {0:?}")]
    RequestTimeout(Duration),
}

impl ReportError {
    /// Whether the store was unreachable rather than misbehaving.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ReportError::TransientStore { .. } | ReportError::RequestTimeout(_)
        )
    }
}

impl From<FlightError<ReportError>> for ReportError {
    fn from(error: FlightError<ReportError>) -> Self {
        match error {
            FlightError::Compute(shared) => (*shared).clone(),
            FlightError::Abandoned => ReportError::Abandoned,
        }
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error(transparent)]
    Report(#[from] ReportError),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }
}
