use axum::{
    Json,
    extract::{Query, State, rejection::QueryRejection},
    http::StatusCode,
};
use classlist_api_types::{ClassListResponse, FilterOptionsResponse};
use tracing::debug;

use crate::application::filter::RawReportParams;

use super::HttpState;
use super::error::ApiError;

const SOURCE_CLASS_LIST: &str = "infra::http::class_list";
const SOURCE_OPTIONS: &str = "infra::http::filter_options";
const SOURCE_FALLBACK: &str = "infra::http::fallback";

pub async fn class_list(
    State(state): State<HttpState>,
    query: Result<Query<Vec<(String, String)>>, QueryRejection>,
) -> Result<Json<ClassListResponse>, ApiError> {
    let params = match query {
        Ok(Query(pairs)) => RawReportParams::from_pairs(pairs),
        Err(rejection) => {
            debug!(error = %rejection, "unreadable query string; using defaults");
            RawReportParams::default()
        }
    };
    let report = state
        .service
        .report(&params)
        .await
        .map_err(|err| ApiError::from_report(SOURCE_CLASS_LIST, &err))?;
    Ok(Json(report.to_response()))
}

pub async fn filter_options(
    State(state): State<HttpState>,
) -> Result<Json<FilterOptionsResponse>, ApiError> {
    let options = state
        .service
        .filter_options()
        .await
        .map_err(|err| ApiError::from_report(SOURCE_OPTIONS, &err))?;
    Ok(Json(options.to_response()))
}

pub async fn health() -> StatusCode {
    StatusCode::NO_CONTENT
}

pub async fn not_found() -> ApiError {
    ApiError::not_found(SOURCE_FALLBACK)
}
