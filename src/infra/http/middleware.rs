use axum::{body::Body, http::Request, middleware::Next, response::Response};
use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::application::error::ErrorReport;

const LOG_TARGET: &str = "classlist::http::response";

/// Log every response; failures carry the attached [`ErrorReport`] chain.
pub async fn log_responses(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    let query = request.uri().query().map(str::to_owned);
    let started = Instant::now();

    let mut response = next.run(request).await;
    let status = response.status().as_u16();
    let elapsed_ms = started.elapsed().as_millis() as u64;
    let query = query.as_deref().unwrap_or("");

    let Some(report) = response.extensions_mut().remove::<ErrorReport>() else {
        if response.status().is_server_error() {
            error!(target: LOG_TARGET, status, %method, path = %path, query, elapsed_ms, "request failed without a report");
        } else {
            debug!(target: LOG_TARGET, status, %method, path = %path, query, elapsed_ms, "request served");
        }
        return response;
    };

    let headline = report.messages.first().map(String::as_str).unwrap_or("");
    if report.status.is_server_error() {
        error!(
            target: LOG_TARGET,
            status,
            %method,
            path = %path,
            query,
            elapsed_ms,
            source = report.source,
            headline,
            chain = ?report.messages,
            "request failed"
        );
    } else {
        warn!(
            target: LOG_TARGET,
            status,
            %method,
            path = %path,
            query,
            elapsed_ms,
            source = report.source,
            headline,
            "request rejected"
        );
    }

    response
}
