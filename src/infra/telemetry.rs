use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

const COUNTERS: &[(&str, &str)] = &[
    (
        "classlist_cache_hit_total",
        "Requests answered from a fresh cache entry.",
    ),
    (
        "classlist_cache_miss_total",
        "Requests that started a new computation.",
    ),
    (
        "classlist_cache_coalesced_total",
        "Requests that joined a computation already in flight.",
    ),
    (
        "classlist_cache_evict_total",
        "Entries evicted because the cache was full.",
    ),
    (
        "classlist_cache_expired_total",
        "Entries dropped after their TTL elapsed.",
    ),
    (
        "classlist_join_gaps_total",
        "Grades dropped because a referenced record was missing.",
    ),
    (
        "classlist_store_retry_total",
        "Store calls retried after a transient failure.",
    ),
];

/// Install the process-wide subscriber: env filter, span traces for errors,
/// then compact or JSON output.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let output = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_span_list(false)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(output)
        .try_init()
        .map_err(|err| InfraError::telemetry(format!("subscriber already installed: {err}")))
}

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        for (name, description) in COUNTERS {
            describe_counter!(*name, Unit::Count, *description);
        }
        describe_histogram!(
            "classlist_report_compute_ms",
            Unit::Milliseconds,
            "Time spent computing a cached value."
        );
    });
}
