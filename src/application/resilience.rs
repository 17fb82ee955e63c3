//! Timeout, retry and read-routing rules applied to every store round trip.

use std::{future::Future, str::FromStr, time::Duration};

use metrics::counter;
use tracing::{debug, warn};

use crate::application::error::ReportError;
use crate::application::repos::{ReadOptions, RepoError};

const METRIC_STORE_RETRY_TOTAL: &str = "classlist_store_retry_total";

/// Which member of a replica set may serve a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadPreference {
    Primary,
    PrimaryPreferred,
    Secondary,
    #[default]
    SecondaryPreferred,
    Nearest,
}

impl ReadPreference {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReadPreference::Primary => "primary",
            ReadPreference::PrimaryPreferred => "primary_preferred",
            ReadPreference::Secondary => "secondary",
            ReadPreference::SecondaryPreferred => "secondary_preferred",
            ReadPreference::Nearest => "nearest",
        }
    }

    /// Whether replicas are tried before the primary.
    pub fn prefers_replicas(&self) -> bool {
        matches!(
            self,
            ReadPreference::Secondary | ReadPreference::SecondaryPreferred | ReadPreference::Nearest
        )
    }

    /// Whether the read may fail over to the other tier.
    pub fn allows_failover(&self) -> bool {
        !matches!(self, ReadPreference::Primary | ReadPreference::Secondary)
    }
}

impl FromStr for ReadPreference {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "primary" => Ok(ReadPreference::Primary),
            "primary_preferred" | "primarypreferred" => Ok(ReadPreference::PrimaryPreferred),
            "secondary" => Ok(ReadPreference::Secondary),
            "secondary_preferred" | "secondarypreferred" => Ok(ReadPreference::SecondaryPreferred),
            "nearest" => Ok(ReadPreference::Nearest),
            other => Err(format!("unknown read preference `{other}`")),
        }
    }
}

/// Consistency guarantee requested for a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadConcern {
    #[default]
    Local,
    Available,
    Majority,
    Linearizable,
    Snapshot,
}

impl ReadConcern {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReadConcern::Local => "local",
            ReadConcern::Available => "available",
            ReadConcern::Majority => "majority",
            ReadConcern::Linearizable => "linearizable",
            ReadConcern::Snapshot => "snapshot",
        }
    }
}

impl FromStr for ReadConcern {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(ReadConcern::Local),
            "available" => Ok(ReadConcern::Available),
            "majority" => Ok(ReadConcern::Majority),
            "linearizable" => Ok(ReadConcern::Linearizable),
            "snapshot" => Ok(ReadConcern::Snapshot),
            other => Err(format!("unknown read concern `{other}`")),
        }
    }
}

/// Uniform wrapper for store calls, independent of query shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResiliencePolicy {
    pub operation_timeout: Duration,
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub read_preference: ReadPreference,
    pub read_concern: ReadConcern,
}

impl Default for ResiliencePolicy {
    fn default() -> Self {
        Self {
            operation_timeout: Duration::from_secs(5),
            max_retries: 2,
            backoff_base: Duration::from_millis(100),
            backoff_max: Duration::from_secs(2),
            read_preference: ReadPreference::SecondaryPreferred,
            read_concern: ReadConcern::Local,
        }
    }
}

impl From<&crate::config::ResilienceSettings> for ResiliencePolicy {
    fn from(settings: &crate::config::ResilienceSettings) -> Self {
        Self {
            operation_timeout: settings.operation_timeout,
            max_retries: settings.max_retries,
            backoff_base: settings.backoff,
            backoff_max: settings.backoff_max,
            read_preference: settings.read_preference,
            read_concern: settings.read_concern,
        }
    }
}

impl ResiliencePolicy {
    pub fn read_options(&self) -> ReadOptions {
        ReadOptions {
            preference: self.read_preference,
            concern: self.read_concern,
            timeout: self.operation_timeout,
        }
    }

    /// Delay before retry number `retry` (zero-based), doubling up to `backoff_max`.
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let factor = 1_u32.checked_shl(retry).unwrap_or(u32::MAX);
        self.backoff_base
            .checked_mul(factor)
            .unwrap_or(self.backoff_max)
            .min(self.backoff_max)
    }

    /// Run `call` under the operation timeout, retrying transient failures.
    pub async fn run<T, F, Fut>(&self, operation: &'static str, mut call: F) -> Result<T, ReportError>
    where
        F: FnMut(ReadOptions) -> Fut,
        Fut: Future<Output = Result<T, RepoError>>,
    {
        let options = self.read_options();
        let mut retry = 0_u32;

        loop {
            let attempt = retry + 1;
            let outcome = match tokio::time::timeout(self.operation_timeout, call(options)).await {
                Ok(result) => result,
                Err(_) => Err(RepoError::Timeout),
            };

            let error = match outcome {
                Ok(value) => {
                    if retry > 0 {
                        debug!(operation, attempt, "store call recovered after retry");
                    }
                    return Ok(value);
                }
                Err(error) => error,
            };

            if !error.is_transient() {
                return Err(ReportError::Store {
                    operation,
                    source: error,
                });
            }

            if retry >= self.max_retries {
                warn!(
                    operation,
                    attempts = attempt,
                    error = %error,
                    "store call failed after exhausting retries"
                );
                return Err(ReportError::TransientStore {
                    operation,
                    attempts: attempt,
                    source: error,
                });
            }

            let delay = self.backoff_for(retry);
            warn!(
                operation,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "transient store failure, retrying"
            );
            counter!(METRIC_STORE_RETRY_TOTAL, "operation" => operation).increment(1);
            tokio::time::sleep(delay).await;
            retry += 1;
        }
    }
}
