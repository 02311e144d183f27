//! Ingestion daemon configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[cfg(feature = "typescript")]
use ts_rs::TS;

use crate::dedup::{DEFAULT_SIMILARITY_WINDOW, SIMILARITY_THRESHOLD};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Sleep between cycles in seconds
    #[serde(default = "default_cycle_interval")]
    pub cycle_interval_secs: u64,

    /// Questions requested per category per cycle
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Generation batches allowed in flight at once
    #[serde(default = "default_concurrent_batches")]
    pub concurrent_batches: usize,

    /// Start the daemon as soon as the process is up
    #[serde(default)]
    pub auto_start: bool,

    /// Per-call generation timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// How long stop() waits for in-flight work before aborting it
    #[serde(default = "default_stop_grace")]
    pub stop_grace_ms: u64,

    /// Backoff before the single store retry
    #[serde(default = "default_store_retry")]
    pub store_retry_ms: u64,

    /// Recent token sets compared per category
    #[serde(default = "default_similarity_window")]
    pub similarity_window: usize,

    /// Run records included in a status snapshot
    #[serde(default = "default_status_run_limit")]
    pub status_run_limit: usize,

    /// Stored questions replayed into the dedup index at first start
    #[serde(default = "default_seed_limit")]
    pub seed_limit: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            cycle_interval_secs: default_cycle_interval(),
            batch_size: default_batch_size(),
            concurrent_batches: default_concurrent_batches(),
            auto_start: false,
            request_timeout_secs: default_request_timeout(),
            stop_grace_ms: default_stop_grace(),
            store_retry_ms: default_store_retry(),
            similarity_window: default_similarity_window(),
            status_run_limit: default_status_run_limit(),
            seed_limit: default_seed_limit(),
        }
    }
}

fn default_cycle_interval() -> u64 { 60 }
fn default_batch_size() -> usize { 10 }
fn default_concurrent_batches() -> usize { 5 }
fn default_request_timeout() -> u64 { 60 }
fn default_stop_grace() -> u64 { 5_000 }
fn default_store_retry() -> u64 { 250 }
fn default_similarity_window() -> usize { DEFAULT_SIMILARITY_WINDOW }
fn default_status_run_limit() -> usize { 20 }
fn default_seed_limit() -> usize { 10_000 }

impl IngestConfig {
    pub fn cycle_interval(&self) -> Duration {
        Duration::from_secs(self.cycle_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }

    pub fn store_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.store_retry_ms)
    }

    /// Concurrency limit, never below one.
    pub fn max_in_flight(&self) -> usize {
        self.concurrent_batches.max(1)
    }

    /// Config block for the status view.
    pub fn summary(&self, has_api_key: bool) -> ConfigSummary {
        ConfigSummary {
            cycle_interval_secs: self.cycle_interval_secs,
            batch_size: self.batch_size,
            concurrent_batches: self.max_in_flight(),
            auto_start: self.auto_start,
            similarity_threshold: SIMILARITY_THRESHOLD,
            has_api_key,
        }
    }
}

/// Configuration as exposed by status queries. Never carries the credential.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct ConfigSummary {
    pub cycle_interval_secs: u64,
    pub batch_size: usize,
    pub concurrent_batches: usize,
    pub auto_start: bool,
    pub similarity_threshold: f64,
    pub has_api_key: bool,
}
