//! Audit trail for ingestion cycles.
//!
//! One [`RunRecord`] per finished cycle. Records go to the store for the
//! long-term history and to an in-memory ring for the status view, so the
//! recent history stays visible even while the store is down.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, warn};

#[cfg(feature = "typescript")]
use ts_rs::TS;

use crate::store::{ContentStore, StoreError};

/// Maximum entries in the in-memory ring before pruning.
const MAX_AUDIT_ENTRIES: usize = 1_000;

/// Upper bound on a single store write, so a hung store cannot stall the
/// next cycle.
const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(250);

/// Store writes per record: the first attempt plus one retry.
const WRITE_ATTEMPTS: u32 = 2;

/// Per-cycle item counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct RunCounts {
    /// Candidates returned by the provider, including malformed ones
    pub fetched: u64,
    /// Accepted and persisted
    pub added: u64,
    /// Rejected by validation or dedup, or dropped on store failure
    pub skipped: u64,
}

impl RunCounts {
    /// `fetched == added + skipped`
    pub fn is_balanced(&self) -> bool {
        self.fetched == self.added + self.skipped
    }

    pub fn merge(&mut self, other: RunCounts) {
        self.fetched += other.fetched;
        self.added += other.added;
        self.skipped += other.skipped;
    }
}

/// Audit entry for one completed cycle. Immutable once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct RunRecord {
    pub id: String,
    /// Provider that generated the cycle's content
    pub provider: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub items_fetched: u64,
    pub items_added: u64,
    pub items_skipped: u64,
    pub error: Option<String>,
}

impl RunRecord {
    /// Create a record for a cycle that just finished.
    pub fn finished(
        provider: impl Into<String>,
        started_at: DateTime<Utc>,
        counts: RunCounts,
        error: Option<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            provider: provider.into(),
            started_at,
            finished_at: Utc::now(),
            items_fetched: counts.fetched,
            items_added: counts.added,
            items_skipped: counts.skipped,
            error,
        }
    }

    pub fn counts(&self) -> RunCounts {
        RunCounts {
            fetched: self.items_fetched,
            added: self.items_added,
            skipped: self.items_skipped,
        }
    }

    pub fn duration_ms(&self) -> u64 {
        (self.finished_at - self.started_at)
            .num_milliseconds()
            .max(0) as u64
    }
}

/// Append-only recorder for run records.
pub struct AuditRecorder {
    store: Arc<dyn ContentStore>,
    /// Newest first
    entries: Arc<RwLock<VecDeque<RunRecord>>>,
    max_entries: usize,
    write_timeout: Duration,
    retry_backoff: Duration,
    lost: AtomicU64,
}

impl AuditRecorder {
    /// Create a recorder writing to `store`.
    pub fn new(store: Arc<dyn ContentStore>) -> Self {
        Self {
            store,
            entries: Arc::new(RwLock::new(VecDeque::new())),
            max_entries: MAX_AUDIT_ENTRIES,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
            lost: AtomicU64::new(0),
        }
    }

    /// Set the in-memory ring size.
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries.max(1);
        self
    }

    /// Set the store write timeout.
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Set the pause before retrying a failed store write.
    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// Record a finished cycle.
    ///
    /// Never fails: a store failure is logged and counted, and the record
    /// stays in the in-memory ring.
    pub async fn record(&self, record: RunRecord) {
        {
            let mut entries = self.entries.write().await;
            entries.push_front(record.clone());
            while entries.len() > self.max_entries {
                entries.pop_back();
            }
        }

        for attempt in 1..=WRITE_ATTEMPTS {
            match self.append(&record).await {
                Ok(()) => {
                    debug!(run_id = %record.id, attempt, "Run record persisted");
                    return;
                }
                Err(e) if attempt < WRITE_ATTEMPTS => {
                    warn!(run_id = %record.id, error = %e, "Failed to persist run record, retrying");
                    tokio::time::sleep(self.retry_backoff).await;
                }
                Err(e) => {
                    self.lost.fetch_add(1, Ordering::SeqCst);
                    warn!(run_id = %record.id, error = %e, "Run record lost");
                }
            }
        }
    }

    /// One store write, bounded by the write timeout.
    async fn append(&self, record: &RunRecord) -> Result<(), StoreError> {
        match tokio::time::timeout(self.write_timeout, self.store.append_run_record(record)).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Unavailable(format!(
                "timed out after {}ms",
                self.write_timeout.as_millis()
            ))),
        }
    }

    /// Load the most recent stored records into an empty ring.
    ///
    /// Returns how many were loaded. Does nothing if the ring already has
    /// entries.
    pub async fn hydrate(&self, limit: usize) -> Result<usize, StoreError> {
        if !self.entries.read().await.is_empty() {
            return Ok(0);
        }

        let stored = self.store.recent_runs(limit.min(self.max_entries)).await?;
        let mut entries = self.entries.write().await;
        if !entries.is_empty() {
            return Ok(0);
        }
        let count = stored.len();
        entries.extend(stored);
        Ok(count)
    }

    /// Get recent records, newest first.
    pub async fn recent(&self, limit: usize) -> Vec<RunRecord> {
        let entries = self.entries.read().await;
        entries.iter().take(limit).cloned().collect()
    }

    /// Records that could not be persisted.
    pub fn lost_count(&self) -> u64 {
        self.lost.load(Ordering::SeqCst)
    }

    /// Get count.
    pub async fn count(&self) -> usize {
        self.entries.read().await.len()
    }
}
