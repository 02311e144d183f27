//! Ingestion daemon controller.
//!
//! The public surface is four transition operations and one status
//! accessor. State lives in a `watch` channel so the cycle loop and every
//! in-flight batch can observe stop/pause without polling; the cumulative
//! stats sit behind an `RwLock` that transitions also take, which keeps
//! `(state, stats)` snapshots consistent.

mod cycle;
pub mod state;

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::audit::{AuditRecorder, RunRecord};
use crate::category::CategoryTable;
use crate::config::IngestConfig;
use crate::dedup::{DedupIndex, SeedEntry};
use crate::generator::QuestionGenerator;
use crate::store::{ContentStore, DeckId, StoreError};

pub use state::{Command, DaemonState, DaemonStats, DaemonStatus, Transition};

/// Error types for daemon control.
#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    #[error("No provider credential configured")]
    MissingCredential,

    #[error("Failed to load existing questions: {0}")]
    Store(#[from] StoreError),
}

/// State shared by the controller, the cycle loop and batch tasks.
pub(crate) struct Shared {
    pub(crate) config: IngestConfig,
    pub(crate) categories: Arc<CategoryTable>,
    pub(crate) generator: Arc<dyn QuestionGenerator>,
    pub(crate) store: Arc<dyn ContentStore>,
    pub(crate) dedup: DedupIndex,
    pub(crate) audit: AuditRecorder,
    pub(crate) state: watch::Sender<DaemonState>,
    pub(crate) stats: RwLock<DaemonStats>,
    /// Deck ids by category id
    pub(crate) decks: DashMap<&'static str, DeckId>,
    pub(crate) last_run: watch::Sender<Option<RunRecord>>,
}

impl Shared {
    /// Apply `command` to the current state. Caller holds the stats lock.
    pub(crate) fn transition(&self, command: Command) -> Transition {
        let mut outcome = Transition::Ignored {
            state: *self.state.borrow(),
        };
        self.state.send_if_modified(|state| match state.apply(command) {
            Some(next) => {
                outcome = Transition::Applied { from: *state, to: next };
                *state = next;
                true
            }
            None => {
                outcome = Transition::Ignored { state: *state };
                false
            }
        });
        outcome
    }

    pub(crate) fn current_state(&self) -> DaemonState {
        *self.state.borrow()
    }
}

#[derive(Default)]
struct Control {
    handle: Option<JoinHandle<()>>,
    prepared: bool,
}

/// Long-running trivia ingestion daemon.
pub struct IngestDaemon {
    shared: Arc<Shared>,
    control: Mutex<Control>,
}

impl IngestDaemon {
    pub fn new(
        config: IngestConfig,
        categories: Arc<CategoryTable>,
        generator: Arc<dyn QuestionGenerator>,
        store: Arc<dyn ContentStore>,
    ) -> Self {
        let (state, _) = watch::channel(DaemonState::Stopped);
        let (last_run, _) = watch::channel(None);

        let shared = Shared {
            dedup: DedupIndex::with_window(config.similarity_window),
            audit: AuditRecorder::new(store.clone()).with_retry_backoff(config.store_retry_backoff()),
            config,
            categories,
            generator,
            store,
            state,
            stats: RwLock::new(DaemonStats::default()),
            decks: DashMap::new(),
            last_run,
        };

        Self {
            shared: Arc::new(shared),
            control: Mutex::new(Control::default()),
        }
    }

    /// `Stopped -> Running`. Loads the dedup index on the first start.
    pub async fn start(&self) -> Result<Transition, DaemonError> {
        let mut control = self.control.lock().await;

        let current = self.shared.current_state();
        if current != DaemonState::Stopped {
            return Ok(Transition::Ignored { state: current });
        }
        if !self.shared.generator.has_credential() {
            return Err(DaemonError::MissingCredential);
        }

        if !control.prepared {
            self.prepare().await?;
            control.prepared = true;
        }

        // A loop that stopped itself on a fatal error may still be winding down
        if let Some(previous) = control.handle.take() {
            self.join_or_abort(previous).await;
        }

        let transition = {
            let mut stats = self.shared.stats.write().await;
            let transition = self.shared.transition(Command::Start);
            if transition.is_applied() {
                stats.started_at = Some(Utc::now());
            }
            transition
        };

        if transition.is_applied() {
            control.handle = Some(tokio::spawn(cycle::run_loop(self.shared.clone())));
            info!(
                provider = self.shared.generator.id(),
                categories = self.shared.categories.len(),
                batch_size = self.shared.config.batch_size,
                concurrent_batches = self.shared.config.max_in_flight(),
                "Ingestion daemon started"
            );
        }
        Ok(transition)
    }

    /// `Running|Paused -> Stopped`. Cancels in-flight generation and waits
    /// up to the stop grace for the cycle to wind down before aborting it.
    pub async fn stop(&self) -> Transition {
        let mut control = self.control.lock().await;

        let transition = {
            let _stats = self.shared.stats.write().await;
            self.shared.transition(Command::Stop)
        };

        if transition.is_applied() {
            if let Some(handle) = control.handle.take() {
                self.join_or_abort(handle).await;
            }
            info!("Ingestion daemon stopped");
        }
        transition
    }

    /// `Running -> Paused`. In-flight batches finish; nothing new is dispatched.
    pub async fn pause(&self) -> Transition {
        let transition = {
            let _stats = self.shared.stats.write().await;
            self.shared.transition(Command::Pause)
        };
        if transition.is_applied() {
            info!("Ingestion daemon paused");
        }
        transition
    }

    /// `Paused -> Running`. Dispatch continues with the next category of the
    /// current cycle.
    pub async fn resume(&self) -> Transition {
        let transition = {
            let _stats = self.shared.stats.write().await;
            self.shared.transition(Command::Resume)
        };
        if transition.is_applied() {
            info!("Ingestion daemon resumed");
        }
        transition
    }

    pub async fn status(&self) -> DaemonStatus {
        let (state, stats) = {
            let stats = self.shared.stats.read().await;
            (self.shared.current_state(), stats.clone())
        };

        DaemonStatus {
            state,
            stats,
            recent_runs: self
                .shared
                .audit
                .recent(self.shared.config.status_run_limit)
                .await,
            config: self
                .shared
                .config
                .summary(self.shared.generator.has_credential()),
            known_questions: self.shared.dedup.len(),
            lost_run_records: self.shared.audit.lost_count(),
        }
    }

    pub fn state(&self) -> DaemonState {
        self.shared.current_state()
    }

    /// Watch state changes, including the loop stopping itself.
    pub fn subscribe_state(&self) -> watch::Receiver<DaemonState> {
        self.shared.state.subscribe()
    }

    /// Watch the most recent run record.
    pub fn subscribe_runs(&self) -> watch::Receiver<Option<RunRecord>> {
        self.shared.last_run.subscribe()
    }

    /// Seed the dedup index and the audit ring from the store.
    async fn prepare(&self) -> Result<(), DaemonError> {
        let shared = &self.shared;

        let stored = shared.store.load_dedup_seed(shared.config.seed_limit).await?;
        let total = stored.len();
        let seeded = shared.dedup.seed(stored.into_iter().map(|q| SeedEntry {
            category_id: shared.categories.resolve(&q.deck_title).id.to_string(),
            question: q.question,
        }));
        info!(stored = total, seeded, "Dedup index loaded");

        match shared.audit.hydrate(shared.config.status_run_limit).await {
            Ok(count) => info!(count, "Loaded recent run records"),
            Err(e) => warn!(error = %e, "Failed to load recent run records"),
        }
        Ok(())
    }

    async fn join_or_abort(&self, mut handle: JoinHandle<()>) {
        let grace = self.shared.config.stop_grace();
        if tokio::time::timeout(grace, &mut handle).await.is_err() {
            warn!(
                grace_ms = grace.as_millis() as u64,
                "Cycle did not stop within grace period, aborting"
            );
            handle.abort();
        }
    }
}

impl Drop for IngestDaemon {
    fn drop(&mut self) {
        if let Ok(mut control) = self.control.try_lock() {
            if let Some(handle) = control.handle.take() {
                handle.abort();
            }
        }
    }
}
