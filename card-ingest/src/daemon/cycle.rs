//! Cycle loop and batch workers.

use std::sync::Arc;

use chrono::Utc;
use rand::seq::SliceRandom;
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn};

use super::{Command, DaemonState, Shared};
use crate::audit::{RunCounts, RunRecord};
use crate::category::Category;
use crate::dedup::Verdict;
use crate::generator::GenerationError;
use crate::question::GeneratedQuestion;
use crate::store::{CardId, StoreError};

const CANCELLED: &str = "cycle cancelled";

/// What one batch contributed to its cycle.
#[derive(Debug, Default)]
struct BatchReport {
    counts: RunCounts,
    errors: Vec<String>,
}

impl BatchReport {
    fn failed(error: String) -> Self {
        Self {
            counts: RunCounts::default(),
            errors: vec![error],
        }
    }
}

#[derive(Debug, Default)]
struct CycleTally {
    counts: RunCounts,
    errors: Vec<String>,
}

impl CycleTally {
    async fn absorb(&mut self, shared: &Shared, joined: Result<BatchReport, JoinError>) {
        let report = joined.unwrap_or_else(|e| BatchReport::failed(format!("batch task failed: {}", e)));

        {
            let mut stats = shared.stats.write().await;
            stats.add_counts(report.counts);
            for error in &report.errors {
                stats.add_error(error.clone());
            }
        }

        self.counts.merge(report.counts);
        self.errors.extend(report.errors);
    }

    fn error_text(&self, cancelled: bool) -> Option<String> {
        let mut parts = Vec::with_capacity(self.errors.len() + 1);
        if cancelled {
            parts.push(CANCELLED.to_string());
        }
        parts.extend(self.errors.iter().cloned());
        (!parts.is_empty()).then(|| parts.join("; "))
    }
}

/// Drive cycles until the daemon is stopped.
pub(crate) async fn run_loop(shared: Arc<Shared>) {
    let mut state = shared.state.subscribe();

    loop {
        if !wait_until_running(&mut state).await {
            break;
        }

        if !run_cycle(&shared).await {
            break;
        }

        if *state.borrow_and_update() != DaemonState::Running {
            continue;
        }

        let sleep = tokio::time::sleep(shared.config.cycle_interval());
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => break,
                changed = state.changed() => {
                    if changed.is_err() || *state.borrow_and_update() != DaemonState::Running {
                        break;
                    }
                }
            }
        }
    }

    debug!("Cycle loop exited");
}

/// Block while paused. Returns `false` once stopped.
async fn wait_until_running(state: &mut watch::Receiver<DaemonState>) -> bool {
    state
        .wait_for(|s| *s != DaemonState::Paused)
        .await
        .map(|s| *s == DaemonState::Running)
        .unwrap_or(false)
}

async fn wait_stopped(state: &mut watch::Receiver<DaemonState>) {
    let _ = state
        .wait_for(|s| *s == DaemonState::Stopped)
        .await
        .map(drop);
}

/// Wait for a dispatch slot while the daemon is running.
///
/// A slot acquired while the daemon was paused is handed back and the wait
/// starts over, so pause suppresses dispatch even for queued categories.
async fn dispatch_slot(
    semaphore: &Arc<Semaphore>,
    state: &mut watch::Receiver<DaemonState>,
) -> Option<OwnedSemaphorePermit> {
    loop {
        if !wait_until_running(state).await {
            return None;
        }
        let permit = semaphore.clone().acquire_owned().await.ok()?;
        match *state.borrow() {
            DaemonState::Running => return Some(permit),
            DaemonState::Stopped => return None,
            DaemonState::Paused => {}
        }
    }
}

/// Run one cycle. Returns `false` when the loop should exit.
async fn run_cycle(shared: &Arc<Shared>) -> bool {
    let started_at = Utc::now();
    let provider = shared.generator.id().to_string();

    if let Err(e) = shared.store.health_check().await {
        fail_fatally(shared, &provider, started_at, e).await;
        return false;
    }

    let mut order: Vec<Category> = shared.categories.all().to_vec();
    order.shuffle(&mut rand::thread_rng());
    debug!(
        order = ?order.iter().map(|c| c.id).collect::<Vec<_>>(),
        "Cycle started"
    );

    let semaphore = Arc::new(Semaphore::new(shared.config.max_in_flight()));
    let mut stop_rx = shared.state.subscribe();
    let mut dispatch_rx = shared.state.subscribe();
    let mut tasks = JoinSet::new();
    let mut tally = CycleTally::default();
    let mut cancelled = false;

    'dispatch: for category in order {
        let permit = loop {
            tokio::select! {
                biased;
                _ = wait_stopped(&mut stop_rx) => {
                    cancelled = true;
                    break 'dispatch;
                }
                Some(joined) = tasks.join_next() => tally.absorb(shared, joined).await,
                permit = dispatch_slot(&semaphore, &mut dispatch_rx) => break permit,
            }
        };
        let Some(permit) = permit else {
            cancelled = true;
            break;
        };

        debug!(category = category.id, "Dispatching batch");
        tasks.spawn(run_batch(shared.clone(), category, permit));
    }

    while let Some(joined) = tasks.join_next().await {
        tally.absorb(shared, joined).await;
    }

    // Stopped while the last dispatched batches were draining
    let cancelled = cancelled || shared.current_state() == DaemonState::Stopped;

    let error = tally.error_text(cancelled);
    let record = RunRecord::finished(provider, started_at, tally.counts, error);
    debug_assert!(record.counts().is_balanced());

    info!(
        run_id = %record.id,
        fetched = record.items_fetched,
        added = record.items_added,
        skipped = record.items_skipped,
        duration_ms = record.duration_ms(),
        cancelled,
        error = record.error.as_deref().unwrap_or("none"),
        "Cycle complete"
    );

    if !cancelled {
        shared.stats.write().await.cycles_completed += 1;
    }
    shared.audit.record(record.clone()).await;
    shared.last_run.send_replace(Some(record));

    !cancelled
}

/// Store unavailable at cycle start: record it and stop the daemon.
async fn fail_fatally(
    shared: &Shared,
    provider: &str,
    started_at: chrono::DateTime<Utc>,
    cause: StoreError,
) {
    let message = format!("store unavailable: {}", cause);
    error!(error = %cause, "Store unavailable at cycle start, stopping daemon");

    {
        let mut stats = shared.stats.write().await;
        stats.add_error(message.clone());
        shared.transition(Command::Stop);
    }

    let record = RunRecord::finished(provider, started_at, RunCounts::default(), Some(message));
    shared.audit.record(record.clone()).await;
    shared.last_run.send_replace(Some(record));
}

/// Generate one batch for `category` and persist what survives dedup.
async fn run_batch(
    shared: Arc<Shared>,
    category: Category,
    _permit: OwnedSemaphorePermit,
) -> BatchReport {
    let mut state = shared.state.subscribe();
    let timeout = shared.config.request_timeout();
    let call = tokio::time::timeout(
        timeout,
        shared.generator.generate(&category, shared.config.batch_size),
    );

    let outcome = tokio::select! {
        result = call => result.unwrap_or(Err(GenerationError::Timeout(timeout))),
        _ = wait_stopped(&mut state) => {
            debug!(category = category.id, "Generation abandoned on stop");
            return BatchReport::default();
        }
    };

    let batch = match outcome {
        Ok(batch) => batch,
        Err(e) => {
            warn!(
                category = category.label,
                error = %e,
                transport = e.is_transport(),
                "Generation failed"
            );
            return BatchReport::failed(format!("{}: {}", category.label, e));
        }
    };

    let mut report = BatchReport::default();
    report.counts.fetched = batch.raw_count.max(batch.questions.len()) as u64;
    report.counts.skipped = batch.dropped() as u64;
    if batch.dropped() > 0 {
        debug!(category = category.label, dropped = batch.dropped(), "Malformed items dropped");
    }

    for question in batch.questions {
        if shared.current_state() == DaemonState::Stopped {
            report.counts.skipped += 1;
            continue;
        }

        let target = *shared.categories.resolve(&question.category);

        if let Err(e) = question.validate() {
            debug!(category = target.label, error = %e, "Invalid question skipped");
            report.counts.skipped += 1;
            continue;
        }

        match shared.dedup.accept(target.id, &question) {
            Verdict::Accepted => {}
            verdict => {
                debug!(category = target.label, ?verdict, "Duplicate skipped");
                report.counts.skipped += 1;
                continue;
            }
        }

        match persist(&shared, &target, &question).await {
            Ok(Some(card_id)) => {
                debug!(category = target.label, card_id = %card_id, "Card added");
                report.counts.added += 1;
            }
            Ok(None) => {
                shared.dedup.release(target.id, &question.question);
                report.counts.skipped += 1;
            }
            Err(e) => {
                warn!(category = target.label, error = %e, "Dropping question after store failure");
                shared.dedup.release(target.id, &question.question);
                report.counts.skipped += 1;
                report.errors.push(format!("{}: store: {}", target.label, e));
            }
        }
    }

    info!(
        category = category.label,
        fetched = report.counts.fetched,
        added = report.counts.added,
        skipped = report.counts.skipped,
        "Batch complete"
    );
    report
}

/// Insert `question` under its category deck, retrying once after backoff.
///
/// Returns `Ok(None)` when the daemon stops during the backoff; the retry is
/// not attempted.
async fn persist(
    shared: &Shared,
    category: &Category,
    question: &GeneratedQuestion,
) -> Result<Option<CardId>, StoreError> {
    let e = match try_persist(shared, category, question).await {
        Ok(id) => return Ok(Some(id)),
        Err(e) => e,
    };

    warn!(category = category.label, error = %e, "Store write failed, retrying");
    shared.decks.remove(category.id);

    let mut state = shared.state.subscribe();
    tokio::select! {
        biased;
        _ = wait_stopped(&mut state) => {
            debug!(category = category.label, "Store retry abandoned on stop");
            return Ok(None);
        }
        _ = tokio::time::sleep(shared.config.store_retry_backoff()) => {}
    }

    try_persist(shared, category, question).await.map(Some)
}

async fn try_persist(
    shared: &Shared,
    category: &Category,
    question: &GeneratedQuestion,
) -> Result<CardId, StoreError> {
    let cached = shared.decks.get(category.id).map(|deck| deck.value().clone());
    let deck_id = match cached {
        Some(id) => id,
        None => {
            let id = shared.store.create_deck_if_absent(category).await?;
            shared.decks.insert(category.id, id.clone());
            id
        }
    };
    shared
        .store
        .insert_card(&deck_id, question, shared.generator.id())
        .await
}
