//! In-memory store for testing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use super::*;

/// A card as held by [`MemoryStore`].
#[derive(Debug, Clone)]
pub struct StoredCard {
    pub id: CardId,
    pub deck_id: DeckId,
    pub position: usize,
    pub question: GeneratedQuestion,
    pub source: String,
}

#[derive(Debug, Default)]
struct Inner {
    /// deck title -> id
    decks: HashMap<String, DeckId>,
    deck_order: Vec<String>,
    cards: Vec<StoredCard>,
    /// Seeded questions that have no card (deck title, question)
    seeded: Vec<StoredQuestion>,
    runs: Vec<RunRecord>,
}

/// In-memory [`ContentStore`] with failure injection.
pub struct MemoryStore {
    inner: Mutex<Inner>,
    available: AtomicBool,
    failing_inserts: AtomicUsize,
    failing_runs: AtomicBool,
    failing_next_runs: AtomicUsize,
    run_delay: Mutex<Duration>,
    insert_attempts: AtomicUsize,
    run_attempts: AtomicUsize,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            available: AtomicBool::new(true),
            failing_inserts: AtomicUsize::new(0),
            failing_runs: AtomicBool::new(false),
            failing_next_runs: AtomicUsize::new(0),
            run_delay: Mutex::new(Duration::ZERO),
            insert_attempts: AtomicUsize::new(0),
            run_attempts: AtomicUsize::new(0),
        }
    }

    /// Pre-populate stored trivia questions (deck title, question text).
    pub fn with_existing<I, S, T>(self, questions: I) -> Self
    where
        I: IntoIterator<Item = (S, T)>,
        S: Into<String>,
        T: Into<String>,
    {
        if let Ok(mut inner) = self.inner.lock() {
            inner
                .seeded
                .extend(questions.into_iter().map(|(title, question)| StoredQuestion {
                    deck_title: title.into(),
                    question: question.into(),
                }));
        }
        self
    }

    /// Toggle availability; every operation fails while unavailable.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Fail the next `count` card inserts.
    pub fn fail_next_inserts(&self, count: usize) {
        self.failing_inserts.store(count, Ordering::SeqCst);
    }

    /// Make run record writes fail.
    pub fn set_failing_runs(&self, failing: bool) {
        self.failing_runs.store(failing, Ordering::SeqCst);
    }

    /// Fail the next `count` run record writes.
    pub fn fail_next_runs(&self, count: usize) {
        self.failing_next_runs.store(count, Ordering::SeqCst);
    }

    /// Delay every run record write, simulating a hung store.
    pub fn set_run_delay(&self, delay: Duration) {
        if let Ok(mut d) = self.run_delay.lock() {
            *d = delay;
        }
    }

    /// Card inserts attempted, including failed ones.
    pub fn insert_attempts(&self) -> usize {
        self.insert_attempts.load(Ordering::SeqCst)
    }

    /// Run record writes attempted, including failed and timed-out ones.
    pub fn run_attempts(&self) -> usize {
        self.run_attempts.load(Ordering::SeqCst)
    }

    /// All stored cards in insertion order.
    pub fn cards(&self) -> Vec<StoredCard> {
        self.lock().map(|i| i.cards.clone()).unwrap_or_default()
    }

    /// Deck titles in creation order.
    pub fn deck_titles(&self) -> Vec<String> {
        self.lock().map(|i| i.deck_order.clone()).unwrap_or_default()
    }

    /// Stored run records in append order.
    pub fn runs(&self) -> Vec<RunRecord> {
        self.lock().map(|i| i.runs.clone()).unwrap_or_default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, StoreError> {
        self.inner
            .lock()
            .map_err(|e| StoreError::Internal(format!("Lock poisoned: {}", e)))
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("Memory store disabled".to_string()))
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContentStore for MemoryStore {
    async fn health_check(&self) -> Result<(), StoreError> {
        self.check_available()
    }

    async fn create_deck_if_absent(&self, category: &Category) -> Result<DeckId, StoreError> {
        self.check_available()?;
        let mut inner = self.lock()?;
        if let Some(id) = inner.decks.get(category.label) {
            return Ok(id.clone());
        }
        let id = DeckId::generate();
        inner.decks.insert(category.label.to_string(), id.clone());
        inner.deck_order.push(category.label.to_string());
        Ok(id)
    }

    async fn insert_card(
        &self,
        deck_id: &DeckId,
        question: &GeneratedQuestion,
        source: &str,
    ) -> Result<CardId, StoreError> {
        self.insert_attempts.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        let injected = self
            .failing_inserts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(StoreError::Unavailable("Injected insert failure".to_string()));
        }

        let mut inner = self.lock()?;
        if !inner.decks.values().any(|id| id == deck_id) {
            return Err(StoreError::NotFound(format!("deck {}", deck_id)));
        }
        let position = inner.cards.iter().filter(|c| &c.deck_id == deck_id).count();
        let id = CardId::generate();
        inner.cards.push(StoredCard {
            id: id.clone(),
            deck_id: deck_id.clone(),
            position,
            question: question.clone(),
            source: source.to_string(),
        });
        Ok(id)
    }

    async fn append_run_record(&self, record: &RunRecord) -> Result<(), StoreError> {
        self.run_attempts.fetch_add(1, Ordering::SeqCst);

        let delay = self.run_delay.lock().map(|d| *d).unwrap_or_default();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        self.check_available()?;
        let injected = self
            .failing_next_runs
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected || self.failing_runs.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("Injected run failure".to_string()));
        }
        self.lock()?.runs.push(record.clone());
        Ok(())
    }

    async fn recent_runs(&self, limit: usize) -> Result<Vec<RunRecord>, StoreError> {
        self.check_available()?;
        let inner = self.lock()?;
        Ok(inner.runs.iter().rev().take(limit).cloned().collect())
    }

    async fn load_dedup_seed(&self, limit: usize) -> Result<Vec<StoredQuestion>, StoreError> {
        self.check_available()?;
        let inner = self.lock()?;
        let titles: HashMap<&DeckId, &String> =
            inner.decks.iter().map(|(title, id)| (id, title)).collect();

        let all: Vec<StoredQuestion> = inner
            .seeded
            .iter()
            .cloned()
            .chain(inner.cards.iter().filter_map(|card| {
                titles.get(&card.deck_id).map(|title| StoredQuestion {
                    deck_title: (*title).clone(),
                    question: card.question.question.clone(),
                })
            }))
            .collect();

        let skip = all.len().saturating_sub(limit);
        Ok(all.into_iter().skip(skip).collect())
    }
}
