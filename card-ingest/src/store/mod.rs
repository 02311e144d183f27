//! Content store collaborator.
//!
//! The daemon writes to the same decks/cards database the REST layer reads
//! from. Its write surface is deliberately narrow:
//!
//! - create a trivia deck for a canonical category (once)
//! - append an accepted question as a card (never mutating existing cards)
//! - append run records
//! - read back what it needs to seed the dedup index and the status view

pub mod memory;
pub mod sqlite;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::audit::RunRecord;
use crate::category::Category;
use crate::question::GeneratedQuestion;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Error types for store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Store cannot be reached at all
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Identifier of a deck row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeckId(pub String);

/// Identifier of a card row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CardId(pub String);

impl DeckId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl CardId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl fmt::Display for DeckId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for CardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A stored trivia question, as read back for dedup seeding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredQuestion {
    /// Title of the deck the card lives in (a category label)
    pub deck_title: String,
    pub question: String,
}

/// Storage operations used by the ingestion daemon.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Cheap liveness probe, run at the start of every cycle.
    async fn health_check(&self) -> Result<(), StoreError>;

    /// Get or create the trivia deck for `category`.
    async fn create_deck_if_absent(&self, category: &Category) -> Result<DeckId, StoreError>;

    /// Append `question` as a new card at the end of `deck_id`.
    ///
    /// `source` names the provider that generated it.
    async fn insert_card(
        &self,
        deck_id: &DeckId,
        question: &GeneratedQuestion,
        source: &str,
    ) -> Result<CardId, StoreError>;

    /// Append a finished cycle's run record.
    async fn append_run_record(&self, record: &RunRecord) -> Result<(), StoreError>;

    /// Most recent run records, newest first.
    async fn recent_runs(&self, limit: usize) -> Result<Vec<RunRecord>, StoreError>;

    /// The `limit` most recent trivia questions, oldest first.
    async fn load_dedup_seed(&self, limit: usize) -> Result<Vec<StoredQuestion>, StoreError>;
}
