//! Card Ingest - background trivia ingestion for the card engine
//!
//! Continuously generates trivia questions through an external provider,
//! filters exact and near duplicates, stores accepted questions as cards and
//! keeps an audit trail of every cycle:
//! - Canonical category table with total alias resolution
//! - Two-tier dedup (SHA-256 signatures + per-category Jaccard similarity)
//! - Trait-based generation backends (OpenAI-compatible, mock)
//! - Controllable daemon with bounded-concurrency batch dispatch
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │             IngestDaemon                │
//! │  (start / stop / pause / resume/status) │
//! └────────────────┬────────────────────────┘
//!                  │ shuffled categories
//!      ┌───────────┼───────────────┐
//!      ▼           ▼               ▼
//! ┌──────────┐ ┌──────────┐ ┌─────────────┐
//! │ Question │ │  Dedup   │ │ ContentStore│
//! │ Generator│ │  Index   │ │ (SQLite/    │
//! │ (OpenAI) │ │          │ │  memory)    │
//! └──────────┘ └──────────┘ └──────┬──────┘
//!                                  │
//!                           ┌──────┴──────┐
//!                           │AuditRecorder│
//!                           └─────────────┘
//! ```

pub mod audit;
pub mod category;
pub mod config;
pub mod daemon;
pub mod dedup;
pub mod generator;
pub mod question;
pub mod store;

// Re-export main types for convenience
pub use audit::{AuditRecorder, RunCounts, RunRecord};
pub use category::{Category, CategoryTable};
pub use config::{ConfigSummary, IngestConfig};
pub use daemon::{DaemonError, DaemonState, DaemonStats, DaemonStatus, IngestDaemon, Transition};
pub use dedup::{DedupIndex, Verdict, SIMILARITY_THRESHOLD};
pub use generator::{GeneratedBatch, GenerationError, QuestionGenerator};
pub use question::{Choice, Difficulty, GeneratedQuestion};
pub use store::{ContentStore, StoreError};
