//! SQLite implementation of [`ContentStore`].
//!
//! ## Tables
//!
//! - `source_providers` - one row per content provider (`openai`, ...)
//! - `decks` - per-category containers; trivia decks have `kind = 'trivia'`
//! - `cards` - one row per accepted question, appended at the deck's end
//! - `source_runs` - one row per finished ingestion cycle
//!
//! rusqlite is synchronous, so every call runs on the blocking pool.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

use super::*;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS source_providers (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    type TEXT NOT NULL DEFAULT 'api',
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
);

CREATE TABLE IF NOT EXISTS decks (
    id TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    kind TEXT NOT NULL,
    tier TEXT NOT NULL DEFAULT 'free',
    properties TEXT NOT NULL DEFAULT '{}',
    card_count INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_decks_kind_title ON decks(kind, title);

CREATE TABLE IF NOT EXISTS cards (
    id TEXT PRIMARY KEY,
    deck_id TEXT NOT NULL REFERENCES decks(id),
    position INTEGER NOT NULL,
    question TEXT NOT NULL,
    properties TEXT NOT NULL DEFAULT '{}',
    difficulty TEXT NOT NULL DEFAULT 'medium',
    source_id TEXT REFERENCES source_providers(id),
    source_date TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_cards_deck ON cards(deck_id, position);

CREATE TABLE IF NOT EXISTS source_runs (
    id TEXT PRIMARY KEY,
    provider_id TEXT NOT NULL REFERENCES source_providers(id),
    started_at TEXT NOT NULL,
    finished_at TEXT NOT NULL,
    items_fetched INTEGER NOT NULL DEFAULT 0,
    items_added INTEGER NOT NULL DEFAULT 0,
    items_skipped INTEGER NOT NULL DEFAULT 0,
    error TEXT
);
CREATE INDEX IF NOT EXISTS idx_source_runs_started ON source_runs(started_at);
"#;

/// SQLite-backed content store.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open or create the database at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        info!("Opening SQLite database at {:?}", path);

        let conn = Connection::open(path)
            .map_err(|e| StoreError::Unavailable(format!("Failed to open SQLite: {}", e)))?;

        conn.execute_batch(
            "PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; PRAGMA foreign_keys=ON;",
        )?;

        Self::with_connection(conn)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self, StoreError> {
        debug!("Opening in-memory SQLite database");

        let conn = Connection::open_in_memory()
            .map_err(|e| StoreError::Unavailable(format!("Failed to open in-memory SQLite: {}", e)))?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;

        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn blocking<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|e| StoreError::Internal(format!("Lock poisoned: {}", e)))?;
            f(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Internal(format!("Blocking task failed: {}", e)))?
    }

    /// Trivia decks with their card counts, by title.
    pub async fn deck_counts(&self) -> Result<Vec<(String, u64)>, StoreError> {
        self.blocking(|conn| {
            let mut stmt = conn.prepare(
                "SELECT title, card_count FROM decks WHERE kind = 'trivia' ORDER BY title",
            )?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?.max(0) as u64))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }
}

fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| StoreError::Internal(format!("Bad timestamp {:?}: {}", raw, e)))
}

/// Get or create the provider row named `name`.
fn provider_id(conn: &Connection, name: &str) -> Result<String, StoreError> {
    conn.execute(
        "INSERT OR IGNORE INTO source_providers (id, name, type) VALUES (?1, ?2, 'api')",
        params![uuid::Uuid::new_v4().to_string(), name],
    )?;
    let id = conn.query_row(
        "SELECT id FROM source_providers WHERE name = ?1",
        params![name],
        |row| row.get(0),
    )?;
    Ok(id)
}

struct RunRow {
    id: String,
    provider: String,
    started_at: String,
    finished_at: String,
    fetched: i64,
    added: i64,
    skipped: i64,
    error: Option<String>,
}

impl RunRow {
    fn into_record(self) -> Result<RunRecord, StoreError> {
        Ok(RunRecord {
            id: self.id,
            provider: self.provider,
            started_at: parse_timestamp(&self.started_at)?,
            finished_at: parse_timestamp(&self.finished_at)?,
            items_fetched: self.fetched.max(0) as u64,
            items_added: self.added.max(0) as u64,
            items_skipped: self.skipped.max(0) as u64,
            error: self.error,
        })
    }
}

#[async_trait]
impl ContentStore for SqliteStore {
    async fn health_check(&self) -> Result<(), StoreError> {
        self.blocking(|conn| {
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
                .map_err(|e| StoreError::Unavailable(format!("Health probe failed: {}", e)))?;
            Ok(())
        })
        .await
    }

    async fn create_deck_if_absent(&self, category: &Category) -> Result<DeckId, StoreError> {
        let category = *category;
        self.blocking(move |conn| {
            let existing: Option<String> = conn
                .query_row(
                    "SELECT id FROM decks WHERE kind = 'trivia' AND title = ?1",
                    params![category.label],
                    |row| row.get(0),
                )
                .optional()?;
            if let Some(id) = existing {
                return Ok(DeckId(id));
            }

            let properties = serde_json::json!({ "pic": category.icon }).to_string();
            conn.execute(
                "INSERT OR IGNORE INTO decks (id, title, kind, tier, properties)
                 VALUES (?1, ?2, 'trivia', 'free', ?3)",
                params![DeckId::generate().0, category.label, properties],
            )?;
            let id: String = conn.query_row(
                "SELECT id FROM decks WHERE kind = 'trivia' AND title = ?1",
                params![category.label],
                |row| row.get(0),
            )?;
            info!(deck = category.label, pic = category.icon, "Created trivia deck");
            Ok(DeckId(id))
        })
        .await
    }

    async fn insert_card(
        &self,
        deck_id: &DeckId,
        question: &GeneratedQuestion,
        source: &str,
    ) -> Result<CardId, StoreError> {
        let deck_id = deck_id.clone();
        let question = question.clone();
        let source = source.to_string();

        self.blocking(move |conn| {
            let properties = serde_json::json!({
                "choices": question.choices,
                "correct_index": question.correct_index(),
                "explanation": question.explanation,
                "hint": question.hint,
                "aisource": source,
            })
            .to_string();

            let tx = conn.transaction()?;
            let source_id = provider_id(&tx, &source)?;

            let deck_exists: Option<i64> = tx
                .query_row("SELECT 1 FROM decks WHERE id = ?1", params![deck_id.0], |row| {
                    row.get(0)
                })
                .optional()?;
            if deck_exists.is_none() {
                return Err(StoreError::NotFound(format!("deck {}", deck_id)));
            }

            let position: i64 = tx.query_row(
                "SELECT COALESCE(MAX(position), -1) + 1 FROM cards WHERE deck_id = ?1",
                params![deck_id.0],
                |row| row.get(0),
            )?;

            let card_id = CardId::generate();
            tx.execute(
                "INSERT INTO cards (id, deck_id, position, question, properties, difficulty, source_id, source_date)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    card_id.0,
                    deck_id.0,
                    position,
                    question.question,
                    properties,
                    question.difficulty.as_str(),
                    source_id,
                    timestamp(&Utc::now()),
                ],
            )?;
            tx.execute(
                "UPDATE decks SET card_count = card_count + 1 WHERE id = ?1",
                params![deck_id.0],
            )?;
            tx.commit()?;

            Ok(card_id)
        })
        .await
    }

    async fn append_run_record(&self, record: &RunRecord) -> Result<(), StoreError> {
        let record = record.clone();
        self.blocking(move |conn| {
            let provider = provider_id(conn, &record.provider)?;
            conn.execute(
                "INSERT INTO source_runs
                    (id, provider_id, started_at, finished_at, items_fetched, items_added, items_skipped, error)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    record.id,
                    provider,
                    timestamp(&record.started_at),
                    timestamp(&record.finished_at),
                    record.items_fetched as i64,
                    record.items_added as i64,
                    record.items_skipped as i64,
                    record.error,
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn recent_runs(&self, limit: usize) -> Result<Vec<RunRecord>, StoreError> {
        self.blocking(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT r.id, p.name, r.started_at, r.finished_at,
                        r.items_fetched, r.items_added, r.items_skipped, r.error
                 FROM source_runs r
                 JOIN source_providers p ON p.id = r.provider_id
                 ORDER BY r.started_at DESC, r.rowid DESC
                 LIMIT ?1",
            )?;
            let rows = stmt
                .query_map(params![limit as i64], |row| {
                    Ok(RunRow {
                        id: row.get(0)?,
                        provider: row.get(1)?,
                        started_at: row.get(2)?,
                        finished_at: row.get(3)?,
                        fetched: row.get(4)?,
                        added: row.get(5)?,
                        skipped: row.get(6)?,
                        error: row.get(7)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;

            rows.into_iter().map(RunRow::into_record).collect()
        })
        .await
    }

    async fn load_dedup_seed(&self, limit: usize) -> Result<Vec<StoredQuestion>, StoreError> {
        self.blocking(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT d.title, c.question
                 FROM cards c
                 JOIN decks d ON d.id = c.deck_id
                 WHERE d.kind = 'trivia'
                 ORDER BY c.rowid DESC
                 LIMIT ?1",
            )?;
            let mut seed = stmt
                .query_map(params![limit as i64], |row| {
                    Ok(StoredQuestion {
                        deck_title: row.get(0)?,
                        question: row.get(1)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            seed.reverse();
            Ok(seed)
        })
        .await
    }
}
