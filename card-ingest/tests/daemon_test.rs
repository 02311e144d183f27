//! End-to-end daemon tests against the SQLite store and an HTTP provider.

use std::sync::Arc;
use std::time::Duration;

use card_ingest::generator::{MockGenerator, OpenAiConfig, OpenAiGenerator};
use card_ingest::store::{MemoryStore, SqliteStore};
use card_ingest::{
    Category, CategoryTable, ContentStore, DaemonState, GeneratedQuestion, IngestConfig,
    IngestDaemon, RunRecord,
};
use tokio::sync::watch;
use tokio_test::assert_ok;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn table(ids: &[&str]) -> Arc<CategoryTable> {
    let all = CategoryTable::new();
    let picked: Vec<Category> = ids.iter().map(|id| *all.resolve(id)).collect();
    Arc::new(CategoryTable::from_categories(picked, ids[0]))
}

fn config() -> IngestConfig {
    IngestConfig {
        cycle_interval_secs: 3600,
        batch_size: 2,
        ..Default::default()
    }
}

fn question(text: &str) -> GeneratedQuestion {
    GeneratedQuestion::from_answers(
        text,
        "Mercury",
        vec!["Venus".to_string(), "Mars".to_string()],
        1,
        "science",
    )
    .with_explanation("Mercury orbits closest to the Sun.")
}

async fn first_run(runs: &mut watch::Receiver<Option<RunRecord>>) -> RunRecord {
    tokio::time::timeout(Duration::from_secs(10), runs.changed())
        .await
        .expect("cycle finished in time")
        .unwrap();
    runs.borrow_and_update().clone().unwrap()
}

#[tokio::test]
async fn test_sqlite_cycle_and_restart_dedup() {
    let dir = tempfile::TempDir::new().unwrap();
    let db_path = dir.path().join("card_engine.db");

    let generator = || {
        Arc::new(MockGenerator::new().with_questions(
            "science-and-nature",
            vec![
                question("Which planet is closest to the Sun?"),
                question("What is the chemical symbol for gold?"),
            ],
        ))
    };

    {
        let store = Arc::new(SqliteStore::open(&db_path).unwrap());
        let daemon = IngestDaemon::new(
            config(),
            table(&["science-and-nature", "history"]),
            generator(),
            store.clone(),
        );
        let mut runs = daemon.subscribe_runs();

        assert_ok!(daemon.start().await);
        let run = first_run(&mut runs).await;
        assert!(daemon.stop().await.is_applied());

        assert_eq!(run.items_fetched, 4);
        assert_eq!(run.items_added, 4);
        assert_eq!(run.error, None);

        let mut decks = store.deck_counts().await.unwrap();
        decks.sort();
        assert_eq!(
            decks,
            vec![("History".to_string(), 2), ("Science & Nature".to_string(), 2)]
        );

        let stored = store.recent_runs(10).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].id, run.id);
        assert_eq!(stored[0].provider, "mock");
    }

    // A fresh process sees the same questions as duplicates
    let store = Arc::new(SqliteStore::open(&db_path).unwrap());
    let daemon = IngestDaemon::new(
        config(),
        table(&["science-and-nature"]),
        generator(),
        store.clone(),
    );
    let mut runs = daemon.subscribe_runs();

    assert_ok!(daemon.start().await);
    let run = first_run(&mut runs).await;
    daemon.stop().await;

    assert_eq!(run.items_added, 0);
    assert_eq!(run.items_skipped, 2);

    let status = daemon.status().await;
    assert_eq!(status.state, DaemonState::Stopped);
    assert_eq!(status.recent_runs.len(), 2, "history loaded from the store");
    assert_eq!(status.known_questions, 4);
}

#[tokio::test]
async fn test_openai_provider_cycle() {
    let items = r#"```json
    [
        {
            "question": "Who painted the Mona Lisa?",
            "correct_answer": "Leonardo da Vinci",
            "incorrect_answers": ["Michelangelo", "Raphael", "Donatello"],
            "explanation": "Leonardo painted it in the early 1500s.",
            "hint": "Renaissance polymath"
        },
        {
            "question": "",
            "correct_answer": "Nothing",
            "incorrect_answers": ["Still nothing"],
            "explanation": "Empty question text"
        }
    ]
    ```"#;

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "choices": [{ "message": { "role": "assistant", "content": items } }]
        })))
        .mount(&server)
        .await;

    let generator = OpenAiGenerator::new(
        OpenAiConfig::new("test-key")
            .with_base_url(server.uri())
            .with_timeout(Duration::from_secs(5)),
    )
    .unwrap();
    let store = Arc::new(MemoryStore::new());
    let daemon = IngestDaemon::new(
        config(),
        table(&["arts-and-literature"]),
        Arc::new(generator),
        store.clone(),
    );
    let mut runs = daemon.subscribe_runs();

    assert_ok!(daemon.start().await);
    let run = first_run(&mut runs).await;
    daemon.stop().await;

    assert_eq!(run.provider, "openai");
    assert_eq!(run.items_fetched, 2);
    assert_eq!(run.items_added, 1);
    assert_eq!(run.items_skipped, 1);

    let cards = store.cards();
    assert_eq!(cards.len(), 1);
    assert_eq!(cards[0].source, "openai");
    assert_eq!(cards[0].question.choices.len(), 4);
    assert_eq!(cards[0].question.correct_answer(), Some("Leonardo da Vinci"));
    assert_eq!(store.deck_titles(), vec!["Arts & Literature"]);
}

#[tokio::test]
async fn test_provider_auth_failure_is_recorded() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid api key"))
        .mount(&server)
        .await;

    let generator = OpenAiGenerator::new(OpenAiConfig::new("bad-key").with_base_url(server.uri()))
        .unwrap();
    let store = Arc::new(MemoryStore::new());
    let daemon = IngestDaemon::new(
        config(),
        table(&["history", "music"]),
        Arc::new(generator),
        store.clone(),
    );
    let mut runs = daemon.subscribe_runs();

    assert_ok!(daemon.start().await);
    let run = first_run(&mut runs).await;

    // Provider errors never stop the daemon
    assert_eq!(daemon.state(), DaemonState::Running);
    daemon.stop().await;

    assert_eq!(run.items_fetched, 0);
    let error = run.error.unwrap();
    assert!(error.contains("History: Authentication failed"), "{}", error);
    assert!(error.contains("Music: Authentication failed"), "{}", error);
    assert!(store.cards().is_empty());
}
