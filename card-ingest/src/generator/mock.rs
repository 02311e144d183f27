//! Mock question generator for testing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::traits::*;
use crate::category::Category;
use crate::question::GeneratedQuestion;

/// Scripted failure for a category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockFailure {
    Timeout,
    Network(String),
    Authentication,
    RateLimited,
    Parse,
}

impl MockFailure {
    fn to_error(&self) -> GenerationError {
        match self {
            MockFailure::Timeout => GenerationError::Timeout(Duration::from_secs(60)),
            MockFailure::Network(msg) => GenerationError::Network(msg.clone()),
            MockFailure::Authentication => {
                GenerationError::Authentication("Mock credential rejected".to_string())
            }
            MockFailure::RateLimited => GenerationError::RateLimited {
                retry_after_ms: Some(1000),
            },
            MockFailure::Parse => GenerationError::Parse("Mock unparseable reply".to_string()),
        }
    }
}

#[derive(Debug, Clone)]
enum Script {
    Batch(GeneratedBatch),
    Failure(MockFailure),
}

/// Mock generator for testing.
///
/// Without a script a category gets `count` fresh, unique questions per call.
/// Scripts are keyed by canonical category id and replayed on every call.
pub struct MockGenerator {
    scripts: HashMap<String, Script>,
    delays: HashMap<String, Duration>,
    default_delay: Duration,
    available: AtomicBool,
    credential: bool,
    call_count: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    serial: AtomicUsize,
    calls: Mutex<Vec<String>>,
}

impl MockGenerator {
    /// Create a new mock generator.
    pub fn new() -> Self {
        Self {
            scripts: HashMap::new(),
            delays: HashMap::new(),
            default_delay: Duration::ZERO,
            available: AtomicBool::new(true),
            credential: true,
            call_count: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            serial: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Always answer `category_id` with these questions.
    pub fn with_questions(self, category_id: &str, questions: Vec<GeneratedQuestion>) -> Self {
        self.with_batch(category_id, GeneratedBatch::valid(questions))
    }

    /// Always answer `category_id` with this batch.
    pub fn with_batch(mut self, category_id: &str, batch: GeneratedBatch) -> Self {
        self.scripts
            .insert(category_id.to_string(), Script::Batch(batch));
        self
    }

    /// Always fail `category_id`.
    pub fn with_failure(mut self, category_id: &str, failure: MockFailure) -> Self {
        self.scripts
            .insert(category_id.to_string(), Script::Failure(failure));
        self
    }

    /// Delay every call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.default_delay = delay;
        self
    }

    /// Delay calls for one category.
    pub fn with_category_delay(mut self, category_id: &str, delay: Duration) -> Self {
        self.delays.insert(category_id.to_string(), delay);
        self
    }

    /// Set availability.
    pub fn with_available(self, available: bool) -> Self {
        self.available.store(available, Ordering::SeqCst);
        self
    }

    /// Pretend no credential is configured.
    pub fn without_credential(mut self) -> Self {
        self.credential = false;
        self
    }

    /// Toggle availability at runtime.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of generate calls started.
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Highest number of calls observed running at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Category ids in the order calls started.
    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }

    fn fresh_batch(&self, category: &Category, count: usize) -> GeneratedBatch {
        let questions = (0..count)
            .map(|_| {
                let n = self.serial.fetch_add(1, Ordering::SeqCst);
                GeneratedQuestion::from_answers(
                    format!("Mock question {} about {} number {}?", n, category.label, n * 7919),
                    format!("Answer {}", n),
                    vec![format!("Wrong {}a", n), format!("Wrong {}b", n)],
                    n % 3,
                    category.label,
                )
                .with_explanation(format!("Explanation {}", n))
            })
            .collect();
        GeneratedBatch::valid(questions)
    }
}

impl Default for MockGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Decrements the in-flight gauge even when the call is cancelled.
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl QuestionGenerator for MockGenerator {
    fn id(&self) -> &str {
        "mock"
    }

    fn has_credential(&self) -> bool {
        self.credential
    }

    async fn generate(
        &self,
        category: &Category,
        count: usize,
    ) -> Result<GeneratedBatch, GenerationError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(category.id.to_string());
        }

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        let delay = self
            .delays
            .get(category.id)
            .copied()
            .unwrap_or(self.default_delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if !self.available.load(Ordering::SeqCst) {
            return Err(GenerationError::Unavailable("Mock generator disabled".to_string()));
        }

        match self.scripts.get(category.id) {
            Some(Script::Batch(batch)) => Ok(batch.clone()),
            Some(Script::Failure(failure)) => Err(failure.to_error()),
            None => Ok(self.fresh_batch(category, count)),
        }
    }
}
