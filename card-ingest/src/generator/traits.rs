//! Core trait for question generators.
//!
//! This module defines the `QuestionGenerator` trait - the boundary between
//! the ingestion daemon and whatever produces candidate questions.

use std::time::Duration;

use async_trait::async_trait;

use crate::category::Category;
use crate::question::GeneratedQuestion;

/// Error types for generation calls.
///
/// Individual malformed items never surface here; they are dropped from the
/// batch. These are whole-batch failures.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    /// Provider is not available
    #[error("Provider unavailable: {0}")]
    Unavailable(String),

    /// Credential rejected
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Rate limited by the provider
    #[error("Rate limited, retry after {retry_after_ms:?}ms")]
    RateLimited { retry_after_ms: Option<u64> },

    /// Call did not finish in time
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// Network error
    #[error("Network error: {0}")]
    Network(String),

    /// Non-success response
    #[error("Request failed: {0}")]
    RequestFailed(String),

    /// Response had no usable batch
    #[error("Parse error: {0}")]
    Parse(String),
}

impl GenerationError {
    /// Whether the failure happened in transport rather than in the payload.
    pub fn is_transport(&self) -> bool {
        !matches!(self, GenerationError::Parse(_))
    }
}

/// Result of one generation call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeneratedBatch {
    /// Candidates that passed validation
    pub questions: Vec<GeneratedQuestion>,
    /// Items the provider returned, including ones dropped as malformed
    pub raw_count: usize,
}

impl GeneratedBatch {
    /// A batch in which every item was valid.
    pub fn valid(questions: Vec<GeneratedQuestion>) -> Self {
        Self {
            raw_count: questions.len(),
            questions,
        }
    }

    /// Items dropped by validation.
    pub fn dropped(&self) -> usize {
        self.raw_count.saturating_sub(self.questions.len())
    }
}

/// A source of candidate trivia questions.
///
/// Implementations perform no deduplication and no persistence.
#[async_trait]
pub trait QuestionGenerator: Send + Sync {
    /// Identifier of the provider (recorded on stored cards).
    fn id(&self) -> &str;

    /// Whether a credential is configured. The daemon refuses to start
    /// without one.
    fn has_credential(&self) -> bool {
        true
    }

    /// Generate up to `count` questions for `category`.
    async fn generate(
        &self,
        category: &Category,
        count: usize,
    ) -> Result<GeneratedBatch, GenerationError>;
}
