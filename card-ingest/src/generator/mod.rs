//! Question generation layer.
//!
//! Provides a trait-based boundary over the external content provider:
//! - OpenAI-compatible chat completions (production)
//! - Mock generator for testing

pub mod mock;
pub mod openai;
pub mod traits;

pub use mock::{MockFailure, MockGenerator};
pub use openai::{OpenAiConfig, OpenAiGenerator};
pub use traits::{GeneratedBatch, GenerationError, QuestionGenerator};
