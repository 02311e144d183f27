//! OpenAI-compatible question generator.
//!
//! Works with any endpoint speaking the chat completions API (OpenAI,
//! vLLM, Ollama, ...). One call per batch; the model is asked for a JSON
//! array of questions which is then validated item by item.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use reqwest::{header, Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::traits::*;
use crate::category::Category;
use crate::question::{Difficulty, GeneratedQuestion};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

const TEMPERATURE: f32 = 0.8;
const MAX_TOKENS: u32 = 2000;
const MAX_INCORRECT_ANSWERS: usize = 3;

const SYSTEM_PROMPT: &str = "You are a trivia question generator. Generate unique, factually \
accurate trivia questions. Always respond with valid JSON only.";

/// Connection settings for [`OpenAiGenerator`].
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: String,
    /// Applied by the HTTP client to every call
    pub timeout: Duration,
}

impl OpenAiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            api_key: api_key.into(),
            timeout: Duration::from_secs(60),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Question generator backed by an OpenAI-compatible API.
pub struct OpenAiGenerator {
    client: Client,
    config: OpenAiConfig,
}

impl OpenAiGenerator {
    /// Create a new generator.
    pub fn new(config: OpenAiConfig) -> Result<Self, GenerationError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );

        let client = Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .build()
            .map_err(|e| GenerationError::Unavailable(format!("HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    fn chat_completions_url(&self) -> String {
        format!("{}/chat/completions", self.config.base_url)
    }

    fn map_transport_error(&self, e: reqwest::Error) -> GenerationError {
        if e.is_timeout() {
            GenerationError::Timeout(self.config.timeout)
        } else {
            GenerationError::Network(e.to_string())
        }
    }
}

/// Chat completion request body.
#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

/// Chat completion response.
#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ResponseChoice>,
}

#[derive(Debug, Deserialize)]
struct ResponseChoice {
    message: MessageResponse,
}

#[derive(Debug, Deserialize)]
struct MessageResponse {
    content: Option<String>,
}

/// One question as the model is asked to emit it.
#[derive(Debug, Deserialize)]
struct RawQuestion {
    #[serde(default)]
    question: String,
    #[serde(default)]
    correct_answer: String,
    #[serde(default)]
    incorrect_answers: Vec<String>,
    #[serde(default)]
    explanation: String,
    #[serde(default)]
    hint: String,
}

#[async_trait]
impl QuestionGenerator for OpenAiGenerator {
    fn id(&self) -> &str {
        "openai"
    }

    fn has_credential(&self) -> bool {
        !self.config.api_key.trim().is_empty()
    }

    async fn generate(
        &self,
        category: &Category,
        count: usize,
    ) -> Result<GeneratedBatch, GenerationError> {
        let difficulty = Difficulty::random();

        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: build_prompt(count, category.label, difficulty),
                },
            ],
            temperature: TEMPERATURE,
            max_tokens: MAX_TOKENS,
        };

        let response = self
            .client
            .post(self.chat_completions_url())
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after_ms = response
                .headers()
                .get(header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(|secs| secs * 1000);
            let body = response.text().await.unwrap_or_default();
            let body: String = body.chars().take(200).collect();

            return Err(match status {
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    GenerationError::Authentication(format!("HTTP {}: {}", status, body))
                }
                StatusCode::TOO_MANY_REQUESTS => GenerationError::RateLimited { retry_after_ms },
                _ => GenerationError::RequestFailed(format!("HTTP {}: {}", status, body)),
            });
        }

        let chat: ChatResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                GenerationError::Timeout(self.config.timeout)
            } else {
                GenerationError::Parse(e.to_string())
            }
        })?;

        let content = chat
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| GenerationError::Parse("No choices in response".to_string()))?;

        let batch = parse_batch(&content, category.label, difficulty, &mut rand::thread_rng())?;

        debug!(
            category = category.label,
            %difficulty,
            raw = batch.raw_count,
            valid = batch.questions.len(),
            "Parsed generated batch"
        );

        Ok(batch)
    }
}

/// Build the user prompt for one batch.
pub fn build_prompt(count: usize, category: &str, difficulty: Difficulty) -> String {
    format!(
        "Generate {count} unique trivia questions about {category} at {difficulty} difficulty level.\n\n\
         Return a JSON array with this exact structure:\n\
         [\n  {{\n    \"question\": \"The question text?\",\n    \"correct_answer\": \"The correct answer\",\n    \
         \"incorrect_answers\": [\"Wrong 1\", \"Wrong 2\", \"Wrong 3\"],\n    \
         \"explanation\": \"Brief explanation of why the answer is correct\",\n    \
         \"hint\": \"A subtle clue that helps without giving away the answer\"\n  }}\n]\n\n\
         Requirements:\n\
         - Questions must be factually accurate\n\
         - Each question must have exactly 3 incorrect answers\n\
         - Incorrect answers should be plausible but clearly wrong\n\
         - For {difficulty} difficulty: {guidance}\n\
         - Return ONLY the JSON array, no other text",
        guidance = difficulty.guidance(),
    )
}

/// Parse the model's reply into a batch.
///
/// Fails only when no JSON array can be found; individual malformed items
/// are counted in `raw_count` and dropped.
pub fn parse_batch(
    content: &str,
    category: &str,
    difficulty: Difficulty,
    rng: &mut impl Rng,
) -> Result<GeneratedBatch, GenerationError> {
    let cleaned = strip_code_fences(content);

    let (Some(start), Some(end)) = (cleaned.find('['), cleaned.rfind(']')) else {
        return Err(GenerationError::Parse("No JSON array in response".to_string()));
    };
    if start >= end {
        return Err(GenerationError::Parse("No JSON array in response".to_string()));
    }

    let items: Vec<serde_json::Value> = serde_json::from_str(&cleaned[start..=end])
        .map_err(|e| GenerationError::Parse(format!("Invalid JSON array: {}", e)))?;

    let raw_count = items.len();
    let mut questions = Vec::with_capacity(raw_count);

    for item in items {
        let raw: RawQuestion = match serde_json::from_value(item) {
            Ok(raw) => raw,
            Err(e) => {
                debug!(error = %e, "Dropping malformed item");
                continue;
            }
        };

        let incorrect: Vec<String> = raw
            .incorrect_answers
            .into_iter()
            .filter(|a| !a.trim().is_empty())
            .take(MAX_INCORRECT_ANSWERS)
            .collect();

        if raw.correct_answer.trim().is_empty() || incorrect.is_empty() {
            debug!(question = %raw.question, "Dropping item without usable answers");
            continue;
        }

        let correct_index = rng.gen_range(0..=incorrect.len());
        let question = GeneratedQuestion::from_answers(
            raw.question,
            raw.correct_answer,
            incorrect,
            correct_index,
            category,
        )
        .with_explanation(raw.explanation)
        .with_hint(raw.hint)
        .with_difficulty(difficulty);

        if let Err(e) = question.validate() {
            debug!(error = %e, question = %question.question, "Dropping invalid item");
            continue;
        }

        questions.push(question);
    }

    if questions.len() < raw_count {
        warn!(
            category,
            dropped = raw_count - questions.len(),
            "Dropped malformed generated items"
        );
    }

    Ok(GeneratedBatch {
        questions,
        raw_count,
    })
}

/// Remove markdown code fences (```` ``` ```` and ```` ```json ````).
fn strip_code_fences(content: &str) -> String {
    let mut out = String::with_capacity(content.len());
    let mut rest = content;

    while let Some(pos) = rest.find("```") {
        out.push_str(&rest[..pos]);
        rest = &rest[pos + 3..];
        if rest.get(..4).is_some_and(|tag| tag.eq_ignore_ascii_case("json")) {
            rest = &rest[4..];
        }
        rest = rest.trim_start();
    }
    out.push_str(rest);
    out.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::category::CategoryTable;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use wiremock::matchers::{bearer_token, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const GOOD_ITEMS: &str = r#"[
        {
            "question": "What is the largest planet in the solar system?",
            "correct_answer": "Jupiter",
            "incorrect_answers": ["Saturn", "Neptune", "Earth"],
            "explanation": "Jupiter is more than twice as massive as all other planets combined.",
            "hint": "Named after the king of the Roman gods"
        },
        {
            "question": "What gas do plants absorb from the atmosphere?",
            "correct_answer": "Carbon dioxide",
            "incorrect_answers": ["Oxygen", "Nitrogen", "Helium", "Argon"],
            "explanation": "Plants use CO2 for photosynthesis.",
            "hint": "You exhale it"
        }
    ]"#;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(7)
    }

    fn chat_body(content: &str) -> serde_json::Value {
        serde_json::json!({
            "choices": [{ "message": { "role": "assistant", "content": content }, "finish_reason": "stop" }]
        })
    }

    async fn generator_for(server: &MockServer) -> OpenAiGenerator {
        OpenAiGenerator::new(
            OpenAiConfig::new("test-key")
                .with_base_url(server.uri())
                .with_timeout(Duration::from_secs(5)),
        )
        .unwrap()
    }

    #[test]
    fn test_parse_valid_batch() {
        let batch = parse_batch(GOOD_ITEMS, "Science & Nature", Difficulty::Easy, &mut rng()).unwrap();

        assert_eq!(batch.raw_count, 2);
        assert_eq!(batch.questions.len(), 2);

        for q in &batch.questions {
            assert!(q.validate().is_ok());
            assert_eq!(q.choices.len(), 4);
            assert_eq!(q.category, "Science & Nature");
            assert_eq!(q.difficulty, Difficulty::Easy);
        }
        assert_eq!(batch.questions[0].correct_answer(), Some("Jupiter"));
        assert_eq!(batch.questions[1].correct_answer(), Some("Carbon dioxide"));
    }

    #[test]
    fn test_parse_strips_fences_and_prose() {
        let content = format!("Sure! Here you go:\n```json\n{}\n```\nEnjoy.", GOOD_ITEMS);
        let batch = parse_batch(&content, "Science", Difficulty::Medium, &mut rng()).unwrap();
        assert_eq!(batch.questions.len(), 2);
    }

    #[test]
    fn test_parse_drops_malformed_items() {
        let content = r#"[
            {"question": "Valid?", "correct_answer": "Yes", "incorrect_answers": ["No"], "explanation": "Because."},
            {"question": "", "correct_answer": "Yes", "incorrect_answers": ["No"], "explanation": "x"},
            {"question": "No wrong answers?", "correct_answer": "Yes", "incorrect_answers": [], "explanation": "x"},
            {"question": "No explanation?", "correct_answer": "Yes", "incorrect_answers": ["No"]},
            "not even an object",
            {"question": 42}
        ]"#;
        let batch = parse_batch(content, "History", Difficulty::Hard, &mut rng()).unwrap();
        assert_eq!(batch.raw_count, 6);
        assert_eq!(batch.questions.len(), 1);
        assert_eq!(batch.dropped(), 5);
        assert_eq!(batch.questions[0].choices.len(), 2);
    }

    #[test]
    fn test_parse_without_array_fails() {
        let err = parse_batch("I cannot help with that.", "History", Difficulty::Easy, &mut rng())
            .unwrap_err();
        assert!(matches!(err, GenerationError::Parse(_)));
        assert!(!err.is_transport());

        let err = parse_batch("[not json]", "History", Difficulty::Easy, &mut rng()).unwrap_err();
        assert!(matches!(err, GenerationError::Parse(_)));
    }

    #[test]
    fn test_prompt_mentions_category_and_guidance() {
        let prompt = build_prompt(10, "Film & TV", Difficulty::Hard);
        assert!(prompt.starts_with("Generate 10 unique trivia questions about Film & TV at hard"));
        assert!(prompt.contains(Difficulty::Hard.guidance()));
        assert!(prompt.contains("\"incorrect_answers\""));
    }

    #[tokio::test]
    async fn test_generate_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(bearer_token("test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(chat_body(GOOD_ITEMS)))
            .expect(1)
            .mount(&server)
            .await;

        let generator = generator_for(&server).await;
        let table = CategoryTable::new();
        let batch = generator
            .generate(table.resolve("science"), 2)
            .await
            .unwrap();

        assert_eq!(batch.questions.len(), 2);
        assert_eq!(batch.questions[0].category, "Science & Nature");
    }

    #[tokio::test]
    async fn test_generate_auth_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .mount(&server)
            .await;

        let generator = generator_for(&server).await;
        let table = CategoryTable::new();
        let err = generator.generate(table.resolve("history"), 5).await.unwrap_err();
        assert!(matches!(err, GenerationError::Authentication(_)));
        assert!(err.is_transport());
    }

    #[tokio::test]
    async fn test_generate_rate_limited() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "3"))
            .mount(&server)
            .await;

        let generator = generator_for(&server).await;
        let table = CategoryTable::new();
        let err = generator.generate(table.resolve("music"), 5).await.unwrap_err();
        assert!(matches!(
            err,
            GenerationError::RateLimited {
                retry_after_ms: Some(3000)
            }
        ));
    }

    #[tokio::test]
    async fn test_generate_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let generator = generator_for(&server).await;
        let table = CategoryTable::new();
        let err = generator.generate(table.resolve("music"), 5).await.unwrap_err();
        match err {
            GenerationError::RequestFailed(msg) => assert!(msg.contains("500")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_generate_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(chat_body(GOOD_ITEMS))
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&server)
            .await;

        let generator = OpenAiGenerator::new(
            OpenAiConfig::new("test-key")
                .with_base_url(server.uri())
                .with_timeout(Duration::from_millis(200)),
        )
        .unwrap();
        let table = CategoryTable::new();
        let err = generator.generate(table.resolve("music"), 5).await.unwrap_err();
        assert!(matches!(err, GenerationError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_generate_empty_choices() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "choices": [] })))
            .mount(&server)
            .await;

        let generator = generator_for(&server).await;
        let table = CategoryTable::new();
        let err = generator.generate(table.resolve("music"), 5).await.unwrap_err();
        assert!(matches!(err, GenerationError::Parse(_)));
    }
}
