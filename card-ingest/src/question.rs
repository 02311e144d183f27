//! Candidate questions produced by the generation client.

use rand::Rng;
use serde::{Deserialize, Serialize};

#[cfg(feature = "typescript")]
use ts_rs::TS;

/// Question difficulty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl Difficulty {
    pub const ALL: [Difficulty; 3] = [Difficulty::Easy, Difficulty::Medium, Difficulty::Hard];

    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Hard => "hard",
        }
    }

    /// Prompt guidance for this difficulty.
    pub fn guidance(&self) -> &'static str {
        match self {
            Difficulty::Easy => "Questions should be common knowledge that most people would know",
            Difficulty::Medium => {
                "Questions should require some specific knowledge but not be obscure"
            }
            Difficulty::Hard => {
                "Questions should be challenging and require specialized knowledge"
            }
        }
    }

    /// Pick a difficulty uniformly at random.
    pub fn random() -> Self {
        Self::ALL[rand::thread_rng().gen_range(0..Self::ALL.len())]
    }
}

impl Default for Difficulty {
    fn default() -> Self {
        Difficulty::Medium
    }
}

impl std::fmt::Display for Difficulty {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One answer choice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct Choice {
    pub text: String,
    #[serde(rename = "isCorrect")]
    pub is_correct: bool,
}

impl Choice {
    pub fn correct(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_correct: true,
        }
    }

    pub fn incorrect(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_correct: false,
        }
    }
}

/// Why a candidate was dropped by validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidQuestion {
    #[error("question text is empty")]
    EmptyQuestion,

    #[error("explanation is empty")]
    EmptyExplanation,

    #[error("need at least 2 choices, got {0}")]
    TooFewChoices(usize),

    #[error("expected exactly one correct choice, got {0}")]
    CorrectChoiceCount(usize),

    #[error("choice {0} is empty")]
    EmptyChoice(usize),
}

/// A candidate trivia question, not yet deduplicated or stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct GeneratedQuestion {
    /// Question text
    pub question: String,
    /// Answer choices, exactly one marked correct
    pub choices: Vec<Choice>,
    /// Why the correct answer is correct
    pub explanation: String,
    /// Clue shown on request
    #[serde(default)]
    pub hint: String,
    #[serde(default)]
    pub difficulty: Difficulty,
    /// Category label as supplied by the provider (not yet canonical)
    pub category: String,
}

impl GeneratedQuestion {
    /// Build a question from a correct answer and its distractors.
    ///
    /// The correct answer is inserted at `correct_index` (clamped to the
    /// number of distractors).
    pub fn from_answers(
        question: impl Into<String>,
        correct_answer: impl Into<String>,
        incorrect: impl IntoIterator<Item = String>,
        correct_index: usize,
        category: impl Into<String>,
    ) -> Self {
        let mut choices: Vec<Choice> = incorrect.into_iter().map(Choice::incorrect).collect();
        let at = correct_index.min(choices.len());
        choices.insert(at, Choice::correct(correct_answer));

        Self {
            question: question.into(),
            choices,
            explanation: String::new(),
            hint: String::new(),
            difficulty: Difficulty::default(),
            category: category.into(),
        }
    }

    pub fn with_explanation(mut self, explanation: impl Into<String>) -> Self {
        self.explanation = explanation.into();
        self
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = hint.into();
        self
    }

    pub fn with_difficulty(mut self, difficulty: Difficulty) -> Self {
        self.difficulty = difficulty;
        self
    }

    /// Index of the correct choice, if exactly one is marked.
    pub fn correct_index(&self) -> Option<usize> {
        let mut correct = self.choices.iter().enumerate().filter(|(_, c)| c.is_correct);
        match (correct.next(), correct.next()) {
            (Some((idx, _)), None) => Some(idx),
            _ => None,
        }
    }

    /// Text of the correct choice, if exactly one is marked.
    pub fn correct_answer(&self) -> Option<&str> {
        self.correct_index().map(|idx| self.choices[idx].text.as_str())
    }

    /// Check the structural rules every stored card must satisfy.
    pub fn validate(&self) -> Result<(), InvalidQuestion> {
        if self.question.trim().is_empty() {
            return Err(InvalidQuestion::EmptyQuestion);
        }
        if self.explanation.trim().is_empty() {
            return Err(InvalidQuestion::EmptyExplanation);
        }
        if self.choices.len() < 2 {
            return Err(InvalidQuestion::TooFewChoices(self.choices.len()));
        }
        if let Some(idx) = self.choices.iter().position(|c| c.text.trim().is_empty()) {
            return Err(InvalidQuestion::EmptyChoice(idx));
        }
        let correct = self.choices.iter().filter(|c| c.is_correct).count();
        if correct != 1 {
            return Err(InvalidQuestion::CorrectChoiceCount(correct));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> GeneratedQuestion {
        GeneratedQuestion::from_answers(
            "What is the capital of France?",
            "Paris",
            vec!["Lyon".to_string(), "Nice".to_string(), "Lille".to_string()],
            2,
            "geography",
        )
        .with_explanation("Paris has been the capital since 987.")
    }

    #[test]
    fn test_from_answers_places_correct_choice() {
        let q = sample();
        assert_eq!(q.choices.len(), 4);
        assert_eq!(q.correct_index(), Some(2));
        assert_eq!(q.correct_answer(), Some("Paris"));
        assert!(q.validate().is_ok());
    }

    #[test]
    fn test_correct_index_clamped() {
        let q = GeneratedQuestion::from_answers("Q?", "A", vec!["B".to_string()], 9, "x");
        assert_eq!(q.correct_index(), Some(1));
    }

    #[test]
    fn test_validation_failures() {
        let mut q = sample();
        q.question = "   ".into();
        assert_eq!(q.validate(), Err(InvalidQuestion::EmptyQuestion));

        let mut q = sample();
        q.explanation.clear();
        assert_eq!(q.validate(), Err(InvalidQuestion::EmptyExplanation));

        let mut q = sample();
        q.choices.truncate(1);
        assert_eq!(q.validate(), Err(InvalidQuestion::TooFewChoices(1)));

        let mut q = sample();
        q.choices[0].is_correct = true;
        assert_eq!(q.validate(), Err(InvalidQuestion::CorrectChoiceCount(2)));
        assert_eq!(q.correct_index(), None);

        let mut q = sample();
        q.choices[1].text = String::new();
        assert_eq!(q.validate(), Err(InvalidQuestion::EmptyChoice(1)));
    }

    #[test]
    fn test_choice_serializes_camel_case_flag() {
        let json = serde_json::to_value(Choice::correct("Paris")).unwrap();
        assert_eq!(json, serde_json::json!({ "text": "Paris", "isCorrect": true }));
    }
}
