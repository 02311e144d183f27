//! Duplicate detection for generated questions.
//!
//! Two tiers:
//! - **Exact**: a SHA-256 signature of the normalized question text, kept in
//!   a concurrent set. Membership is O(1) and insertion is compare-and-insert,
//!   so two workers can never both register the same signature.
//! - **Fuzzy**: Jaccard similarity between word-token sets, compared only
//!   against recent questions of the same canonical category. Each category
//!   shard is behind its own lock, which linearizes registration per
//!   category without serializing unrelated categories.

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use dashmap::{DashMap, DashSet};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::question::GeneratedQuestion;

/// Similarity at or above which two questions are considered duplicates.
pub const SIMILARITY_THRESHOLD: f64 = 0.85;

/// Default number of recent questions per category compared for similarity.
pub const DEFAULT_SIMILARITY_WINDOW: usize = 1_000;

/// Normalized fingerprint of a question's text.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Signature([u8; 32]);

impl Signature {
    /// Compute the signature of `text`, or `None` if nothing meaning-bearing
    /// survives normalization.
    pub fn of(text: &str) -> Option<Self> {
        let normalized = normalize(text);
        if normalized.is_empty() {
            return None;
        }
        let digest = Sha256::digest(normalized.as_bytes());
        Some(Self(digest.into()))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({})", &self.to_hex()[..12])
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Case-fold, strip punctuation and collapse whitespace.
pub fn normalize(text: &str) -> String {
    let folded: String = text
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect();
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Word-token set of the normalized text. Stop-words are kept.
pub fn tokenize(text: &str) -> HashSet<String> {
    normalize(text)
        .split(' ')
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// `|A ∩ B| / |A ∪ B|`, defined as 0.0 when both sets are empty.
pub fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.len() + b.len() - intersection;
    intersection as f64 / union as f64
}

/// Outcome of [`DedupIndex::accept`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Verdict {
    /// New question, now registered in the index
    Accepted,
    /// Question text was empty after normalization
    Empty,
    /// Signature already known
    ExactDuplicate,
    /// Too similar to a known question in the same category
    NearDuplicate { similarity: f64 },
}

impl Verdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Verdict::Accepted)
    }
}

/// One stored question used to seed the index at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedEntry {
    /// Canonical category id
    pub category_id: String,
    pub question: String,
}

#[derive(Debug, Default)]
struct CategoryShard {
    /// Most recent first
    token_sets: VecDeque<(Signature, HashSet<String>)>,
}

/// Process-wide duplicate index.
pub struct DedupIndex {
    signatures: DashSet<Signature>,
    shards: DashMap<String, Arc<Mutex<CategoryShard>>>,
    window: usize,
}

impl DedupIndex {
    /// Create an empty index with the default similarity window.
    pub fn new() -> Self {
        Self::with_window(DEFAULT_SIMILARITY_WINDOW)
    }

    /// Create an empty index comparing against the `window` most recent
    /// questions of each category.
    pub fn with_window(window: usize) -> Self {
        Self {
            signatures: DashSet::new(),
            shards: DashMap::new(),
            window: window.max(1),
        }
    }

    /// Check a candidate and register it if it is new.
    ///
    /// `category_id` scopes the similarity comparison.
    pub fn accept(&self, category_id: &str, question: &GeneratedQuestion) -> Verdict {
        self.accept_text(category_id, &question.question)
    }

    /// [`accept`](Self::accept) on raw question text.
    pub fn accept_text(&self, category_id: &str, text: &str) -> Verdict {
        if text.trim().is_empty() {
            return Verdict::Empty;
        }
        let Some(signature) = Signature::of(text) else {
            return Verdict::Empty;
        };

        // Fast path, no shard lock
        if self.signatures.contains(&signature) {
            return Verdict::ExactDuplicate;
        }

        let tokens = tokenize(text);
        let shard = self.shard(category_id);
        let mut shard = lock(&shard);

        for (_, existing) in shard.token_sets.iter().take(self.window) {
            let similarity = jaccard(&tokens, existing);
            if similarity >= SIMILARITY_THRESHOLD {
                debug!(category = category_id, similarity, "Near-duplicate question");
                return Verdict::NearDuplicate { similarity };
            }
        }

        // Another category may have registered the same text meanwhile
        if !self.signatures.insert(signature) {
            return Verdict::ExactDuplicate;
        }

        shard.token_sets.push_front((signature, tokens));
        shard.token_sets.truncate(self.window);
        Verdict::Accepted
    }

    /// Undo the registration of a previously accepted question.
    ///
    /// Used when the accepted question could not be persisted. A candidate
    /// rejected against this entry before the release stays rejected, so
    /// both may be missing until a later cycle generates them again.
    pub fn release(&self, category_id: &str, text: &str) {
        let Some(signature) = Signature::of(text) else {
            return;
        };
        if let Some(shard) = self.shards.get(category_id).map(|s| Arc::clone(s.value())) {
            let mut shard = lock(&shard);
            shard.token_sets.retain(|(sig, _)| *sig != signature);
        }
        self.signatures.remove(&signature);
    }

    /// Register existing questions without duplicate checks.
    ///
    /// `entries` should be ordered oldest first so the newest end up at the
    /// front of each category's comparison window.
    pub fn seed(&self, entries: impl IntoIterator<Item = SeedEntry>) -> usize {
        let mut count = 0;
        for entry in entries {
            let Some(signature) = Signature::of(&entry.question) else {
                continue;
            };
            if !self.signatures.insert(signature) {
                continue;
            }
            let shard = self.shard(&entry.category_id);
            let mut shard = lock(&shard);
            shard.token_sets.push_front((signature, tokenize(&entry.question)));
            shard.token_sets.truncate(self.window);
            count += 1;
        }
        info!(count, "Seeded dedup index");
        count
    }

    /// Whether the exact signature of `text` is known.
    pub fn contains(&self, text: &str) -> bool {
        Signature::of(text).is_some_and(|sig| self.signatures.contains(&sig))
    }

    /// Number of known signatures.
    pub fn len(&self) -> usize {
        self.signatures.len()
    }

    /// Check if no signatures are known.
    pub fn is_empty(&self) -> bool {
        self.signatures.is_empty()
    }

    fn shard(&self, category_id: &str) -> Arc<Mutex<CategoryShard>> {
        if let Some(shard) = self.shards.get(category_id) {
            return Arc::clone(shard.value());
        }
        Arc::clone(
            self.shards
                .entry(category_id.to_string())
                .or_default()
                .value(),
        )
    }
}

impl Default for DedupIndex {
    fn default() -> Self {
        Self::new()
    }
}

fn lock(shard: &Mutex<CategoryShard>) -> MutexGuard<'_, CategoryShard> {
    // A panic while holding the lock leaves the shard consistent
    shard.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;

    fn words(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("word{}", i)).collect()
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("  What's   the\tCapital of FRANCE?! "), "whats the capital of france");
        assert_eq!(normalize("?!..."), "");
        assert_eq!(normalize("Ça va, Zoë?"), "ça va zoë");
    }

    #[test]
    fn test_signature_ignores_surface_formatting() {
        let a = Signature::of("What is the capital of France?").unwrap();
        let b = Signature::of("  what IS the   capital of france ").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, Signature::of("What is the capital of Spain?").unwrap());
        assert!(Signature::of("  ...  ").is_none());
        assert_eq!(a.to_hex().len(), 64);
    }

    #[test]
    fn test_jaccard() {
        let a = tokenize("the quick brown fox");
        let b = tokenize("the quick red fox");
        assert!((jaccard(&a, &b) - 3.0 / 5.0).abs() < f64::EPSILON);
        assert_eq!(jaccard(&HashSet::new(), &HashSet::new()), 0.0);
        assert_eq!(jaccard(&a, &a), 1.0);
    }

    #[test]
    fn test_exact_duplicate_under_case_and_whitespace() {
        let index = DedupIndex::new();
        assert_eq!(index.accept_text("history", "Who built the Colosseum?"), Verdict::Accepted);
        assert_eq!(
            index.accept_text("history", "  who BUILT the   colosseum "),
            Verdict::ExactDuplicate
        );
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_exact_duplicate_across_categories() {
        let index = DedupIndex::new();
        assert!(index.accept_text("history", "Who painted the Mona Lisa?").is_accepted());
        assert_eq!(
            index.accept_text("arts-and-literature", "Who painted the Mona Lisa?"),
            Verdict::ExactDuplicate
        );
    }

    #[test]
    fn test_empty_rejected() {
        let index = DedupIndex::new();
        assert_eq!(index.accept_text("history", ""), Verdict::Empty);
        assert_eq!(index.accept_text("history", "   "), Verdict::Empty);
        assert_eq!(index.accept_text("history", "???"), Verdict::Empty);
        assert!(index.is_empty());
    }

    #[test]
    fn test_threshold_is_inclusive() {
        // 17 shared of 20 total = 0.85
        let base = words(20);
        let index = DedupIndex::new();
        assert!(index.accept_text("science", &base.join(" ")).is_accepted());
        let verdict = index.accept_text("science", &base[..17].join(" "));
        assert_eq!(verdict, Verdict::NearDuplicate { similarity: 0.85 });

        // 21 shared of 25 total = 0.84
        let base = words(25);
        let index = DedupIndex::new();
        assert!(index.accept_text("science", &base.join(" ")).is_accepted());
        assert_eq!(index.accept_text("science", &base[..21].join(" ")), Verdict::Accepted);
    }

    #[test]
    fn test_similarity_scoped_per_category() {
        let base = words(20);
        let index = DedupIndex::new();
        assert!(index.accept_text("science", &base.join(" ")).is_accepted());
        assert!(index.accept_text("history", &base[..18].join(" ")).is_accepted());
    }

    #[test]
    fn test_window_bounds_comparison() {
        let index = DedupIndex::with_window(2);
        let first = words(10).join(" ");
        assert!(index.accept_text("music", &first).is_accepted());
        assert!(index.accept_text("music", "completely different question one").is_accepted());
        assert!(index.accept_text("music", "another unrelated question two").is_accepted());

        // `first` fell out of the window: only the exact tier catches it now
        let near_first = words(9).join(" ");
        assert!(index.accept_text("music", &near_first).is_accepted());
        assert_eq!(index.accept_text("music", &first), Verdict::ExactDuplicate);
    }

    #[test]
    fn test_release_allows_resubmission() {
        let index = DedupIndex::new();
        let text = "Which planet is known as the red planet?";
        assert!(index.accept_text("science", text).is_accepted());
        index.release("science", text);
        assert!(!index.contains(text));
        assert!(index.accept_text("science", text).is_accepted());
    }

    #[test]
    fn test_seed() {
        let index = DedupIndex::new();
        let count = index.seed(vec![
            SeedEntry {
                category_id: "history".into(),
                question: "When did the Berlin Wall fall?".into(),
            },
            SeedEntry {
                category_id: "history".into(),
                question: "when did the berlin wall fall".into(),
            },
            SeedEntry {
                category_id: "history".into(),
                question: "".into(),
            },
        ]);
        assert_eq!(count, 1);
        assert_eq!(
            index.accept_text("history", "When did the Berlin Wall fall?"),
            Verdict::ExactDuplicate
        );
    }

    #[test]
    fn test_concurrent_registration_accepts_once() {
        let index = Arc::new(DedupIndex::new());
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let index = Arc::clone(&index);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    // Alternate categories so both tiers race
                    let category = if i % 2 == 0 { "science" } else { "history" };
                    index.accept_text(category, "What is the speed of light in vacuum?")
                })
            })
            .collect();

        let accepted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(Verdict::is_accepted)
            .count();
        assert_eq!(accepted, 1);
    }

    #[test]
    fn test_concurrent_near_duplicates_same_category() {
        let index = Arc::new(DedupIndex::new());
        let barrier = Arc::new(Barrier::new(6));
        let base = words(20);

        let handles: Vec<_> = (0..6)
            .map(|i| {
                let index = Arc::clone(&index);
                let barrier = Arc::clone(&barrier);
                // Each variant drops one word: pairwise similarity 18/20 = 0.9
                let mut variant = base.clone();
                variant.remove(i);
                std::thread::spawn(move || {
                    barrier.wait();
                    index.accept_text("geography", &variant.join(" "))
                })
            })
            .collect();

        let accepted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(Verdict::is_accepted)
            .count();
        assert_eq!(accepted, 1);
    }
}
