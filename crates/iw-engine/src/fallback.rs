//! Deterministic local stand-ins for provider output.
//!
//! Used whenever the LLM or embedding provider is unavailable, times out or
//! returns something unusable. Nothing here touches the network. Randomness
//! is always drawn from a caller-supplied RNG so tests can seed it.

use std::collections::HashSet;

use rand::Rng;
use sha2::{Digest, Sha256};

use iw_core::{Concept, ConceptGraph, ConceptRelationship, Theme, MAX_IMPORTANCE, MIN_IMPORTANCE};

const MIN_CONCEPT_WORD_CHARS: usize = 5;
const SHORT_CONTENT_CHARS: usize = 200;
const MEDIUM_CONTENT_CHARS: usize = 1000;
const MAX_RELATIONSHIPS_PER_CONCEPT: usize = 3;
const RELATIONSHIP_LABELS: [&str; 4] = ["relates to", "supports", "builds on", "contrasts with"];
const MAX_SUMMARY_TOPICS: usize = 2;
const DEFAULT_TOPIC: &str = "general interest";

/// Words that place a note under one of the fixed themes.
const TOPIC_VOCABULARY: [(Theme, &[&str]); 6] = [
    (
        Theme::Technology,
        &["software", "code", "computer", "program", "programming", "rust", "network", "database", "server", "algorithm"],
    ),
    (
        Theme::Business,
        &["market", "customer", "revenue", "sales", "budget", "meeting", "strategy", "client", "invoice", "startup"],
    ),
    (
        Theme::Science,
        &["research", "experiment", "theory", "physics", "chemistry", "biology", "hypothesis", "data", "study"],
    ),
    (
        Theme::Philosophy,
        &["ethics", "meaning", "truth", "mind", "existence", "virtue", "morality", "consciousness"],
    ),
    (
        Theme::Personal,
        &["family", "friend", "friends", "travel", "garden", "hobby", "journal", "birthday", "home", "weekend"],
    ),
    (
        Theme::Health,
        &["exercise", "sleep", "diet", "fitness", "nutrition", "doctor", "run", "running", "workout", "meditation"],
    ),
];

#[derive(Debug, Clone)]
pub struct LocalFallbackGenerator {
    max_concepts: usize,
}

impl LocalFallbackGenerator {
    pub fn new(max_concepts: usize) -> Self {
        Self { max_concepts }
    }

    /// Canned summary sized to the content, naming its themes.
    pub fn summarize(&self, content: &str) -> String {
        let word_count = content.split_whitespace().count();
        let words = if word_count == 1 { "word" } else { "words" };
        let topics = summary_topics(content);
        let topic_clause = format!(" Topics: {}.", topics.join(" and "));

        let chars = content.chars().count();
        if chars < SHORT_CONTENT_CHARS {
            format!(
                "A brief note of {word_count} {words} capturing a single idea.{topic_clause}"
            )
        } else if chars < MEDIUM_CONTENT_CHARS {
            format!(
                "A note of {word_count} {words} that develops a few related points and \
                 connects them into a coherent thought.{topic_clause}"
            )
        } else {
            format!(
                "A detailed note of {word_count} {words} covering several themes in depth, \
                 with supporting detail and context for each.{topic_clause}"
            )
        }
    }

    /// Concept graph built from the content's longer words.
    ///
    /// Each concept links to the next one to three concepts by wrapping
    /// index, so every concept has at least one relationship and none
    /// points to itself when there are two or more concepts.
    pub fn concept_graph<R: Rng + ?Sized>(&self, content: &str, rng: &mut R) -> ConceptGraph {
        let concepts: Vec<Concept> = candidate_words(content)
            .into_iter()
            .take(self.max_concepts)
            .map(|(id, label)| {
                let theme = Theme::ALL[rng.gen_range(0..Theme::ALL.len())];
                let importance = rng.gen_range(MIN_IMPORTANCE..=MAX_IMPORTANCE);
                Concept::new(id, label, theme, i64::from(importance))
            })
            .collect();

        let n = concepts.len();
        let mut relationships = Vec::new();
        if n > 1 {
            for (i, concept) in concepts.iter().enumerate() {
                let count = rng.gen_range(1..=MAX_RELATIONSHIPS_PER_CONCEPT).min(n - 1);
                for k in 1..=count {
                    let target = &concepts[(i + k) % n];
                    relationships.push(ConceptRelationship {
                        source_id: concept.id.clone(),
                        target_id: target.id.clone(),
                        label: RELATIONSHIP_LABELS[(i + k) % RELATIONSHIP_LABELS.len()].to_string(),
                    });
                }
            }
        }

        ConceptGraph {
            concepts,
            relationships,
        }
    }
}

/// Themes whose vocabulary appears in the content, at most
/// [`MAX_SUMMARY_TOPICS`], in theme order.
fn summary_topics(content: &str) -> Vec<&'static str> {
    let words: HashSet<String> = content
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect();
    let topics: Vec<&'static str> = TOPIC_VOCABULARY
        .iter()
        .filter(|(_, vocabulary)| vocabulary.iter().any(|word| words.contains(*word)))
        .map(|(theme, _)| theme.as_str())
        .take(MAX_SUMMARY_TOPICS)
        .collect();
    if topics.is_empty() {
        vec![DEFAULT_TOPIC]
    } else {
        topics
    }
}

/// Distinct words longer than four characters, in order of first use.
/// Returns `(id, label)` pairs: the lowercased word and its first spelling.
fn candidate_words(content: &str) -> Vec<(String, String)> {
    let mut seen = HashSet::new();
    content
        .split(|c: char| !c.is_alphanumeric())
        .filter(|word| word.chars().count() >= MIN_CONCEPT_WORD_CHARS)
        .filter(|word| !word.chars().all(|c| c.is_ascii_digit()))
        .filter_map(|word| {
            let id = word.to_lowercase();
            seen.insert(id.clone()).then(|| (id, word.to_string()))
        })
        .collect()
}

/// Feature-hashed bag-of-words vector, L2-normalized.
///
/// Empty or token-free text yields the zero vector.
pub fn hashed_embedding(text: &str, dimensions: usize) -> Vec<f32> {
    let mut vector = vec![0.0f32; dimensions];
    if dimensions == 0 {
        return vector;
    }

    for token in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
    {
        let digest = Sha256::digest(token.as_bytes());
        let mut index_bytes = [0u8; 8];
        index_bytes.copy_from_slice(&digest[..8]);
        let index = (u64::from_le_bytes(index_bytes) % dimensions as u64) as usize;
        let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
        vector[index] += sign;
    }

    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in &mut vector {
            *v /= norm;
        }
    }
    vector
}
