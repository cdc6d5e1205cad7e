//! Deterministic hashing feature extractor.

use super::{FeatureExtractor, Features, GENERAL_TOPIC};
use crate::models::EmotionalTag;
use crate::{Error, Result};
use regex::Regex;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::LazyLock;

/// Upper bound on tokens considered per utterance.
const MAX_TOKENS: usize = 1000;

/// Maximum number of topic labels emitted.
const MAX_TOPICS: usize = 3;

static TOKEN_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"[\p{L}\p{N}][\p{L}\p{N}'_+#-]*").ok());

const STOPWORDS: &[&str] = &[
    "a", "about", "after", "again", "all", "also", "am", "an", "and", "any", "are", "as", "at",
    "be", "because", "been", "before", "being", "but", "by", "can", "could", "did", "do", "does",
    "doing", "don't", "for", "from", "get", "had", "has", "have", "having", "he", "her", "here",
    "him", "his", "how", "i", "i'm", "if", "in", "into", "is", "it", "it's", "its", "just", "know",
    "let", "like", "me", "more", "most", "my", "no", "not", "now", "of", "on", "one", "or", "our",
    "out", "please", "she", "should", "so", "some", "tell", "than", "that", "the", "their",
    "them", "then", "there", "these", "they", "this", "those", "to", "too", "up", "us", "very",
    "want", "was", "we", "were", "what", "when", "where", "which", "who", "why", "will", "with",
    "would", "you", "your",
];

/// (word, valence, arousal, dominance)
const EMOTION_LEXICON: &[(&str, f32, f32, f32)] = &[
    ("angry", -0.8, 0.8, 0.6),
    ("annoyed", -0.6, 0.6, 0.5),
    ("anxious", -0.6, 0.7, 0.3),
    ("awesome", 0.9, 0.7, 0.7),
    ("bad", -0.6, 0.4, 0.4),
    ("bored", -0.4, 0.1, 0.4),
    ("calm", 0.5, 0.1, 0.6),
    ("confused", -0.4, 0.5, 0.3),
    ("excited", 0.8, 0.9, 0.6),
    ("frustrated", -0.7, 0.7, 0.4),
    ("good", 0.6, 0.3, 0.6),
    ("great", 0.8, 0.5, 0.7),
    ("happy", 0.8, 0.5, 0.7),
    ("hate", -0.9, 0.8, 0.6),
    ("help", 0.0, 0.5, 0.3),
    ("love", 0.9, 0.6, 0.6),
    ("sad", -0.7, 0.3, 0.3),
    ("scared", -0.7, 0.8, 0.2),
    ("stuck", -0.5, 0.5, 0.3),
    ("thanks", 0.7, 0.3, 0.6),
    ("tired", -0.3, 0.1, 0.4),
    ("urgent", -0.2, 0.9, 0.5),
    ("worried", -0.6, 0.6, 0.3),
    ("wrong", -0.5, 0.5, 0.4),
];

/// Feature extractor based on SHA-256 feature hashing.
///
/// Each content token is hashed into a fixed number of signed buckets; the
/// resulting vector is L2-normalized. Identical texts always produce
/// identical vectors, and texts sharing content words have positive cosine
/// similarity.
#[derive(Debug, Clone)]
pub struct HashingFeatureExtractor {
    dimensions: usize,
}

impl HashingFeatureExtractor {
    /// Default vector dimensions.
    pub const DEFAULT_DIMENSIONS: usize = 256;

    /// Creates an extractor with the default dimensions.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            dimensions: Self::DEFAULT_DIMENSIONS,
        }
    }

    /// Creates an extractor with custom dimensions (at least 1).
    #[must_use]
    pub fn with_dimensions(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    fn tokenize(text: &str) -> Vec<String> {
        let Some(pattern) = TOKEN_PATTERN.as_ref() else {
            return text
                .split_whitespace()
                .take(MAX_TOKENS)
                .map(str::to_lowercase)
                .collect();
        };
        pattern
            .find_iter(&text.to_lowercase())
            .take(MAX_TOKENS)
            .map(|m| m.as_str().trim_end_matches(['\'', '-']).to_string())
            .filter(|t| !t.is_empty())
            .collect()
    }

    fn is_content_word(token: &str) -> bool {
        token.chars().count() >= 2
            && !STOPWORDS.contains(&token)
            && !token.chars().all(|c| c.is_ascii_digit())
    }

    fn token_hash(token: &str) -> u64 {
        let digest = Sha256::digest(token.as_bytes());
        digest
            .iter()
            .take(8)
            .fold(0u64, |acc, byte| (acc << 8) | u64::from(*byte))
    }

    /// Spreads a token hash over four signed buckets.
    fn distribute_hash(vector: &mut [f32], hash: u64, dimensions: usize) {
        for j in 0..4 {
            let chunk = (hash >> (j * 16)) & 0xFFFF;
            let idx = (chunk as usize >> 1) % dimensions;
            let sign = if chunk & 1 == 0 { 1.0 } else { -1.0 };
            vector[idx] += sign;
        }
    }

    fn normalize(vector: &mut [f32]) {
        let norm_sq: f32 = vector.iter().map(|x| x * x).sum();
        if norm_sq <= 0.0 {
            return;
        }
        let inv_norm = norm_sq.sqrt().recip();
        for v in vector.iter_mut() {
            *v *= inv_norm;
        }
    }

    /// Ranks content words by frequency, then length, then first occurrence.
    fn salient_topics(content: &[&str]) -> Vec<String> {
        let mut stats: HashMap<&str, (usize, usize)> = HashMap::new();
        for (position, word) in content.iter().enumerate() {
            stats.entry(*word).or_insert((0, position)).0 += 1;
        }
        let mut ranked: Vec<(&str, usize, usize)> = stats
            .into_iter()
            .map(|(word, (count, first))| (word, count, first))
            .collect();
        ranked.sort_by(|a, b| {
            b.1.cmp(&a.1)
                .then_with(|| b.0.len().cmp(&a.0.len()))
                .then_with(|| a.2.cmp(&b.2))
        });
        ranked
            .into_iter()
            .take(MAX_TOPICS)
            .map(|(word, _, _)| word.to_string())
            .collect()
    }

    fn emotion(tokens: &[String]) -> EmotionalTag {
        let mut sum = (0.0f32, 0.0f32, 0.0f32);
        let mut hits = 0usize;
        for token in tokens {
            if let Some((_, v, a, d)) = EMOTION_LEXICON.iter().find(|(w, ..)| *w == token.as_str()) {
                sum.0 += v;
                sum.1 += a;
                sum.2 += d;
                hits += 1;
            }
        }
        if hits == 0 {
            return EmotionalTag::neutral();
        }
        let n = hits as f32;
        EmotionalTag::new(sum.0 / n, sum.1 / n, sum.2 / n)
    }
}

impl Default for HashingFeatureExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl FeatureExtractor for HashingFeatureExtractor {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn extract(&self, text: &str, topic_hint: Option<&str>) -> Result<Features> {
        if text.trim().is_empty() {
            return Err(Error::InvalidInput("cannot extract features from empty text".into()));
        }

        let tokens = Self::tokenize(text);
        let content: Vec<&str> = tokens
            .iter()
            .map(String::as_str)
            .filter(|t| Self::is_content_word(t))
            .collect();

        // Fall back to every token so stopword-only utterances still get a vector.
        let hashed: Vec<&str> = if content.is_empty() {
            tokens.iter().map(String::as_str).collect()
        } else {
            content.clone()
        };

        let mut vector = vec![0.0f32; self.dimensions];
        for token in &hashed {
            Self::distribute_hash(&mut vector, Self::token_hash(token), self.dimensions);
        }
        Self::normalize(&mut vector);

        let mut topics = Self::salient_topics(&content);
        match topic_hint.map(str::trim).filter(|h| !h.is_empty()) {
            Some(hint) => {
                let hint = hint.to_lowercase();
                topics.retain(|t| *t != hint);
                topics.insert(0, hint);
                topics.truncate(MAX_TOPICS);
            },
            None if topics.is_empty() => topics.push(GENERAL_TOPIC.to_string()),
            None => {},
        }

        Ok(Features {
            vector,
            topics,
            emotion: Self::emotion(&tokens),
        })
    }
}
