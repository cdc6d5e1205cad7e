//! Feature extraction.
//!
//! Turns raw utterance text into a feature vector, topic labels and an
//! emotional tag. The vector space is owned by the extractor: the recall
//! ranker only compares vectors produced by the same extractor, using
//! [`cosine_similarity`].

// Hash-to-index arithmetic.
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]

mod hashing;

pub use hashing::HashingFeatureExtractor;

use crate::Result;
use crate::models::EmotionalTag;

/// Topic used when an utterance has no content words and no hint.
pub const GENERAL_TOPIC: &str = "general";

/// Output of a feature extractor.
#[derive(Debug, Clone, PartialEq)]
pub struct Features {
    /// Normalized feature vector.
    pub vector: Vec<f32>,
    /// Topic labels, primary topic first. Never empty.
    pub topics: Vec<String>,
    /// Emotional tag of the utterance.
    pub emotion: EmotionalTag,
}

impl Features {
    /// Returns the primary topic.
    #[must_use]
    pub fn primary_topic(&self) -> &str {
        self.topics.first().map_or(GENERAL_TOPIC, String::as_str)
    }
}

/// Trait for feature extractors.
pub trait FeatureExtractor: Send + Sync {
    /// Returns the feature vector dimensions.
    fn dimensions(&self) -> usize;

    /// Extracts features from text.
    ///
    /// A non-empty `topic_hint` becomes the primary topic.
    ///
    /// # Errors
    ///
    /// Returns an error if the text cannot be processed.
    fn extract(&self, text: &str, topic_hint: Option<&str>) -> Result<Features>;
}

/// Computes the cosine similarity between two vectors.
///
/// Returns 0.0 for vectors of different lengths, empty vectors and zero vectors.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    (dot_product / (norm_a * norm_b)).clamp(-1.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity_identical() {
        let v = vec![0.3, 0.4, 0.5];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_orthogonal() {
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_degenerate_inputs() {
        assert!(cosine_similarity(&[], &[]).abs() < f32::EPSILON);
        assert!(cosine_similarity(&[1.0], &[1.0, 2.0]).abs() < f32::EPSILON);
        assert!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]).abs() < f32::EPSILON);
    }

    #[test]
    fn test_primary_topic_fallback() {
        let features = Features {
            vector: vec![],
            topics: vec![],
            emotion: EmotionalTag::neutral(),
        };
        assert_eq!(features.primary_topic(), GENERAL_TOPIC);
    }
}
