//! Per-topic confidence estimation.

use crate::config::ConfidenceConfig;
use crate::models::{ConfidenceBand, ConfidenceChange, FeedbackSignal, Topic};
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Tracks and classifies per-topic confidence.
///
/// Unseen topics start at the configured floor. Topics are never deleted.
pub trait ConfidenceEstimator: Send + Sync {
    /// Returns the topic record, creating it at the floor on first reference.
    fn touch(&self, topic: &str, now: u64) -> Topic;

    /// Returns the topic record if it exists.
    fn topic(&self, topic: &str) -> Option<Topic>;

    /// Returns the current confidence (the floor for unseen topics).
    fn confidence(&self, topic: &str) -> f32;

    /// Classifies the current confidence.
    fn band(&self, topic: &str) -> ConfidenceBand;

    /// Folds one feedback signal into the topic's confidence.
    fn update(&self, topic: &str, signal: FeedbackSignal, now: u64) -> ConfidenceChange;

    /// Nudges topics idle past the decay window toward the floor.
    ///
    /// Returns the changes applied.
    fn decay(&self, now: u64) -> Vec<(String, ConfidenceChange)>;

    /// Returns all topics sorted by name.
    fn topics(&self) -> Vec<Topic>;

    /// Loads previously persisted topic records.
    fn restore(&self, topics: Vec<Topic>);
}

/// Default [`ConfidenceEstimator`]: an exponential moving average per topic.
///
/// `new = clamp(old * (1 - alpha) + signal * alpha, 0, 1)`
#[derive(Debug)]
pub struct EmaConfidenceEstimator {
    config: ConfidenceConfig,
    topics: RwLock<HashMap<String, Topic>>,
}

impl EmaConfidenceEstimator {
    /// Creates an estimator with no known topics.
    #[must_use]
    pub fn new(config: ConfidenceConfig) -> Self {
        Self {
            config,
            topics: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the thresholds in use.
    #[must_use]
    pub const fn config(&self) -> &ConfidenceConfig {
        &self.config
    }

    fn classify(&self, confidence: f32) -> ConfidenceBand {
        ConfidenceBand::classify(
            confidence,
            self.config.low_threshold,
            self.config.high_threshold,
        )
    }

    fn change(&self, before: f32, after: f32) -> ConfidenceChange {
        ConfidenceChange {
            before,
            after,
            band_before: self.classify(before),
            band_after: self.classify(after),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Topic>> {
        self.topics
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Topic>> {
        self.topics
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl ConfidenceEstimator for EmaConfidenceEstimator {
    fn touch(&self, topic: &str, now: u64) -> Topic {
        if let Some(existing) = self.read().get(topic) {
            return existing.clone();
        }
        self.write()
            .entry(topic.to_string())
            .or_insert_with(|| {
                tracing::debug!(topic, floor = self.config.floor, "New topic");
                metrics::counter!("confidence_topics_created_total").increment(1);
                Topic::new(topic, self.config.floor, now)
            })
            .clone()
    }

    fn topic(&self, topic: &str) -> Option<Topic> {
        self.read().get(topic).cloned()
    }

    fn confidence(&self, topic: &str) -> f32 {
        self.read()
            .get(topic)
            .map_or(self.config.floor, |t| t.confidence)
    }

    fn band(&self, topic: &str) -> ConfidenceBand {
        self.classify(self.confidence(topic))
    }

    fn update(&self, topic: &str, signal: FeedbackSignal, now: u64) -> ConfidenceChange {
        let alpha = self.config.learning_rate;
        let mut topics = self.write();
        let record = topics
            .entry(topic.to_string())
            .or_insert_with(|| Topic::new(topic, self.config.floor, now));

        let before = record.confidence;
        let after = before
            .mul_add(1.0 - alpha, signal.value() * alpha)
            .clamp(0.0, 1.0);
        record.confidence = after;
        record.interactions += 1;
        record.updated_at = record.updated_at.max(now);
        drop(topics);

        let change = self.change(before, after);
        tracing::debug!(
            topic,
            signal = signal.value(),
            before,
            after,
            band = %change.band_after,
            "Confidence updated"
        );
        change
    }

    fn decay(&self, now: u64) -> Vec<(String, ConfidenceChange)> {
        let floor = self.config.floor;
        let mut changes = Vec::new();
        let mut topics = self.write();
        for record in topics.values_mut() {
            let idle = now.saturating_sub(record.updated_at);
            if idle <= self.config.decay_window_secs || record.confidence <= floor {
                continue;
            }
            let before = record.confidence;
            let after = (before - (before - floor) * self.config.decay_rate).max(floor);
            record.confidence = after;
            changes.push((record.name.clone(), self.change(before, after)));
        }
        drop(topics);

        if !changes.is_empty() {
            tracing::debug!(decayed = changes.len(), "Decayed idle topics");
        }
        changes.sort_by(|a, b| a.0.cmp(&b.0));
        changes
    }

    fn topics(&self) -> Vec<Topic> {
        let mut topics: Vec<Topic> = self.read().values().cloned().collect();
        topics.sort_by(|a, b| a.name.cmp(&b.name));
        topics
    }

    fn restore(&self, restored: Vec<Topic>) {
        let mut topics = self.write();
        for mut topic in restored {
            topic.confidence = topic.confidence.clamp(0.0, 1.0);
            topics.insert(topic.name.clone(), topic);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn estimator() -> EmaConfidenceEstimator {
        EmaConfidenceEstimator::new(ConfidenceConfig::default())
    }

    #[test]
    fn test_unseen_topic_starts_at_floor() {
        let estimator = estimator();
        assert!((estimator.confidence("python") - 0.2).abs() < f32::EPSILON);
        assert_eq!(estimator.band("python"), ConfidenceBand::Low);
        let topic = estimator.touch("python", 5);
        assert_eq!(topic.interactions, 0);
        assert_eq!(estimator.topics().len(), 1);
    }

    #[test]
    fn test_five_successes_reach_high() {
        let estimator = estimator();
        let expected = [0.44, 0.608, 0.7256, 0.80792, 0.865_544];
        for (step, want) in expected.iter().enumerate() {
            let change = estimator.update("python", FeedbackSignal::SUCCESS, 10);
            assert!(
                (change.after - want).abs() < 1e-4,
                "step {step}: {} != {want}",
                change.after
            );
        }
        assert_eq!(estimator.band("python"), ConfidenceBand::High);
        assert_eq!(estimator.topic("python").map(|t| t.interactions), Some(5));
    }

    #[test]
    fn test_single_failure_does_not_collapse() {
        let estimator = estimator();
        for _ in 0..5 {
            estimator.update("python", FeedbackSignal::SUCCESS, 10);
        }
        let change = estimator.update("python", FeedbackSignal::FAILURE, 11);
        assert!(change.after > 0.5);
        assert!(change.band_changed());
        assert_eq!(change.band_after, ConfidenceBand::Medium);
    }

    #[test]
    fn test_decay_moves_idle_topics_toward_floor() {
        let estimator = estimator();
        for _ in 0..5 {
            estimator.update("python", FeedbackSignal::SUCCESS, 100);
        }
        estimator.update("rust", FeedbackSignal::SUCCESS, 100);

        let window = ConfidenceConfig::default().decay_window_secs;
        assert!(estimator.decay(100 + window).is_empty());

        let changes = estimator.decay(101 + window);
        assert_eq!(changes.len(), 2);
        let (name, change) = &changes[0];
        assert_eq!(name, "python");
        assert!(change.after < change.before);
        assert!(change.after > 0.2);
    }

    #[test]
    fn test_restore_clamps_confidence() {
        let estimator = estimator();
        let mut topic = Topic::new("go", 0.2, 1);
        topic.confidence = 3.0;
        estimator.restore(vec![topic]);
        assert!((estimator.confidence("go") - 1.0).abs() < f32::EPSILON);
    }
}
