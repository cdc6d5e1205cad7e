//! Configuration management.
//!
//! Every tunable of the core lives here. Files are TOML; every field has a
//! default so a partial file (or none at all) is valid.
//!
//! Lookup order used by the binary:
//! 1. explicit `--config <path>`
//! 2. `<platform config dir>/symbiont/config.toml`
//! 3. `~/.config/symbiont/config.toml`
//! 4. defaults
//!
//! followed by `SYMBIONT_*` environment overrides.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration for symbiont.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SymbiontConfig {
    /// Directory holding the database and log files.
    pub data_dir: PathBuf,
    /// Tier capacities and admission thresholds.
    pub memory: MemoryConfig,
    /// Recall scoring.
    pub recall: RecallConfig,
    /// Topic confidence estimation.
    pub confidence: ConfidenceConfig,
    /// Arbitration thresholds.
    pub arbitration: ArbitrationConfig,
    /// Generator retry and timeout policy.
    pub gateway: GatewayConfig,
    /// Feedback handling.
    pub feedback: FeedbackConfig,
    /// Background consolidation.
    pub consolidation: ConsolidationConfig,
    /// Generator endpoint.
    pub generator: GeneratorConfig,
    /// Logging output.
    pub logging: LoggingConfig,
    /// Prometheus exporter.
    pub metrics: MetricsConfig,
}

impl Default for SymbiontConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            memory: MemoryConfig::default(),
            recall: RecallConfig::default(),
            confidence: ConfidenceConfig::default(),
            arbitration: ArbitrationConfig::default(),
            gateway: GatewayConfig::default(),
            feedback: FeedbackConfig::default(),
            consolidation: ConsolidationConfig::default(),
            generator: GeneratorConfig::default(),
            logging: LoggingConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    directories::BaseDirs::new().map_or_else(
        || PathBuf::from(".symbiont"),
        |dirs| dirs.data_local_dir().join("symbiont"),
    )
}

/// Tier capacities and admission thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Working tier capacity (LRU).
    pub working_capacity: usize,
    /// Short-Term tier capacity.
    pub short_term_capacity: usize,
    /// Short-Term retention window in seconds.
    pub short_term_retention_secs: u64,
    /// Importance at which Short-Term items are promoted.
    pub promotion_threshold: f32,
    /// Minimum importance for Long-Term residence.
    pub long_term_threshold: f32,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            working_capacity: 7,
            short_term_capacity: 100,
            short_term_retention_secs: 600,
            promotion_threshold: 0.7,
            long_term_threshold: 0.5,
        }
    }
}

/// Weights of one tier's combined recall score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecallWeights {
    /// Weight of feature similarity.
    pub similarity: f32,
    /// Weight of importance.
    pub importance: f32,
    /// Weight of recency decay.
    pub recency: f32,
}

impl Default for RecallWeights {
    fn default() -> Self {
        Self {
            similarity: 0.6,
            importance: 0.2,
            recency: 0.2,
        }
    }
}

/// Per-tier recall weight presets.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TierWeights {
    /// Working tier, weighted toward recency.
    pub working: RecallWeights,
    /// Short-Term tier.
    pub short_term: RecallWeights,
    /// Long-Term tier, weighted toward importance.
    pub long_term: RecallWeights,
}

impl Default for TierWeights {
    fn default() -> Self {
        Self {
            working: RecallWeights {
                similarity: 0.5,
                importance: 0.1,
                recency: 0.4,
            },
            short_term: RecallWeights::default(),
            long_term: RecallWeights {
                similarity: 0.6,
                importance: 0.3,
                recency: 0.1,
            },
        }
    }
}

/// Recall scoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecallConfig {
    /// Maximum candidates returned.
    pub limit: usize,
    /// Candidates kept per tier before merging.
    pub per_tier_top_k: usize,
    /// Half-life of the recency decay in seconds.
    pub recency_half_life_secs: u64,
    /// Score bonus for items carrying the hinted topic.
    pub topic_bonus: f32,
    /// Tier weight presets.
    pub weights: TierWeights,
}

impl Default for RecallConfig {
    fn default() -> Self {
        Self {
            limit: 10,
            per_tier_top_k: 10,
            recency_half_life_secs: 3600,
            topic_bonus: 0.05,
            weights: TierWeights::default(),
        }
    }
}

/// Topic confidence estimation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfidenceConfig {
    /// LOW/MEDIUM boundary.
    pub low_threshold: f32,
    /// MEDIUM/HIGH boundary.
    pub high_threshold: f32,
    /// EMA learning rate (alpha).
    pub learning_rate: f32,
    /// Starting confidence of unseen topics.
    pub floor: f32,
    /// Inactivity window before decay applies, in seconds.
    pub decay_window_secs: u64,
    /// Fraction of the distance to the floor removed per decay tick.
    pub decay_rate: f32,
}

impl Default for ConfidenceConfig {
    fn default() -> Self {
        Self {
            low_threshold: 0.4,
            high_threshold: 0.75,
            learning_rate: 0.3,
            floor: 0.2,
            decay_window_secs: 7 * 24 * 3600,
            decay_rate: 0.1,
        }
    }
}

/// Arbitration thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArbitrationConfig {
    /// Minimum top score for an autonomous answer in the Evolving regime.
    pub acceptance_threshold: f32,
    /// Minimum top score for an autonomous answer in the Autonomous regime.
    pub relevance_floor: f32,
}

impl Default for ArbitrationConfig {
    fn default() -> Self {
        Self {
            acceptance_threshold: 0.6,
            relevance_floor: 0.3,
        }
    }
}

/// Generator retry and timeout policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Backoff unit; attempt `n` waits `n * backoff_ms` before retrying.
    pub backoff_ms: u64,
    /// Timeout of a single attempt.
    pub attempt_timeout_ms: u64,
    /// Caller-supplied timeout over all attempts.
    pub caller_timeout_ms: u64,
    /// Generation length limit.
    pub max_tokens: u32,
    /// Sampling temperature.
    pub temperature: f32,
    /// Nucleus sampling mass.
    pub top_p: f32,
    /// Stop sequences.
    pub stop: Vec<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_ms: 500,
            attempt_timeout_ms: 30_000,
            caller_timeout_ms: 60_000,
            max_tokens: 256,
            temperature: 0.7,
            top_p: 0.9,
            stop: Vec::new(),
        }
    }
}

/// Feedback handling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedbackConfig {
    /// Seconds before a pending decision resolves as neutral.
    pub pending_timeout_secs: u64,
    /// Importance change per unit of feedback.
    pub importance_step: f32,
    /// Consecutive failed reuses before a memory is evicted.
    pub max_consecutive_failures: u32,
    /// Signal applied when a session continues without correcting.
    pub implicit_success_signal: f32,
    /// Phrases that mark an utterance as a correction of the previous answer.
    pub correction_markers: Vec<String>,
    /// Resolved decisions kept in memory for audit.
    pub max_tracked_decisions: usize,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            pending_timeout_secs: 600,
            importance_step: 0.1,
            max_consecutive_failures: 3,
            implicit_success_signal: 0.75,
            correction_markers: [
                "that's wrong",
                "that is wrong",
                "not correct",
                "incorrect",
                "no, ",
                "wrong answer",
                "not what i asked",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            max_tracked_decisions: 10_000,
        }
    }
}

/// Background consolidation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsolidationConfig {
    /// Whether the background job runs.
    pub enabled: bool,
    /// Seconds between passes.
    pub interval_secs: u64,
    /// Similarity above which Long-Term items are merged.
    pub dedupe_threshold: f32,
    /// Long-Term importance lost per idle day.
    pub long_term_decay_per_day: f32,
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 3600,
            dedupe_threshold: 0.95,
            long_term_decay_per_day: 0.1,
        }
    }
}

/// Generator backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeneratorProvider {
    /// Ollama HTTP API.
    #[default]
    Ollama,
    /// Local template responder only.
    Template,
}

impl GeneratorProvider {
    /// Parses a provider string. Unknown names select Ollama.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "template" | "offline" | "none" => Self::Template,
            _ => Self::Ollama,
        }
    }
}

/// Generator endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Backend selection.
    pub provider: GeneratorProvider,
    /// Base URL.
    pub endpoint: String,
    /// Model name.
    pub model: String,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            provider: GeneratorProvider::Ollama,
            endpoint: "http://localhost:11434".to_string(),
            model: "llama3.2".to_string(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON lines.
    Json,
    /// Human-readable.
    #[default]
    Pretty,
}

impl LogFormat {
    /// Parses a format string. Unknown names select pretty output.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        if s.eq_ignore_ascii_case("json") {
            Self::Json
        } else {
            Self::Pretty
        }
    }
}

/// Logging output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
    /// Optional append-only log file.
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            file: None,
        }
    }
}

/// Prometheus exporter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Whether the exporter is installed.
    pub enabled: bool,
    /// Listen port.
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 9090,
        }
    }
}

impl SymbiontConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| Error::OperationFailed {
            operation: "read_config_file".to_string(),
            cause: e.to_string(),
        })?;
        Self::from_toml(&contents)
    }

    /// Parses configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not valid TOML for this schema.
    pub fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|e| Error::OperationFailed {
            operation: "parse_config_file".to_string(),
            cause: e.to_string(),
        })
    }

    /// Serializes the configuration as TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::OperationFailed {
            operation: "serialize_config".to_string(),
            cause: e.to_string(),
        })
    }

    /// Loads configuration from the default locations.
    ///
    /// Returns defaults if no readable config file is found.
    #[must_use]
    pub fn load_default() -> Self {
        let Some(base_dirs) = directories::BaseDirs::new() else {
            return Self::default();
        };

        let candidates = [
            base_dirs.config_dir().join("symbiont").join("config.toml"),
            base_dirs
                .home_dir()
                .join(".config")
                .join("symbiont")
                .join("config.toml"),
        ];
        for path in candidates.iter().filter(|p| p.exists()) {
            match Self::load_from_file(path) {
                Ok(config) => return config,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "ignoring unreadable config file");
                },
            }
        }

        Self::default()
    }

    /// Applies `SYMBIONT_*` environment overrides.
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Applies overrides from an arbitrary lookup, keyed like the environment.
    #[must_use]
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(v) = lookup("SYMBIONT_DATA_DIR") {
            self.data_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("SYMBIONT_GENERATOR_PROVIDER") {
            self.generator.provider = GeneratorProvider::parse(&v);
        }
        if let Some(v) = lookup("SYMBIONT_GENERATOR_ENDPOINT") {
            self.generator.endpoint = v;
        }
        if let Some(v) = lookup("SYMBIONT_GENERATOR_MODEL") {
            self.generator.model = v;
        }
        if let Some(v) = lookup("SYMBIONT_LOG_LEVEL") {
            self.logging.level = v;
        }
        if let Some(v) = lookup("SYMBIONT_LOG_FORMAT") {
            self.logging.format = LogFormat::parse(&v);
        }
        if let Some(parsed) = lookup("SYMBIONT_GATEWAY_MAX_ATTEMPTS").and_then(|v| v.parse::<u32>().ok()) {
            self.gateway.max_attempts = parsed.max(1);
        }
        if let Some(parsed) = lookup("SYMBIONT_GATEWAY_BACKOFF_MS").and_then(|v| v.parse::<u64>().ok()) {
            self.gateway.backoff_ms = parsed;
        }
        self
    }

    /// Sets the data directory.
    #[must_use]
    pub fn with_data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.data_dir = path.into();
        self
    }

    /// Rejects inconsistent settings.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        let ratios = [
            ("memory.promotion_threshold", self.memory.promotion_threshold),
            ("memory.long_term_threshold", self.memory.long_term_threshold),
            ("confidence.low_threshold", self.confidence.low_threshold),
            ("confidence.high_threshold", self.confidence.high_threshold),
            ("confidence.learning_rate", self.confidence.learning_rate),
            ("confidence.floor", self.confidence.floor),
            ("confidence.decay_rate", self.confidence.decay_rate),
            ("arbitration.acceptance_threshold", self.arbitration.acceptance_threshold),
            ("arbitration.relevance_floor", self.arbitration.relevance_floor),
            ("feedback.importance_step", self.feedback.importance_step),
            ("feedback.implicit_success_signal", self.feedback.implicit_success_signal),
            ("consolidation.dedupe_threshold", self.consolidation.dedupe_threshold),
            ("consolidation.long_term_decay_per_day", self.consolidation.long_term_decay_per_day),
            ("recall.topic_bonus", self.recall.topic_bonus),
        ];
        for (name, value) in ratios {
            if !(0.0..=1.0).contains(&value) {
                return Err(invalid(name, format!("must be within [0, 1], got {value}")));
            }
        }

        if self.confidence.low_threshold > self.confidence.high_threshold {
            return Err(invalid(
                "confidence.low_threshold",
                "must not exceed confidence.high_threshold".to_string(),
            ));
        }
        if self.confidence.learning_rate <= 0.0 {
            return Err(invalid("confidence.learning_rate", "must be positive".to_string()));
        }
        if self.memory.promotion_threshold < self.memory.long_term_threshold {
            return Err(invalid(
                "memory.promotion_threshold",
                "must not be below memory.long_term_threshold".to_string(),
            ));
        }

        let counts = [
            ("memory.working_capacity", self.memory.working_capacity),
            ("memory.short_term_capacity", self.memory.short_term_capacity),
            ("recall.limit", self.recall.limit),
            ("recall.per_tier_top_k", self.recall.per_tier_top_k),
        ];
        for (name, value) in counts {
            if value == 0 {
                return Err(invalid(name, "must be at least 1".to_string()));
            }
        }
        if self.gateway.max_attempts == 0 {
            return Err(invalid("gateway.max_attempts", "must be at least 1".to_string()));
        }
        if self.recall.recency_half_life_secs == 0 {
            return Err(invalid("recall.recency_half_life_secs", "must be positive".to_string()));
        }
        Ok(())
    }
}

fn invalid(field: &str, reason: String) -> Error {
    Error::InvalidInput(format!("{field} {reason}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn test_defaults_are_valid() {
        let config = SymbiontConfig::default();
        config.validate().expect("defaults validate");
        assert_eq!(config.memory.working_capacity, 7);
        assert!((config.confidence.learning_rate - 0.3).abs() < f32::EPSILON);
        assert_eq!(config.gateway.max_attempts, 3);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = SymbiontConfig::from_toml(
            r#"
            [memory]
            working_capacity = 2

            [confidence]
            high_threshold = 0.8

            [generator]
            provider = "template"
            "#,
        )
        .expect("parse");
        assert_eq!(config.memory.working_capacity, 2);
        assert_eq!(config.memory.short_term_capacity, 100);
        assert!((config.confidence.high_threshold - 0.8).abs() < f32::EPSILON);
        assert!((config.confidence.low_threshold - 0.4).abs() < f32::EPSILON);
        assert_eq!(config.generator.provider, GeneratorProvider::Template);
    }

    #[test]
    fn test_toml_round_trip() {
        let config = SymbiontConfig::default().with_data_dir("/tmp/symbiont");
        let text = config.to_toml().expect("serialize");
        let parsed = SymbiontConfig::from_toml(&text).expect("parse");
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_overrides() {
        let config = SymbiontConfig::default().with_overrides(|key| match key {
            "SYMBIONT_GENERATOR_MODEL" => Some("mistral".to_string()),
            "SYMBIONT_LOG_FORMAT" => Some("JSON".to_string()),
            "SYMBIONT_GATEWAY_MAX_ATTEMPTS" => Some("0".to_string()),
            "SYMBIONT_GATEWAY_BACKOFF_MS" => Some("not-a-number".to_string()),
            _ => None,
        });
        assert_eq!(config.generator.model, "mistral");
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.gateway.max_attempts, 1);
        assert_eq!(config.gateway.backoff_ms, 500);
    }

    #[test_case(|c: &mut SymbiontConfig| c.confidence.low_threshold = 0.9 ; "inverted bands")]
    #[test_case(|c: &mut SymbiontConfig| c.confidence.learning_rate = 1.5 ; "alpha above one")]
    #[test_case(|c: &mut SymbiontConfig| c.confidence.learning_rate = 0.0 ; "alpha zero")]
    #[test_case(|c: &mut SymbiontConfig| c.memory.working_capacity = 0 ; "empty working tier")]
    #[test_case(|c: &mut SymbiontConfig| c.memory.promotion_threshold = 0.3 ; "promotion below admission")]
    #[test_case(|c: &mut SymbiontConfig| c.gateway.max_attempts = 0 ; "no attempts")]
    #[test_case(|c: &mut SymbiontConfig| c.arbitration.relevance_floor = f32::NAN ; "nan floor")]
    fn test_validate_rejects(mutate: fn(&mut SymbiontConfig)) {
        let mut config = SymbiontConfig::default();
        mutate(&mut config);
        assert!(matches!(config.validate(), Err(Error::InvalidInput(_))));
    }
}
