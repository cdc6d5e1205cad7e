//! Generator collaborators.
//!
//! The external text-generation model sits behind the [`Generator`] trait.
//! [`ModelGateway`] wraps a generator with bounded retries, linear backoff
//! and degradation to the always-available [`TemplateResponder`].

mod gateway;
mod ollama;
mod template;

pub use gateway::{BackoffSchedule, GatewayReply, ModelGateway};
pub use ollama::OllamaGenerator;
pub use template::TemplateResponder;

use crate::Result;
use crate::config::GatewayConfig;
use std::time::Duration;

/// One generation call.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    /// Fully assembled prompt.
    pub prompt: String,
    /// Generation length limit.
    pub max_tokens: u32,
    /// Sampling temperature.
    pub temperature: f32,
    /// Nucleus sampling mass.
    pub top_p: f32,
    /// Stop sequences.
    pub stop: Vec<String>,
    /// Topic the prompt is about, used by the template responder.
    pub topic: Option<String>,
}

impl GenerationRequest {
    /// Creates a request using the sampling settings of the gateway config.
    #[must_use]
    pub fn new(prompt: impl Into<String>, config: &GatewayConfig) -> Self {
        Self {
            prompt: prompt.into(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            top_p: config.top_p,
            stop: config.stop.clone(),
            topic: None,
        }
    }

    /// Sets the topic label.
    #[must_use]
    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }
}

/// Trait for text generators.
///
/// Implementations are blocking; the gateway runs them on the blocking pool.
/// Failures must be classified: [`crate::Error::GeneratorTransient`] for
/// timeouts and overload, [`crate::Error::GeneratorFatal`] for anything a
/// retry cannot fix.
pub trait Generator: Send + Sync {
    /// The generator name, used in logs and metrics labels.
    fn name(&self) -> &'static str;

    /// Generates a completion for the request.
    ///
    /// # Errors
    ///
    /// Returns a transient or fatal generator error.
    fn generate(&self, request: &GenerationRequest) -> Result<String>;
}

/// Builds the blocking HTTP client used by remote generators.
///
/// A zero timeout disables the client-side limit.
#[must_use]
pub fn build_http_client(timeout: Duration) -> reqwest::blocking::Client {
    let mut builder = reqwest::blocking::Client::builder().connect_timeout(Duration::from_secs(3));
    if !timeout.is_zero() {
        builder = builder.timeout(timeout);
    }

    builder.build().unwrap_or_else(|err| {
        tracing::warn!("Failed to build generator HTTP client: {err}");
        reqwest::blocking::Client::new()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_takes_sampling_settings_from_config() {
        let config = GatewayConfig {
            max_tokens: 64,
            stop: vec!["\n\n".to_string()],
            ..GatewayConfig::default()
        };
        let request = GenerationRequest::new("hello", &config);
        assert_eq!(request.prompt, "hello");
        assert_eq!(request.max_tokens, 64);
        assert!((request.top_p - 0.9).abs() < f32::EPSILON);
        assert_eq!(request.stop, vec!["\n\n".to_string()]);
    }
}
