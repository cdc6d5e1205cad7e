//! Generator gateway with bounded retries and degradation.
//!
//! Every call ends with text: the generator's completion, or the template
//! responder's reply once the retry budget, a fatal error or the caller's
//! timeout ends the attempt loop.

use super::{GenerationRequest, Generator, TemplateResponder};
use crate::config::GatewayConfig;
use crate::models::AnswerSource;
use crate::{Error, Result};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::instrument;

/// Linear backoff: the wait after attempt `n` is `n * unit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffSchedule {
    unit: Duration,
    max_attempts: u32,
}

impl BackoffSchedule {
    /// Creates a schedule of `max_attempts` attempts (at least one).
    #[must_use]
    pub fn linear(unit: Duration, max_attempts: u32) -> Self {
        Self {
            unit,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Total attempts, including the first.
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Wait before the attempt after `attempt` (1-based), or `None` if
    /// `attempt` was the last one.
    #[must_use]
    pub fn delay_after(&self, attempt: u32) -> Option<Duration> {
        (attempt < self.max_attempts).then(|| self.unit.saturating_mul(attempt))
    }

    /// All waits of the schedule, in order.
    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        (1..self.max_attempts).filter_map(|attempt| self.delay_after(attempt))
    }
}

/// Result of one gateway call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayReply {
    /// Text to show the user.
    pub text: String,
    /// [`AnswerSource::Generator`] or [`AnswerSource::Degraded`].
    pub source: AnswerSource,
    /// Generator attempts made.
    pub attempts: u32,
    /// Last failure when degraded.
    pub failure: Option<String>,
}

impl GatewayReply {
    /// Returns true if the generator produced the text.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.source == AnswerSource::Generator
    }
}

/// Wraps a [`Generator`] with retry, timeouts and template degradation.
pub struct ModelGateway {
    generator: Arc<dyn Generator>,
    fallback: TemplateResponder,
    schedule: BackoffSchedule,
    attempt_timeout: Duration,
    caller_timeout: Duration,
}

impl ModelGateway {
    /// Creates a gateway with the retry and timeout policy of `config`.
    #[must_use]
    pub fn new(generator: Arc<dyn Generator>, config: &GatewayConfig) -> Self {
        Self {
            generator,
            fallback: TemplateResponder::new(),
            schedule: BackoffSchedule::linear(
                Duration::from_millis(config.backoff_ms),
                config.max_attempts,
            ),
            attempt_timeout: Duration::from_millis(config.attempt_timeout_ms),
            caller_timeout: Duration::from_millis(config.caller_timeout_ms),
        }
    }

    /// Returns the wrapped generator's name.
    #[must_use]
    pub fn generator_name(&self) -> &'static str {
        self.generator.name()
    }

    /// Returns the backoff schedule.
    #[must_use]
    pub const fn schedule(&self) -> &BackoffSchedule {
        &self.schedule
    }

    /// Generates within the configured caller timeout.
    pub async fn generate(&self, request: GenerationRequest) -> GatewayReply {
        self.generate_within(request, self.caller_timeout).await
    }

    /// Generates within `caller_timeout`, covering all attempts and waits.
    ///
    /// Expiry of the caller timeout cancels the in-flight attempt and is
    /// handled like a transient failure: the reply degrades.
    #[instrument(
        name = "symbiont.gateway.generate",
        skip(self, request),
        fields(
            generator = self.generator.name(),
            attempts = tracing::field::Empty,
            status = tracing::field::Empty
        )
    )]
    pub async fn generate_within(
        &self,
        request: GenerationRequest,
        caller_timeout: Duration,
    ) -> GatewayReply {
        let start = Instant::now();
        let request = Arc::new(request);
        let mut attempts = 0;

        let result = match tokio::time::timeout(
            caller_timeout,
            self.attempt_all(&request, &mut attempts),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(Error::GeneratorTransient(format!(
                "caller timeout after {}ms",
                caller_timeout.as_millis()
            ))),
        };

        let span = tracing::Span::current();
        span.record("attempts", attempts);
        let provider = self.generator.name();
        metrics::histogram!("generator_call_duration_ms", "provider" => provider)
            .record(start.elapsed().as_secs_f64() * 1000.0);

        match result {
            Ok(text) => {
                span.record("status", "success");
                metrics::counter!(
                    "generator_requests_total",
                    "provider" => provider,
                    "status" => "success"
                )
                .increment(1);
                GatewayReply {
                    text,
                    source: AnswerSource::Generator,
                    attempts,
                    failure: None,
                }
            },
            Err(err) => {
                let reason = if err.is_retryable() {
                    "exhausted"
                } else {
                    "fatal"
                };
                span.record("status", "degraded");
                if err.is_retryable() {
                    tracing::warn!(attempts, error = %err, "Generator unavailable, degrading to template reply");
                } else {
                    tracing::error!(attempts, error = %err, "Generator failed hard, degrading to template reply");
                }
                metrics::counter!(
                    "generator_requests_total",
                    "provider" => provider,
                    "status" => "degraded"
                )
                .increment(1);
                metrics::counter!("generator_degraded_total", "reason" => reason).increment(1);
                GatewayReply {
                    text: self
                        .fallback
                        .respond(request.topic.as_deref().unwrap_or_default()),
                    source: AnswerSource::Degraded,
                    attempts,
                    failure: Some(err.to_string()),
                }
            },
        }
    }

    async fn attempt_all(
        &self,
        request: &Arc<GenerationRequest>,
        attempts: &mut u32,
    ) -> Result<String> {
        let provider = self.generator.name();
        let mut last_error = None;

        for attempt in 1..=self.schedule.max_attempts() {
            *attempts = attempt;
            match self.attempt_once(Arc::clone(request)).await {
                Ok(text) => return Ok(text),
                Err(err) if err.is_retryable() => {
                    tracing::warn!(provider, attempt, error = %err, "Generator attempt failed");
                    if let Some(delay) = self.schedule.delay_after(attempt) {
                        metrics::counter!("generator_retries_total", "provider" => provider)
                            .increment(1);
                        tokio::time::sleep(delay).await;
                    }
                    last_error = Some(err);
                },
                Err(err) => return Err(err),
            }
        }

        Err(last_error
            .unwrap_or_else(|| Error::GeneratorTransient("exhausted retries".to_string())))
    }

    async fn attempt_once(&self, request: Arc<GenerationRequest>) -> Result<String> {
        let generator = Arc::clone(&self.generator);
        let task = tokio::task::spawn_blocking(move || generator.generate(&request));

        match tokio::time::timeout(self.attempt_timeout, task).await {
            Ok(Ok(Ok(text))) if text.trim().is_empty() => Err(Error::GeneratorTransient(
                "generator returned an empty completion".to_string(),
            )),
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => Err(Error::GeneratorFatal(format!(
                "generator task failed: {join_error}"
            ))),
            Err(_) => Err(Error::GeneratorTransient(format!(
                "attempt timed out after {}ms",
                self.attempt_timeout.as_millis()
            ))),
        }
    }
}
