//! Ollama (local) generator.

use super::{GenerationRequest, Generator, build_http_client};
use crate::config::GeneratorConfig;
use crate::{Error, Result};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Generator backed by the Ollama `/api/generate` endpoint.
pub struct OllamaGenerator {
    /// API endpoint.
    endpoint: String,
    /// Model to use.
    model: String,
    /// Client-side request timeout.
    timeout: Duration,
    /// HTTP client.
    client: reqwest::blocking::Client,
}

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

impl OllamaGenerator {
    /// Creates a generator for an endpoint and model.
    #[must_use]
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            model: model.into(),
            timeout: DEFAULT_TIMEOUT,
            client: build_http_client(DEFAULT_TIMEOUT),
        }
    }

    /// Creates a generator from configuration.
    #[must_use]
    pub fn from_config(config: &GeneratorConfig) -> Self {
        Self::new(config.endpoint.clone(), config.model.clone())
    }

    /// Sets the client-side request timeout.
    ///
    /// The gateway cannot cancel a blocking request, so this should match the
    /// gateway's per-attempt timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self.client = build_http_client(timeout);
        self
    }

    /// Returns the client-side request timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Returns the model name.
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    fn send_error(&self, e: &reqwest::Error) -> Error {
        let error_kind = if e.is_timeout() {
            "timeout"
        } else if e.is_connect() {
            "connect"
        } else if e.is_builder() {
            "builder"
        } else if e.is_request() {
            "request"
        } else {
            "unknown"
        };
        tracing::error!(
            provider = "ollama",
            model = %self.model,
            error = %e,
            error_kind = error_kind,
            is_timeout = e.is_timeout(),
            is_connect = e.is_connect(),
            "Generator request failed"
        );
        if e.is_builder() {
            Error::GeneratorFatal(format!("{error_kind} error: {e}"))
        } else {
            Error::GeneratorTransient(format!("{error_kind} error: {e}"))
        }
    }
}

impl Generator for OllamaGenerator {
    fn name(&self) -> &'static str {
        "ollama"
    }

    fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let body = GenerateRequest {
            model: &self.model,
            prompt: &request.prompt,
            stream: false,
            options: GenerateOptions {
                num_predict: request.max_tokens,
                temperature: request.temperature,
                top_p: request.top_p,
                stop: (!request.stop.is_empty()).then_some(request.stop.as_slice()),
            },
        };

        let response = self
            .client
            .post(format!("{}/api/generate", self.endpoint))
            .json(&body)
            .send()
            .map_err(|e| self.send_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            tracing::error!(
                provider = "ollama",
                model = %self.model,
                status = %status,
                body = %body,
                "Generator API returned error status"
            );
            return Err(status_error(status, &body));
        }

        let response: GenerateResponse = response.json().map_err(|e| {
            tracing::error!(
                provider = "ollama",
                model = %self.model,
                error = %e,
                "Failed to parse generator response"
            );
            Error::GeneratorFatal(format!("invalid response body: {e}"))
        })?;

        Ok(response.response)
    }
}

/// Maps a non-success status to a generator error.
///
/// Overload and server-side failures are worth retrying; any other client
/// error means the request or the model name is wrong.
fn status_error(status: StatusCode, body: &str) -> Error {
    let cause = format!("API returned status: {status} - {body}");
    if status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
    {
        Error::GeneratorTransient(cause)
    } else {
        Error::GeneratorFatal(cause)
    }
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions<'a>,
}

#[derive(Serialize)]
struct GenerateOptions<'a> {
    num_predict: u32,
    temperature: f32,
    top_p: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<&'a [String]>,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}
