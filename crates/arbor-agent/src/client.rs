//! Reasoning client: the trait engines call and its Anthropic implementation
//!
//! The client is stateless. Every request carries the whole conversation and
//! every successful response carries a [`CostEvent`] receipt.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use crate::auth;
use crate::circuit_breaker::CircuitBreaker;
use crate::pricing::CostEvent;
use crate::types::{ContentBlock, Message, ReasoningRequest, ReasoningResponse, ToolSchema, Usage};
use arbor_core::{ArborError, Result};

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

// Rate limit retry configuration
const MAX_RETRIES: u32 = 5;
const INITIAL_BACKOFF_SECS: u64 = 15;
const MAX_BACKOFF_SECS: u64 = 240;

/// Call-and-response access to a reasoning engine
#[async_trait]
pub trait ReasoningClient: Send + Sync {
    /// Send one request; the response always carries its cost receipt
    async fn complete(&self, request: &ReasoningRequest) -> Result<ReasoningResponse>;
}

/// Anthropic Messages API wire request
#[derive(Debug, Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "str::is_empty")]
    system: &'a str,
    messages: &'a [Message],
    #[serde(skip_serializing_if = "<[ToolSchema]>::is_empty")]
    tools: &'a [ToolSchema],
    #[serde(skip_serializing_if = "Option::is_none")]
    thinking: Option<WireThinking>,
}

#[derive(Debug, Serialize)]
struct WireThinking {
    #[serde(rename = "type")]
    kind: &'static str,
    budget_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    #[allow(dead_code)]
    id: String,
    content: Vec<ContentBlock>,
    stop_reason: Option<String>,
    usage: WireUsage,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    input_tokens: u64,
    output_tokens: u64,
    #[serde(default)]
    cache_creation_input_tokens: Option<u64>,
    #[serde(default)]
    cache_read_input_tokens: Option<u64>,
}

impl WireUsage {
    fn into_usage(self) -> Usage {
        // Cached prompt tokens still count toward the call's input volume
        let input = self.input_tokens
            + self.cache_creation_input_tokens.unwrap_or(0)
            + self.cache_read_input_tokens.unwrap_or(0);
        Usage::new(input, self.output_tokens)
    }
}

/// Anthropic API client
pub struct AnthropicClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    breaker: CircuitBreaker,
}

impl AnthropicClient {
    /// Create a client, resolving the key from `key_env`
    pub fn from_env(key_env: &str) -> Result<Self> {
        let api_key = auth::get_auth_token(key_env)?;
        Ok(Self::new(api_key))
    }

    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: ANTHROPIC_API_URL.to_string(),
            breaker: CircuitBreaker::default(),
        }
    }

    /// Point the client at a different endpoint (proxies, test servers)
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn with_circuit_breaker(mut self, breaker: CircuitBreaker) -> Self {
        self.breaker = breaker;
        self
    }

    fn wire_request<'a>(request: &'a ReasoningRequest) -> WireRequest<'a> {
        WireRequest {
            model: request.model.api_name(),
            max_tokens: request.max_tokens,
            system: &request.system,
            messages: &request.messages,
            tools: &request.tools,
            thinking: request.thinking_budget.map(|budget_tokens| WireThinking {
                kind: "enabled",
                budget_tokens,
            }),
        }
    }
}

#[async_trait]
impl ReasoningClient for AnthropicClient {
    #[tracing::instrument(skip(self, request), fields(model = %request.model, messages = request.messages.len()))]
    async fn complete(&self, request: &ReasoningRequest) -> Result<ReasoningResponse> {
        if !self.breaker.can_execute() {
            return Err(ArborError::ApiLimit(format!(
                "Circuit breaker is open after repeated API failures; retry in {}s",
                self.breaker.time_until_retry().as_secs()
            )));
        }

        let body = Self::wire_request(request);
        let started = Instant::now();
        let mut retries = 0;
        let mut backoff_secs = INITIAL_BACKOFF_SECS;

        loop {
            tracing::debug!(
                model = %request.model,
                messages = request.messages.len(),
                attempt = retries + 1,
                "Sending reasoning request"
            );

            let response = self
                .http
                .post(&self.base_url)
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .header("content-type", "application/json")
                .json(&body)
                .send()
                .await
                .map_err(|e| ArborError::Api(format!("Failed to send request: {}", e)))?;

            let status = response.status();

            if status.as_u16() == 429 || (status.is_server_error() && retries < MAX_RETRIES) {
                retries += 1;
                if retries > MAX_RETRIES {
                    let error_text = response.text().await.unwrap_or_default();
                    self.breaker.record_failure();
                    return Err(ArborError::ApiLimit(format!(
                        "Rate limited after {} retries: {}",
                        MAX_RETRIES, error_text
                    )));
                }

                let wait_secs = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|s| s.parse::<u64>().ok())
                    .unwrap_or(backoff_secs);

                tracing::warn!(
                    status = status.as_u16(),
                    wait_secs,
                    retry = retries,
                    max = MAX_RETRIES,
                    "Reasoning API unavailable, backing off"
                );

                tokio::time::sleep(Duration::from_secs(wait_secs)).await;
                backoff_secs = (backoff_secs * 2).min(MAX_BACKOFF_SECS);
                continue;
            }

            if !status.is_success() {
                let error_text = response.text().await.unwrap_or_default();
                self.breaker.record_failure();
                tracing::error!(
                    status = status.as_u16(),
                    failures = self.breaker.failure_count(),
                    "Reasoning API error"
                );
                return Err(ArborError::Api(format!("API error {}: {}", status, error_text)));
            }

            let wire: WireResponse = response
                .json()
                .await
                .map_err(|e| ArborError::Protocol(format!("Unparseable response: {}", e)))?;

            self.breaker.record_success();

            let usage = wire.usage.into_usage();
            let duration_ms = started.elapsed().as_millis() as u64;
            let cost = CostEvent::priced(
                request.model.api_name(),
                usage,
                &request.model.pricing(),
                duration_ms,
            );

            tracing::info!(
                input_tokens = usage.input_tokens,
                output_tokens = usage.output_tokens,
                cost = %cost.cost,
                extended_context = cost.extended_context,
                duration_ms,
                "Reasoning call complete"
            );

            return Ok(ReasoningResponse {
                content: wire.content,
                usage,
                stop_reason: wire.stop_reason,
                cost,
            });
        }
    }
}
