// HTTP gateway: sends the prompt to the Anthropic Messages API.
//
// The reply text is framed as a single `result` record so the normalizer sees
// the same shape the CLI backend produces.

use std::path::Path;
use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::AgentSection;
use crate::error::AgentError;

use super::{AgentGateway, AgentOutcome, FailureReason, result_record};

const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";

#[derive(Debug)]
pub struct AnthropicAgent {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
    max_tokens: u32,
}

impl AnthropicAgent {
    pub fn new(api_key: String, model: String) -> Result<Self, AgentError> {
        // reqwest is built without a bundled crypto provider; installing one
        // twice is harmless.
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
        let client = Client::builder()
            .build()
            .map_err(|e| AgentError::Config(format!("cannot build HTTP client: {e}")))?;
        Ok(Self {
            client,
            api_key,
            model,
            base_url: "https://api.anthropic.com".to_string(),
            max_tokens: 4096,
        })
    }

    #[must_use]
    pub fn with_base_url(mut self, url: String) -> Self {
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }

    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn from_config(config: &AgentSection, api_key: String) -> Result<Self, AgentError> {
        if api_key.trim().is_empty() {
            return Err(AgentError::Config(format!(
                "{} is set but empty",
                config.api_key_env
            )));
        }
        let model = config
            .model
            .clone()
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());
        Ok(Self::new(api_key, model)?
            .with_base_url(config.base_url.clone())
            .with_max_tokens(config.max_tokens))
    }
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<Message<'a>>,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: String,
}

#[async_trait::async_trait]
#[allow(clippy::unnecessary_literal_bound)]
impl AgentGateway for AnthropicAgent {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn invoke(&self, prompt: &str, _working_dir: &Path, timeout: Duration) -> AgentOutcome {
        let url = format!("{}/v1/messages", self.base_url);
        let body = MessagesRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            messages: vec![Message {
                role: "user",
                content: prompt,
            }],
        };

        debug!(model = %self.model, prompt_len = prompt.len(), "Calling Anthropic API");

        let resp = match self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .timeout(timeout)
            .json(&body)
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) if e.is_timeout() => {
                warn!(model = %self.model, "Anthropic API request timed out");
                return AgentOutcome::failure(
                    FailureReason::Timeout,
                    format!("no response within {}s", timeout.as_secs()),
                );
            }
            Err(e) => {
                return AgentOutcome::failure(FailureReason::ProcessError, e.to_string());
            }
        };

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "Anthropic API returned error status");
            return AgentOutcome::failure(
                FailureReason::ProcessError,
                format!("HTTP {}: {text}", status.as_u16()),
            );
        }

        let parsed: MessagesResponse = match resp.json().await {
            Ok(parsed) => parsed,
            Err(e) if e.is_timeout() => {
                return AgentOutcome::failure(
                    FailureReason::Timeout,
                    format!("response body not received within {}s", timeout.as_secs()),
                );
            }
            Err(e) => {
                return AgentOutcome::failure(
                    FailureReason::ProcessError,
                    format!("malformed API response: {e}"),
                );
            }
        };

        let text: String = parsed.content.iter().map(|c| c.text.as_str()).collect();
        AgentOutcome::success(result_record(&text))
    }
}

// ── Tests ───────────────────────────────────────────────────────────
