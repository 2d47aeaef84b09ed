//! Gateway to the external code-analysis agent.
//!
//! A gateway turns a prompt into exactly one [`AgentOutcome`]. It never
//! retries and never interprets the payload; decoding the agent's output is
//! the job of [`crate::normalize`].

pub mod anthropic;
pub mod cli;
pub mod scripted;

use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::{AgentBackend, AgentSection};
use crate::error::AgentError;

pub use anthropic::AnthropicAgent;
pub use cli::CliAgent;
pub use scripted::ScriptedAgent;

/// A one-line transcript ending in a successful `result` record carrying
/// `payload`, the shape the command-line agent emits.
pub fn result_record(payload: &str) -> String {
    serde_json::json!({
        "type": "result",
        "subtype": "success",
        "is_error": false,
        "result": payload,
    })
    .to_string()
}

/// Why an agent invocation produced no output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// Spawn or I/O failure, or a non-zero exit.
    ProcessError,
    /// The wall-clock limit elapsed.
    Timeout,
}

impl FailureReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ProcessError => "process_error",
            Self::Timeout => "timeout",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a single agent invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AgentOutcome {
    Success { raw_output: String },
    Failure { reason: FailureReason, detail: String },
}

impl AgentOutcome {
    pub fn success(raw_output: impl Into<String>) -> Self {
        Self::Success {
            raw_output: raw_output.into(),
        }
    }

    pub fn failure(reason: FailureReason, detail: impl Into<String>) -> Self {
        Self::Failure {
            reason,
            detail: detail.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// Trait for invoking the analysis agent.
#[async_trait::async_trait]
pub trait AgentGateway: Send + Sync + std::fmt::Debug {
    /// Backend name for logging.
    fn name(&self) -> &str;

    /// Run the agent once with `prompt` inside `working_dir`, giving up after
    /// `timeout`.
    async fn invoke(&self, prompt: &str, working_dir: &Path, timeout: Duration) -> AgentOutcome;
}

/// Create a gateway from the `[agent]` config section.
pub fn create_gateway(config: &AgentSection) -> Result<Box<dyn AgentGateway>, AgentError> {
    match config.backend {
        AgentBackend::Cli => Ok(Box::new(CliAgent::from_config(config)?)),
        AgentBackend::Anthropic => {
            let api_key = std::env::var(&config.api_key_env).map_err(|_| {
                AgentError::Config(format!(
                    "environment variable {} is not set",
                    config.api_key_env
                ))
            })?;
            Ok(Box::new(AnthropicAgent::from_config(config, api_key)?))
        }
    }
}
