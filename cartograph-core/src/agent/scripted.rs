// Deterministic gateway returning canned outcomes, for tests and offline
// replays of recorded agent transcripts.

use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use super::{AgentGateway, AgentOutcome, FailureReason, result_record};

/// Returns the outcome of the first rule whose needle occurs in the prompt,
/// else the fallback. Every prompt received is recorded.
#[derive(Debug)]
pub struct ScriptedAgent {
    rules: Vec<(String, AgentOutcome)>,
    fallback: AgentOutcome,
    prompts: Mutex<Vec<String>>,
}

impl Default for ScriptedAgent {
    fn default() -> Self {
        Self::new(AgentOutcome::success(""))
    }
}

impl ScriptedAgent {
    pub fn new(fallback: AgentOutcome) -> Self {
        Self {
            rules: Vec::new(),
            fallback,
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Answer prompts containing `needle` with `outcome`.
    #[must_use]
    pub fn on(mut self, needle: impl Into<String>, outcome: AgentOutcome) -> Self {
        self.rules.push((needle.into(), outcome));
        self
    }

    /// Answer prompts containing `needle` with a successful raw output.
    #[must_use]
    pub fn reply(self, needle: impl Into<String>, raw_output: impl Into<String>) -> Self {
        self.on(needle, AgentOutcome::success(raw_output))
    }

    /// Answer prompts containing `needle` with a transcript whose final
    /// `result` record carries `payload`.
    #[must_use]
    pub fn answer(self, needle: impl Into<String>, payload: &str) -> Self {
        self.reply(needle, result_record(payload))
    }

    /// Answer prompts containing `needle` with a transport failure.
    #[must_use]
    pub fn fail(self, needle: impl Into<String>, reason: FailureReason) -> Self {
        self.on(
            needle,
            AgentOutcome::failure(reason, "scripted failure"),
        )
    }

    /// Prompts received so far, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .expect("scripted agent mutex poisoned")
            .clone()
    }

    /// Number of prompts containing `needle`.
    pub fn calls_matching(&self, needle: &str) -> usize {
        self.prompts
            .lock()
            .expect("scripted agent mutex poisoned")
            .iter()
            .filter(|p| p.contains(needle))
            .count()
    }
}

#[async_trait::async_trait]
#[allow(clippy::unnecessary_literal_bound)]
impl AgentGateway for ScriptedAgent {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn invoke(&self, prompt: &str, _working_dir: &Path, _timeout: Duration) -> AgentOutcome {
        self.prompts
            .lock()
            .expect("scripted agent mutex poisoned")
            .push(prompt.to_string());
        self.rules
            .iter()
            .find(|(needle, _)| prompt.contains(needle.as_str()))
            .map_or_else(|| self.fallback.clone(), |(_, outcome)| outcome.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_matching_rule_wins_and_prompts_are_recorded() {
        let agent = ScriptedAgent::default()
            .reply("impact", "first")
            .reply("impact", "second")
            .fail("audit", FailureReason::Timeout);
        let dir = Path::new(".");
        let t = Duration::from_secs(1);

        assert_eq!(agent.invoke("assess impact", dir, t).await, AgentOutcome::success("first"));
        assert!(!agent.invoke("run audit", dir, t).await.is_success());
        assert_eq!(agent.invoke("other", dir, t).await, AgentOutcome::success(""));

        assert_eq!(agent.prompts().len(), 3);
        assert_eq!(agent.calls_matching("audit"), 1);
    }

    #[tokio::test]
    async fn answers_normalize_to_their_payload() {
        let agent = ScriptedAgent::default().answer("graph", r#"{"nodes": []}"#);
        let outcome = agent
            .invoke("build graph", Path::new("."), Duration::from_secs(1))
            .await;
        let AgentOutcome::Success { raw_output } = outcome else {
            panic!("expected success, got {outcome:?}");
        };
        assert_eq!(
            crate::normalize::normalize(&raw_output),
            crate::normalize::NormalizedResult::Structured(serde_json::json!({"nodes": []}))
        );
    }
}
