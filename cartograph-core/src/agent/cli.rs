// Subprocess gateway: runs the agent CLI once per prompt.

use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::process::Command;
use tracing::{debug, warn};

use crate::config::AgentSection;
use crate::error::AgentError;
use crate::prompt::truncate;

use super::{AgentGateway, AgentOutcome, FailureReason};

/// Cap on stderr echoed back in failure details.
const STDERR_DETAIL_LIMIT: usize = 2000;

#[derive(Debug, Clone)]
pub struct CliAgent {
    command: String,
    args: Vec<String>,
    model: Option<String>,
}

impl CliAgent {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            model: None,
        }
    }

    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn from_config(config: &AgentSection) -> Result<Self, AgentError> {
        if config.command.trim().is_empty() {
            return Err(AgentError::Config("agent.command is empty".into()));
        }
        let mut agent = Self::new(config.command.clone(), config.args.clone());
        agent.model.clone_from(&config.model);
        Ok(agent)
    }

    fn build_command(&self, prompt: &str, working_dir: &Path) -> Command {
        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args);
        if let Some(model) = &self.model {
            cmd.arg("--model").arg(model);
        }
        cmd.arg(prompt)
            .current_dir(working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait::async_trait]
#[allow(clippy::unnecessary_literal_bound)]
impl AgentGateway for CliAgent {
    fn name(&self) -> &str {
        "cli"
    }

    async fn invoke(&self, prompt: &str, working_dir: &Path, timeout: Duration) -> AgentOutcome {
        let start = Instant::now();
        debug!(
            command = %self.command,
            prompt_len = prompt.len(),
            timeout_secs = timeout.as_secs(),
            "Invoking agent CLI"
        );

        let child = match self.build_command(prompt, working_dir).spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(command = %self.command, error = %e, "Agent CLI failed to spawn");
                return AgentOutcome::failure(
                    FailureReason::ProcessError,
                    format!("failed to spawn {}: {e}", self.command),
                );
            }
        };

        // Dropping the wait future on timeout drops the child, and
        // kill_on_drop terminates it.
        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return AgentOutcome::failure(
                    FailureReason::ProcessError,
                    format!("failed waiting for {}: {e}", self.command),
                );
            }
            Err(_) => {
                warn!(command = %self.command, timeout_secs = timeout.as_secs(), "Agent CLI timed out");
                return AgentOutcome::failure(
                    FailureReason::Timeout,
                    format!("agent did not finish within {}s", timeout.as_secs()),
                );
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stderr = truncate(stderr.trim(), STDERR_DETAIL_LIMIT);
            warn!(command = %self.command, status = %output.status, "Agent CLI exited with failure");
            return AgentOutcome::failure(
                FailureReason::ProcessError,
                format!("{} exited with {}: {stderr}", self.command, output.status),
            );
        }

        debug!(
            bytes = output.stdout.len(),
            duration = ?start.elapsed(),
            "Agent CLI finished"
        );
        AgentOutcome::success(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> CliAgent {
        // `sh -c SCRIPT PROMPT` binds the prompt to $0.
        CliAgent::new("sh", vec!["-c".into(), script.into()])
    }

    #[tokio::test]
    async fn success_returns_stdout_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let agent = sh("printf 'prompt=%s' \"$0\"");
        let outcome = agent
            .invoke("describe the repo", dir.path(), Duration::from_secs(10))
            .await;
        assert_eq!(outcome, AgentOutcome::success("prompt=describe the repo"));
    }

    #[tokio::test]
    async fn runs_in_working_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "here").unwrap();
        let outcome = sh("cat marker.txt")
            .invoke("p", dir.path(), Duration::from_secs(10))
            .await;
        assert_eq!(outcome, AgentOutcome::success("here"));
    }

    #[tokio::test]
    async fn nonzero_exit_is_process_error() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = sh("echo boom >&2; exit 3")
            .invoke("p", dir.path(), Duration::from_secs(10))
            .await;
        match outcome {
            AgentOutcome::Failure { reason, detail } => {
                assert_eq!(reason, FailureReason::ProcessError);
                assert!(detail.contains("boom"), "detail: {detail}");
            }
            AgentOutcome::Success { .. } => panic!("expected failure"),
        }
    }

    #[tokio::test]
    async fn missing_binary_is_process_error() {
        let dir = tempfile::tempdir().unwrap();
        let agent = CliAgent::new("/nonexistent/cartograph-agent", vec![]);
        let outcome = agent.invoke("p", dir.path(), Duration::from_secs(10)).await;
        assert!(matches!(
            outcome,
            AgentOutcome::Failure {
                reason: FailureReason::ProcessError,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn slow_agent_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let start = Instant::now();
        let outcome = sh("sleep 5")
            .invoke("p", dir.path(), Duration::from_millis(200))
            .await;
        assert!(matches!(
            outcome,
            AgentOutcome::Failure {
                reason: FailureReason::Timeout,
                ..
            }
        ));
        assert!(start.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn model_flag_precedes_prompt() {
        let agent = CliAgent::new("claude", vec!["-p".into()]).with_model("m1");
        let cmd = agent.build_command("hello", Path::new("."));
        let args: Vec<_> = cmd
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(args, vec!["-p", "--model", "m1", "hello"]);
    }
}
