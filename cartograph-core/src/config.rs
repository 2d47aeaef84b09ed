use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CartographError, ConfigError};

/// Directory under the repository root holding Cartograph state.
pub const STATE_DIR: &str = ".cartograph";

/// Config file name inside [`STATE_DIR`].
pub const CONFIG_FILE: &str = "config.toml";

/// Which gateway implementation talks to the analysis agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AgentBackend {
    /// Spawn the agent CLI as a subprocess.
    #[default]
    Cli,
    /// Call the Anthropic Messages API over HTTP.
    Anthropic,
}

/// How structural stages react to unusable agent output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Strictness {
    /// Substitute an empty valid instance and record a warning.
    #[default]
    Lenient,
    /// Fail the stage.
    Strict,
}

/// Top-level Cartograph configuration, matching `.cartograph/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CartographConfig {
    #[serde(default)]
    pub agent: AgentSection,
    #[serde(default)]
    pub repository: RepositorySection,
    #[serde(default)]
    pub storage: StorageSection,
    #[serde(default)]
    pub pipeline: PipelineSection,
    #[serde(default)]
    pub audit: AuditSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    pub backend: AgentBackend,
    /// Executable for the CLI backend.
    pub command: String,
    /// Arguments placed before the prompt; the prompt is always last.
    pub args: Vec<String>,
    pub model: Option<String>,
    pub timeout_secs: u64,
    /// Environment variable holding the API key (HTTP backend).
    pub api_key_env: String,
    pub base_url: String,
    pub max_tokens: u32,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            backend: AgentBackend::Cli,
            command: "claude".to_string(),
            args: vec![
                "-p".to_string(),
                "--output-format".to_string(),
                "json".to_string(),
            ],
            model: Some("claude-sonnet-4-20250514".to_string()),
            timeout_secs: 300,
            api_key_env: "ANTHROPIC_API_KEY".to_string(),
            base_url: "https://api.anthropic.com".to_string(),
            max_tokens: 4096,
        }
    }
}

impl AgentSection {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositorySection {
    pub branch: String,
    pub lookback_days: u32,
    pub max_commits: u32,
    /// Per-file cap on the unified diff preview attached to each change.
    pub diff_preview_bytes: usize,
}

impl Default for RepositorySection {
    fn default() -> Self {
        Self {
            branch: "main".to_string(),
            lookback_days: 7,
            max_commits: 200,
            diff_preview_bytes: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    pub docs_root: PathBuf,
    pub graph_store: PathBuf,
    pub audit_store: PathBuf,
    pub ledger: PathBuf,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            docs_root: PathBuf::from("docs"),
            graph_store: PathBuf::from("data/knowledge_graph"),
            audit_store: PathBuf::from("data/audits"),
            ledger: PathBuf::from(".cartograph/ledger.db"),
        }
    }
}

impl StorageSection {
    pub fn docs_root(&self, repo_root: &Path) -> PathBuf {
        resolve(repo_root, &self.docs_root)
    }

    pub fn graph_store(&self, repo_root: &Path) -> PathBuf {
        resolve(repo_root, &self.graph_store)
    }

    pub fn audit_store(&self, repo_root: &Path) -> PathBuf {
        resolve(repo_root, &self.audit_store)
    }

    pub fn ledger(&self, repo_root: &Path) -> PathBuf {
        resolve(repo_root, &self.ledger)
    }
}

fn resolve(root: &Path, p: &Path) -> PathBuf {
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        root.join(p)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSection {
    pub strictness: Strictness,
    /// Ask the agent to analyze each detected commit individually.
    pub analyze_commits: bool,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            strictness: Strictness::Lenient,
            analyze_commits: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditSection {
    pub include_patterns: Vec<String>,
    pub exclude_patterns: Vec<String>,
    pub max_files_in_prompt: usize,
}

impl Default for AuditSection {
    fn default() -> Self {
        Self {
            include_patterns: [
                "**/*.py", "**/*.rs", "**/*.js", "**/*.ts", "**/*.go", "**/*.java",
            ]
            .iter()
            .map(|s| (*s).to_string())
            .collect(),
            exclude_patterns: [
                "**/.git/**",
                "**/target/**",
                "**/node_modules/**",
                "**/vendor/**",
                "**/__pycache__/**",
            ]
            .iter()
            .map(|s| (*s).to_string())
            .collect(),
            max_files_in_prompt: 200,
        }
    }
}

impl CartographConfig {
    /// Parse a config from TOML text and validate it.
    pub fn from_toml(text: &str) -> crate::error::Result<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a config file.
    pub fn load(path: &Path) -> crate::error::Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::NotFound(path.display().to_string())
            } else {
                ConfigError::Parse(format!("{}: {e}", path.display()))
            }
        })?;
        Self::from_toml(&text)
    }

    /// Load `<repo>/.cartograph/config.toml`, falling back to defaults when absent.
    pub fn load_for_repo(repo_root: &Path) -> crate::error::Result<Self> {
        let path = config_path(repo_root);
        match Self::load(&path) {
            Err(CartographError::Config(ConfigError::NotFound(_))) => Ok(Self::default()),
            other => other,
        }
    }

    pub fn to_toml_string(&self) -> crate::error::Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| CartographError::Config(ConfigError::Invalid(e.to_string())))
    }

    pub fn validate(&self) -> crate::error::Result<()> {
        if self.agent.timeout_secs == 0 {
            return Err(ConfigError::Invalid("agent.timeout_secs must be positive".into()).into());
        }
        if self.agent.backend == AgentBackend::Cli && self.agent.command.trim().is_empty() {
            return Err(ConfigError::Invalid("agent.command must not be empty".into()).into());
        }
        if self.repository.branch.trim().is_empty() {
            return Err(ConfigError::Invalid("repository.branch must not be empty".into()).into());
        }
        if self.audit.include_patterns.is_empty() {
            return Err(
                ConfigError::Invalid("audit.include_patterns must not be empty".into()).into(),
            );
        }
        Ok(())
    }
}

pub fn config_path(repo_root: &Path) -> PathBuf {
    repo_root.join(STATE_DIR).join(CONFIG_FILE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = CartographConfig::default();
        assert_eq!(config.agent.timeout_secs, 300);
        assert_eq!(config.agent.command, "claude");
        assert_eq!(config.repository.branch, "main");
        assert_eq!(config.repository.lookback_days, 7);
        assert_eq!(config.pipeline.strictness, Strictness::Lenient);
        assert!(config.pipeline.analyze_commits);
        config.validate().unwrap();
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config = CartographConfig::from_toml(
            r#"
[agent]
timeout_secs = 30

[pipeline]
strictness = "strict"
"#,
        )
        .unwrap();
        assert_eq!(config.agent.timeout_secs, 30);
        assert_eq!(config.agent.command, "claude");
        assert_eq!(config.pipeline.strictness, Strictness::Strict);
        assert!(config.pipeline.analyze_commits);
        assert_eq!(config.storage.graph_store, PathBuf::from("data/knowledge_graph"));
    }

    #[test]
    fn unknown_backend_is_parse_error() {
        let err = CartographConfig::from_toml("[agent]\nbackend = \"carrier-pigeon\"\n").unwrap_err();
        assert!(matches!(err, CartographError::Config(ConfigError::Parse(_))));
    }

    #[test]
    fn zero_timeout_is_invalid() {
        let err = CartographConfig::from_toml("[agent]\ntimeout_secs = 0\n").unwrap_err();
        assert!(matches!(err, CartographError::Config(ConfigError::Invalid(_))));
    }

    #[test]
    fn storage_paths_resolve_against_repo_root() {
        let storage = StorageSection {
            audit_store: PathBuf::from("/var/audits"),
            ..StorageSection::default()
        };
        let root = Path::new("/repo");
        assert_eq!(storage.graph_store(root), PathBuf::from("/repo/data/knowledge_graph"));
        assert_eq!(storage.audit_store(root), PathBuf::from("/var/audits"));
    }

    #[test]
    fn missing_config_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = CartographConfig::load_for_repo(dir.path()).unwrap();
        assert_eq!(config.agent.timeout_secs, 300);
    }

    #[test]
    fn serialized_config_round_trips() {
        let text = CartographConfig::default().to_toml_string().unwrap();
        let parsed = CartographConfig::from_toml(&text).unwrap();
        assert_eq!(parsed.audit.max_files_in_prompt, 200);
    }
}
