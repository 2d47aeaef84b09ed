// Integration test utilities and git fixtures for Cartograph.

use std::path::Path;
use std::process::Command;
use std::sync::Arc;

use anyhow::Context;
use cartograph_core::agent::ScriptedAgent;
use cartograph_core::config::{CartographConfig, Strictness};
use cartograph_core::pipeline::AnalysisPipeline;

/// A test fixture with a temporary git repository on branch `main`.
#[derive(Debug)]
pub struct TestRepo {
    pub dir: tempfile::TempDir,
}

impl TestRepo {
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Two commits: the first touches `a.py` and `b.py`, the second `b.py`
    /// and `c.py`. Commit dates are left at "now" so both fall inside the
    /// default lookback window.
    pub fn two_commits() -> Self {
        let repo = Self::empty();
        let root = repo.path();

        write(root, "a.py", "def alpha():\n    return 1\n");
        write(root, "b.py", "from a import alpha\n\ndef beta():\n    return alpha() + 1\n");
        git(root, &["add", "."]);
        git(root, &["commit", "-q", "-m", "Add alpha and beta"]);

        write(
            root,
            "b.py",
            "from a import alpha\n\ndef beta():\n    # doubled\n    return alpha() * 2\n",
        );
        write(root, "c.py", "from b import beta\n\nprint(beta())\n");
        git(root, &["add", "."]);
        git(root, &["commit", "-q", "-m", "Double beta and add entry point"]);

        repo
    }

    /// A repository with one commit that only touches `README.md`.
    pub fn docs_only() -> Self {
        let repo = Self::empty();
        write(repo.path(), "README.md", "# Fixture\n");
        git(repo.path(), &["add", "."]);
        git(repo.path(), &["commit", "-q", "-m", "Add readme"]);
        repo
    }

    fn empty() -> Self {
        let dir = tempfile::tempdir().expect("create tempdir");
        let root = dir.path();
        git(root, &["init", "-q"]);
        git(root, &["symbolic-ref", "HEAD", "refs/heads/main"]);
        git(root, &["config", "user.email", "test@cartograph.dev"]);
        git(root, &["config", "user.name", "Test"]);
        Self { dir }
    }
}

fn git(dir: &Path, args: &[&str]) {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .unwrap_or_else(|e| panic!("git {}: {e}", args.join(" ")));
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        panic!("git {} failed: {stderr}", args.join(" "));
    }
}

fn write(root: &Path, rel: &str, content: &str) {
    std::fs::write(root.join(rel), content).unwrap();
}

/// A pipeline over the fixture's real git history, answering through `agent`.
pub fn pipeline(
    repo: &TestRepo,
    agent: Arc<ScriptedAgent>,
    strictness: Strictness,
) -> anyhow::Result<AnalysisPipeline> {
    let mut config = CartographConfig::default();
    config.pipeline.strictness = strictness;
    let pipeline = AnalysisPipeline::from_config(repo.path(), config)
        .context("build pipeline from default config")?;
    Ok(pipeline.with_gateway(agent))
}

/// Agent answers, each framed as a final `result` record, that let every
/// stage produce structured output.
pub fn cooperative_agent() -> ScriptedAgent {
    ScriptedAgent::default()
        .answer(
            "## Task: change_detection",
            r#"{"summary": "small refactor", "risk": "low"}"#,
        )
        .answer(
            "## Task: impact_assessment",
            r#"{"architectural_changes": ["entry point added"], "risk_level": "medium"}"#,
        )
        .answer(
            "## Task: documentation_generation",
            r##"{"summary": "Documented the entry point", "updates": [
                {"file_path": "architecture.md", "update_type": "create",
                 "content": "# Architecture\n\nc.py drives b.py.\n", "reason": "new entry point"}
            ]}"##,
        )
        .answer(
            "## Task: knowledge_graph_build",
            r#"{"nodes": [
                {"id": "a.py", "type": "module", "name": "a"},
                {"id": "b.py", "type": "module", "name": "b", "dependencies": ["a.py"]},
                {"id": "c.py", "type": "module", "name": "c", "dependencies": ["b.py"]}
            ]}"#,
        )
        .answer(
            "## Task: quality_audit",
            r#"{"issues": [
                {"severity": "medium", "category": "consistency", "file_path": "c.py",
                 "description": "module-level side effect"}
            ], "narrative": "One finding."}"#,
        )
}
