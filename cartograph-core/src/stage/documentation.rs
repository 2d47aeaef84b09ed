// Documentation generation: turn the impact assessment into doc updates and
// write them through the sink.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::docs::DocumentationSink;
use crate::error::StageError;
use crate::normalize::NormalizedResult;
use crate::prompt::{json_block, respond_with_json};
use crate::types::{DocumentationUpdate, ImpactAssessment, UpdateMode};

use super::fields::{root_object, text};
use super::{Provenance, Stage, StageId, StageReport, raw_text};

const SCHEMA: &str = r#"{
  "summary": "what was documented and why",
  "updates": [
    {
      "file_path": "relative/path.md",
      "update_type": "create | update",
      "content": "full markdown content",
      "reason": "why this file changed"
    }
  ]
}"#;

const DEFAULT_REASON: &str = "Generated from impact assessment";

/// Outcome of one documentation stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentationReport {
    /// The agent's summary, or its raw text when it did not answer in JSON.
    pub summary: String,
    pub updates: Vec<DocumentationUpdate>,
    /// Paths (relative to the docs root) actually written.
    #[serde(default)]
    pub written: Vec<String>,
    #[serde(default)]
    pub index_regenerated: bool,
}

#[derive(Debug, Clone)]
pub struct DocumentationStage {
    sink: Arc<dyn DocumentationSink>,
}

impl DocumentationStage {
    pub fn new(sink: Arc<dyn DocumentationSink>) -> Self {
        Self { sink }
    }
}

fn map_update(
    index: usize,
    value: &Value,
    warnings: &mut Vec<String>,
) -> Option<DocumentationUpdate> {
    let Some(obj) = value.as_object() else {
        warnings.push(format!("updates[{index}]: not an object; skipped"));
        return None;
    };
    let Some(file_path) = text(obj, "file_path") else {
        warnings.push(format!("updates[{index}]: missing file_path; skipped"));
        return None;
    };
    let Some(content) = obj.get("content").and_then(Value::as_str) else {
        warnings.push(format!("updates[{index}]: missing content; skipped"));
        return None;
    };

    let update_type = match text(obj, "update_type").as_deref().map(str::to_ascii_lowercase) {
        Some(t) if t == "create" => UpdateMode::Create,
        Some(t) if t == "update" => UpdateMode::Update,
        other => {
            warnings.push(format!(
                "updates[{index}].update_type: {}; defaulted to update",
                other.map_or_else(|| "missing".to_string(), |t| format!("unrecognized value {t:?}"))
            ));
            UpdateMode::Update
        }
    };
    let reason = text(obj, "reason").unwrap_or_else(|| DEFAULT_REASON.to_string());

    Some(DocumentationUpdate {
        file_path,
        update_type,
        content: content.to_string(),
        reason,
    })
}

#[async_trait::async_trait]
impl Stage for DocumentationStage {
    type Input = ImpactAssessment;
    type Output = DocumentationReport;

    fn id(&self) -> StageId {
        StageId::DocumentationGeneration
    }

    fn short_circuit(&self, assessment: &ImpactAssessment) -> Option<DocumentationReport> {
        assessment.is_empty().then(DocumentationReport::default)
    }

    fn render_prompt(&self, assessment: &ImpactAssessment) -> String {
        format!(
            "## Task: documentation_generation\n\n\
             Based on the following impact assessment, decide which documentation files \
             to create or update. Cover, where relevant:\n\
             1. Architecture changes\n\
             2. Breaking changes and a migration guide\n\
             3. New features and API documentation\n\
             4. Deployment and configuration updates\n\n\
             Paths are relative to the documentation root. Keep any block between \
             `<!-- cartograph:preserve -->` markers intact.\n\n\
             Impact assessment:\n{}\n\n{}",
            json_block(assessment),
            respond_with_json(SCHEMA)
        )
    }

    fn map_structured(
        &self,
        value: Value,
        _assessment: &ImpactAssessment,
        warnings: &mut Vec<String>,
    ) -> DocumentationReport {
        let obj = root_object(value, warnings);
        let summary = text(&obj, "summary").unwrap_or_else(|| {
            warnings.push("summary: missing; defaulted to empty".into());
            String::new()
        });
        let updates = match obj.get("updates") {
            Some(Value::Array(items)) => items
                .iter()
                .enumerate()
                .filter_map(|(i, v)| map_update(i, v, warnings))
                .collect(),
            None | Some(Value::Null) => {
                warnings.push("updates: missing; defaulted to []".into());
                Vec::new()
            }
            Some(_) => {
                warnings.push("updates: expected a list; defaulted to []".into());
                Vec::new()
            }
        };
        DocumentationReport {
            summary,
            updates,
            ..DocumentationReport::default()
        }
    }

    fn degraded(&self, _assessment: &ImpactAssessment, result: &NormalizedResult) -> DocumentationReport {
        DocumentationReport {
            summary: raw_text(result),
            ..DocumentationReport::default()
        }
    }

    async fn commit(
        &self,
        mut output: DocumentationReport,
        provenance: Provenance,
        report: &mut StageReport,
    ) -> Result<DocumentationReport, StageError> {
        if provenance == Provenance::ShortCircuit {
            return Ok(output);
        }

        for update in &output.updates {
            match self
                .sink
                .write(&update.file_path, &update.content, update.update_type)
                .await
            {
                Ok(_) => output.written.push(update.file_path.clone()),
                Err(e) => {
                    warn!(path = %update.file_path, error = %e, "Skipping documentation update");
                    report
                        .warnings
                        .push(format!("{}: not written: {e}", update.file_path));
                }
            }
        }

        match self.sink.regenerate_index().await {
            Ok(_) => output.index_regenerated = true,
            Err(e) => {
                warn!(error = %e, "Index regeneration failed");
                report.warnings.push(format!("index not regenerated: {e}"));
            }
        }

        info!(
            written = output.written.len(),
            proposed = output.updates.len(),
            "Documentation updated"
        );
        report.set_detail("documents_written", output.written.len());
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::docs::FsDocumentationSink;
    use crate::types::RiskLevel;
    use serde_json::json;

    fn stage(dir: &std::path::Path) -> DocumentationStage {
        DocumentationStage::new(Arc::new(FsDocumentationSink::new(dir)))
    }

    fn assessment() -> ImpactAssessment {
        ImpactAssessment {
            breaking_changes: vec!["config key renamed".into()],
            risk_level: RiskLevel::Medium,
            ..ImpactAssessment::default()
        }
    }

    #[test]
    fn empty_assessment_short_circuits() {
        let dir = tempfile::tempdir().unwrap();
        let s = stage(dir.path());
        assert!(s.short_circuit(&ImpactAssessment::default()).is_some());
        assert!(s.short_circuit(&assessment()).is_none());
    }

    #[test]
    fn updates_are_mapped_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let mut warnings = Vec::new();
        let out = stage(dir.path()).map_structured(
            json!({
                "summary": "Documented the rename",
                "updates": [
                    {"file_path": "migration.md", "content": "# Migration", "update_type": "create"},
                    {"file_path": "api.md", "content": "# API"},
                    {"content": "orphan"},
                    "junk"
                ]
            }),
            &assessment(),
            &mut warnings,
        );
        assert_eq!(out.summary, "Documented the rename");
        assert_eq!(out.updates.len(), 2);
        assert_eq!(out.updates[0].update_type, UpdateMode::Create);
        assert_eq!(out.updates[1].update_type, UpdateMode::Update);
        assert_eq!(out.updates[1].reason, DEFAULT_REASON);
        assert_eq!(warnings.len(), 3, "{warnings:?}");
    }

    #[tokio::test]
    async fn commit_writes_docs_and_index() {
        let dir = tempfile::tempdir().unwrap();
        let s = stage(dir.path());
        let output = DocumentationReport {
            summary: String::new(),
            updates: vec![
                DocumentationUpdate {
                    file_path: "guide/setup.md".into(),
                    update_type: UpdateMode::Create,
                    content: "# Setup\n".into(),
                    reason: DEFAULT_REASON.into(),
                },
                DocumentationUpdate {
                    file_path: "../outside.md".into(),
                    update_type: UpdateMode::Update,
                    content: "nope".into(),
                    reason: DEFAULT_REASON.into(),
                },
            ],
            ..DocumentationReport::default()
        };
        let mut report = StageReport::new(StageId::DocumentationGeneration);
        let out = s.commit(output, Provenance::Structured, &mut report).await.unwrap();

        assert_eq!(out.written, vec!["guide/setup.md"]);
        assert!(out.index_regenerated);
        assert_eq!(report.warnings.len(), 1);
        let index = std::fs::read_to_string(dir.path().join("index.md")).unwrap();
        assert!(index.contains("- [setup](guide/setup.md)"));
    }

    #[test]
    fn degraded_keeps_raw_text_as_summary() {
        let dir = tempfile::tempdir().unwrap();
        let out = stage(dir.path()).degraded(
            &assessment(),
            &NormalizedResult::Unstructured("Updated the README.".into()),
        );
        assert_eq!(out.summary, "Updated the README.");
        assert!(out.updates.is_empty());
    }
}
