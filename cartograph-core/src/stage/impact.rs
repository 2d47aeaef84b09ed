// Impact assessment: one aggregate judgement over every change in the run.

use std::collections::BTreeSet;

use serde::Serialize;
use serde_json::Value;

use crate::normalize::NormalizedResult;
use crate::prompt::{json_block, respond_with_json};
use crate::types::{ChangeRecord, ImpactAssessment, RiskLevel};

use super::fields::{optional_string_list, parsed, root_object, string_list};
use super::{Stage, StageId};

const SCHEMA: &str = r#"{
  "architectural_changes": ["..."],
  "breaking_changes": ["..."],
  "new_patterns": ["..."],
  "performance_implications": ["..."],
  "affected_components": ["path or component name"],
  "risk_level": "low | medium | high"
}"#;

#[derive(Debug, Clone, Copy, Default)]
pub struct ImpactStage;

/// What the agent sees of each change.
#[derive(Serialize)]
pub(crate) struct ChangeBrief<'a> {
    id: &'a str,
    author: &'a str,
    message: &'a str,
    files: Vec<&'a str>,
    additions: u64,
    deletions: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    analysis: Option<&'a Value>,
}

impl<'a> From<&'a ChangeRecord> for ChangeBrief<'a> {
    fn from(c: &'a ChangeRecord) -> Self {
        Self {
            id: c.short_id(),
            author: &c.author,
            message: &c.message,
            files: c.files.iter().map(String::as_str).collect(),
            additions: c.additions,
            deletions: c.deletions,
            analysis: c.analysis.as_ref(),
        }
    }
}

/// Sorted union of every touched file.
pub fn touched_files(changes: &[ChangeRecord]) -> Vec<String> {
    changes
        .iter()
        .flat_map(|c| c.files.iter().cloned())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

#[async_trait::async_trait]
impl Stage for ImpactStage {
    type Input = Vec<ChangeRecord>;
    type Output = ImpactAssessment;

    fn id(&self) -> StageId {
        StageId::ImpactAssessment
    }

    fn short_circuit(&self, changes: &Vec<ChangeRecord>) -> Option<ImpactAssessment> {
        changes.is_empty().then(ImpactAssessment::default)
    }

    fn render_prompt(&self, changes: &Vec<ChangeRecord>) -> String {
        let briefs: Vec<ChangeBrief<'_>> = changes.iter().map(ChangeBrief::from).collect();
        format!(
            "## Task: impact_assessment\n\n\
             Based on the following {} code change(s), provide a comprehensive impact \
             assessment of the system as a whole.\n\n\
             Changes:\n{}\n\n{}",
            changes.len(),
            json_block(&briefs),
            respond_with_json(SCHEMA)
        )
    }

    fn map_structured(
        &self,
        value: Value,
        changes: &Vec<ChangeRecord>,
        warnings: &mut Vec<String>,
    ) -> ImpactAssessment {
        let obj = root_object(value, warnings);
        let affected_components = optional_string_list(&obj, "affected_components", warnings)
            .unwrap_or_else(|| {
                warnings.push("affected_components: missing; defaulted to touched files".into());
                touched_files(changes)
            });

        ImpactAssessment {
            architectural_changes: string_list(&obj, "architectural_changes", warnings),
            breaking_changes: string_list(&obj, "breaking_changes", warnings),
            new_patterns: string_list(&obj, "new_patterns", warnings),
            performance_implications: string_list(&obj, "performance_implications", warnings),
            affected_components,
            risk_level: parsed(&obj, "risk_level", RiskLevel::parse, RiskLevel::Low, warnings),
        }
    }

    fn degraded(&self, _changes: &Vec<ChangeRecord>, _result: &NormalizedResult) -> ImpactAssessment {
        ImpactAssessment::default()
    }
}
