// Quality audit: independent of the change branch, partitioned by ISO week.

use chrono::Utc;
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::error::StageError;
use crate::normalize::NormalizedResult;
use crate::prompt::{json_block, respond_with_json};
use crate::scan::ScanSummary;
use crate::store::AuditArchive;
use crate::types::{AuditReport, AuditWindow, IssueCategory, LineRange, QualityIssue, Severity};

use super::fields::{root_object, text};
use super::{Provenance, Stage, StageId, StageReport, raw_text};

const SCHEMA: &str = r#"{
  "issues": [
    {
      "severity": "low | medium | high | critical",
      "category": "tech_debt | security | performance | consistency",
      "file_path": "relative/path",
      "line_range": [10, 24],
      "description": "what is wrong",
      "suggested_fix": "how to fix it"
    }
  ],
  "narrative": "overall findings"
}"#;

#[derive(Debug, Clone)]
pub struct AuditInput {
    pub window: AuditWindow,
    pub scan: ScanSummary,
}

#[derive(Debug, Clone)]
pub struct AuditStage {
    archive: AuditArchive,
    max_files_in_prompt: usize,
}

impl AuditStage {
    pub fn new(archive: AuditArchive, max_files_in_prompt: usize) -> Self {
        Self {
            archive,
            max_files_in_prompt,
        }
    }

    fn empty_report(input: &AuditInput) -> AuditReport {
        AuditReport {
            window: input.window,
            generated_at: Utc::now(),
            files_analyzed: input.scan.files.len(),
            total_lines: usize::try_from(input.scan.total_lines).unwrap_or(usize::MAX),
            issues: Vec::new(),
            narrative: String::new(),
        }
    }
}

#[derive(Default)]
struct IssueDefaults {
    skipped: usize,
    severity: usize,
    category: usize,
}

/// `[start, end]`, `{"start":..,"end":..}` or `"start-end"`.
fn parse_line_range(value: &Value) -> Option<LineRange> {
    let as_u32 = |v: &Value| v.as_u64().and_then(|n| u32::try_from(n).ok());
    let (start, end) = match value {
        Value::Array(items) if items.len() == 2 => (as_u32(&items[0])?, as_u32(&items[1])?),
        Value::Object(obj) => (as_u32(obj.get("start")?)?, as_u32(obj.get("end")?)?),
        Value::String(s) => {
            let (a, b) = s.split_once('-')?;
            (a.trim().parse().ok()?, b.trim().parse().ok()?)
        }
        _ => return None,
    };
    (start <= end).then_some(LineRange { start, end })
}

fn map_issue(obj: &Map<String, Value>, defaults: &mut IssueDefaults) -> Option<QualityIssue> {
    let Some(description) = text(obj, "description") else {
        defaults.skipped += 1;
        return None;
    };
    let severity = text(obj, "severity")
        .and_then(|s| Severity::parse(&s))
        .unwrap_or_else(|| {
            defaults.severity += 1;
            Severity::Low
        });
    let category = text(obj, "category")
        .and_then(|s| IssueCategory::parse(&s))
        .unwrap_or_else(|| {
            defaults.category += 1;
            IssueCategory::TechDebt
        });

    Some(QualityIssue {
        severity,
        category,
        file_path: text(obj, "file_path").unwrap_or_default(),
        line_range: obj.get("line_range").and_then(parse_line_range),
        description,
        suggested_fix: text(obj, "suggested_fix"),
    })
}

#[async_trait::async_trait]
impl Stage for AuditStage {
    type Input = AuditInput;
    type Output = AuditReport;

    fn id(&self) -> StageId {
        StageId::QualityAudit
    }

    fn short_circuit(&self, input: &AuditInput) -> Option<AuditReport> {
        input.scan.is_empty().then(|| {
            warn!("No source files found for the quality audit; check audit.include_patterns");
            Self::empty_report(input)
        })
    }

    fn render_prompt(&self, input: &AuditInput) -> String {
        let scan = &input.scan;
        let listed: Vec<String> = scan
            .files
            .iter()
            .take(self.max_files_in_prompt)
            .map(|f| format!("{} ({} lines)", f.path, f.lines))
            .collect();
        let omitted = scan.files.len().saturating_sub(listed.len());
        let more = if omitted > 0 {
            format!("... and {omitted} more\n")
        } else {
            String::new()
        };
        format!(
            "## Task: quality_audit\n\n\
             Perform a code quality audit of the repository in the working directory \
             for week {week}.\n\n\
             Files: {files}, lines: {lines} ({comments} comment, {blank} blank)\n\
             Languages: {languages}\n\n\
             Source files:\n{list}\n{more}\n\
             Look for:\n\
             1. Technical debt accumulation\n\
             2. Inconsistent patterns across modules\n\
             3. Security vulnerability patterns\n\
             4. Performance bottlenecks\n\
             5. Missing abstractions or over-engineering\n\
             6. Test coverage gaps\n\n{schema}",
            week = input.window,
            files = scan.files.len(),
            lines = scan.total_lines,
            comments = scan.comment_lines,
            blank = scan.blank_lines,
            languages = json_block(&scan.languages),
            list = listed.join("\n"),
            schema = respond_with_json(SCHEMA),
        )
    }

    fn map_structured(
        &self,
        value: Value,
        input: &AuditInput,
        warnings: &mut Vec<String>,
    ) -> AuditReport {
        // A bare array is taken as the issue list itself.
        let (raw_issues, narrative) = match value {
            Value::Array(items) => (items, None),
            other => {
                let mut obj = root_object(other, warnings);
                let narrative = text(&obj, "narrative");
                let issues = match obj.remove("issues") {
                    Some(Value::Array(items)) => items,
                    _ => {
                        warnings.push("issues: missing or not a list; defaulted to []".into());
                        Vec::new()
                    }
                };
                (issues, narrative)
            }
        };

        let mut defaults = IssueDefaults::default();
        let issues: Vec<QualityIssue> = raw_issues
            .iter()
            .filter_map(|raw| match raw.as_object() {
                Some(obj) => map_issue(obj, &mut defaults),
                None => {
                    defaults.skipped += 1;
                    None
                }
            })
            .collect();
        for (n, what) in [
            (defaults.skipped, "no description; skipped"),
            (defaults.severity, "severity missing or unrecognized; defaulted to low"),
            (defaults.category, "category missing or unrecognized; defaulted to tech_debt"),
        ] {
            if n > 0 {
                warnings.push(format!("{n} issue(s): {what}"));
            }
        }

        AuditReport {
            issues,
            narrative: narrative.unwrap_or_default(),
            ..Self::empty_report(input)
        }
    }

    fn degraded(&self, input: &AuditInput, result: &NormalizedResult) -> AuditReport {
        AuditReport {
            narrative: raw_text(result),
            ..Self::empty_report(input)
        }
    }

    async fn commit(
        &self,
        output: AuditReport,
        provenance: Provenance,
        report: &mut StageReport,
    ) -> Result<AuditReport, StageError> {
        report.set_detail("window", output.window.key());
        report.set_detail("issues", output.issues.len());
        if provenance == Provenance::ShortCircuit {
            return Ok(output);
        }
        let path = self
            .archive
            .save(&output)
            .map_err(|e| StageError::Persist(e.to_string()))?;
        info!(
            window = %output.window,
            issues = output.issues.len(),
            critical = output.count_at_least(Severity::Critical),
            "Audit archived"
        );
        report.set_detail("archive", path.display().to_string());
        Ok(output)
    }
}
