use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

// ── Change records ─────────────────────────────────────────────────

/// One revision detected in the lookback window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    /// Commit hash.
    pub id: String,
    pub author: String,
    pub timestamp: DateTime<Utc>,
    pub files: BTreeSet<String>,
    pub additions: u64,
    pub deletions: u64,
    pub message: String,
    /// Bounded unified-diff preview across touched files.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff_summary: Option<String>,
    /// Agent analysis attached after normalization.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis: Option<serde_json::Value>,
}

impl ChangeRecord {
    pub fn short_id(&self) -> &str {
        self.id.get(..8).unwrap_or(&self.id)
    }
}

// ── Impact assessment ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    #[default]
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            _ => None,
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregate assessment of every change in one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImpactAssessment {
    pub architectural_changes: Vec<String>,
    pub breaking_changes: Vec<String>,
    pub new_patterns: Vec<String>,
    pub performance_implications: Vec<String>,
    pub affected_components: Vec<String>,
    pub risk_level: RiskLevel,
}

impl ImpactAssessment {
    /// True when every list is empty. Risk level is not considered.
    pub fn is_empty(&self) -> bool {
        self.architectural_changes.is_empty()
            && self.breaking_changes.is_empty()
            && self.new_patterns.is_empty()
            && self.performance_implications.is_empty()
            && self.affected_components.is_empty()
    }
}

// ── Quality audit ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum IssueCategory {
    #[default]
    TechDebt,
    Security,
    Performance,
    Consistency,
}

impl IssueCategory {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().replace(['-', ' '], "_").as_str() {
            "tech_debt" | "technical_debt" => Some(Self::TechDebt),
            "security" => Some(Self::Security),
            "performance" => Some(Self::Performance),
            "consistency" => Some(Self::Consistency),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineRange {
    pub start: u32,
    pub end: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityIssue {
    pub severity: Severity,
    pub category: IssueCategory,
    pub file_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_range: Option<LineRange>,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_fix: Option<String>,
}

/// ISO-week partition key for audit runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AuditWindow {
    pub year: i32,
    pub week: u32,
}

impl AuditWindow {
    pub fn containing(at: DateTime<Utc>) -> Self {
        let iso = at.iso_week();
        Self {
            year: iso.year(),
            week: iso.week(),
        }
    }

    pub fn current() -> Self {
        Self::containing(Utc::now())
    }

    /// `YYYY-Www`, e.g. `2026-W07`.
    pub fn key(&self) -> String {
        format!("{}-W{:02}", self.year, self.week)
    }

    /// Parse a `YYYY-Www` key, rejecting weeks the ISO calendar lacks.
    pub fn parse(s: &str) -> Option<Self> {
        let (year, week) = s.split_once("-W")?;
        let year: i32 = year.parse().ok()?;
        let week: u32 = week.parse().ok()?;
        NaiveDate::from_isoywd_opt(year, week, chrono::Weekday::Mon)?;
        Some(Self { year, week })
    }
}

impl fmt::Display for AuditWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

/// Findings of one audit run, archived per ISO week.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditReport {
    pub window: AuditWindow,
    pub generated_at: DateTime<Utc>,
    pub files_analyzed: usize,
    pub total_lines: usize,
    pub issues: Vec<QualityIssue>,
    /// Free-text findings when the agent did not answer in JSON.
    #[serde(default)]
    pub narrative: String,
}

impl AuditReport {
    pub fn count_at_least(&self, severity: Severity) -> usize {
        self.issues.iter().filter(|i| i.severity >= severity).count()
    }
}

// ── Documentation ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum UpdateMode {
    Create,
    #[default]
    Update,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentationUpdate {
    pub file_path: String,
    pub update_type: UpdateMode,
    pub content: String,
    #[serde(default)]
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn risk_and_severity_are_ordered() {
        assert!(RiskLevel::Low < RiskLevel::Medium && RiskLevel::Medium < RiskLevel::High);
        assert!(Severity::High < Severity::Critical);
    }

    #[test]
    fn risk_level_parse_ignores_case() {
        assert_eq!(RiskLevel::parse("HIGH"), Some(RiskLevel::High));
        assert_eq!(RiskLevel::parse("catastrophic"), None);
    }

    #[test]
    fn issue_category_accepts_common_spellings() {
        assert_eq!(IssueCategory::parse("tech-debt"), Some(IssueCategory::TechDebt));
        assert_eq!(IssueCategory::parse("Technical Debt"), Some(IssueCategory::TechDebt));
        assert_eq!(IssueCategory::parse("security"), Some(IssueCategory::Security));
        assert_eq!(
            serde_json::to_string(&IssueCategory::TechDebt).unwrap(),
            "\"tech_debt\""
        );
    }

    #[test]
    fn audit_window_uses_iso_weeks() {
        // 2027-01-01 is a Friday, which belongs to ISO week 53 of 2026.
        let at = Utc.with_ymd_and_hms(2027, 1, 1, 12, 0, 0).unwrap();
        let window = AuditWindow::containing(at);
        assert_eq!(window.key(), "2026-W53");
        assert_eq!(AuditWindow::parse("2026-W53"), Some(window));
        assert_eq!(AuditWindow::parse("2025-W53"), None);
        assert_eq!(AuditWindow::parse("garbage"), None);
    }

    #[test]
    fn empty_assessment_ignores_risk() {
        let assessment = ImpactAssessment {
            risk_level: RiskLevel::High,
            ..ImpactAssessment::default()
        };
        assert!(assessment.is_empty());
    }
}
