// Audit reports, one file per ISO week: `audit_<YYYY>-W<ww>.json`.
// Re-running an audit within the same week replaces that week's record set.

use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::StoreError;
use crate::types::{AuditReport, AuditWindow};

use super::fs::write_atomic;

#[derive(Debug, Clone)]
pub struct AuditArchive {
    root: PathBuf,
}

impl AuditArchive {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path_for(&self, window: AuditWindow) -> PathBuf {
        self.root.join(format!("audit_{}.json", window.key()))
    }

    pub fn save(&self, report: &AuditReport) -> crate::error::Result<PathBuf> {
        std::fs::create_dir_all(&self.root).map_err(StoreError::Io)?;
        let path = self.path_for(report.window);
        let bytes = serde_json::to_vec_pretty(report).map_err(StoreError::Serialization)?;
        write_atomic(&path, &bytes)?;
        info!(
            window = %report.window,
            issues = report.issues.len(),
            path = %path.display(),
            "Archived audit report"
        );
        Ok(path)
    }

    pub fn load(&self, window: AuditWindow) -> crate::error::Result<Option<AuditReport>> {
        let path = self.path_for(window);
        if !path.is_file() {
            return Ok(None);
        }
        let bytes = std::fs::read(&path).map_err(StoreError::Io)?;
        let report = serde_json::from_slice(&bytes).map_err(|e| StoreError::Corrupt {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Ok(Some(report))
    }

    /// Archived windows, ascending.
    pub fn windows(&self) -> crate::error::Result<Vec<AuditWindow>> {
        let mut windows: Vec<AuditWindow> = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries
                .filter_map(Result::ok)
                .filter_map(|e| window_from_file_name(&e.path()))
                .collect(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(StoreError::Io(e).into()),
        };
        windows.sort();
        Ok(windows)
    }
}

fn window_from_file_name(path: &Path) -> Option<AuditWindow> {
    let name = path.file_name()?.to_str()?;
    AuditWindow::parse(name.strip_prefix("audit_")?.strip_suffix(".json")?)
}
