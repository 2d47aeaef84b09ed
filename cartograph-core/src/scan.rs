// Source scan for the quality audit: which files exist and how big they are.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::AuditSection;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetrics {
    /// Path relative to the scan root, `/`-separated.
    pub path: String,
    pub language: Option<String>,
    pub lines: u64,
    pub blank_lines: u64,
    pub comment_lines: u64,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanSummary {
    pub files: Vec<FileMetrics>,
    pub total_lines: u64,
    pub blank_lines: u64,
    pub comment_lines: u64,
    /// File count per detected language.
    pub languages: BTreeMap<String, u64>,
}

impl ScanSummary {
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct SourceScanner {
    root: PathBuf,
    include: Vec<String>,
    exclude: Vec<glob::Pattern>,
}

impl SourceScanner {
    pub fn new(root: &Path, audit: &AuditSection) -> Self {
        let exclude = audit
            .exclude_patterns
            .iter()
            .filter_map(|p| match glob::Pattern::new(p) {
                Ok(pat) => Some(pat),
                Err(e) => {
                    warn!(pattern = %p, error = %e, "Invalid exclude pattern");
                    None
                }
            })
            .collect();
        Self {
            root: root.to_path_buf(),
            include: audit.include_patterns.clone(),
            exclude,
        }
    }

    /// Matching files, sorted and deduplicated.
    pub fn source_files(&self) -> Vec<PathBuf> {
        let root = glob::Pattern::escape(&self.root.to_string_lossy());
        let mut matched = Vec::new();
        for pattern in &self.include {
            let full = format!("{root}/{pattern}");
            match glob::glob(&full) {
                Ok(paths) => matched.extend(
                    paths
                        .flatten()
                        .filter(|p| p.is_file() && !self.is_excluded(p)),
                ),
                Err(e) => warn!(pattern = %pattern, error = %e, "Invalid include pattern"),
            }
        }
        matched.sort();
        matched.dedup();
        matched
    }

    fn is_excluded(&self, path: &Path) -> bool {
        let relative = path.strip_prefix(&self.root).unwrap_or(path);
        let options = glob::MatchOptions {
            require_literal_separator: false,
            ..glob::MatchOptions::default()
        };
        // Patterns like `**/target/**` should also hit `target/...` at the root.
        let rooted = Path::new("_").join(relative);
        self.exclude.iter().any(|pat| {
            pat.matches_path_with(relative, options) || pat.matches_path_with(&rooted, options)
        })
    }

    pub fn scan(&self) -> ScanSummary {
        let start = Instant::now();
        let files = self.source_files();

        let metrics: Vec<FileMetrics> = files
            .par_iter()
            .filter_map(|path| match file_metrics(&self.root, path) {
                Ok(m) => Some(m),
                Err(e) => {
                    debug!(path = %path.display(), error = %e, "Skipping unreadable file");
                    None
                }
            })
            .collect();

        let mut summary = ScanSummary::default();
        for m in &metrics {
            summary.total_lines += m.lines;
            summary.blank_lines += m.blank_lines;
            summary.comment_lines += m.comment_lines;
            if let Some(lang) = &m.language {
                *summary.languages.entry(lang.clone()).or_default() += 1;
            }
        }
        summary.files = metrics;

        info!(
            files = summary.files.len(),
            lines = summary.total_lines,
            duration = ?start.elapsed(),
            "Source scan complete"
        );
        summary
    }
}

fn file_metrics(root: &Path, path: &Path) -> std::io::Result<FileMetrics> {
    let bytes = std::fs::read(path)?;
    let text = String::from_utf8_lossy(&bytes);
    let lines: Vec<&str> = text.lines().collect();
    let language = detect_language(path);
    let rel = path.strip_prefix(root).unwrap_or(path);

    Ok(FileMetrics {
        path: rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/"),
        lines: lines.len() as u64,
        blank_lines: lines.iter().filter(|l| l.trim().is_empty()).count() as u64,
        comment_lines: count_comment_lines(&lines, language.as_deref()),
        size_bytes: bytes.len() as u64,
        language,
    })
}

pub fn detect_language(path: &Path) -> Option<String> {
    let ext = path.extension()?.to_str()?;
    let lang = match ext {
        "rs" => "rust",
        "py" | "pyi" => "python",
        "ts" | "tsx" => "typescript",
        "js" | "jsx" | "mjs" | "cjs" => "javascript",
        "go" => "go",
        "java" => "java",
        "c" | "h" => "c",
        "cpp" | "cc" | "hpp" => "cpp",
        _ => return None,
    };
    Some(lang.to_string())
}

/// Comment lines for the languages whose syntax is known; zero otherwise.
pub fn count_comment_lines(lines: &[&str], language: Option<&str>) -> u64 {
    match language {
        Some("python") => count_hash_and_docstrings(lines),
        Some("rust" | "typescript" | "javascript" | "go" | "java" | "c" | "cpp") => {
            count_c_style(lines)
        }
        _ => 0,
    }
}

fn count_hash_and_docstrings(lines: &[&str]) -> u64 {
    let mut count = 0;
    let mut in_docstring: Option<&str> = None;
    for line in lines.iter().map(|l| l.trim()) {
        if let Some(quote) = in_docstring {
            count += 1;
            if line.ends_with(quote) {
                in_docstring = None;
            }
            continue;
        }
        if let Some(quote) = ["\"\"\"", "'''"].into_iter().find(|q| line.starts_with(q)) {
            count += 1;
            let closes_same_line = line.len() >= 2 * quote.len() && line.ends_with(quote);
            if !closes_same_line {
                in_docstring = Some(quote);
            }
        } else if line.starts_with('#') {
            count += 1;
        }
    }
    count
}

fn count_c_style(lines: &[&str]) -> u64 {
    let mut count = 0;
    let mut in_block = false;
    for line in lines.iter().map(|l| l.trim()) {
        if in_block {
            count += 1;
            if line.contains("*/") {
                in_block = false;
            }
        } else if line.starts_with("//") {
            count += 1;
        } else if line.starts_with("/*") {
            count += 1;
            in_block = !line.contains("*/");
        }
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_project(dir: &Path) {
        std::fs::create_dir_all(dir.join("src")).unwrap();
        std::fs::create_dir_all(dir.join("node_modules/lib")).unwrap();
        std::fs::write(
            dir.join("src/app.py"),
            "\"\"\"Module doc.\"\"\"\n\n# helper\ndef f():\n    return 1\n",
        )
        .unwrap();
        std::fs::write(
            dir.join("src/ui.ts"),
            "/*\n * header\n */\n// note\nexport const x = 1;\n",
        )
        .unwrap();
        std::fs::write(dir.join("node_modules/lib/index.js"), "// vendored\n").unwrap();
        std::fs::write(dir.join("README.md"), "# readme\n").unwrap();
    }

    #[test]
    fn scan_respects_patterns_and_counts_lines() {
        let dir = tempfile::tempdir().unwrap();
        create_project(dir.path());
        let summary = SourceScanner::new(dir.path(), &AuditSection::default()).scan();

        let paths: Vec<&str> = summary.files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["src/app.py", "src/ui.ts"]);

        let py = &summary.files[0];
        assert_eq!((py.lines, py.blank_lines, py.comment_lines), (5, 1, 2));
        let ts = &summary.files[1];
        assert_eq!((ts.lines, ts.blank_lines, ts.comment_lines), (5, 0, 4));

        assert_eq!(summary.total_lines, 10);
        assert_eq!(summary.languages.get("python"), Some(&1));
        assert_eq!(summary.languages.get("typescript"), Some(&1));
    }

    #[test]
    fn root_level_excluded_dir_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("target")).unwrap();
        std::fs::write(dir.path().join("target/gen.rs"), "fn x() {}\n").unwrap();
        std::fs::write(dir.path().join("lib.rs"), "fn y() {}\n").unwrap();

        let files = SourceScanner::new(dir.path(), &AuditSection::default()).source_files();
        assert_eq!(files, vec![dir.path().join("lib.rs")]);
    }

    #[test]
    fn empty_tree_scans_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(SourceScanner::new(dir.path(), &AuditSection::default()).scan().is_empty());
    }

    #[test]
    fn docstring_spanning_lines() {
        let lines = ["def f():", "    \"\"\"", "    Long doc.", "    \"\"\"", "    pass"];
        assert_eq!(count_comment_lines(&lines, Some("python")), 3);
        assert_eq!(count_comment_lines(&lines, None), 0);
    }
}
