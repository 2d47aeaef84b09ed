//! Documentation sink: where the documentation stage writes its files.
//!
//! Writes are confined to one root directory. Human-maintained sections
//! fenced by `<!-- cartograph:preserve -->` and `<!-- /cartograph:preserve -->`
//! survive regeneration of the surrounding file.

use std::path::{Component, Path, PathBuf};

use chrono::Local;
use tracing::{debug, info, warn};

use crate::error::DocsError;
use crate::store::fs::write_atomic;
use crate::types::UpdateMode;

pub const INDEX_FILE: &str = "index.md";

const PRESERVE_OPEN: &str = "<!-- cartograph:preserve -->";
const PRESERVE_CLOSE: &str = "<!-- /cartograph:preserve -->";

#[async_trait::async_trait]
pub trait DocumentationSink: Send + Sync + std::fmt::Debug {
    /// Write one document below the sink root. Returns the absolute path written.
    async fn write(
        &self,
        relative_path: &str,
        content: &str,
        mode: UpdateMode,
    ) -> crate::error::Result<PathBuf>;

    /// Rebuild `index.md` from the documents currently present.
    async fn regenerate_index(&self) -> crate::error::Result<PathBuf>;

    /// Documents below the root, relative and sorted, excluding indexes.
    async fn documents(&self) -> crate::error::Result<Vec<String>>;
}

#[derive(Debug, Clone)]
pub struct FsDocumentationSink {
    root: PathBuf,
}

impl FsDocumentationSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, relative_path: &str) -> Result<PathBuf, DocsError> {
        let rel = Path::new(relative_path);
        let invalid = || DocsError::InvalidPath(relative_path.to_string());
        if relative_path.trim().is_empty() {
            return Err(invalid());
        }
        for component in rel.components() {
            match component {
                Component::Normal(_) | Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(invalid());
                }
            }
        }
        if rel.file_name().is_none() {
            return Err(invalid());
        }
        Ok(self.root.join(rel))
    }

    fn markdown_files(&self) -> Result<Vec<String>, DocsError> {
        if !self.root.is_dir() {
            return Ok(Vec::new());
        }
        let pattern = format!(
            "{}/**/*.md",
            glob::Pattern::escape(&self.root.to_string_lossy())
        );
        let paths = glob::glob(&pattern)
            .map_err(|e| DocsError::InvalidPath(format!("{pattern}: {e}")))?;

        let mut docs: Vec<String> = paths
            .flatten()
            .filter(|p| p.is_file())
            .filter(|p| p.file_name().is_some_and(|n| n != INDEX_FILE))
            .filter_map(|p| {
                let rel = p.strip_prefix(&self.root).ok()?;
                Some(
                    rel.components()
                        .map(|c| c.as_os_str().to_string_lossy().into_owned())
                        .collect::<Vec<_>>()
                        .join("/"),
                )
            })
            .collect();
        docs.sort();
        Ok(docs)
    }
}

#[async_trait::async_trait]
impl DocumentationSink for FsDocumentationSink {
    async fn write(
        &self,
        relative_path: &str,
        content: &str,
        mode: UpdateMode,
    ) -> crate::error::Result<PathBuf> {
        let target = self.resolve(relative_path)?;
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(DocsError::Io)?;
        }

        let body = if target.is_file() {
            match mode {
                UpdateMode::Create => {
                    let backup = backup_path(&target);
                    std::fs::rename(&target, &backup).map_err(DocsError::Io)?;
                    info!(
                        path = %target.display(),
                        backup = %backup.display(),
                        "Backed up existing document"
                    );
                    content.to_string()
                }
                UpdateMode::Update => {
                    let existing = std::fs::read_to_string(&target).map_err(DocsError::Io)?;
                    merge_with_preserve(&existing, content)
                }
            }
        } else {
            content.to_string()
        };

        write_atomic(&target, body.as_bytes()).map_err(|e| {
            warn!(path = %target.display(), error = %e, "Document write failed");
            e
        })?;
        debug!(path = %target.display(), mode = ?mode, bytes = body.len(), "Wrote document");
        Ok(target)
    }

    async fn regenerate_index(&self) -> crate::error::Result<PathBuf> {
        let docs = self.markdown_files()?;
        let index = render_index(&docs);
        let path = self.write(INDEX_FILE, &index, UpdateMode::Update).await?;
        info!(documents = docs.len(), "Regenerated documentation index");
        Ok(path)
    }

    async fn documents(&self) -> crate::error::Result<Vec<String>> {
        Ok(self.markdown_files()?)
    }
}

fn render_index(docs: &[String]) -> String {
    let mut out = String::from("# Documentation Index\n\n");
    for rel in docs {
        let stem = Path::new(rel)
            .file_stem()
            .map_or_else(|| rel.clone(), |s| s.to_string_lossy().into_owned());
        out.push_str(&format!("- [{stem}]({rel})\n"));
    }
    out
}

/// `<dir>/<stem>.<YYYYmmdd_HHMMSS>.bak`, with a counter if that name is taken.
fn backup_path(target: &Path) -> PathBuf {
    let stem = target
        .file_stem()
        .map_or_else(String::new, |s| s.to_string_lossy().into_owned());
    let stamp = Local::now().format("%Y%m%d_%H%M%S");
    let dir = target.parent().unwrap_or_else(|| Path::new("."));

    let mut candidate = dir.join(format!("{stem}.{stamp}.bak"));
    let mut n = 1;
    while candidate.exists() {
        candidate = dir.join(format!("{stem}.{stamp}_{n}.bak"));
        n += 1;
    }
    candidate
}

/// Carry preserved blocks from `existing` into `fresh`.
///
/// Each block is re-inserted under the heading it followed in the old file,
/// or appended when that heading is gone. Blocks already present verbatim in
/// `fresh` are left alone.
pub fn merge_with_preserve(existing: &str, fresh: &str) -> String {
    let blocks = preserved_blocks(existing);
    if blocks.is_empty() {
        return fresh.to_string();
    }

    let mut merged = fresh.to_string();
    for block in blocks {
        if merged.contains(block.body.trim_end()) {
            continue;
        }
        let anchor = block
            .heading
            .as_deref()
            .and_then(|h| find_line(&merged, h))
            .and_then(|pos| merged[pos..].find('\n').map(|nl| pos + nl + 1));
        match anchor {
            Some(at) => merged.insert_str(at, &block.body),
            None => {
                if !merged.is_empty() && !merged.ends_with('\n') {
                    merged.push('\n');
                }
                merged.push('\n');
                merged.push_str(&block.body);
            }
        }
    }
    merged
}

struct PreservedBlock {
    heading: Option<String>,
    body: String,
}

fn preserved_blocks(text: &str) -> Vec<PreservedBlock> {
    let mut blocks = Vec::new();
    let mut heading: Option<String> = None;
    let mut open: Option<String> = None;

    for line in text.lines() {
        let trimmed = line.trim();
        if let Some(body) = open.as_mut() {
            body.push_str(line);
            body.push('\n');
            if trimmed == PRESERVE_CLOSE {
                blocks.push(PreservedBlock {
                    heading: heading.clone(),
                    body: open.take().unwrap_or_default(),
                });
            }
            continue;
        }
        if trimmed == PRESERVE_OPEN {
            open = Some(format!("{line}\n"));
        } else if trimmed.starts_with('#') {
            heading = Some(trimmed.to_string());
        }
    }
    if open.is_some() {
        warn!("Unterminated preserve block dropped");
    }
    blocks
}

/// Byte offset of the first line equal to `needle` (ignoring surrounding whitespace).
fn find_line(text: &str, needle: &str) -> Option<usize> {
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        if line.trim() == needle {
            return Some(offset);
        }
        offset += line.len();
    }
    None
}
