//! Repository history: the change records a run starts from.

use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::{DateTime, TimeZone, Utc};
use similar::{ChangeTag, TextDiff};
use tracing::{debug, info, warn};

use crate::error::{CartographError, HistoryError};
use crate::prompt::truncate;
use crate::types::ChangeRecord;

/// Source of change records for one branch.
#[async_trait::async_trait]
pub trait RepositoryHistory: Send + Sync + std::fmt::Debug {
    /// Changes committed at or after `since`, oldest first.
    async fn list_changes(
        &self,
        since: DateTime<Utc>,
        branch: &str,
    ) -> crate::error::Result<Vec<ChangeRecord>>;

    /// Current head commit id of `branch`.
    async fn head(&self, branch: &str) -> crate::error::Result<String>;
}

// ── Git ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct GitHistory {
    repo_path: PathBuf,
    max_commits: usize,
    diff_preview_bytes: usize,
}

impl GitHistory {
    pub fn new(repo_path: &Path) -> Self {
        Self {
            repo_path: repo_path.to_path_buf(),
            max_commits: 200,
            diff_preview_bytes: 1000,
        }
    }

    #[must_use]
    pub fn with_max_commits(mut self, max_commits: u32) -> Self {
        self.max_commits = if max_commits == 0 {
            usize::MAX
        } else {
            max_commits as usize
        };
        self
    }

    #[must_use]
    pub fn with_diff_preview_bytes(mut self, bytes: usize) -> Self {
        self.diff_preview_bytes = bytes;
        self
    }

    fn open(&self) -> crate::error::Result<gix::Repository> {
        gix::open(&self.repo_path).map_err(|e| git_err(&e))
    }

    fn branch_tip<'r>(
        repo: &'r gix::Repository,
        branch: &str,
    ) -> crate::error::Result<gix::Commit<'r>> {
        let id = repo
            .rev_parse_single(branch)
            .map_err(|_| CartographError::History(HistoryError::UnknownRef(branch.to_string())))?;
        id.object()
            .map_err(|e| git_err(&e))?
            .try_into_commit()
            .map_err(|e| git_err(&e))
    }

    fn to_change_record(
        &self,
        repo: &gix::Repository,
        commit: &gix::Commit<'_>,
        timestamp: DateTime<Utc>,
    ) -> crate::error::Result<ChangeRecord> {
        let author = commit
            .author()
            .map_err(|e| git_err(&format!("bad author encoding: {e}")))?;
        let author = format!("{} <{}>", author.name, author.email);
        let message = commit.message_raw_sloppy().to_string().trim().to_string();

        let diffs = compute_file_diffs(repo, commit)?;
        let mut files = BTreeSet::new();
        let mut additions = 0u64;
        let mut deletions = 0u64;
        let mut preview = String::new();
        for diff in &diffs {
            files.insert(diff.path.clone());
            let stats = line_stats(diff.old.as_deref(), diff.new.as_deref(), &diff.path);
            additions += stats.added;
            deletions += stats.deleted;
            if self.diff_preview_bytes > 0 && !stats.unified.is_empty() {
                let _ = writeln!(
                    preview,
                    "{}",
                    truncate(&stats.unified, self.diff_preview_bytes)
                );
            }
        }

        Ok(ChangeRecord {
            id: commit.id().to_string(),
            author,
            timestamp,
            files,
            additions,
            deletions,
            message,
            diff_summary: (!preview.is_empty()).then_some(preview),
            analysis: None,
        })
    }
}

#[async_trait::async_trait]
impl RepositoryHistory for GitHistory {
    async fn list_changes(
        &self,
        since: DateTime<Utc>,
        branch: &str,
    ) -> crate::error::Result<Vec<ChangeRecord>> {
        let start = Instant::now();
        let repo = self.open()?;
        let tip = Self::branch_tip(&repo, branch)?;

        let walk = tip.ancestors().all().map_err(|e| git_err(&e))?;
        let mut records = Vec::new();
        for info in walk {
            let info = match info {
                Ok(i) => i,
                Err(e) => {
                    warn!("Error walking commit: {e}");
                    continue;
                }
            };
            let commit = repo.find_commit(info.id).map_err(|e| git_err(&e))?;
            let timestamp = commit
                .author()
                .ok()
                .and_then(|sig| sig.time().ok())
                .map_or_else(Utc::now, |t| gix_time_to_chrono(&t));
            if timestamp < since {
                continue;
            }

            records.push(self.to_change_record(&repo, &commit, timestamp)?);
            if records.len() >= self.max_commits {
                debug!(max = self.max_commits, "Reached commit cap");
                break;
            }
        }

        // The walk yields newest first; reverse so ties in author time keep
        // ancestry order under the stable sort.
        records.reverse();
        records.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        info!(
            branch,
            since = %since,
            changes = records.len(),
            duration = ?start.elapsed(),
            "Listed repository changes"
        );
        Ok(records)
    }

    async fn head(&self, branch: &str) -> crate::error::Result<String> {
        let repo = self.open()?;
        Ok(Self::branch_tip(&repo, branch)?.id().to_string())
    }
}

struct FileDiff {
    path: String,
    old: Option<Vec<u8>>,
    new: Option<Vec<u8>>,
}

/// Blob-level changes between a commit and its first parent.
fn compute_file_diffs(
    repo: &gix::Repository,
    commit: &gix::Commit<'_>,
) -> crate::error::Result<Vec<FileDiff>> {
    let tree = commit.tree().map_err(|e| git_err(&e))?;
    let parent_tree = commit
        .parent_ids()
        .next()
        .and_then(|parent_id| parent_id.object().ok()?.try_into_commit().ok()?.tree().ok());
    let base = match parent_tree {
        Some(ref parent) => parent,
        None => &repo.empty_tree(),
    };

    // (path, old blob id, new blob id)
    let mut changed: Vec<(String, Option<gix::ObjectId>, Option<gix::ObjectId>)> = Vec::new();
    let mut platform = base.changes().map_err(|e| git_err(&e))?;
    platform
        .for_each_to_obtain_tree(&tree, |change| {
            use gix::object::tree::diff::Change;
            match change {
                Change::Addition { location, id, .. } => {
                    changed.push((location.to_string(), None, Some(id.detach())));
                }
                Change::Deletion { location, id, .. } => {
                    changed.push((location.to_string(), Some(id.detach()), None));
                }
                Change::Modification {
                    location,
                    previous_id,
                    id,
                    ..
                } => {
                    changed.push((
                        location.to_string(),
                        Some(previous_id.detach()),
                        Some(id.detach()),
                    ));
                }
                Change::Rewrite {
                    location,
                    source_id,
                    id,
                    ..
                } => {
                    changed.push((
                        location.to_string(),
                        Some(source_id.detach()),
                        Some(id.detach()),
                    ));
                }
            }
            Ok::<_, std::convert::Infallible>(std::ops::ControlFlow::Continue(()))
        })
        .map_err(|e| git_err(&format!("diff error: {e}")))?;

    let read_blob = |id: Option<gix::ObjectId>| -> Option<Option<Vec<u8>>> {
        match id {
            None => Some(None),
            Some(id) => {
                let object = repo.find_object(id).ok()?;
                (object.kind == gix::object::Kind::Blob).then(|| Some(object.data.clone()))
            }
        }
    };

    let mut diffs = Vec::with_capacity(changed.len());
    for (path, old_id, new_id) in changed {
        // Tree entries (directories) are not files.
        let (Some(old), Some(new)) = (read_blob(old_id), read_blob(new_id)) else {
            continue;
        };
        if old.is_none() && new.is_none() {
            continue;
        }
        diffs.push(FileDiff { path, old, new });
    }
    Ok(diffs)
}

#[derive(Debug, Default, PartialEq, Eq)]
struct LineStats {
    added: u64,
    deleted: u64,
    unified: String,
}

fn line_stats(old: Option<&[u8]>, new: Option<&[u8]>, path: &str) -> LineStats {
    let is_binary = |b: Option<&[u8]>| b.is_some_and(|b| b.contains(&0));
    if is_binary(old) || is_binary(new) {
        return LineStats::default();
    }
    let old = String::from_utf8_lossy(old.unwrap_or_default());
    let new = String::from_utf8_lossy(new.unwrap_or_default());
    let diff = TextDiff::from_lines(old.as_ref(), new.as_ref());

    let mut stats = LineStats::default();
    for change in diff.iter_all_changes() {
        match change.tag() {
            ChangeTag::Insert => stats.added += 1,
            ChangeTag::Delete => stats.deleted += 1,
            ChangeTag::Equal => {}
        }
    }
    stats.unified = diff
        .unified_diff()
        .context_radius(2)
        .header(&format!("a/{path}"), &format!("b/{path}"))
        .to_string();
    stats
}

fn gix_time_to_chrono(time: &gix::date::Time) -> DateTime<Utc> {
    Utc.timestamp_opt(time.seconds, 0)
        .single()
        .unwrap_or_else(Utc::now)
}

fn git_err(e: &dyn std::fmt::Display) -> CartographError {
    CartographError::History(HistoryError::Git(e.to_string()))
}

// ── Static ──────────────────────────────────────────────────────────

/// Fixed change list, for tests and replaying recorded runs.
#[derive(Debug, Clone, Default)]
pub struct StaticHistory {
    changes: Vec<ChangeRecord>,
    head: Option<String>,
}

impl StaticHistory {
    pub fn new(changes: Vec<ChangeRecord>) -> Self {
        Self {
            changes,
            head: None,
        }
    }

    #[must_use]
    pub fn with_head(mut self, head: impl Into<String>) -> Self {
        self.head = Some(head.into());
        self
    }
}

#[async_trait::async_trait]
impl RepositoryHistory for StaticHistory {
    async fn list_changes(
        &self,
        since: DateTime<Utc>,
        _branch: &str,
    ) -> crate::error::Result<Vec<ChangeRecord>> {
        let mut changes: Vec<ChangeRecord> = self
            .changes
            .iter()
            .filter(|c| c.timestamp >= since)
            .cloned()
            .collect();
        changes.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        Ok(changes)
    }

    async fn head(&self, branch: &str) -> crate::error::Result<String> {
        self.head
            .clone()
            .or_else(|| {
                self.changes
                    .iter()
                    .max_by_key(|c| c.timestamp)
                    .map(|c| c.id.clone())
            })
            .ok_or_else(|| CartographError::History(HistoryError::UnknownRef(branch.to_string())))
    }
}
