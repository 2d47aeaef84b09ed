// Filesystem-backed graph store.
//
// Layout under the store root:
//   graph_v<N>.json        immutable archive of version N
//   knowledge_graph.json   copy of the highest version successfully written
//
// The archive is written before the current pointer, each via temp file and
// rename, so a crash never leaves a half-written artifact under a real name.

use std::io::Write as _;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::StoreError;

use super::{GraphSnapshot, GraphStore};

pub const CURRENT_FILE: &str = "knowledge_graph.json";

pub fn archive_file_name(version: u64) -> String {
    format!("graph_v{version}.json")
}

/// Parse `graph_v<positive integer>.json`; anything else is not an archive.
pub fn parse_archive_file_name(name: &str) -> Option<u64> {
    let digits = name.strip_prefix("graph_v")?.strip_suffix(".json")?;
    if digits.is_empty() || digits.starts_with('0') || !digits.bytes().all(|b| b.is_ascii_digit())
    {
        return None;
    }
    digits.parse().ok()
}

#[derive(Debug)]
pub struct FsGraphStore {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl FsGraphStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

fn scan_versions(root: &Path) -> Result<Vec<u64>, StoreError> {
    let entries = match std::fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut versions = Vec::new();
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name();
        match name.to_str().and_then(parse_archive_file_name) {
            Some(v) => versions.push(v),
            None => debug!(file = ?name, "Skipping non-archive file in graph store"),
        }
    }
    versions.sort_unstable();
    Ok(versions)
}

fn read_snapshot(path: &Path) -> Result<GraphSnapshot, StoreError> {
    let bytes = std::fs::read(path)?;
    serde_json::from_slice(&bytes).map_err(|e| StoreError::Corrupt {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}

/// Next version number, stamped and written as archive then current pointer.
fn write_next_version(root: &Path, snapshot: &GraphSnapshot) -> Result<GraphSnapshot, StoreError> {
    std::fs::create_dir_all(root)?;
    let version = scan_versions(root)?.last().map_or(1, |v| v + 1);
    let mut stamped = snapshot.clone();
    stamped.version = version;
    stamped.timestamp = Utc::now();
    let bytes = serde_json::to_vec_pretty(&stamped)?;

    write_atomic(&root.join(archive_file_name(version)), &bytes)?;
    write_atomic(&root.join(CURRENT_FILE), &bytes)?;
    Ok(stamped)
}

/// Run filesystem work off the async executor.
async fn blocking<T, F>(f: F) -> Result<T, StoreError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, StoreError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StoreError::Io(std::io::Error::other(e)))?
}

#[async_trait::async_trait]
impl GraphStore for FsGraphStore {
    async fn save(&self, snapshot: &GraphSnapshot) -> crate::error::Result<u64> {
        let _guard = self.write_lock.lock().await;
        let root = self.root.clone();
        let snapshot = snapshot.clone();
        let stamped = blocking(move || write_next_version(&root, &snapshot)).await?;

        info!(
            version = stamped.version,
            nodes = stamped.nodes.len(),
            edges = stamped.edges.len(),
            root = %self.root.display(),
            "Saved knowledge graph snapshot"
        );
        Ok(stamped.version)
    }

    async fn load(&self) -> crate::error::Result<Option<GraphSnapshot>> {
        let path = self.root.join(CURRENT_FILE);
        let snapshot = blocking(move || {
            if !path.exists() {
                return Ok(None);
            }
            read_snapshot(&path).map(Some)
        })
        .await?;
        Ok(snapshot)
    }

    async fn load_version(&self, version: u64) -> crate::error::Result<GraphSnapshot> {
        let path = self.root.join(archive_file_name(version));
        let snapshot = blocking(move || {
            if !path.is_file() {
                return Err(StoreError::VersionNotFound(version));
            }
            read_snapshot(&path)
        })
        .await?;
        Ok(snapshot)
    }

    async fn versions(&self) -> crate::error::Result<Vec<u64>> {
        let root = self.root.clone();
        Ok(blocking(move || scan_versions(&root)).await?)
    }
}

/// Write `bytes` to `path` through a sibling temp file and rename.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = dir.join(format!(".{name}.{}.tmp", uuid::Uuid::new_v4().simple()));

    if let Err(e) = write_then_rename(&tmp, path, bytes) {
        let _ = std::fs::remove_file(&tmp);
        return Err(StoreError::Io(e));
    }
    Ok(())
}

fn write_then_rename(tmp: &Path, path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = std::fs::File::create(tmp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    std::fs::rename(tmp, path)
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CartographError;
    use cartograph_graph::{KnowledgeGraph, KnowledgeGraphNode, NodeType};
    use proptest::prelude::*;

    fn snapshot(ids: &[(&str, &[&str])]) -> GraphSnapshot {
        GraphSnapshot::from_graph(KnowledgeGraph::from_nodes(
            ids.iter()
                .map(|(id, deps)| {
                    KnowledgeGraphNode::new(*id, NodeType::Module).with_dependencies(deps.iter().copied())
                })
                .collect(),
        ))
    }

    #[test]
    fn archive_name_parsing_is_strict() {
        assert_eq!(parse_archive_file_name("graph_v1.json"), Some(1));
        assert_eq!(parse_archive_file_name("graph_v42.json"), Some(42));
        for bad in [
            "graph_v0.json",
            "graph_v01.json",
            "graph_v.json",
            "graph_vx.json",
            "graph_v-3.json",
            "graph_v3.json.bak",
            "graph_v+3.json",
            "knowledge_graph.json",
            "graph_v99999999999999999999999.json",
        ] {
            assert_eq!(parse_archive_file_name(bad), None, "{bad}");
        }
    }

    #[tokio::test]
    async fn empty_store_has_no_current_or_versions() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsGraphStore::new(dir.path().join("missing"));
        assert!(store.load().await.unwrap().is_none());
        assert!(store.versions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn load_after_save_matches_except_stamp() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsGraphStore::new(dir.path());
        let snap = snapshot(&[("api", &["db"]), ("db", &[])])
            .with_metadata("source", serde_json::json!("test"));

        let version = store.save(&snap).await.unwrap();
        assert_eq!(version, 1);

        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded.version, 1);
        assert!(loaded.same_content(&snap));
        assert_eq!(store.load_version(1).await.unwrap(), loaded);
    }

    #[tokio::test]
    async fn sequential_saves_number_from_one() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsGraphStore::new(dir.path());
        let mut got = Vec::new();
        for i in 0..4 {
            let id = format!("n{i}");
            got.push(store.save(&snapshot(&[(id.as_str(), &[])])).await.unwrap());
        }
        assert_eq!(got, vec![1, 2, 3, 4]);
        assert_eq!(store.versions().await.unwrap(), vec![1, 2, 3, 4]);
        assert_eq!(store.load().await.unwrap().unwrap().version, 4);
    }

    #[tokio::test]
    async fn version_scan_skips_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        for junk in ["graph_vX.json", "graph_v0.json", "notes.txt", "graph_v7.json.bak"] {
            std::fs::write(dir.path().join(junk), "{}").unwrap();
        }
        let store = FsGraphStore::new(dir.path());
        assert!(store.versions().await.unwrap().is_empty());
        assert_eq!(store.save(&snapshot(&[])).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn diff_same_version_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsGraphStore::new(dir.path());
        let v = store.save(&snapshot(&[("a", &["b"]), ("b", &[])])).await.unwrap();
        let delta = store.diff(v, v).await.unwrap();
        assert!(delta.is_empty());
        assert_eq!(delta.total_changes, 0);
    }

    #[tokio::test]
    async fn diff_reports_changes_between_versions() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsGraphStore::new(dir.path());
        let v1 = store
            .save(&snapshot(&[("a", &[]), ("b", &[]), ("c", &[])]))
            .await
            .unwrap();
        let v2 = store
            .save(&snapshot(&[("a", &[]), ("c", &["a"]), ("d", &[])]))
            .await
            .unwrap();

        let delta = store.diff(v1, v2).await.unwrap();
        assert_eq!(delta.added_ids(), vec!["d"]);
        assert_eq!(delta.removed_ids(), vec!["b"]);
        // `a` gains a dependent and `c` gains a dependency.
        assert_eq!(delta.modified_ids(), vec!["a", "c"]);
        assert_eq!(delta.total_changes, 4);
        assert_eq!((delta.from_version, delta.to_version), (1, 2));
    }

    #[tokio::test]
    async fn diff_with_missing_version_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsGraphStore::new(dir.path());
        store.save(&snapshot(&[])).await.unwrap();
        let err = store.diff(1, 9).await.unwrap_err();
        assert!(matches!(
            err,
            CartographError::Store(StoreError::VersionNotFound(9))
        ));
    }

    #[tokio::test]
    async fn corrupt_current_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CURRENT_FILE), "{ nope").unwrap();
        let store = FsGraphStore::new(dir.path());
        assert!(matches!(
            store.load().await.unwrap_err(),
            CartographError::Store(StoreError::Corrupt { .. })
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failed_archive_write_consumes_no_version() {
        let dir = tempfile::tempdir().unwrap();
        // A directory squatting on the archive name makes the rename fail.
        std::fs::create_dir(dir.path().join(archive_file_name(1))).unwrap();
        let store = FsGraphStore::new(dir.path());

        assert!(store.save(&snapshot(&[("a", &[])])).await.is_err());
        assert!(store.load().await.unwrap().is_none());
        assert!(store.versions().await.unwrap().is_empty());

        std::fs::remove_dir(dir.path().join(archive_file_name(1))).unwrap();
        assert_eq!(store.save(&snapshot(&[("a", &[])])).await.unwrap(), 1);

        // No temp files left behind.
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_saves_get_distinct_versions() {
        let dir = tempfile::tempdir().unwrap();
        let store = std::sync::Arc::new(FsGraphStore::new(dir.path()));

        let mut handles = Vec::new();
        for i in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let id = format!("node{i}");
                store.save(&snapshot(&[(id.as_str(), &[])])).await.unwrap()
            }));
        }
        let mut versions = Vec::new();
        for handle in handles {
            versions.push(handle.await.unwrap());
        }
        versions.sort_unstable();
        assert_eq!(versions, (1..=8).collect::<Vec<u64>>());
        assert_eq!(store.versions().await.unwrap(), versions);
        assert_eq!(store.load().await.unwrap().unwrap().version, 8);
    }

    fn arb_ids() -> impl Strategy<Value = Vec<String>> {
        proptest::collection::btree_set("[a-e]", 0..5).prop_map(|s| s.into_iter().collect())
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn stored_diffs_are_antisymmetric(a in arb_ids(), b in arb_ids()) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            rt.block_on(async {
                let dir = tempfile::tempdir().unwrap();
                let store = FsGraphStore::new(dir.path());
                let to_snapshot = |ids: &[String]| GraphSnapshot::from_graph(KnowledgeGraph::from_nodes(
                    ids.iter().map(|id| KnowledgeGraphNode::new(id.clone(), NodeType::Module)).collect(),
                ));
                let va = store.save(&to_snapshot(&a)).await.unwrap();
                let vb = store.save(&to_snapshot(&b)).await.unwrap();
                prop_assert_eq!((va, vb), (1, 2));

                let ab = store.diff(va, vb).await.unwrap();
                let ba = store.diff(vb, va).await.unwrap();
                prop_assert_eq!(ab.added_ids(), ba.removed_ids());
                prop_assert_eq!(ab.removed_ids(), ba.added_ids());
                Ok(())
            })?;
        }
    }
}
