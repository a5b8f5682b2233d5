//! Snapshot persistence
//!
//! Each node keeps three JSON documents under
//! `<data_dir>/querynodes/<host_id>/pqueries/`:
//!
//! - `pqinfo.json`: search-node usage map
//! - `aggsinfo.json`: aggregation usage map
//! - `groupinfo.json`: group-by override map
//!
//! Writes go to a unique temp file in the same directory and are renamed
//! into place, so readers (including peers on shared storage) only ever see
//! complete documents.

use crate::error::PersistError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// Search-node usage snapshot
pub const PQINFO_FILE: &str = "pqinfo.json";
/// Aggregation usage snapshot
pub const AGGSINFO_FILE: &str = "aggsinfo.json";
/// Group-by override snapshot
pub const GROUPINFO_FILE: &str = "groupinfo.json";

/// Directory holding one node directory per host
pub const NODES_DIR: &str = "querynodes";
/// Per-node subdirectory holding the snapshots
pub const PQUERIES_DIR: &str = "pqueries";

static TEMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// Which snapshot a file holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotKind {
    /// Search-node usage
    Search,
    /// Aggregation usage
    Aggs,
    /// Group-by overrides
    GroupBy,
}

impl SnapshotKind {
    /// File name of this snapshot
    pub fn file_name(&self) -> &'static str {
        match self {
            SnapshotKind::Search => PQINFO_FILE,
            SnapshotKind::Aggs => AGGSINFO_FILE,
            SnapshotKind::GroupBy => GROUPINFO_FILE,
        }
    }

    /// Label for logs and metrics
    pub fn label(&self) -> &'static str {
        match self {
            SnapshotKind::Search => "search",
            SnapshotKind::Aggs => "aggs",
            SnapshotKind::GroupBy => "groupby",
        }
    }
}

/// Serialize `value` and atomically replace `path`
pub fn write_json<T: Serialize>(path: &Path, value: &T, kind: SnapshotKind) -> Result<(), PersistError> {
    let contents = serde_json::to_vec(value).map_err(|e| PersistError::Serialize {
        kind: kind.label(),
        reason: e.to_string(),
    })?;

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir).map_err(|source| PersistError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let temp_path = dir.join(format!(
        ".{}.{}.{}.tmp",
        kind.file_name(),
        std::process::id(),
        TEMP_SEQ.fetch_add(1, Ordering::Relaxed)
    ));

    fs::write(&temp_path, contents).map_err(|source| PersistError::Io {
        path: temp_path.clone(),
        source,
    })?;

    // Rename is atomic on POSIX systems - last writer wins
    if let Err(source) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(PersistError::Io {
            path: path.to_path_buf(),
            source,
        });
    }
    Ok(())
}

/// Read and parse `path`; a missing file is `Ok(None)`
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, PersistError> {
    let contents = match fs::read(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(PersistError::Io {
                path: path.to_path_buf(),
                source,
            })
        },
    };
    serde_json::from_slice(&contents)
        .map(Some)
        .map_err(|e| PersistError::Parse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
}

/// Load a snapshot, falling back to empty
///
/// A missing file is not an error. An unreadable or unparseable file is
/// logged and treated as empty.
pub fn load_or_default<T: DeserializeOwned + Default>(path: &Path, kind: SnapshotKind) -> T {
    match read_json(path) {
        Ok(Some(value)) => value,
        Ok(None) => {
            tracing::debug!(path = %path.display(), kind = kind.label(), "No snapshot on disk, starting empty");
            T::default()
        },
        Err(e) => {
            tracing::error!(error = %e, kind = kind.label(), "Discarding unreadable snapshot");
            T::default()
        },
    }
}

/// Node that wrote a snapshot at `.../querynodes/<node>/pqueries/<file>`
///
/// Falls back to the full path for files outside that layout.
pub fn node_id_from_path(path: &Path) -> String {
    path.parent()
        .filter(|p| p.file_name().is_some_and(|n| n == PQUERIES_DIR))
        .and_then(Path::parent)
        .and_then(Path::file_name)
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Snapshot files of every node but `own_host` under `data_dir`
pub fn peer_snapshot_files(data_dir: &Path, own_host: &str, kind: SnapshotKind) -> Vec<PathBuf> {
    let nodes_dir = data_dir.join(NODES_DIR);
    let entries = match fs::read_dir(&nodes_dir) {
        Ok(entries) => entries,
        Err(e) => {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %nodes_dir.display(), error = %e, "Cannot list peer nodes");
            }
            return Vec::new();
        },
    };

    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_name() != own_host)
        .map(|entry| entry.path().join(PQUERIES_DIR).join(kind.file_name()))
        .filter(|path| path.is_file())
        .collect();
    files.sort();
    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    #[test]
    fn test_write_then_read() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a/b").join(PQINFO_FILE);
        let mut map = BTreeMap::new();
        map.insert("1".to_string(), 5u32);

        write_json(&path, &map, SnapshotKind::Search).unwrap();
        let back: Option<BTreeMap<String, u32>> = read_json(&path).unwrap();
        assert_eq!(back, Some(map));

        // no temp files left behind
        let leftovers = fs::read_dir(path.parent().unwrap()).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[test]
    fn test_missing_is_none() {
        let dir = TempDir::new().unwrap();
        let back: Option<BTreeMap<String, u32>> = read_json(&dir.path().join("nope.json")).unwrap();
        assert!(back.is_none());
    }

    #[test]
    fn test_garbage_loads_as_default() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(AGGSINFO_FILE);
        fs::write(&path, b"{not json").unwrap();

        assert!(matches!(
            read_json::<BTreeMap<String, u32>>(&path),
            Err(PersistError::Parse { .. })
        ));
        let map: BTreeMap<String, u32> = load_or_default(&path, SnapshotKind::Aggs);
        assert!(map.is_empty());
    }

    #[test]
    fn test_node_id_from_path() {
        let p = Path::new("/data/querynodes/qn-2/pqueries/pqinfo.json");
        assert_eq!(node_id_from_path(p), "qn-2");
        let loose = Path::new("/tmp/pqinfo.json");
        assert_eq!(node_id_from_path(loose), "/tmp/pqinfo.json");
    }

    #[test]
    fn test_peer_files_exclude_self() {
        let dir = TempDir::new().unwrap();
        for host in ["me", "peer-a", "peer-b"] {
            let p = dir
                .path()
                .join(NODES_DIR)
                .join(host)
                .join(PQUERIES_DIR)
                .join(PQINFO_FILE);
            write_json(&p, &BTreeMap::<String, u32>::new(), SnapshotKind::Search).unwrap();
        }
        // peer without an aggs snapshot is skipped for that kind
        let files = peer_snapshot_files(dir.path(), "me", SnapshotKind::Search);
        assert_eq!(files.len(), 2);
        assert!(files.iter().all(|f| node_id_from_path(f) != "me"));
        assert!(peer_snapshot_files(dir.path(), "me", SnapshotKind::Aggs).is_empty());
    }
}
