use anyhow::{Context, Result};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

const SKIP_LIST_FILE: &str = "skiplist.json";

/// Persisted set of remote paths confirmed absent for the current sweep.
///
/// The set only grows within a sweep and is cleared as a whole when the sweep
/// completes. The backing file is private to one device's worker.
#[derive(Debug)]
pub struct SkipList {
    path: PathBuf,
    entries: HashSet<String>,
}

impl SkipList {
    /// Load the skip list from the device's download folder. A missing or
    /// corrupt backing file is an empty set, never fatal.
    pub fn load(download_folder: &Path) -> Self {
        let path = download_folder.join(SKIP_LIST_FILE);
        let entries = match fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str::<Vec<String>>(&raw) {
                Ok(list) => list.into_iter().collect(),
                Err(err) => {
                    tracing::warn!(path=%path.display(), error=%err, "corrupt skip list; starting empty");
                    HashSet::new()
                }
            },
            Err(_) => HashSet::new(),
        };
        Self { path, entries }
    }

    pub fn contains(&self, remote_path: &str) -> bool {
        self.entries.contains(remote_path)
    }

    pub fn insert(&mut self, remote_path: String) -> bool {
        self.entries.insert(remote_path)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Rewrite the backing file, tmp + rename so a crash never leaves a torn
    /// artifact behind.
    pub fn persist(&self) -> Result<()> {
        let mut list: Vec<&String> = self.entries.iter().collect();
        list.sort();
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(&list)?)
            .with_context(|| format!("write {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("rename {}", self.path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_is_empty_set() {
        let dir = TempDir::new().unwrap();
        let list = SkipList::load(dir.path());
        assert_eq!(list.len(), 0);
    }

    #[test]
    fn corrupt_file_is_empty_set() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(SKIP_LIST_FILE), b"{not json").unwrap();
        let list = SkipList::load(dir.path());
        assert_eq!(list.len(), 0);
    }

    #[test]
    fn persist_and_reload_round_trip() {
        let dir = TempDir::new().unwrap();
        let mut list = SkipList::load(dir.path());
        assert!(list.insert("/20250319/KOA_250319_1406_20.dat".to_string()));
        assert!(!list.insert("/20250319/KOA_250319_1406_20.dat".to_string()));
        list.insert("/20250319/KOA_250319_1404_20.dat".to_string());
        list.persist().unwrap();

        let reloaded = SkipList::load(dir.path());
        assert_eq!(reloaded.len(), 2);
        assert!(reloaded.contains("/20250319/KOA_250319_1406_20.dat"));
    }

    #[test]
    fn clear_then_persist_empties_backing_file() {
        let dir = TempDir::new().unwrap();
        let mut list = SkipList::load(dir.path());
        list.insert("/20250319/KOA_250319_1406_20.dat".to_string());
        list.persist().unwrap();
        list.clear();
        list.persist().unwrap();

        let reloaded = SkipList::load(dir.path());
        assert_eq!(reloaded.len(), 0);
    }
}
