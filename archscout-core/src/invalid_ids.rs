use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use anyhow::{Context as _, Result};

use crate::ProjectId;

/// Ids the source answered 404 for. Persisted as a JSON array of strings.
///
/// Only grows. Saves are explicit and periodic, concurrent savers simply race with
/// last-writer-wins, which loses nothing as every snapshot is a superset of older ones.
#[derive(Debug, Clone)]
pub struct InvalidIds {
    path: PathBuf,
    ids: Arc<RwLock<BTreeSet<String>>>,
}

impl InvalidIds {
    /// Empty set that saves to `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ids: Arc::default(),
        }
    }

    /// Loads the set from disk. A missing file is an empty set, a corrupt one is logged and
    /// treated as empty.
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let ids = if tokio::fs::try_exists(&path).await? {
            let raw = fs_err::tokio::read_to_string(&path).await?;
            match serde_json::from_str::<BTreeSet<String>>(&raw) {
                Ok(ids) => ids,
                Err(error) => {
                    tracing::warn!(path = %path.display(), %error, "Invalid id file is corrupt, starting empty");
                    BTreeSet::new()
                }
            }
        } else {
            BTreeSet::new()
        };

        tracing::info!(path = %path.display(), count = ids.len(), "Loaded invalid project ids");
        Ok(Self {
            path,
            ids: Arc::new(RwLock::new(ids)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn contains(&self, id: &ProjectId) -> bool {
        self.ids
            .read()
            .is_ok_and(|ids| ids.contains(id.as_str()))
    }

    /// Returns true if the id was not yet known
    pub fn insert(&self, id: &ProjectId) -> bool {
        self.ids
            .write()
            .is_ok_and(|mut ids| ids.insert(id.as_str().to_string()))
    }

    pub fn len(&self) -> usize {
        self.ids.read().map_or(0, |ids| ids.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Writes a snapshot of the set to disk, creating parent folders as needed.
    pub async fn save(&self) -> Result<()> {
        let snapshot: Vec<String> = self
            .ids
            .read()
            .map_err(|_| anyhow::anyhow!("Invalid id set lock poisoned"))?
            .iter()
            .cloned()
            .collect();

        if let Some(parent) = self.path.parent() {
            fs_err::tokio::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string_pretty(&snapshot)?;
        fs_err::tokio::write(&self.path, json)
            .await
            .with_context(|| format!("Failed to save invalid ids to {}", self.path.display()))?;

        tracing::debug!(count = snapshot.len(), "Saved invalid project ids");
        Ok(())
    }
}

/// How many processed items pass between two saves of the invalid-id set
pub fn saving_gap(total: usize) -> usize {
    (total / 20).max(100)
}

#[cfg(test)]
mod tests {
    use super::*;
    use temp_dir::TempDir;
    use test_case::test_case;

    #[test_log::test(tokio::test)]
    async fn test_roundtrip_through_disk() {
        let tempdir = TempDir::new().unwrap();
        let path = tempdir.child("results/invalid_project_ids.json");

        let ids = InvalidIds::load(&path).await.unwrap();
        assert!(ids.is_empty());
        assert!(ids.insert(&"42".into()));
        assert!(!ids.insert(&"42".into()));
        ids.save().await.unwrap();

        let reloaded = InvalidIds::load(&path).await.unwrap();
        assert!(reloaded.contains(&"42".into()));
        assert_eq!(reloaded.len(), 1);
    }

    #[test_log::test(tokio::test)]
    async fn test_corrupt_file_is_empty() {
        let tempdir = TempDir::new().unwrap();
        let path = tempdir.child("invalid.json");
        std::fs::write(&path, "{not json").unwrap();

        let ids = InvalidIds::load(&path).await.unwrap();
        assert!(ids.is_empty());
    }

    #[test_case(0, 100; "small batches save every 100")]
    #[test_case(1_999, 100; "just under the threshold")]
    #[test_case(10_000, 500; "large batches save every twentieth")]
    fn test_saving_gap(total: usize, expected: usize) {
        assert_eq!(saving_gap(total), expected);
    }
}
