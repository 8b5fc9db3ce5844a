use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

use crate::ProjectId;

/// Name of the parsed record inside a project folder
pub const RECORD_FILE: &str = "content.json";
pub const GALLERY_DIR: &str = "image_gallery";

/// The site a project was scraped from. Decides raw content naming and extraction rules.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Source {
    Archdaily,
    Gooood,
}

impl Source {
    /// File name of the raw content inside the project folder
    pub fn raw_content_file(self, id: &ProjectId) -> String {
        match self {
            Source::Archdaily => "content.html".to_string(),
            Source::Gooood => format!("{id}.json"),
        }
    }
}

/// Paths of everything a project owns on disk.
///
/// ```text
/// <root>/<id>/content.html            raw (archdaily)
/// <root>/<id>/<id>.json               raw (gooood)
/// <root>/<id>/content.json            parsed record
/// <root>/<id>/image_gallery/<size>/00000.jpg
/// ```
#[derive(Debug, Clone)]
pub struct ProjectLayout {
    root: PathBuf,
    source: Source,
}

impl ProjectLayout {
    pub fn new(root: impl Into<PathBuf>, source: Source) -> Self {
        Self {
            root: root.into(),
            source,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn source(&self) -> Source {
        self.source
    }

    pub fn project_dir(&self, id: &ProjectId) -> PathBuf {
        self.root.join(id.as_str())
    }

    pub fn raw_content_path(&self, id: &ProjectId) -> PathBuf {
        self.project_dir(id).join(self.source.raw_content_file(id))
    }

    pub fn record_path(&self, id: &ProjectId) -> PathBuf {
        self.project_dir(id).join(RECORD_FILE)
    }

    pub fn gallery_dir(&self, id: &ProjectId, size: &str) -> PathBuf {
        self.project_dir(id).join(GALLERY_DIR).join(size)
    }

    pub fn image_path(&self, id: &ProjectId, size: &str, index: usize) -> PathBuf {
        self.gallery_dir(id, size).join(format!("{index:05}.jpg"))
    }

    /// Lists project folders under the root, ordered by name.
    ///
    /// # Errors
    ///
    /// Errors if the root does not exist or cannot be read.
    pub async fn list_projects(&self) -> Result<Vec<ProjectId>> {
        let mut entries = tokio::fs::read_dir(&self.root)
            .await
            .with_context(|| format!("Projects folder {} is not readable", self.root.display()))?;

        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                ids.push(ProjectId::new(name));
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Number of files in the gallery folder for `size`; zero when the folder is missing.
    pub async fn count_images(&self, id: &ProjectId, size: &str) -> Result<usize> {
        let dir = self.gallery_dir(id, size);
        if !tokio::fs::try_exists(&dir).await? {
            return Ok(0);
        }

        let mut entries = tokio::fs::read_dir(&dir)
            .await
            .with_context(|| format!("Gallery folder {} is not readable", dir.display()))?;
        let mut count = 0;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                count += 1;
            }
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use temp_dir::TempDir;

    #[test]
    fn test_paths_per_source() {
        let id = ProjectId::from("123");
        let archdaily = ProjectLayout::new("/data/projects", Source::Archdaily);
        let gooood = ProjectLayout::new("/data/gooood", Source::Gooood);

        assert_eq!(
            archdaily.raw_content_path(&id),
            PathBuf::from("/data/projects/123/content.html")
        );
        assert_eq!(
            gooood.raw_content_path(&id),
            PathBuf::from("/data/gooood/123/123.json")
        );
        assert_eq!(
            archdaily.image_path(&id, "large", 7),
            PathBuf::from("/data/projects/123/image_gallery/large/00007.jpg")
        );
    }

    #[test_log::test(tokio::test)]
    async fn test_list_projects_sorted_dirs_only() {
        let tempdir = TempDir::new().unwrap();
        for id in ["30", "10", "20"] {
            std::fs::create_dir(tempdir.child(id)).unwrap();
        }
        std::fs::write(tempdir.child("notes.txt"), "not a project").unwrap();

        let layout = ProjectLayout::new(tempdir.path(), Source::Archdaily);
        let ids = layout.list_projects().await.unwrap();

        assert_eq!(
            ids,
            vec![ProjectId::from("10"), ProjectId::from("20"), ProjectId::from("30")]
        );
    }

    #[test_log::test(tokio::test)]
    async fn test_count_images_missing_dir_is_zero() {
        let tempdir = TempDir::new().unwrap();
        let layout = ProjectLayout::new(tempdir.path(), Source::Archdaily);
        let id = ProjectId::from("1");

        assert_eq!(layout.count_images(&id, "large").await.unwrap(), 0);

        let dir = layout.gallery_dir(&id, "large");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("00000.jpg"), b"jpg").unwrap();
        std::fs::write(dir.join("00001.jpg"), b"jpg").unwrap();
        assert_eq!(layout.count_images(&id, "large").await.unwrap(), 2);
    }
}
