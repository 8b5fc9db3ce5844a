//! User settings, loaded once at startup and handed to every component.
//!
//! Settings live in a json file next to the working directory. Every key is optional,
//! anything missing falls back to the defaults below. Saving is always explicit.
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use derive_builder::Builder;
use secrecy::{ExposeSecret as _, SecretString};
use serde::{Deserialize, Serialize, Serializer};

use crate::errors::SettingsError;
use crate::layout::{ProjectLayout, Source};

pub const DEFAULT_SETTINGS_PATH: &str = "./user_settings.json";

const ARCHDAILY_BASE_URL: &str = "https://www.archdaily.com/";
const GOOOOD_BASE_URL: &str = "https://dashboard.gooood.cn/api/wp/v2/fetch-posts?page=<page>&per_page=18&post_type%5B0%5D=post&post_type%5B1%5D=jobs";
const DASHSCOPE_API_BASE: &str = "https://dashscope.aliyuncs.com/compatible-mode/v1";
const LOCAL_API_BASE: &str = "http://localhost:8000/v1";

/// Worker counts per stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageConcurrency {
    pub fetch: usize,
    pub parse: usize,
    pub download: usize,
    pub upload: usize,
    pub scan: usize,
}

impl Default for StageConcurrency {
    fn default() -> Self {
        Self {
            fetch: 32,
            parse: 64,
            download: 16,
            upload: 16,
            scan: num_cpus::get(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Builder)]
#[builder(default, setter(into))]
#[serde(default)]
pub struct Settings {
    /// Site root, project pages live at `<base_url><id>`
    pub archdaily_base_url: String,
    pub projects_dir: PathBuf,
    pub invalid_project_ids_path: PathBuf,
    /// Browser-like headers sent with every scrape request
    pub headers: BTreeMap<String, String>,
    /// Paragraphs equal to one of these are site chrome, not content
    pub ignore_keywords: BTreeSet<String>,

    pub gooood_base_url: String,
    pub gooood_results_dir: PathBuf,
    pub gooood_projects_dir: PathBuf,

    pub mongodb_uri: String,
    pub mongodb_archdaily_db_name: String,
    pub mongodb_gooood_db_name: String,
    pub vector_index_name: String,

    #[serde(serialize_with = "expose_keys")]
    pub api_keys: Vec<SecretString>,
    pub model_api_base: String,
    pub embed_model: String,
    pub chat_model: String,
    /// Embedding dimensions requested from the remote model
    pub embed_dimensions: Option<u32>,
    pub local_model_api_base: String,
    pub local_embed_model: String,

    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub embed_attempts: usize,
    /// Minimum spacing between two requests made with the same API key
    pub min_request_interval_ms: u64,
    pub request_timeout_secs: u64,
    /// Upper bound of the random pause after each image request
    pub politeness_delay_ms: u64,
    pub gallery_size: String,
    pub concurrency: StageConcurrency,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            archdaily_base_url: ARCHDAILY_BASE_URL.to_string(),
            projects_dir: "./results/projects".into(),
            invalid_project_ids_path: "./results/invalid_project_ids.json".into(),
            headers: default_headers(),
            ignore_keywords: default_ignore_keywords(),
            gooood_base_url: GOOOOD_BASE_URL.to_string(),
            gooood_results_dir: "./results/gooood".into(),
            gooood_projects_dir: "./results/gooood/projects".into(),
            mongodb_uri: "mongodb://localhost:32769/?directConnection=true".to_string(),
            mongodb_archdaily_db_name: "AI-Archdaily".to_string(),
            mongodb_gooood_db_name: "AI-Gooood".to_string(),
            vector_index_name: "vector_index_text".to_string(),
            api_keys: Vec::new(),
            model_api_base: DASHSCOPE_API_BASE.to_string(),
            embed_model: "text-embedding-v3".to_string(),
            chat_model: "qwen-plus".to_string(),
            embed_dimensions: Some(1024),
            local_model_api_base: LOCAL_API_BASE.to_string(),
            local_embed_model: "gme-Qwen2-VL-2B-Instruct".to_string(),
            chunk_size: 500,
            chunk_overlap: 50,
            embed_attempts: 5,
            min_request_interval_ms: 500,
            request_timeout_secs: 60,
            politeness_delay_ms: 200,
            gallery_size: "large".to_string(),
            concurrency: StageConcurrency::default(),
        }
    }
}

fn default_headers() -> BTreeMap<String, String> {
    [
        (
            "Accept",
            "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,image/apng,*/*;q=0.8,application/signed-exchange;v=b3;q=0.7",
        ),
        ("Accept-Language", "zh-CN,zh;q=0.9,en;q=0.8,en-GB;q=0.7,en-US;q=0.6"),
        ("Cache-Control", "max-age=0"),
        ("Priority", "u=0, i"),
        (
            "Sec-Ch-Ua",
            "\"Microsoft Edge\";v=\"135\", \"Not-A.Brand\";v=\"8\", \"Chromium\";v=\"135\"",
        ),
        ("Sec-Ch-Ua-Mobile", "?0"),
        ("Sec-Ch-Ua-Platform", "\"Windows\""),
        ("Sec-Fetch-Dest", "document"),
        ("Sec-Fetch-Mode", "navigate"),
        ("Sec-Fetch-Site", "none"),
        ("Sec-Fetch-User", "?1"),
        ("Upgrade-Insecure-Requests", "1"),
        (
            "User-Agent",
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/135.0.0.0 Safari/537.36 Edg/135.0.0.0",
        ),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

fn default_ignore_keywords() -> BTreeSet<String> {
    [
        "Projects",
        "Images",
        "Products",
        "Folders",
        "AD Plus",
        "Benefits",
        "Archive",
        "Content",
        "Maps",
        "Audio",
        "Check the latest Chairs",
        "Check the latest Counters",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn expose_keys<S: Serializer>(keys: &[SecretString], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_seq(keys.iter().map(|key| key.expose_secret()))
}

impl Settings {
    pub fn builder() -> SettingsBuilder {
        SettingsBuilder::default()
    }

    /// Loads settings from `path`. A missing file yields the defaults.
    ///
    /// # Errors
    ///
    /// Errors if the file exists but cannot be read or is not valid json.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        let shown = path.display().to_string();
        tracing::info!(path = %shown, "Loading settings");

        let raw = match fs_err::read_to_string(path) {
            Ok(raw) => raw,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("No settings file found, using defaults");
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(SettingsError::Read {
                    path: shown,
                    source,
                });
            }
        };

        serde_json::from_str(&raw).map_err(|source| SettingsError::Parse {
            path: shown,
            source,
        })
    }

    /// Persists the settings as pretty json
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), SettingsError> {
        let path = path.as_ref();
        let shown = path.display().to_string();

        let json = serde_json::to_string_pretty(self).map_err(|source| SettingsError::Parse {
            path: shown.clone(),
            source,
        })?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs_err::create_dir_all(parent).map_err(|source| SettingsError::Write {
                path: shown.clone(),
                source,
            })?;
        }
        fs_err::write(path, json).map_err(|source| SettingsError::Write {
            path: shown,
            source,
        })
    }

    pub fn layout(&self, source: Source) -> ProjectLayout {
        match source {
            Source::Archdaily => ProjectLayout::new(&self.projects_dir, Source::Archdaily),
            Source::Gooood => ProjectLayout::new(&self.gooood_projects_dir, Source::Gooood),
        }
    }

    pub fn database_name(&self, source: Source) -> &str {
        match source {
            Source::Archdaily => &self.mongodb_archdaily_db_name,
            Source::Gooood => &self.mongodb_gooood_db_name,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn politeness_delay(&self) -> Duration {
        Duration::from_millis(self.politeness_delay_ms)
    }

    pub fn min_request_interval(&self) -> Duration {
        Duration::from_millis(self.min_request_interval_ms)
    }
}
