//! YAML run configuration.
//!
//! Every field is optional with a sensible default, so a minimal config
//! enabling a single pass is valid. The SCREAMING_CASE aliases keep
//! legacy config files loading unchanged.

use crate::fetch::refresh::DEFAULT_REFRESH_ENDPOINT;
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

fn default_directory() -> PathBuf {
    PathBuf::from(".")
}

fn default_project_file() -> String {
    "project.json".to_string()
}

fn default_output_file() -> String {
    "project_new.json".to_string()
}

fn default_image_folder() -> String {
    "images".to_string()
}

fn default_refresh_concurrency() -> usize {
    2
}

fn default_download_concurrency() -> usize {
    5
}

fn default_batch_timeout() -> u64 {
    600
}

fn default_refresh_endpoint() -> String {
    DEFAULT_REFRESH_ENDPOINT.to_string()
}

/// One run's configuration, deserialized from YAML.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding the project file.
    #[serde(alias = "INPUT_DIRECTORY")]
    pub input_directory: PathBuf,
    /// Directory receiving the output file and image folder.
    #[serde(alias = "OUTPUT_DIRECTORY")]
    pub output_directory: PathBuf,
    #[serde(alias = "PROJECT_FILE")]
    pub project_file: String,
    #[serde(alias = "OUTPUT_FILE")]
    pub output_file: String,
    /// When set, the project file is fetched from here instead of disk,
    /// and relative image references are resolved against it.
    #[serde(alias = "PROJECT_URL")]
    pub project_url: String,

    /// Refresh expiring CDN attachment links before anything else.
    #[serde(alias = "PROCESS_DISCORD_LINKS")]
    pub refresh_links: bool,
    /// Bearer token for the refresh endpoint.
    #[serde(alias = "TOKEN")]
    pub token: String,
    /// Refresh endpoint; the default is almost always right.
    pub refresh_endpoint: String,
    /// Concurrency for the refresh batch.
    #[serde(alias = "RATE_LIMIT")]
    pub refresh_concurrency: usize,

    /// Download remote images and repoint the document at local copies.
    #[serde(alias = "DOWNLOAD_IMAGES")]
    pub download_images: bool,
    /// Concurrency for the download batch.
    #[serde(alias = "DOWNLOAD_RATE_LIMIT")]
    pub download_concurrency: usize,
    /// Folder name written back into the document for local images.
    #[serde(alias = "IMAGE_FOLDER")]
    pub image_folder: String,
    #[serde(alias = "OVERWRITE_IMAGES")]
    pub overwrite_images: bool,

    /// Extract embedded `data:` URIs to files.
    #[serde(alias = "BASE64_TO_IMAGE")]
    pub base64_to_image: bool,
    /// Embed local image files as `data:` URIs.
    #[serde(alias = "IMAGE_TO_BASE64")]
    pub image_to_base64: bool,

    #[serde(alias = "UPDATE_PREFIXES")]
    pub update_prefixes: bool,
    #[serde(alias = "OLD_PREFIX")]
    pub old_prefix: String,
    #[serde(alias = "NEW_PREFIX")]
    pub new_prefix: String,

    /// Blank every image field and write out immediately.
    #[serde(alias = "DISABLE_IMAGES")]
    pub disable_images: bool,

    #[serde(alias = "MINIFY")]
    pub minify: bool,
    #[serde(alias = "SHOW_CONFIG")]
    pub show_config: bool,
    /// Elapsed deadline for one whole fetch batch, in seconds.
    #[serde(alias = "SESSION_TIMEOUT")]
    pub batch_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            input_directory: default_directory(),
            output_directory: default_directory(),
            project_file: default_project_file(),
            output_file: default_output_file(),
            project_url: String::new(),
            refresh_links: false,
            token: String::new(),
            refresh_endpoint: default_refresh_endpoint(),
            refresh_concurrency: default_refresh_concurrency(),
            download_images: false,
            download_concurrency: default_download_concurrency(),
            image_folder: default_image_folder(),
            overwrite_images: false,
            base64_to_image: false,
            image_to_base64: false,
            update_prefixes: false,
            old_prefix: String::new(),
            new_prefix: String::new(),
            disable_images: false,
            minify: false,
            show_config: false,
            batch_timeout_secs: default_batch_timeout(),
        }
    }
}

impl Config {
    /// Load and validate a YAML config file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: Self = serde_yaml::from_str(&raw)
            .with_context(|| format!("parsing config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that would destroy the input.
    pub fn validate(&self) -> Result<()> {
        if self.project_path() == self.output_path() {
            bail!(
                "project file and output file are the same path: {}",
                self.output_path().display()
            );
        }
        Ok(())
    }

    pub fn project_path(&self) -> PathBuf {
        self.input_directory.join(&self.project_file)
    }

    pub fn output_path(&self) -> PathBuf {
        self.output_directory.join(&self.output_file)
    }

    /// Where downloaded and extracted images land on disk.
    pub fn image_dir(&self) -> PathBuf {
        self.output_directory.join(&self.image_folder)
    }

    pub fn batch_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.batch_timeout_secs)
    }
}
