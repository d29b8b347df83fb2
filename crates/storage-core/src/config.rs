use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Rows requested per page when listing document children
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// MIME type used when none is given and the extension is unknown
    #[serde(default = "default_mime_type")]
    pub default_mime_type: String,

    /// Thumbnail bounding box edge in pixels
    #[serde(default = "default_thumbnail_size")]
    pub thumbnail_size: u32,

    /// Device state file used by the emulated providers
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_path: Option<PathBuf>,
}

fn default_page_size() -> usize {
    256
}
fn default_mime_type() -> String {
    "application/octet-stream".to_string()
}
fn default_thumbnail_size() -> u32 {
    256
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            default_mime_type: default_mime_type(),
            thumbnail_size: default_thumbnail_size(),
            state_path: None,
        }
    }
}

impl StorageConfig {
    /// Default config file path for this platform
    pub fn default_path() -> PathBuf {
        if let Some(dirs) = directories::ProjectDirs::from("com", "android-fs", "android-fs") {
            dirs.config_dir().join("config.json")
        } else {
            PathBuf::from("android-fs-config.json")
        }
    }

    /// Default device state path for this platform
    pub fn default_state_path() -> PathBuf {
        if let Some(dirs) = directories::ProjectDirs::from("com", "android-fs", "android-fs") {
            dirs.data_dir().join("device.json")
        } else {
            PathBuf::from("android-fs-device.json")
        }
    }

    /// Load config from a file path
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config from {}", path.display()))?;
        let config: Self =
            serde_json::from_str(&data).with_context(|| "failed to parse config JSON")?;
        Ok(config)
    }

    /// Save config to a file path
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create config dir {}", parent.display()))?;
        }
        let data = serde_json::to_string_pretty(self)?;
        std::fs::write(path, data)
            .with_context(|| format!("failed to write config to {}", path.display()))?;
        Ok(())
    }

    pub fn state_path(&self) -> PathBuf {
        self.state_path
            .clone()
            .unwrap_or_else(Self::default_state_path)
    }

    /// Page size clamped to at least one row
    pub(crate) fn effective_page_size(&self) -> usize {
        self.page_size.max(1)
    }
}
