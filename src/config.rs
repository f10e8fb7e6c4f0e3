use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub static CONFIG_PATH: Lazy<PathBuf> = Lazy::new(|| {
    if let Some(path) = option_env!("LOOKALIKE_CONFIG_PATH") {
        return PathBuf::from(path);
    }
    directories::ProjectDirs::from("", "", "lookalike")
        .map(|dirs| dirs.config_dir().join("config.toml"))
        .unwrap_or_else(|| PathBuf::from("/usr/local/etc/lookalike/config.toml"))
});

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub bind_addr: String,
    /// Page size for the reference sweep.
    pub chunk_size: u64,
    /// Matches returned when the request does not ask for a count.
    pub default_results: usize,
    pub store: StoreConfig,
    pub models: ModelConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub url: String,
    pub api_key: String,
    pub reference_table: String,
    pub count_table: String,
    pub analysis_table: String,
    pub photo_bucket: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub detector: PathBuf,
    pub encoder: PathBuf,
    pub encoder_input: u32,
    pub embedding_dim: usize,
    pub score_threshold: f32,
    pub nms_threshold: f32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8000".to_string(),
            chunk_size: 1000,
            default_results: 8,
            store: StoreConfig::default(),
            models: ModelConfig::default(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:54321".to_string(),
            api_key: String::new(),
            reference_table: "celebrities".to_string(),
            count_table: "celebrities_count".to_string(),
            analysis_table: "analyses".to_string(),
            photo_bucket: "photos".to_string(),
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            detector: PathBuf::from("models/face_detection_yunet_2023mar.onnx"),
            encoder: PathBuf::from("models/face_recognition_sface_2021dec.onnx"),
            encoder_input: 112,
            embedding_dim: 128,
            score_threshold: 0.6,
            nms_threshold: 0.3,
        }
    }
}

pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = path.unwrap_or(&CONFIG_PATH);
    let mut cfg = if path.exists() {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config at {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))?
    } else {
        Config::default()
    };

    // The store key is a secret; the environment wins over the file.
    if let Ok(key) = std::env::var("LOOKALIKE_STORE_KEY") {
        cfg.store.api_key = key;
    }

    Ok(cfg)
}

pub fn save_config(cfg: &Config, path: Option<&Path>) -> Result<()> {
    let path = path.unwrap_or(&CONFIG_PATH);
    let data = toml::to_string_pretty(cfg)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, data)?;
    Ok(())
}
