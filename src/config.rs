//! TOML configuration.
//!
//! Every command reads one config file (default `./config/annotate.toml`).
//! Only `[db]` and `[server]` are required; the remaining sections fall back
//! to defaults that work for a local single-user setup.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub server: ServerConfig,
    #[serde(default)]
    pub layout: LayoutConfig,
    #[serde(default)]
    pub segmentation: SegmentationConfig,
    #[serde(default)]
    pub labeling: LabelingConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

fn default_max_upload_bytes() -> usize {
    50 * 1024 * 1024
}

/// Controls how extracted text fragments are grouped into blocks.
#[derive(Debug, Deserialize, Clone)]
pub struct LayoutConfig {
    /// A vertical gap larger than `block_gap_factor * font_size` between two
    /// fragments starts a new block.
    #[serde(default = "default_block_gap_factor")]
    pub block_gap_factor: f64,
    /// Font size assumed by extractors that carry no font metrics.
    #[serde(default = "default_font_size")]
    pub default_font_size: f64,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            block_gap_factor: default_block_gap_factor(),
            default_font_size: default_font_size(),
        }
    }
}

fn default_block_gap_factor() -> f64 {
    0.5
}
fn default_font_size() -> f64 {
    12.0
}

/// Import-time sentence starter seeding.
#[derive(Debug, Deserialize, Clone)]
pub struct SegmentationConfig {
    #[serde(default = "default_true")]
    pub auto_detect_starters: bool,
    /// Capitalized words that never open a sentence on their own.
    #[serde(default = "default_non_starters")]
    pub non_starters: Vec<String>,
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            auto_detect_starters: true,
            non_starters: default_non_starters(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_non_starters() -> Vec<String> {
    [
        "I", "Mr", "Mrs", "Ms", "Dr", "Prof", "St", "Ave", "Blvd", "Rd", "Ln", "Jan", "Feb",
        "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec", "Mon", "Tue",
        "Wed", "Thu", "Fri", "Sat", "Sun",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Where uploaded PDFs are kept, one file per document under its stored name.
#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_upload_dir")]
    pub upload_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            upload_dir: default_upload_dir(),
        }
    }
}

fn default_upload_dir() -> PathBuf {
    PathBuf::from("./data/uploads")
}

#[derive(Debug, Deserialize, Clone)]
pub struct LabelingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    /// Overrides the provider's default API endpoint.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Environment variable holding the API key. Defaults per provider.
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for LabelingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            endpoint: None,
            api_key_env: None,
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_timeout_secs() -> u64 {
    120
}
fn default_max_retries() -> u32 {
    3
}

impl LabelingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }

    /// Name of the environment variable carrying the provider's API key.
    pub fn key_env(&self) -> &str {
        match (&self.api_key_env, self.provider.as_str()) {
            (Some(name), _) => name,
            (None, "gemini") => "GOOGLE_API_KEY",
            (None, _) => "OPENAI_API_KEY",
        }
    }
}

impl Config {
    /// A config pointing at `db_path` with every other setting defaulted.
    /// Uploads go to an `uploads` directory next to the database.
    pub fn with_db_path(db_path: impl Into<PathBuf>) -> Self {
        let path: PathBuf = db_path.into();
        let upload_dir = path
            .parent()
            .map(|dir| dir.join("uploads"))
            .unwrap_or_else(default_upload_dir);
        Self {
            db: DbConfig { path },
            server: ServerConfig {
                bind: "127.0.0.1:5000".to_string(),
                max_upload_bytes: default_max_upload_bytes(),
            },
            layout: LayoutConfig::default(),
            segmentation: SegmentationConfig::default(),
            labeling: LabelingConfig::default(),
            storage: StorageConfig { upload_dir },
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config = parse_config(&content)?;
    validate(&config)?;
    Ok(config)
}

fn parse_config(content: &str) -> Result<Config> {
    toml::from_str(content).with_context(|| "Failed to parse config file")
}

fn validate(config: &Config) -> Result<()> {
    if config.server.max_upload_bytes == 0 {
        anyhow::bail!("server.max_upload_bytes must be > 0");
    }

    if config.layout.block_gap_factor <= 0.0 {
        anyhow::bail!("layout.block_gap_factor must be > 0");
    }
    if config.layout.default_font_size <= 0.0 {
        anyhow::bail!("layout.default_font_size must be > 0");
    }

    match config.labeling.provider.as_str() {
        "disabled" | "gemini" | "openai" => {}
        other => anyhow::bail!(
            "Unknown labeling provider: '{}'. Must be disabled, gemini, or openai.",
            other
        ),
    }

    if config.labeling.is_enabled() && config.labeling.model.is_none() {
        anyhow::bail!(
            "labeling.model must be specified when provider is '{}'",
            config.labeling.provider
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[db]
path = "./data/annotate.sqlite"

[server]
bind = "127.0.0.1:5000"
"#;

    #[test]
    fn minimal_config_uses_defaults() {
        let config = parse_config(MINIMAL).unwrap();
        validate(&config).unwrap();
        assert_eq!(config.labeling.provider, "disabled");
        assert!(config.segmentation.auto_detect_starters);
        assert!(config.segmentation.non_starters.contains(&"Dr".to_string()));
        assert_eq!(config.layout.default_font_size, 12.0);
        assert_eq!(config.storage.upload_dir, PathBuf::from("./data/uploads"));
    }

    #[test]
    fn uploads_default_next_to_database() {
        let config = Config::with_db_path("/tmp/annot/annotate.sqlite");
        assert_eq!(config.storage.upload_dir, PathBuf::from("/tmp/annot/uploads"));
    }

    #[test]
    fn unknown_provider_is_rejected() {
        let content = format!("{}\n[labeling]\nprovider = \"cohere\"\n", MINIMAL);
        let config = parse_config(&content).unwrap();
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("Unknown labeling provider"));
    }

    #[test]
    fn enabled_provider_requires_model() {
        let content = format!("{}\n[labeling]\nprovider = \"gemini\"\n", MINIMAL);
        let config = parse_config(&content).unwrap();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn key_env_defaults_per_provider() {
        let mut labeling = LabelingConfig {
            provider: "gemini".to_string(),
            ..LabelingConfig::default()
        };
        assert_eq!(labeling.key_env(), "GOOGLE_API_KEY");
        labeling.provider = "openai".to_string();
        assert_eq!(labeling.key_env(), "OPENAI_API_KEY");
        labeling.api_key_env = Some("MY_KEY".to_string());
        assert_eq!(labeling.key_env(), "MY_KEY");
    }
}
