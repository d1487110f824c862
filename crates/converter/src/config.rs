use std::path::{Path, PathBuf};
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

/// x264 constant rate factor used when the caller does not supply one
pub const DEFAULT_CRF: u8 = 23;

/// Highest constant rate factor accepted by libx264
pub const MAX_CRF: u8 = 51;

/// Configuration for the batch converter
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvertConfig {
    /// Path to the ffmpeg binary
    pub ffmpeg_bin: PathBuf,
    /// Path to the ffprobe binary used for pre-conversion analysis
    pub ffprobe_bin: PathBuf,
    /// Process name of the encoder, used to find orphaned children on shutdown
    pub encoder_process_name: String,
    /// Constant rate factor for transcodes when `--crf` is not given
    pub default_crf: u8,
    /// File name globs to pick up while scanning (e.g. `*.ts`)
    pub input_patterns: Vec<String>,
    /// Number of parallel conversions; `None` picks one from the queued work
    pub jobs: Option<usize>,
}

impl Default for ConvertConfig {
    fn default() -> Self {
        Self::default_config()
    }
}

impl ConvertConfig {
    /// Create a default configuration with sensible values
    pub fn default_config() -> Self {
        Self {
            ffmpeg_bin: PathBuf::from("ffmpeg"),
            ffprobe_bin: PathBuf::from("ffprobe"),
            encoder_process_name: "ffmpeg".to_string(),
            default_crf: DEFAULT_CRF,
            input_patterns: vec![
                "*.ts".to_string(),
                "*.wmv".to_string(),
                "*.mp4.part".to_string(),
            ],
            jobs: None,
        }
    }

    /// Load configuration from a file, or return defaults if path is None or file doesn't exist
    pub fn load_config(path: Option<&Path>) -> Result<Self> {
        let mut config = Self::default_config();

        if let Some(config_path) = path {
            if config_path.exists() {
                let content = std::fs::read_to_string(config_path)
                    .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

                if config_path.extension().and_then(|s| s.to_str()) == Some("toml") {
                    config = toml::from_str(&content)
                        .with_context(|| format!("Failed to parse TOML config: {}", config_path.display()))?;
                } else {
                    config = serde_json::from_str(&content)
                        .with_context(|| format!("Failed to parse JSON config: {}", config_path.display()))?;
                }
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject values the encoder or scanner cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.default_crf > MAX_CRF {
            bail!("default_crf must be between 0 and {}, got {}", MAX_CRF, self.default_crf);
        }
        if self.input_patterns.is_empty() {
            bail!("input_patterns must contain at least one pattern");
        }
        if self.encoder_process_name.trim().is_empty() {
            bail!("encoder_process_name must not be empty");
        }
        Ok(())
    }
}
