//! Application configuration.
//!
//! Configuration is loaded from a TOML file at:
//! 1. `$MSG2PDF_CONFIG` (environment variable)
//! 2. `~/.config/msg2pdf/config.toml` (Linux/macOS)
//!    `%APPDATA%\msg2pdf\config.toml` (Windows)
//! 3. Built-in defaults

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General behavior settings.
    pub general: GeneralConfig,
    /// Per-file conversion defaults.
    pub convert: ConvertConfig,
    /// Batch processing defaults.
    pub batch: BatchConfig,
}

/// General behavior settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level: "error", "warn", "info", "debug", "trace".
    pub log_level: String,
    /// Override log directory.
    pub log_dir: Option<PathBuf>,
}

/// Per-file conversion defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvertConfig {
    /// Merge PDF and image attachments into the output PDF.
    pub merge_attachments: bool,
    /// Prepend a banner page naming the source file.
    pub show_source_banner: bool,
    /// Default output directory (single conversions default to the source
    /// file's directory when unset).
    pub default_output_dir: Option<PathBuf>,
}

/// Batch processing defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Worker-pool size.
    pub workers: usize,
    /// Descend into subdirectories.
    pub recursive: bool,
}

// ── Default implementations ─────────────────────────────────────

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "warn".to_string(),
            log_dir: None,
        }
    }
}

impl Default for ConvertConfig {
    fn default() -> Self {
        Self {
            merge_attachments: true,
            show_source_banner: true,
            default_output_dir: None,
        }
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            workers: crate::batch::DEFAULT_WORKERS,
            recursive: false,
        }
    }
}

// ── Load / save ─────────────────────────────────────────────────

/// Load configuration, searching standard locations.
///
/// Returns the default configuration if no file is found or on parse error.
pub fn load_config() -> Config {
    if let Some(path) = config_file_path() {
        if path.exists() {
            match std::fs::read_to_string(&path) {
                Ok(contents) => match toml::from_str::<Config>(&contents) {
                    Ok(cfg) => {
                        tracing::info!(path = %path.display(), "Loaded config");
                        return cfg;
                    }
                    Err(e) => {
                        tracing::warn!(
                            path = %path.display(),
                            error = %e,
                            "Failed to parse config, using defaults"
                        );
                    }
                },
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "Failed to read config file, using defaults"
                    );
                }
            }
        }
    }
    Config::default()
}

/// Determine the config file path (checking env var first, then standard dirs).
pub fn config_file_path() -> Option<PathBuf> {
    // 1. Environment variable override
    if let Ok(env_path) = std::env::var("MSG2PDF_CONFIG") {
        return Some(PathBuf::from(env_path));
    }

    // 2. Standard config directory
    dirs::config_dir().map(|d| d.join("msg2pdf").join("config.toml"))
}

/// Return the directory used for log files.
pub fn log_dir(config: &Config) -> PathBuf {
    if let Some(ref dir) = config.general.log_dir {
        return dir.clone();
    }
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("msg2pdf")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = Config::default();
        assert_eq!(cfg.general.log_level, "warn");
        assert!(cfg.convert.merge_attachments);
        assert!(cfg.convert.show_source_banner);
        assert_eq!(cfg.batch.workers, 4);
        assert!(!cfg.batch.recursive);
    }

    #[test]
    fn test_serialize_deserialize_roundtrip() {
        let cfg = Config::default();
        let toml_str = toml::to_string_pretty(&cfg).expect("serialize");
        let parsed: Config = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.general.log_level, cfg.general.log_level);
        assert_eq!(parsed.batch.workers, cfg.batch.workers);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let partial = r#"
[convert]
merge_attachments = false

[batch]
workers = 8
"#;
        let cfg: Config = toml::from_str(partial).expect("parse partial");
        assert!(!cfg.convert.merge_attachments);
        assert_eq!(cfg.batch.workers, 8);
        // Other fields use defaults
        assert!(cfg.convert.show_source_banner);
        assert_eq!(cfg.general.log_level, "warn");
    }
}
