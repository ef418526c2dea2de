//! Bootstrap configuration loading and root folder resolution
//!
//! Bootstrap settings live in a small TOML file. Everything in it is optional;
//! missing values fall back to built-in defaults in the consuming crate.
//!
//! # Settings Sources Priority
//!
//! 1. Command-line arguments
//! 2. Environment variables (`RCPT_ROOT_FOLDER`, provider API keys)
//! 3. TOML configuration file
//! 4. Built-in defaults (code constants)

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Environment variable overriding the root folder
pub const ROOT_FOLDER_ENV: &str = "RCPT_ROOT_FOLDER";

/// Database file name inside the root folder
pub const DATABASE_FILE_NAME: &str = "rcpt.db";

/// Bootstrap configuration loaded from TOML file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Root folder for the database and working files
    #[serde(default)]
    pub root_folder: Option<PathBuf>,

    /// Explicit database path (defaults to `<root_folder>/rcpt.db`)
    #[serde(default)]
    pub database_path: Option<PathBuf>,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// OCR provider sections
    #[serde(default)]
    pub providers: ProvidersConfig,

    /// Receipt acceptance thresholds
    #[serde(default)]
    pub validation: ValidationConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (optional, logs to stderr if not specified)
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Per-provider TOML sections
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProvidersConfig {
    /// Structured-extraction service (`[providers.structured]`)
    #[serde(default)]
    pub structured: ProviderToml,

    /// Text/location service (`[providers.text_location]`)
    #[serde(default)]
    pub text_location: ProviderToml,
}

/// Settings for one OCR provider
///
/// All values optional; `None` means "use the built-in default".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderToml {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub max_attempts: Option<u32>,
    #[serde(default)]
    pub requests_per_second: Option<u32>,
    /// Preprocessing strategy selector (provider specific, e.g. "auto", "enhanced")
    #[serde(default)]
    pub preprocessing: Option<String>,
    /// Locale hint forwarded to the service (e.g. "en-MY")
    #[serde(default)]
    pub locale: Option<String>,
}

impl Default for ProviderToml {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            endpoint: None,
            api_key: None,
            timeout_ms: None,
            max_attempts: None,
            requests_per_second: None,
            preprocessing: None,
            locale: None,
        }
    }
}

fn default_enabled() -> bool {
    true
}

/// Acceptance thresholds for `PendingValidation -> Validated`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationConfig {
    #[serde(default)]
    pub min_confidence: Option<f64>,
    #[serde(default)]
    pub min_completeness: Option<f64>,
}

/// Root folder resolution priority:
/// 1. Command-line argument (highest priority)
/// 2. Environment variable
/// 3. TOML config value
/// 4. OS-dependent compiled default (fallback)
pub fn resolve_root_folder(
    cli_arg: Option<&str>,
    env_var_name: &str,
    toml_config: &TomlConfig,
) -> PathBuf {
    if let Some(path) = cli_arg {
        debug!("Root folder from command line: {}", path);
        return PathBuf::from(path);
    }

    if let Ok(path) = std::env::var(env_var_name) {
        if !path.trim().is_empty() {
            debug!("Root folder from {}: {}", env_var_name, path);
            return PathBuf::from(path);
        }
    }

    if let Some(path) = &toml_config.root_folder {
        debug!("Root folder from TOML: {}", path.display());
        return path.clone();
    }

    get_default_root_folder()
}

/// Database path for a resolved root folder, honoring an explicit TOML override
pub fn database_path(root_folder: &Path, toml_config: &TomlConfig) -> PathBuf {
    toml_config
        .database_path
        .clone()
        .unwrap_or_else(|| root_folder.join(DATABASE_FILE_NAME))
}

/// Locate the configuration file for the platform
///
/// Linux: `~/.config/rcpt/config.toml`, then `/etc/rcpt/config.toml`.
/// Other platforms: the user config directory only.
pub fn config_file_path() -> Option<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join("rcpt").join("config.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    if cfg!(target_os = "linux") {
        let system_config = PathBuf::from("/etc/rcpt/config.toml");
        if system_config.exists() {
            return Some(system_config);
        }
    }

    None
}

/// Load and parse a TOML config file
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read TOML failed ({}): {}", path.display(), e)))?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse TOML failed ({}): {}", path.display(), e)))
}

/// Load the platform config file, or defaults if none exists
///
/// A config file that exists but fails to parse is an error; a missing file is not.
pub fn load_default_toml_config() -> Result<TomlConfig> {
    match config_file_path() {
        Some(path) => {
            info!("Loading configuration from {}", path.display());
            load_toml_config(&path)
        }
        None => {
            info!("No configuration file found, using built-in defaults");
            Ok(TomlConfig::default())
        }
    }
}

/// Standard User-Agent for outbound HTTP clients
pub fn get_user_agent() -> String {
    format!("rcpt/{}", env!("CARGO_PKG_VERSION"))
}

/// Get OS-dependent default root folder path
fn get_default_root_folder() -> PathBuf {
    if cfg!(target_os = "linux") {
        // ~/.local/share/rcpt (or /var/lib/rcpt for system-wide)
        dirs::data_local_dir()
            .map(|d| d.join("rcpt"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/rcpt"))
    } else if cfg!(target_os = "macos") {
        dirs::data_dir()
            .map(|d| d.join("rcpt"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/rcpt"))
    } else if cfg!(target_os = "windows") {
        dirs::data_local_dir()
            .map(|d| d.join("rcpt"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\rcpt"))
    } else {
        PathBuf::from("./rcpt_data")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    fn test_empty_toml_uses_defaults() {
        let config: TomlConfig = toml::from_str("").unwrap();

        assert!(config.root_folder.is_none());
        assert_eq!(config.logging.level, "info");
        assert!(config.providers.structured.enabled);
        assert!(config.providers.text_location.api_key.is_none());
        assert!(config.validation.min_confidence.is_none());
    }

    #[test]
    fn test_provider_sections_parse() {
        let config: TomlConfig = toml::from_str(
            r#"
            root_folder = "/srv/rcpt"

            [logging]
            level = "debug"

            [providers.structured]
            endpoint = "https://ocr.example.com/receipt"
            api_key = "abc"
            timeout_ms = 2500
            max_attempts = 2

            [providers.text_location]
            enabled = false
            preprocessing = "high_contrast"
            locale = "en-MY"

            [validation]
            min_confidence = 0.8
            "#,
        )
        .unwrap();

        assert_eq!(config.root_folder, Some(PathBuf::from("/srv/rcpt")));
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.providers.structured.timeout_ms, Some(2500));
        assert_eq!(config.providers.structured.max_attempts, Some(2));
        assert!(!config.providers.text_location.enabled);
        assert_eq!(
            config.providers.text_location.preprocessing.as_deref(),
            Some("high_contrast")
        );
        assert_eq!(config.validation.min_confidence, Some(0.8));
        assert!(config.validation.min_completeness.is_none());
    }

    #[test]
    fn test_malformed_toml_is_config_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("bad.toml");
        std::fs::write(&path, "root_folder = [").unwrap();

        let err = load_toml_config(&path).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    #[serial]
    fn test_root_folder_priority() {
        let toml_config = TomlConfig {
            root_folder: Some(PathBuf::from("/from/toml")),
            ..Default::default()
        };

        std::env::set_var(ROOT_FOLDER_ENV, "/from/env");
        assert_eq!(
            resolve_root_folder(Some("/from/cli"), ROOT_FOLDER_ENV, &toml_config),
            PathBuf::from("/from/cli")
        );
        assert_eq!(
            resolve_root_folder(None, ROOT_FOLDER_ENV, &toml_config),
            PathBuf::from("/from/env")
        );

        std::env::remove_var(ROOT_FOLDER_ENV);
        assert_eq!(
            resolve_root_folder(None, ROOT_FOLDER_ENV, &toml_config),
            PathBuf::from("/from/toml")
        );

        let fallback = resolve_root_folder(None, ROOT_FOLDER_ENV, &TomlConfig::default());
        assert!(fallback.ends_with("rcpt") || fallback.ends_with("rcpt_data"));
    }

    #[test]
    fn test_database_path_override() {
        let root = PathBuf::from("/data/rcpt");
        assert_eq!(
            database_path(&root, &TomlConfig::default()),
            PathBuf::from("/data/rcpt/rcpt.db")
        );

        let toml_config = TomlConfig {
            database_path: Some(PathBuf::from("/elsewhere/receipts.db")),
            ..Default::default()
        };
        assert_eq!(
            database_path(&root, &toml_config),
            PathBuf::from("/elsewhere/receipts.db")
        );
    }
}
