//! Pipeline configuration for rcpt-ingest
//!
//! Resolves the bootstrap `TomlConfig` into concrete provider settings and
//! acceptance thresholds.
//!
//! Provider API keys: ENV → TOML (a warning is logged if both are set).

use crate::models::AcceptanceThresholds;
use crate::providers::{PreprocessingStrategy, ProviderOptions};
use crate::types::ProviderKind;
use crate::utils::RetryPolicy;
use rcpt_common::config::{ProviderToml, TomlConfig};
use rcpt_common::{Error, Result};
use std::time::Duration;
use tracing::{info, warn};

/// Environment variable for the structured-extraction API key
pub const STRUCTURED_API_KEY_ENV: &str = "RCPT_STRUCTURED_API_KEY";

/// Environment variable for the text/location API key
pub const TEXT_LOCATION_API_KEY_ENV: &str = "RCPT_TEXT_LOCATION_API_KEY";

pub const DEFAULT_STRUCTURED_ENDPOINT: &str = "http://localhost:8000/api/v1/ocr/structured";
pub const DEFAULT_TEXT_LOCATION_ENDPOINT: &str = "http://localhost:8000/api/v1/ocr/text";

const DEFAULT_STRUCTURED_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_TEXT_LOCATION_TIMEOUT_MS: u64 = 20_000;
const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_REQUESTS_PER_SECOND: u32 = 5;
const DEFAULT_EVENT_BUS_CAPACITY: usize = 256;

/// Resolved settings for one OCR provider
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderSettings {
    pub kind: ProviderKind,
    pub endpoint: String,
    pub api_key: String,
    /// Per-request HTTP timeout
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
    pub requests_per_second: u32,
    pub options: ProviderOptions,
}

impl ProviderSettings {
    /// Built-in defaults for `kind` with the given key
    pub fn with_defaults(kind: ProviderKind, api_key: impl Into<String>) -> Self {
        let (endpoint, timeout_ms) = match kind {
            ProviderKind::StructuredExtraction => {
                (DEFAULT_STRUCTURED_ENDPOINT, DEFAULT_STRUCTURED_TIMEOUT_MS)
            }
            ProviderKind::TextLocation => {
                (DEFAULT_TEXT_LOCATION_ENDPOINT, DEFAULT_TEXT_LOCATION_TIMEOUT_MS)
            }
        };

        Self {
            kind,
            endpoint: endpoint.to_string(),
            api_key: api_key.into(),
            request_timeout: Duration::from_millis(timeout_ms),
            retry: RetryPolicy {
                max_attempts: DEFAULT_MAX_ATTEMPTS,
                ..RetryPolicy::default()
            },
            requests_per_second: DEFAULT_REQUESTS_PER_SECOND,
            options: ProviderOptions::default(),
        }
    }

    /// Upper bound for a whole provider call: every attempt plus backoff
    ///
    /// `Auto` preprocessing issues one request per strategy.
    pub fn call_timeout(&self) -> Duration {
        let passes = match self.options.preprocessing {
            PreprocessingStrategy::Auto => PreprocessingStrategy::CONCRETE.len() as u32,
            _ => 1,
        };
        let attempts = self.retry.max_attempts.max(1);
        self.request_timeout * attempts * passes + self.retry.max_backoff * attempts
    }
}

/// Resolved pipeline configuration
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// `None` when the provider is disabled
    pub structured: Option<ProviderSettings>,
    pub text_location: Option<ProviderSettings>,
    pub thresholds: AcceptanceThresholds,
    pub event_bus_capacity: usize,
}

impl Default for PipelineConfig {
    /// No providers enabled, default thresholds
    fn default() -> Self {
        Self {
            structured: None,
            text_location: None,
            thresholds: AcceptanceThresholds::default(),
            event_bus_capacity: DEFAULT_EVENT_BUS_CAPACITY,
        }
    }
}

impl PipelineConfig {
    /// Resolve from the bootstrap TOML and environment
    ///
    /// # Errors
    /// `Error::Config` if an enabled provider has no API key, or a value is invalid.
    pub fn from_toml(toml_config: &TomlConfig) -> Result<Self> {
        let structured = resolve_provider(
            ProviderKind::StructuredExtraction,
            &toml_config.providers.structured,
            STRUCTURED_API_KEY_ENV,
        )?;
        let text_location = resolve_provider(
            ProviderKind::TextLocation,
            &toml_config.providers.text_location,
            TEXT_LOCATION_API_KEY_ENV,
        )?;

        if structured.is_none() && text_location.is_none() {
            return Err(Error::Config(
                "No OCR provider enabled. Enable [providers.structured] or [providers.text_location]"
                    .to_string(),
            ));
        }

        let defaults = AcceptanceThresholds::default();
        let thresholds = AcceptanceThresholds {
            min_confidence: unit_interval(
                "validation.min_confidence",
                toml_config.validation.min_confidence,
                defaults.min_confidence,
            )?,
            min_completeness: unit_interval(
                "validation.min_completeness",
                toml_config.validation.min_completeness,
                defaults.min_completeness,
            )?,
        };

        Ok(Self {
            structured,
            text_location,
            thresholds,
            event_bus_capacity: DEFAULT_EVENT_BUS_CAPACITY,
        })
    }
}

fn unit_interval(name: &str, value: Option<f64>, default: f64) -> Result<f64> {
    match value {
        None => Ok(default),
        Some(v) if (0.0..=1.0).contains(&v) => Ok(v),
        Some(v) => Err(Error::Config(format!("{} must be within [0.0, 1.0], got {}", name, v))),
    }
}

fn resolve_provider(
    kind: ProviderKind,
    section: &ProviderToml,
    env_var: &str,
) -> Result<Option<ProviderSettings>> {
    if !section.enabled {
        info!(provider = %kind, "Provider disabled in configuration");
        return Ok(None);
    }

    let api_key = resolve_api_key(kind, section, env_var)?;
    let mut settings = ProviderSettings::with_defaults(kind, api_key);

    if let Some(endpoint) = &section.endpoint {
        if endpoint.trim().is_empty() {
            return Err(Error::Config(format!("{} endpoint is empty", kind)));
        }
        settings.endpoint = endpoint.trim().to_string();
    }
    if let Some(ms) = section.timeout_ms {
        if ms == 0 {
            return Err(Error::Config(format!("{} timeout_ms must be positive", kind)));
        }
        settings.request_timeout = Duration::from_millis(ms);
    }
    if let Some(attempts) = section.max_attempts {
        settings.retry.max_attempts = attempts.max(1);
    }
    if let Some(rps) = section.requests_per_second {
        if rps == 0 {
            return Err(Error::Config(format!("{} requests_per_second must be positive", kind)));
        }
        settings.requests_per_second = rps;
    }
    if let Some(strategy) = &section.preprocessing {
        settings.options.preprocessing = strategy
            .parse()
            .map_err(|e: String| Error::Config(format!("{}: {}", kind, e)))?;
    }
    settings.options.locale = section
        .locale
        .as_ref()
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty());

    Ok(Some(settings))
}

/// Resolve a provider API key
///
/// **Priority:** ENV → TOML
pub fn resolve_api_key(kind: ProviderKind, section: &ProviderToml, env_var: &str) -> Result<String> {
    let env_key = std::env::var(env_var).ok().filter(|k| is_valid_key(k));
    let toml_key = section.api_key.clone().filter(|k| is_valid_key(k));

    if env_key.is_some() && toml_key.is_some() {
        warn!(
            provider = %kind,
            "API key found in multiple sources: environment, TOML. Using environment (highest priority)."
        );
    }

    if let Some(key) = env_key {
        info!(provider = %kind, "API key loaded from environment variable");
        return Ok(key);
    }

    if let Some(key) = toml_key {
        info!(provider = %kind, "API key loaded from TOML config");
        return Ok(key);
    }

    Err(Error::Config(format!(
        "{} API key not configured. Configure using one of:\n\
         1. Environment: {}=your-key-here\n\
         2. TOML config: ~/.config/rcpt/config.toml (api_key under [providers.*])\n\
         or disable the provider (enabled = false)",
        kind, env_var
    )))
}

/// Validate API key (non-empty, non-whitespace)
pub fn is_valid_key(key: &str) -> bool {
    !key.trim().is_empty()
}
