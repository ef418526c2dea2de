//! OCR provider clients
//!
//! Every provider implements `OcrProvider`. `ProviderSet` runs all enabled
//! providers concurrently, each on its own task with its own timeout, and
//! isolates failures per provider: one failing provider never discards the
//! other's result.
//!
//! # Providers
//! 1. **structured_extraction** - Structured receipt extraction (amounts, items, transaction data)
//! 2. **text_location** - Raw OCR text, parsed client-side into store location details

pub mod location_parser;
pub mod structured_extraction;
pub mod text_location;

use crate::config::{PipelineConfig, ProviderSettings};
use crate::error::ProviderError;
use crate::types::{ProviderKind, ProviderResult};
use async_trait::async_trait;
use futures::future::join_all;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub use structured_extraction::StructuredExtractionClient;
pub use text_location::TextLocationClient;

/// Image-enhancement pass requested from a provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PreprocessingStrategy {
    /// Let the service decide
    #[default]
    ServiceDefault,
    /// Grayscale, upscale, denoise, adaptive threshold
    Enhanced,
    /// Grayscale and Otsu threshold only
    Simple,
    /// Contrast boost and sharpening
    HighContrast,
    /// Try every strategy and keep the best-scoring result
    Auto,
}

impl PreprocessingStrategy {
    /// Concrete strategies tried by `Auto`, in order
    pub const CONCRETE: [PreprocessingStrategy; 3] = [
        PreprocessingStrategy::Enhanced,
        PreprocessingStrategy::Simple,
        PreprocessingStrategy::HighContrast,
    ];

    /// Wire name (`None` for `ServiceDefault`)
    pub fn wire_name(self) -> Option<&'static str> {
        match self {
            PreprocessingStrategy::ServiceDefault => None,
            PreprocessingStrategy::Enhanced => Some("enhanced"),
            PreprocessingStrategy::Simple => Some("simple"),
            PreprocessingStrategy::HighContrast => Some("high_contrast"),
            PreprocessingStrategy::Auto => Some("auto"),
        }
    }
}

impl fmt::Display for PreprocessingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name().unwrap_or("default"))
    }
}

impl FromStr for PreprocessingStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" | "default" => Ok(PreprocessingStrategy::ServiceDefault),
            "enhanced" => Ok(PreprocessingStrategy::Enhanced),
            "simple" => Ok(PreprocessingStrategy::Simple),
            "high_contrast" | "high-contrast" => Ok(PreprocessingStrategy::HighContrast),
            "auto" => Ok(PreprocessingStrategy::Auto),
            other => Err(format!("Unknown preprocessing strategy: {}", other)),
        }
    }
}

/// Per-call provider tuning
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderOptions {
    pub preprocessing: PreprocessingStrategy,
    /// Locale hint forwarded to the service (e.g. "en-MY")
    pub locale: Option<String>,
}

/// OCR provider capability
///
/// Implementations hold no state between calls apart from rate limiting.
#[async_trait]
pub trait OcrProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Extract receipt fields from image bytes
    ///
    /// A low-confidence response is a successful result, not an error.
    ///
    /// # Errors
    /// - `ProviderUnavailable` on network failure, timeout, 429 or 5xx (after retries)
    /// - `UnprocessableInput` if the service rejects the image
    /// - `Misconfigured` if the service rejects credentials or the endpoint
    /// - `Cancelled` if `cancel` fires first
    async fn extract(
        &self,
        image: &[u8],
        options: &ProviderOptions,
        cancel: &CancellationToken,
    ) -> Result<ProviderResult, ProviderError>;
}

/// Enabled provider with its call settings
#[derive(Clone)]
pub struct ProviderEntry {
    pub provider: Arc<dyn OcrProvider>,
    pub options: ProviderOptions,
    /// Upper bound for the whole call, retries included
    pub timeout: Duration,
}

/// Failure of one provider within a run
#[derive(Debug, Clone)]
pub struct ProviderFailure {
    pub provider: ProviderKind,
    pub error: ProviderError,
}

/// Outcome of one concurrent provider run
#[derive(Debug, Clone, Default)]
pub struct ProviderRun {
    pub results: Vec<ProviderResult>,
    pub failures: Vec<ProviderFailure>,
}

impl ProviderRun {
    /// True if every provider failed with `UnprocessableInput`
    pub fn all_unprocessable(&self) -> bool {
        self.results.is_empty()
            && !self.failures.is_empty()
            && self
                .failures
                .iter()
                .all(|f| matches!(f.error, ProviderError::UnprocessableInput(_)))
    }
}

/// Concurrent executor over the enabled providers
#[derive(Clone, Default)]
pub struct ProviderSet {
    entries: Vec<ProviderEntry>,
}

impl ProviderSet {
    pub fn new(entries: Vec<ProviderEntry>) -> Self {
        Self { entries }
    }

    pub fn count(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Call every provider concurrently and collect results and failures
    ///
    /// Each provider runs on its own task under its own timeout; the run
    /// completes when every provider has returned, failed, or timed out.
    pub async fn extract_all(&self, image: Arc<[u8]>, cancel: &CancellationToken) -> ProviderRun {
        let handles: Vec<_> = self
            .entries
            .iter()
            .map(|entry| {
                let entry = entry.clone();
                let image = Arc::clone(&image);
                let cancel = cancel.clone();
                let kind = entry.provider.kind();

                let handle = tokio::spawn(async move {
                    let call = entry.provider.extract(&image, &entry.options, &cancel);
                    match tokio::time::timeout(entry.timeout, call).await {
                        Ok(result) => result,
                        Err(_) => Err(ProviderError::ProviderUnavailable(format!(
                            "timed out after {} ms",
                            entry.timeout.as_millis()
                        ))),
                    }
                });
                (kind, handle)
            })
            .collect();

        let (kinds, handles): (Vec<_>, Vec<_>) = handles.into_iter().unzip();
        let outcomes = join_all(handles).await;

        let mut run = ProviderRun::default();
        for (kind, outcome) in kinds.into_iter().zip(outcomes) {
            let outcome = outcome.unwrap_or_else(|e| {
                Err(ProviderError::ProviderUnavailable(format!("provider task failed: {}", e)))
            });

            match outcome {
                Ok(result) => {
                    debug!(
                        provider = %kind,
                        confidence = ?result.confidence,
                        preprocessing = ?result.preprocessing,
                        "Provider extraction successful"
                    );
                    run.results.push(result);
                }
                Err(error) => {
                    warn!(
                        provider = %kind,
                        error = %error,
                        "Provider extraction failed (per-provider error isolation)"
                    );
                    run.failures.push(ProviderFailure {
                        provider: kind,
                        error,
                    });
                }
            }
        }

        run
    }
}

/// Build the provider set for the enabled providers in `config`
pub fn build_provider_set(config: &PipelineConfig) -> ProviderSet {
    let mut entries = Vec::new();

    if let Some(settings) = &config.structured {
        entries.push(entry(
            Arc::new(StructuredExtractionClient::new(settings.clone())),
            settings,
        ));
    }
    if let Some(settings) = &config.text_location {
        entries.push(entry(Arc::new(TextLocationClient::new(settings.clone())), settings));
    }

    ProviderSet::new(entries)
}

fn entry(provider: Arc<dyn OcrProvider>, settings: &ProviderSettings) -> ProviderEntry {
    tracing::debug!(
        provider = %settings.kind,
        endpoint = %settings.endpoint,
        preprocessing = %settings.options.preprocessing,
        "OCR provider enabled"
    );
    ProviderEntry {
        provider,
        options: settings.options.clone(),
        timeout: settings.call_timeout(),
    }
}

// ============================================================================
// Mock Provider for Testing
// ============================================================================
