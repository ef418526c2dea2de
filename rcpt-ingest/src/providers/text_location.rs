//! Text/location OCR client
//!
//! Calls a raw-text OCR service and parses the returned text locally into
//! store location details (name, address, phone, postal code, country) and
//! summary amounts. See `location_parser` for the parsing rules.
//!
//! Wire contract:
//! - Request: `POST {endpoint}` with `x-api-key` header and JSON
//!   `{ "image": <base64>, "strategy": <str?>, "locale": <str?> }`
//! - Response: `{ "text": <str>, "confidence": <f64?>, "strategy_used": <str?> }`
//!
//! With `PreprocessingStrategy::Auto` the service is called once per
//! concrete strategy and the best-scoring text wins.

use super::location_parser::{parse_location, parse_receipt_text};
use super::structured_extraction::{body_error, classify_status};
use super::{OcrProvider, PreprocessingStrategy, ProviderOptions};
use crate::config::ProviderSettings;
use crate::error::ProviderError;
use crate::types::{ProviderKind, ProviderResult};
use crate::utils::{retry_transient, RetryPolicy};
use async_trait::async_trait;
use base64::Engine;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Serialize)]
struct TextRequest<'a> {
    image: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    strategy: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    locale: Option<&'a str>,
}

#[derive(Debug, Clone, Deserialize)]
struct TextResponse {
    #[serde(default)]
    text: String,
    confidence: Option<f64>,
    strategy_used: Option<String>,
}

/// One pass of the text service under a given strategy
#[derive(Debug)]
struct TextPass {
    strategy: PreprocessingStrategy,
    response: TextResponse,
    score: f64,
}

/// Text/location provider client
pub struct TextLocationClient {
    client: Client,
    endpoint: String,
    api_key: String,
    retry: RetryPolicy,
    rate_limiter: DefaultDirectRateLimiter,
}

impl TextLocationClient {
    /// Create client from resolved settings
    ///
    /// # Panics
    /// Panics if the HTTP client cannot be built (TLS backend unavailable)
    pub fn new(settings: ProviderSettings) -> Self {
        let client = Client::builder()
            .timeout(settings.request_timeout)
            .connect_timeout(Duration::from_secs(5).min(settings.request_timeout))
            .user_agent(rcpt_common::config::get_user_agent())
            .build()
            .expect("Failed to build HTTP client");

        let rps = NonZeroU32::new(settings.requests_per_second).unwrap_or(NonZeroU32::MIN);

        Self {
            client,
            endpoint: settings.endpoint,
            api_key: settings.api_key,
            retry: settings.retry,
            rate_limiter: RateLimiter::direct(Quota::per_second(rps)),
        }
    }

    async fn recognize_once(&self, body: &TextRequest<'_>) -> Result<TextResponse, ProviderError> {
        self.rate_limiter.until_ready().await;

        tracing::debug!(endpoint = %self.endpoint, strategy = ?body.strategy, "Calling text OCR service");

        let response = self
            .client
            .post(&self.endpoint)
            .header("x-api-key", &self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| ProviderError::ProviderUnavailable(format!("Text OCR request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &detail));
        }

        response
            .json::<TextResponse>()
            .await
            .map_err(|e| body_error("text OCR", e))
    }

    async fn run_pass(
        &self,
        image_b64: &str,
        strategy: PreprocessingStrategy,
        locale: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<TextPass, ProviderError> {
        let body = TextRequest {
            image: image_b64,
            strategy: strategy.wire_name(),
            locale,
        };

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
            response = retry_transient("text OCR", &self.retry, cancel, || self.recognize_once(&body)) => response?,
        };

        let score = parse_location(&response.text).score();
        Ok(TextPass {
            strategy,
            response,
            score,
        })
    }
}

#[async_trait]
impl OcrProvider for TextLocationClient {
    fn kind(&self) -> ProviderKind {
        ProviderKind::TextLocation
    }

    async fn extract(
        &self,
        image: &[u8],
        options: &ProviderOptions,
        cancel: &CancellationToken,
    ) -> Result<ProviderResult, ProviderError> {
        if image.is_empty() {
            return Err(ProviderError::UnprocessableInput("empty image".to_string()));
        }

        let image_b64 = base64::engine::general_purpose::STANDARD.encode(image);
        let locale = options.locale.as_deref();

        let pass = match options.preprocessing {
            PreprocessingStrategy::Auto => self.best_pass(&image_b64, locale, cancel).await?,
            strategy => self.run_pass(&image_b64, strategy, locale, cancel).await?,
        };

        let result = pass_to_result(pass);

        tracing::info!(
            confidence = ?result.confidence,
            preprocessing = ?result.preprocessing,
            store_name = ?result.fields.store_name,
            "Text/location extraction complete"
        );

        Ok(result)
    }
}

impl TextLocationClient {
    /// Try every concrete strategy; keep the highest score
    ///
    /// Failed passes are skipped. If every pass fails, the first error is returned.
    async fn best_pass(
        &self,
        image_b64: &str,
        locale: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<TextPass, ProviderError> {
        let mut best: Option<TextPass> = None;
        let mut first_error: Option<ProviderError> = None;

        for strategy in PreprocessingStrategy::CONCRETE {
            match self.run_pass(image_b64, strategy, locale, cancel).await {
                Ok(pass) => {
                    tracing::debug!(strategy = %strategy, score = pass.score, "Preprocessing pass scored");
                    if best.as_ref().map_or(true, |b| pass.score > b.score) {
                        best = Some(pass);
                    }
                }
                Err(ProviderError::Cancelled) => return Err(ProviderError::Cancelled),
                Err(e) => {
                    tracing::warn!(strategy = %strategy, error = %e, "Preprocessing pass failed");
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        match (best, first_error) {
            (Some(pass), _) => Ok(pass),
            (None, Some(e)) => Err(e),
            (None, None) => Err(ProviderError::ProviderUnavailable(
                "no preprocessing strategy produced a result".to_string(),
            )),
        }
    }
}

fn pass_to_result(pass: TextPass) -> ProviderResult {
    let (fields, location_confidence) = parse_receipt_text(&pass.response.text);
    let confidence = pass.response.confidence.or(Some(location_confidence));

    let label = pass
        .response
        .strategy_used
        .clone()
        .or_else(|| pass.strategy.wire_name().map(str::to_string));

    let result = ProviderResult::new(ProviderKind::TextLocation, confidence, fields);
    match label {
        Some(label) => result.with_preprocessing(label),
        None => result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Amount;

    const RECEIPT_TEXT: &str = "ACME MART SDN BHD\nLot 12, Jalan Telawi 3\nBangsar Baru\n59100 Kuala Lumpur\nTel: 03-2282 1234\nTOTAL 12.08";

    fn pass(text: &str, confidence: Option<f64>, strategy: PreprocessingStrategy) -> TextPass {
        TextPass {
            strategy,
            score: parse_location(text).score(),
            response: TextResponse {
                text: text.to_string(),
                confidence,
                strategy_used: None,
            },
        }
    }

    #[test]
    fn test_pass_uses_location_confidence_without_service_confidence() {
        let result = pass_to_result(pass(RECEIPT_TEXT, None, PreprocessingStrategy::Enhanced));

        assert_eq!(result.provider, ProviderKind::TextLocation);
        assert_eq!(result.fields.store_name.as_deref(), Some("ACME MART SDN BHD"));
        assert_eq!(result.fields.total_amount, Some(Amount::from_minor(1208)));
        assert_eq!(result.preprocessing.as_deref(), Some("enhanced"));
        assert!(result.confidence.unwrap() > 0.0);
    }

    #[test]
    fn test_service_confidence_wins() {
        let result = pass_to_result(pass(RECEIPT_TEXT, Some(0.42), PreprocessingStrategy::ServiceDefault));
        assert_eq!(result.confidence, Some(0.42));
        assert_eq!(result.preprocessing, None);
    }

    #[test]
    fn test_empty_text_is_low_confidence_result() {
        let result = pass_to_result(pass("", None, PreprocessingStrategy::Simple));
        assert_eq!(result.confidence, Some(0.0));
        assert!(result.fields.is_empty());
    }
}
