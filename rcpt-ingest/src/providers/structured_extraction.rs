//! Structured-extraction OCR client
//!
//! Calls a prebuilt receipt model that returns typed fields (merchant,
//! transaction date, amounts, line items) plus a document type and a
//! document-level confidence.
//!
//! Wire contract:
//! - Request: `POST {endpoint}` with `x-api-key` header and JSON
//!   `{ "image": <base64>, "preprocessing": <str?>, "locale": <str?> }`
//! - Response: `{ "documents": [ { "doc_type", "confidence", "fields": {...} } ] }`
//!
//! An empty `documents` array is a successful result with no fields and
//! confidence 0.0.

use super::{OcrProvider, PreprocessingStrategy, ProviderOptions};
use crate::config::ProviderSettings;
use crate::error::ProviderError;
use crate::types::{
    Amount, ExtractedFields, LineItem, ProviderKind, ProviderResult, PurchaseDate,
};
use crate::utils::{retry_transient, RetryPolicy};
use async_trait::async_trait;
use base64::Engine;
use chrono::{NaiveDate, NaiveTime};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Serialize)]
struct AnalyzeRequest<'a> {
    image: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    preprocessing: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    locale: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct AnalyzeResponse {
    #[serde(default)]
    documents: Vec<AnalyzedDocument>,
}

#[derive(Debug, Deserialize)]
struct AnalyzedDocument {
    doc_type: Option<String>,
    confidence: Option<f64>,
    #[serde(default)]
    fields: ReceiptFields,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct ReceiptFields {
    merchant_name: Option<String>,
    merchant_address: Option<String>,
    merchant_phone_number: Option<String>,
    country_region: Option<String>,
    transaction_date: Option<String>,
    transaction_time: Option<String>,
    total: Option<f64>,
    subtotal: Option<f64>,
    total_tax: Option<f64>,
    tip: Option<f64>,
    items: Vec<ReceiptItem>,
    transaction_id: Option<String>,
    payment_method: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct ReceiptItem {
    description: Option<String>,
    quantity: Option<f64>,
    price: Option<f64>,
    total_price: Option<f64>,
}

/// Structured-extraction provider client
///
/// Rate limited per client; transient failures retried with backoff.
pub struct StructuredExtractionClient {
    client: Client,
    endpoint: String,
    api_key: String,
    retry: RetryPolicy,
    rate_limiter: DefaultDirectRateLimiter,
}

impl StructuredExtractionClient {
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

    async fn analyze_once(
        &self,
        body: &AnalyzeRequest<'_>,
    ) -> Result<AnalyzeResponse, ProviderError> {
        self.rate_limiter.until_ready().await;

        tracing::debug!(endpoint = %self.endpoint, "Calling structured-extraction service");

        let response = self
            .client
            .post(&self.endpoint)
            .header("x-api-key", &self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                ProviderError::ProviderUnavailable(format!("Structured extraction request failed: {}", e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &detail));
        }

        response
            .json::<AnalyzeResponse>()
            .await
            .map_err(|e| body_error("structured extraction", e))
    }
}

/// Classify a failure reading a success body
///
/// Undecodable bodies are not retried; a dropped connection mid-body is.
pub(crate) fn body_error(service: &str, err: reqwest::Error) -> ProviderError {
    if err.is_decode() {
        ProviderError::MalformedResponse(format!("Failed to parse {} response: {}", service, err))
    } else {
        ProviderError::ProviderUnavailable(format!("Failed to read {} response: {}", service, err))
    }
}

/// Map a non-success HTTP status to a provider error class
pub(crate) fn classify_status(status: StatusCode, detail: &str) -> ProviderError {
    let message = if detail.trim().is_empty() {
        format!("service returned {}", status)
    } else {
        format!("service returned {}: {}", status, detail.trim())
    };

    match status {
        StatusCode::BAD_REQUEST
        | StatusCode::PAYLOAD_TOO_LARGE
        | StatusCode::UNSUPPORTED_MEDIA_TYPE
        | StatusCode::UNPROCESSABLE_ENTITY => ProviderError::UnprocessableInput(message),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::NOT_FOUND => {
            ProviderError::Misconfigured(message)
        }
        _ => ProviderError::ProviderUnavailable(message),
    }
}

#[async_trait]
impl OcrProvider for StructuredExtractionClient {
    fn kind(&self) -> ProviderKind {
        ProviderKind::StructuredExtraction
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

        // The prebuilt model has no multi-pass mode; Auto defers to the service
        let preprocessing = match options.preprocessing {
            PreprocessingStrategy::Auto => PreprocessingStrategy::ServiceDefault,
            other => other,
        };

        let body = AnalyzeRequest {
            image: base64::engine::general_purpose::STANDARD.encode(image),
            preprocessing: preprocessing.wire_name(),
            locale: options.locale.as_deref(),
        };

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
            response = retry_transient("structured extraction", &self.retry, cancel, || self.analyze_once(&body)) => response?,
        };

        let result = normalize_response(response, preprocessing);

        tracing::info!(
            confidence = ?result.confidence,
            document_type = ?result.document_type,
            store_name = ?result.fields.store_name,
            total = ?result.fields.total_amount.map(|a| a.to_string()),
            "Structured extraction complete"
        );

        Ok(result)
    }
}

fn normalize_response(response: AnalyzeResponse, preprocessing: PreprocessingStrategy) -> ProviderResult {
    let Some(document) = response.documents.into_iter().next() else {
        tracing::debug!("Structured extraction returned no documents");
        return ProviderResult::new(
            ProviderKind::StructuredExtraction,
            Some(0.0),
            ExtractedFields::default(),
        );
    };

    let f = document.fields;
    let purchase_date = parse_purchase_date(f.transaction_date.as_deref(), f.transaction_time.as_deref());

    let line_items = f
        .items
        .into_iter()
        .map(|item| LineItem {
            name: item.description,
            quantity: item.quantity.filter(|q| q.is_finite()),
            unit_price: item.price.and_then(Amount::from_major),
            total_price: item.total_price.and_then(Amount::from_major),
        })
        .collect();

    let fields = ExtractedFields {
        store_name: f.merchant_name,
        address: f.merchant_address,
        phone: f.merchant_phone_number,
        postal_code: None,
        country: f.country_region,
        purchase_date,
        total_amount: f.total.and_then(Amount::from_major),
        subtotal_amount: f.subtotal.and_then(Amount::from_major),
        tax_amount: f.total_tax.and_then(Amount::from_major),
        tip_amount: f.tip.and_then(Amount::from_major),
        line_items,
        transaction_id: f.transaction_id,
        payment_method: f.payment_method,
    };

    let mut result = ProviderResult::new(ProviderKind::StructuredExtraction, document.confidence, fields);
    if let Some(doc_type) = document.doc_type {
        result = result.with_document_type(doc_type);
    }
    if let Some(label) = preprocessing.wire_name() {
        result = result.with_preprocessing(label);
    }
    result
}

/// Parse `YYYY-MM-DD` plus optional `HH:MM[:SS]`; unparseable dates are dropped
fn parse_purchase_date(date: Option<&str>, time: Option<&str>) -> Option<PurchaseDate> {
    let raw = date?.trim();
    let date = match NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        Ok(d) => d,
        Err(e) => {
            tracing::warn!(value = raw, error = %e, "Ignoring unparseable transaction date");
            return None;
        }
    };

    let time = time.map(str::trim).and_then(|t| {
        NaiveTime::parse_from_str(t, "%H:%M:%S")
            .or_else(|_| NaiveTime::parse_from_str(t, "%H:%M"))
            .ok()
    });

    Some(PurchaseDate { date, time })
}
