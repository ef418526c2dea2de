//! Core data contracts for the receipt ingest pipeline
//!
//! Explicit contracts between the pipeline stages:
//! - `RawSubmission` → `ImageHasher` → `ImageFingerprint`
//! - `OcrProvider` → `ProviderResult` → `ResultReconciler` → `ReconciledReceipt`
//! - `DuplicateDetector` → `DuplicateConflict`
//!
//! Every optional field stays `None` when unknown. Empty strings and empty
//! item lists are normalized to `None`/absent so "unknown" never looks like
//! "known-empty".

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// Intake
// ============================================================================

/// Uploaded receipt image, consumed once by the orchestrator
#[derive(Debug, Clone)]
pub struct RawSubmission {
    pub owner_id: String,
    pub filename: String,
    pub content: Vec<u8>,
}

impl RawSubmission {
    pub fn new(owner_id: impl Into<String>, filename: impl Into<String>, content: Vec<u8>) -> Self {
        Self {
            owner_id: owner_id.into(),
            filename: filename.into(),
            content,
        }
    }
}

/// Hex-encoded SHA-256 digest of the raw image bytes
///
/// Equality key only; never decoded back to content.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageFingerprint(String);

impl ImageFingerprint {
    /// Hex digest length (SHA-256)
    pub const HEX_LEN: usize = 64;

    /// Wrap a digest produced by the hasher
    pub(crate) fn from_digest_hex(hex: String) -> Self {
        Self(hex)
    }

    /// Parse a stored fingerprint (64 lowercase hex characters)
    pub fn parse(s: &str) -> Option<Self> {
        let valid = s.len() == Self::HEX_LEN
            && s.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c));
        valid.then(|| Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ImageFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Provider Output
// ============================================================================

/// OCR provider variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ProviderKind {
    /// Structured receipt extraction (amounts, items, transaction data)
    StructuredExtraction,
    /// Raw text + store location extraction
    TextLocation,
}

impl ProviderKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ProviderKind::StructuredExtraction => "StructuredExtraction",
            ProviderKind::TextLocation => "TextLocation",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "StructuredExtraction" => Ok(ProviderKind::StructuredExtraction),
            "TextLocation" => Ok(ProviderKind::TextLocation),
            other => Err(format!("Unknown provider kind: {}", other)),
        }
    }
}

/// Monetary amount in minor units (cents)
///
/// Integer representation keeps conflict detection exact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Amount(i64);

impl Amount {
    pub fn from_minor(minor: i64) -> Self {
        Self(minor)
    }

    /// Convert a decimal major-unit value (e.g. `12.34`), rejecting non-finite input
    pub fn from_major(major: f64) -> Option<Self> {
        if !major.is_finite() {
            return None;
        }
        let minor = (major * 100.0).round();
        if minor.abs() > i64::MAX as f64 {
            return None;
        }
        Some(Self(minor as i64))
    }

    pub fn minor_units(self) -> i64 {
        self.0
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{}{}.{:02}", sign, abs / 100, abs % 100)
    }
}

/// Purchase date with optional time of day
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PurchaseDate {
    pub date: NaiveDate,
    pub time: Option<NaiveTime>,
}

/// Single receipt line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub name: Option<String>,
    pub quantity: Option<f64>,
    pub unit_price: Option<Amount>,
    pub total_price: Option<Amount>,
}

impl LineItem {
    fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.quantity.is_none()
            && self.unit_price.is_none()
            && self.total_price.is_none()
    }
}

/// Fields extracted by a single provider
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedFields {
    pub store_name: Option<String>,
    pub address: Option<String>,
    pub phone: Option<String>,
    pub postal_code: Option<String>,
    pub country: Option<String>,
    pub purchase_date: Option<PurchaseDate>,
    pub total_amount: Option<Amount>,
    pub subtotal_amount: Option<Amount>,
    pub tax_amount: Option<Amount>,
    pub tip_amount: Option<Amount>,
    #[serde(default)]
    pub line_items: Vec<LineItem>,
    pub transaction_id: Option<String>,
    pub payment_method: Option<String>,
}

impl ExtractedFields {
    /// Trim strings, drop blank strings and empty line items
    pub fn normalized(mut self) -> Self {
        for field in [
            &mut self.store_name,
            &mut self.address,
            &mut self.phone,
            &mut self.postal_code,
            &mut self.country,
            &mut self.transaction_id,
            &mut self.payment_method,
        ] {
            *field = normalize_text(field.take());
        }

        self.line_items = self
            .line_items
            .into_iter()
            .map(|mut item| {
                item.name = normalize_text(item.name.take());
                item
            })
            .filter(|item| !item.is_empty())
            .collect();

        self
    }

    /// True if no field carries a value
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// Trim, and map blank strings to `None`
pub(crate) fn normalize_text(value: Option<String>) -> Option<String> {
    value.and_then(|s| {
        let trimmed = s.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

/// Normalized output of one provider call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderResult {
    pub provider: ProviderKind,
    /// Scalar confidence in [0.0, 1.0], `None` if the provider emits none
    pub confidence: Option<f64>,
    pub fields: ExtractedFields,
    /// Image-enhancement pass that produced this result (provider specific)
    pub preprocessing: Option<String>,
    /// Document type reported by the service, if any
    pub document_type: Option<String>,
}

impl ProviderResult {
    /// Build a result with normalized fields and sanitized confidence
    pub fn new(provider: ProviderKind, confidence: Option<f64>, fields: ExtractedFields) -> Self {
        Self {
            provider,
            confidence: sanitize_confidence(confidence),
            fields: fields.normalized(),
            preprocessing: None,
            document_type: None,
        }
    }

    pub fn with_preprocessing(mut self, label: impl Into<String>) -> Self {
        self.preprocessing = normalize_text(Some(label.into()));
        self
    }

    pub fn with_document_type(mut self, doc_type: impl Into<String>) -> Self {
        self.document_type = normalize_text(Some(doc_type.into()));
        self
    }
}

/// Clamp to [0.0, 1.0]; non-finite values become `None`
pub(crate) fn sanitize_confidence(confidence: Option<f64>) -> Option<f64> {
    confidence
        .filter(|c| c.is_finite())
        .map(|c| c.clamp(0.0, 1.0))
}

// ============================================================================
// Reconciliation Output
// ============================================================================

/// Reconciled value with provenance
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sourced<T> {
    pub value: T,
    pub provider: ProviderKind,
    /// Confidence of the result that supplied the value
    pub confidence: Option<f64>,
}

/// Which provider(s) a reconciled receipt came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProviderAttribution {
    Single(ProviderKind),
    /// Fields originate from more than one provider
    Hybrid,
}

impl fmt::Display for ProviderAttribution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderAttribution::Single(kind) => write!(f, "{}", kind),
            ProviderAttribution::Hybrid => f.write_str("Hybrid"),
        }
    }
}

impl FromStr for ProviderAttribution {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Hybrid" => Ok(ProviderAttribution::Hybrid),
            other => other.parse().map(ProviderAttribution::Single),
        }
    }
}

/// Fused structured receipt
///
/// Every present field was sourced from at least one `ProviderResult`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconciledReceipt {
    pub store_name: Option<Sourced<String>>,
    pub address: Option<Sourced<String>>,
    pub phone: Option<Sourced<String>>,
    pub postal_code: Option<Sourced<String>>,
    pub country: Option<Sourced<String>>,
    pub purchase_date: Option<Sourced<PurchaseDate>>,
    pub total_amount: Option<Sourced<Amount>>,
    pub subtotal_amount: Option<Sourced<Amount>>,
    pub tax_amount: Option<Sourced<Amount>>,
    pub tip_amount: Option<Sourced<Amount>>,
    pub line_items: Option<Sourced<Vec<LineItem>>>,
    pub transaction_id: Option<Sourced<String>>,
    pub payment_method: Option<Sourced<String>>,
    pub document_type: Option<Sourced<String>>,
    /// Maximum scalar confidence over all results
    pub ocr_confidence: Option<f64>,
    /// Maximum confidence over results that supplied a location field
    pub location_confidence: Option<f64>,
    /// `None` when no field was reconciled
    pub attribution: Option<ProviderAttribution>,
    /// Preprocessing label per provider (from that provider's most confident result)
    pub preprocessing: BTreeMap<ProviderKind, String>,
}

impl ReconciledReceipt {
    /// Key fields used for completeness scoring
    pub const KEY_FIELD_COUNT: usize = 4;

    /// Plain field values, provenance stripped
    pub fn fields(&self) -> ExtractedFields {
        fn value<T: Clone>(field: &Option<Sourced<T>>) -> Option<T> {
            field.as_ref().map(|s| s.value.clone())
        }

        ExtractedFields {
            store_name: value(&self.store_name),
            address: value(&self.address),
            phone: value(&self.phone),
            postal_code: value(&self.postal_code),
            country: value(&self.country),
            purchase_date: value(&self.purchase_date),
            total_amount: value(&self.total_amount),
            subtotal_amount: value(&self.subtotal_amount),
            tax_amount: value(&self.tax_amount),
            tip_amount: value(&self.tip_amount),
            line_items: value(&self.line_items).unwrap_or_default(),
            transaction_id: value(&self.transaction_id),
            payment_method: value(&self.payment_method),
        }
    }

    /// Field name → supplying provider, for every reconciled field
    pub fn field_sources(&self) -> BTreeMap<String, ProviderKind> {
        let mut sources = BTreeMap::new();
        let mut record = |name: &str, provider: Option<ProviderKind>| {
            if let Some(provider) = provider {
                sources.insert(name.to_string(), provider);
            }
        };

        record("store_name", self.store_name.as_ref().map(|s| s.provider));
        record("address", self.address.as_ref().map(|s| s.provider));
        record("phone", self.phone.as_ref().map(|s| s.provider));
        record("postal_code", self.postal_code.as_ref().map(|s| s.provider));
        record("country", self.country.as_ref().map(|s| s.provider));
        record("purchase_date", self.purchase_date.as_ref().map(|s| s.provider));
        record("total_amount", self.total_amount.as_ref().map(|s| s.provider));
        record("subtotal_amount", self.subtotal_amount.as_ref().map(|s| s.provider));
        record("tax_amount", self.tax_amount.as_ref().map(|s| s.provider));
        record("tip_amount", self.tip_amount.as_ref().map(|s| s.provider));
        record("line_items", self.line_items.as_ref().map(|s| s.provider));
        record("transaction_id", self.transaction_id.as_ref().map(|s| s.provider));
        record("payment_method", self.payment_method.as_ref().map(|s| s.provider));
        record("document_type", self.document_type.as_ref().map(|s| s.provider));

        sources
    }

    /// Fraction of key fields present: store name, purchase date, total, address
    pub fn completeness(&self) -> f64 {
        let present = [
            self.store_name.is_some(),
            self.purchase_date.is_some(),
            self.total_amount.is_some(),
            self.address.is_some(),
        ]
        .iter()
        .filter(|present| **present)
        .count();

        present as f64 / Self::KEY_FIELD_COUNT as f64
    }

    /// True if nothing was reconciled
    pub fn is_empty(&self) -> bool {
        self.field_sources().is_empty()
    }
}

/// Prior submission with the same (owner, fingerprint)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateConflict {
    pub existing_receipt_id: Uuid,
    pub fingerprint: ImageFingerprint,
}
