//! Persisted receipt entity
//!
//! Created by the orchestrator after reconciliation succeeds. Status is the
//! only field mutated after creation, and only through `ReceiptLifecycle`
//! (the setter is crate-private).

use crate::types::{ExtractedFields, ImageFingerprint, ProviderAttribution, ProviderKind, ReconciledReceipt};
use chrono::{DateTime, Utc};
use rcpt_common::events::ReceiptStatus;
use serde::Serialize;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Receipt entity
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Receipt {
    id: Uuid,
    owner_id: String,
    fields: ExtractedFields,
    /// Field name → provider that supplied it
    field_sources: BTreeMap<String, ProviderKind>,
    attribution: Option<ProviderAttribution>,
    document_type: Option<String>,
    fingerprint: ImageFingerprint,
    status: ReceiptStatus,
    ocr_confidence: Option<f64>,
    location_confidence: Option<f64>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    processed_at: Option<DateTime<Utc>>,
}

impl Receipt {
    /// Create a new receipt in `PendingValidation` from a reconciled result
    pub fn from_reconciled(
        owner_id: impl Into<String>,
        fingerprint: ImageFingerprint,
        reconciled: &ReconciledReceipt,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            owner_id: owner_id.into(),
            fields: reconciled.fields(),
            field_sources: reconciled.field_sources(),
            attribution: reconciled.attribution,
            document_type: reconciled.document_type.as_ref().map(|s| s.value.clone()),
            fingerprint,
            status: ReceiptStatus::PendingValidation,
            ocr_confidence: reconciled.ocr_confidence,
            location_confidence: reconciled.location_confidence,
            created_at: now,
            updated_at: now,
            processed_at: None,
        }
    }

    /// Rebuild a receipt loaded from storage
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn restore(
        id: Uuid,
        owner_id: String,
        fields: ExtractedFields,
        field_sources: BTreeMap<String, ProviderKind>,
        attribution: Option<ProviderAttribution>,
        document_type: Option<String>,
        fingerprint: ImageFingerprint,
        status: ReceiptStatus,
        ocr_confidence: Option<f64>,
        location_confidence: Option<f64>,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
        processed_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id,
            owner_id,
            fields,
            field_sources,
            attribution,
            document_type,
            fingerprint,
            status,
            ocr_confidence,
            location_confidence,
            created_at,
            updated_at,
            processed_at,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    pub fn fields(&self) -> &ExtractedFields {
        &self.fields
    }

    pub fn field_sources(&self) -> &BTreeMap<String, ProviderKind> {
        &self.field_sources
    }

    pub fn attribution(&self) -> Option<ProviderAttribution> {
        self.attribution
    }

    pub fn document_type(&self) -> Option<&str> {
        self.document_type.as_deref()
    }

    pub fn fingerprint(&self) -> &ImageFingerprint {
        &self.fingerprint
    }

    pub fn status(&self) -> ReceiptStatus {
        self.status
    }

    pub fn ocr_confidence(&self) -> Option<f64> {
        self.ocr_confidence
    }

    pub fn location_confidence(&self) -> Option<f64> {
        self.location_confidence
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn processed_at(&self) -> Option<DateTime<Utc>> {
        self.processed_at
    }

    /// Check if status is terminal (receipt is immutable)
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub(crate) fn set_status(&mut self, status: ReceiptStatus, at: DateTime<Utc>) {
        self.status = status;
        self.updated_at = at;
        if status == ReceiptStatus::Processed {
            self.processed_at = Some(at);
        }
    }
}
