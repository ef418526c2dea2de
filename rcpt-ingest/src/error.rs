//! Error and outcome types for rcpt-ingest
//!
//! Provider, reconciliation, storage and lifecycle errors are kept apart so
//! the orchestrator can map each one to exactly one terminal outcome.

use crate::types::{DuplicateConflict, ReconciledReceipt};
use rcpt_common::events::ReceiptStatus;
use serde::Serialize;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// OCR provider call failure
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// Network failure, timeout, or 5xx/429 from the service (retryable)
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// Malformed or unsupported image (not retryable)
    #[error("Unprocessable input: {0}")]
    UnprocessableInput(String),

    /// Credentials or endpoint rejected by the service (not retryable)
    #[error("Provider misconfigured: {0}")]
    Misconfigured(String),

    /// Success status with a body that does not decode (not retryable)
    #[error("Malformed provider response: {0}")]
    MalformedResponse(String),

    /// Cancellation observed before the call completed
    #[error("Provider call cancelled")]
    Cancelled,
}

impl ProviderError {
    /// Whether the calling client may retry this failure
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProviderError::ProviderUnavailable(_))
    }
}

/// Reconciliation failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReconcileError {
    /// All providers failed or produced nothing to reconcile
    #[error("No usable provider result")]
    NoUsableResult,
}

/// Persistence collaborator failure
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Row could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Receipt not found: {0}")]
    NotFound(Uuid),

    /// A live receipt for the same (owner, fingerprint) was stored concurrently
    #[error("Receipt for owner {owner_id} with fingerprint {fingerprint} already stored")]
    FingerprintConflict { owner_id: String, fingerprint: String },

    /// Cancellation observed before the storage call completed
    #[error("Storage call cancelled")]
    Cancelled,
}

impl From<rcpt_common::Error> for StorageError {
    fn from(err: rcpt_common::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

/// Lifecycle state machine violation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LifecycleError {
    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition {
        from: ReceiptStatus,
        to: ReceiptStatus,
    },

    /// Receipt already reached a terminal status
    #[error("Receipt is immutable in terminal status {0}")]
    Immutable(ReceiptStatus),
}

/// Reason a submission ended in `ValidationFailed`
#[derive(Debug, Clone, PartialEq, Serialize, Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValidationFailure {
    /// Submission carried no image bytes
    #[error("Submission is empty")]
    EmptySubmission,

    /// Every provider failed or produced nothing usable
    #[error("No usable result from any OCR provider")]
    NoUsableResult,

    /// Every provider rejected the image as unprocessable
    #[error("Unprocessable input: {message}")]
    UnprocessableInput { message: String },

    /// Reconciled result below the acceptance thresholds
    #[error("Low confidence (confidence {confidence:.2}, completeness {completeness:.2})")]
    LowConfidence { confidence: f64, completeness: f64 },

    /// Reconciled result does not plausibly represent a receipt
    #[error("Not receipt-like: {message}")]
    NotReceiptLike { message: String },
}

impl From<ReconcileError> for ValidationFailure {
    fn from(err: ReconcileError) -> Self {
        match err {
            ReconcileError::NoUsableResult => ValidationFailure::NoUsableResult,
        }
    }
}

/// Pipeline stage, reported with cancellation outcomes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Fingerprinting,
    DuplicateCheck,
    Extraction,
    Reconciliation,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineStage::Fingerprinting => "fingerprinting",
            PipelineStage::DuplicateCheck => "duplicate_check",
            PipelineStage::Extraction => "extraction",
            PipelineStage::Reconciliation => "reconciliation",
        };
        f.write_str(name)
    }
}

/// Non-success outcome of `process_submission`
///
/// Every variant is terminal: any receipt created for the submission has
/// reached a terminal status before this value is returned.
#[derive(Debug, Serialize, Error)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ProcessingOutcome {
    /// Same image already submitted by this owner
    #[error("Duplicate of receipt {}", .0.existing_receipt_id)]
    Duplicate(DuplicateConflict),

    #[error("Validation failed: {reason}")]
    ValidationFailed {
        receipt_id: Option<Uuid>,
        reason: ValidationFailure,
    },

    #[error("Processing failed: {reason}")]
    ProcessingFailed {
        receipt_id: Option<Uuid>,
        reason: String,
    },

    /// Cancelled by the caller; carries the reconciled data if reconciliation ran
    #[error("Cancelled during {stage}")]
    Cancelled {
        stage: PipelineStage,
        reconciled: Option<Box<ReconciledReceipt>>,
    },
}
