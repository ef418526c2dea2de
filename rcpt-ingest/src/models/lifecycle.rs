//! Receipt lifecycle state machine
//!
//! ```text
//! PENDING_VALIDATION ─┬─> VALIDATED ──> PROCESSING ─┬─> PROCESSED
//!                     ├─> VALIDATION_FAILED         ├─> PROCESSING_FAILED
//!                     └─> CANCELLED  <──────────────┴── (also from VALIDATED)
//! ```
//!
//! No transition skips a state. Terminal receipts are immutable. Transitions
//! take `&mut Receipt`, so two concurrent transitions on the same receipt
//! cannot compile; different receipts need no locking.

use crate::error::{LifecycleError, ValidationFailure};
use crate::models::Receipt;
use crate::types::ReconciledReceipt;
use chrono::{DateTime, Utc};
use rcpt_common::events::{EventBus, ReceiptEvent, ReceiptStatus};
use serde::Serialize;
use uuid::Uuid;

/// Default minimum overall OCR confidence for `Validated`
pub const DEFAULT_MIN_CONFIDENCE: f64 = 0.70;

/// Default minimum key-field completeness for `Validated`
pub const DEFAULT_MIN_COMPLETENESS: f64 = 0.50;

/// Acceptance thresholds for `PendingValidation -> Validated`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AcceptanceThresholds {
    pub min_confidence: f64,
    pub min_completeness: f64,
}

impl Default for AcceptanceThresholds {
    fn default() -> Self {
        Self {
            min_confidence: DEFAULT_MIN_CONFIDENCE,
            min_completeness: DEFAULT_MIN_COMPLETENESS,
        }
    }
}

/// Status transition record
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusTransition {
    pub receipt_id: Uuid,
    pub old_status: ReceiptStatus,
    pub new_status: ReceiptStatus,
    pub transitioned_at: DateTime<Utc>,
}

/// Lifecycle state machine
///
/// Sole mutator of receipt status and confidence. Every transition is
/// published as `ReceiptEvent::StatusChanged`.
#[derive(Clone)]
pub struct ReceiptLifecycle {
    thresholds: AcceptanceThresholds,
    event_bus: EventBus,
}

impl ReceiptLifecycle {
    pub fn new(thresholds: AcceptanceThresholds, event_bus: EventBus) -> Self {
        Self {
            thresholds,
            event_bus,
        }
    }

    pub fn thresholds(&self) -> AcceptanceThresholds {
        self.thresholds
    }

    /// Check if `from -> to` is a legal single-step transition
    pub fn is_allowed(from: ReceiptStatus, to: ReceiptStatus) -> bool {
        use ReceiptStatus::*;

        matches!(
            (from, to),
            (PendingValidation, Validated)
                | (PendingValidation, ValidationFailed)
                | (PendingValidation, Cancelled)
                | (Validated, Processing)
                | (Validated, Cancelled)
                | (Processing, Processed)
                | (Processing, ProcessingFailed)
                | (Processing, Cancelled)
        )
    }

    /// Transition `receipt` to `to` now
    pub fn transition(
        &self,
        receipt: &mut Receipt,
        to: ReceiptStatus,
    ) -> Result<StatusTransition, LifecycleError> {
        self.transition_at(receipt, to, Utc::now())
    }

    /// Transition `receipt` to `to` with an explicit timestamp
    ///
    /// The orchestrator uses this to keep the in-memory receipt aligned with
    /// the timestamp already written by the storage collaborator.
    pub fn transition_at(
        &self,
        receipt: &mut Receipt,
        to: ReceiptStatus,
        at: DateTime<Utc>,
    ) -> Result<StatusTransition, LifecycleError> {
        let from = receipt.status();

        if from.is_terminal() {
            return Err(LifecycleError::Immutable(from));
        }
        if !Self::is_allowed(from, to) {
            return Err(LifecycleError::InvalidTransition { from, to });
        }

        receipt.set_status(to, at);

        tracing::debug!(
            receipt_id = %receipt.id(),
            old_status = %from,
            new_status = %to,
            "Receipt status transition"
        );

        self.event_bus.emit_lossy(ReceiptEvent::StatusChanged {
            receipt_id: receipt.id(),
            old_status: from,
            new_status: to,
            timestamp: at,
        });

        Ok(StatusTransition {
            receipt_id: receipt.id(),
            old_status: from,
            new_status: to,
            transitioned_at: at,
        })
    }

    /// Acceptance decision for a reconciled result
    ///
    /// Checked in order:
    /// 1. Reported document type (if any) must be a receipt
    /// 2. Overall confidence and completeness must meet the thresholds
    /// 3. Store name or total amount must be present
    pub fn evaluate(&self, reconciled: &ReconciledReceipt) -> Result<(), ValidationFailure> {
        if let Some(doc_type) = &reconciled.document_type {
            if !doc_type.value.to_lowercase().contains("receipt") {
                return Err(ValidationFailure::NotReceiptLike {
                    message: format!("Document type '{}' is not a receipt", doc_type.value),
                });
            }
        }

        let confidence = reconciled.ocr_confidence.unwrap_or(0.0);
        let completeness = reconciled.completeness();
        if confidence < self.thresholds.min_confidence
            || completeness < self.thresholds.min_completeness
        {
            return Err(ValidationFailure::LowConfidence {
                confidence,
                completeness,
            });
        }

        if reconciled.store_name.is_none() && reconciled.total_amount.is_none() {
            return Err(ValidationFailure::NotReceiptLike {
                message: "Neither store name nor total amount was extracted".to_string(),
            });
        }

        Ok(())
    }
}
