//! Per-submission processing pipeline
//!
//! Stages, in order:
//! 1. Fingerprint the image
//! 2. Duplicate check (short-circuits before any provider call)
//! 3. Concurrent provider extraction
//! 4. Reconciliation
//! 5. Validation (lifecycle from `PendingValidation`)
//! 6. Persistence handoff and finalization
//!
//! Cancellation is checked between stages. Once provider calls have
//! returned, reconciliation always runs on what was received; a cancellation
//! observed after that aborts before persistence and hands the reconciled
//! data back in the outcome. A `save` that has been issued is never
//! abandoned, so a stored receipt always reaches a terminal status.

use crate::config::PipelineConfig;
use crate::db::ReceiptStore;
use crate::error::{PipelineStage, ProcessingOutcome, ProviderError, StorageError, ValidationFailure};
use crate::fusion::ResultReconciler;
use crate::models::{Receipt, ReceiptLifecycle};
use crate::providers::{build_provider_set, ProviderRun, ProviderSet};
use crate::services::{DuplicateDetector, ImageHasher};
use crate::types::{DuplicateConflict, RawSubmission, ReconciledReceipt};
use chrono::Utc;
use rcpt_common::events::{EventBus, ReceiptEvent, ReceiptStatus};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Top-level coordinator for receipt submissions
///
/// Holds no per-submission state; concurrent submissions are independent.
#[derive(Clone)]
pub struct ProcessingOrchestrator {
    hasher: ImageHasher,
    detector: DuplicateDetector,
    providers: ProviderSet,
    reconciler: ResultReconciler,
    lifecycle: ReceiptLifecycle,
    store: Arc<dyn ReceiptStore>,
    event_bus: EventBus,
}

impl ProcessingOrchestrator {
    pub fn new(
        store: Arc<dyn ReceiptStore>,
        providers: ProviderSet,
        reconciler: ResultReconciler,
        lifecycle: ReceiptLifecycle,
        event_bus: EventBus,
    ) -> Self {
        Self {
            hasher: ImageHasher::new(),
            detector: DuplicateDetector::new(Arc::clone(&store)),
            providers,
            reconciler,
            lifecycle,
            store,
            event_bus,
        }
    }

    /// Build from resolved configuration with HTTP provider clients
    pub fn from_config(config: &PipelineConfig, store: Arc<dyn ReceiptStore>, event_bus: EventBus) -> Self {
        Self::new(
            store,
            build_provider_set(config),
            ResultReconciler::default(),
            ReceiptLifecycle::new(config.thresholds, event_bus.clone()),
            event_bus,
        )
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    /// Process one submission to a terminal outcome
    ///
    /// # Returns
    /// - `Ok(receipt)` in `Processed` status
    /// - `Err(Duplicate)` if the owner already submitted this image
    /// - `Err(ValidationFailed)` on provider failure or rejection
    /// - `Err(ProcessingFailed)` on storage failure
    /// - `Err(Cancelled)` if `cancel` fired; carries the reconciled data when
    ///   provider calls had already completed
    pub async fn process_submission(
        &self,
        submission: RawSubmission,
        cancel: CancellationToken,
    ) -> Result<Receipt, ProcessingOutcome> {
        let RawSubmission {
            owner_id,
            filename,
            content,
        } = submission;

        info!(owner_id = %owner_id, filename = %filename, bytes = content.len(), "Processing submission");

        if content.is_empty() {
            warn!(owner_id = %owner_id, filename = %filename, "Rejecting empty submission");
            return Err(ProcessingOutcome::ValidationFailed {
                receipt_id: None,
                reason: ValidationFailure::EmptySubmission,
            });
        }

        // Stage 1: fingerprint
        if cancel.is_cancelled() {
            return Err(self.cancelled(&owner_id, PipelineStage::Fingerprinting, None));
        }

        let image: Arc<[u8]> = content.into();
        let fingerprint = self
            .hasher
            .fingerprint_blocking(Arc::clone(&image))
            .await
            .map_err(|e| {
                error!(owner_id = %owner_id, error = %e, "Fingerprinting failed");
                ProcessingOutcome::ProcessingFailed {
                    receipt_id: None,
                    reason: e.to_string(),
                }
            })?;

        debug!(owner_id = %owner_id, fingerprint = %fingerprint, "Image fingerprinted");

        self.event_bus.emit_lossy(ReceiptEvent::SubmissionReceived {
            owner_id: owner_id.clone(),
            fingerprint: fingerprint.to_string(),
            timestamp: Utc::now(),
        });

        // Stage 2: duplicate check
        if cancel.is_cancelled() {
            return Err(self.cancelled(&owner_id, PipelineStage::DuplicateCheck, None));
        }

        match self.detector.check_duplicate(&owner_id, &fingerprint, &cancel).await {
            Ok(None) => {}
            Ok(Some(conflict)) => {
                self.event_bus.emit_lossy(ReceiptEvent::DuplicateRejected {
                    owner_id: owner_id.clone(),
                    fingerprint: fingerprint.to_string(),
                    existing_receipt_id: conflict.existing_receipt_id,
                    timestamp: Utc::now(),
                });
                return Err(ProcessingOutcome::Duplicate(conflict));
            }
            Err(StorageError::Cancelled) => {
                return Err(self.cancelled(&owner_id, PipelineStage::DuplicateCheck, None));
            }
            Err(e) => {
                error!(owner_id = %owner_id, error = %e, "Duplicate check failed");
                return Err(ProcessingOutcome::ProcessingFailed {
                    receipt_id: None,
                    reason: format!("Duplicate check failed: {}", e),
                });
            }
        }

        // Stage 3: extraction
        if cancel.is_cancelled() {
            return Err(self.cancelled(&owner_id, PipelineStage::Extraction, None));
        }

        debug!(owner_id = %owner_id, providers = self.providers.count(), "Calling OCR providers");
        let run = self.providers.extract_all(image, &cancel).await;

        info!(
            owner_id = %owner_id,
            succeeded = run.results.len(),
            failed = run.failures.len(),
            "Provider extraction complete"
        );

        // Stage 4: reconciliation runs on whatever was received, even if cancelled
        let reconciled = match self.reconciler.reconcile(&run.results) {
            Ok(reconciled) => reconciled,
            Err(e) => {
                if cancel.is_cancelled() {
                    return Err(self.cancelled(&owner_id, PipelineStage::Extraction, None));
                }
                let reason = no_result_reason(&run).unwrap_or_else(|| e.into());
                warn!(owner_id = %owner_id, reason = %reason, "No usable provider result");
                return Err(ProcessingOutcome::ValidationFailed {
                    receipt_id: None,
                    reason,
                });
            }
        };

        // Last cancellation point: nothing below awaits before `save`, and a
        // `save` that has been issued runs to completion
        if cancel.is_cancelled() {
            return Err(self.cancelled(&owner_id, PipelineStage::Reconciliation, Some(reconciled)));
        }

        // Stage 5: validation
        let mut receipt = Receipt::from_reconciled(owner_id.as_str(), fingerprint, &reconciled);

        if let Err(reason) = self.lifecycle.evaluate(&reconciled) {
            self.advance(&mut receipt, ReceiptStatus::ValidationFailed)?;
            info!(
                receipt_id = %receipt.id(),
                owner_id = %owner_id,
                reason = %reason,
                "Receipt failed validation"
            );
            self.save_audit_record(&receipt).await;
            return Err(ProcessingOutcome::ValidationFailed {
                receipt_id: Some(receipt.id()),
                reason,
            });
        }

        self.advance(&mut receipt, ReceiptStatus::Validated)?;

        // Stage 6: persistence
        self.advance(&mut receipt, ReceiptStatus::Processing)?;

        let saved = self.store.save(&receipt).await;
        let mut receipt = match saved {
            Ok(saved) => saved,
            Err(e @ StorageError::FingerprintConflict { .. }) => {
                return Err(self.lost_duplicate_race(&mut receipt, e).await);
            }
            Err(e) => return Err(self.fail_processing(&mut receipt, e, false).await),
        };

        let processed_at = Utc::now();
        if let Err(e) = self
            .store
            .update_status(receipt.id(), ReceiptStatus::Processed, processed_at, Some(processed_at))
            .await
        {
            return Err(self.fail_processing(&mut receipt, e, true).await);
        }
        self.advance_at(&mut receipt, ReceiptStatus::Processed, processed_at)?;

        info!(
            receipt_id = %receipt.id(),
            owner_id = %owner_id,
            attribution = ?receipt.attribution(),
            ocr_confidence = ?receipt.ocr_confidence(),
            "Receipt processed"
        );

        Ok(receipt)
    }

    fn advance(&self, receipt: &mut Receipt, to: ReceiptStatus) -> Result<(), ProcessingOutcome> {
        self.advance_at(receipt, to, Utc::now())
    }

    fn advance_at(
        &self,
        receipt: &mut Receipt,
        to: ReceiptStatus,
        at: chrono::DateTime<Utc>,
    ) -> Result<(), ProcessingOutcome> {
        self.lifecycle
            .transition_at(receipt, to, at)
            .map(|_| ())
            .map_err(|e| {
                error!(receipt_id = %receipt.id(), error = %e, "Lifecycle transition rejected");
                ProcessingOutcome::ProcessingFailed {
                    receipt_id: Some(receipt.id()),
                    reason: e.to_string(),
                }
            })
    }

    /// Move a receipt to `ProcessingFailed` after a storage error
    ///
    /// `persisted` marks whether the record exists and should be updated.
    async fn fail_processing(
        &self,
        receipt: &mut Receipt,
        err: StorageError,
        persisted: bool,
    ) -> ProcessingOutcome {
        error!(receipt_id = %receipt.id(), error = %err, "Persistence failed");

        let at = Utc::now();
        if let Err(e) = self.lifecycle.transition_at(receipt, ReceiptStatus::ProcessingFailed, at) {
            warn!(receipt_id = %receipt.id(), error = %e, "Could not mark receipt failed");
        }

        if persisted {
            if let Err(e) = self
                .store
                .update_status(receipt.id(), ReceiptStatus::ProcessingFailed, at, None)
                .await
            {
                warn!(receipt_id = %receipt.id(), error = %e, "Failed to record processing failure");
            }
        }

        ProcessingOutcome::ProcessingFailed {
            receipt_id: Some(receipt.id()),
            reason: err.to_string(),
        }
    }

    /// Another submission of the same image was stored while this one was
    /// in flight; report it as a duplicate of the stored receipt
    async fn lost_duplicate_race(&self, receipt: &mut Receipt, err: StorageError) -> ProcessingOutcome {
        let existing = self
            .store
            .find_by_owner_and_fingerprint(receipt.owner_id(), receipt.fingerprint())
            .await;

        let existing = match existing {
            Ok(Some(existing)) => existing,
            Ok(None) => return self.fail_processing(receipt, err, false).await,
            Err(e) => return self.fail_processing(receipt, e, false).await,
        };

        warn!(
            receipt_id = %receipt.id(),
            existing_receipt_id = %existing.id(),
            "Concurrent submission of the same image already stored"
        );
        if let Err(e) = self.lifecycle.transition(receipt, ReceiptStatus::ProcessingFailed) {
            warn!(receipt_id = %receipt.id(), error = %e, "Could not mark receipt failed");
        }

        let conflict = DuplicateConflict {
            existing_receipt_id: existing.id(),
            fingerprint: receipt.fingerprint().clone(),
        };
        self.event_bus.emit_lossy(ReceiptEvent::DuplicateRejected {
            owner_id: receipt.owner_id().to_string(),
            fingerprint: conflict.fingerprint.to_string(),
            existing_receipt_id: conflict.existing_receipt_id,
            timestamp: Utc::now(),
        });

        ProcessingOutcome::Duplicate(conflict)
    }

    /// Best-effort write of a rejected receipt; never a conflict for resubmission
    async fn save_audit_record(&self, receipt: &Receipt) {
        if let Err(e) = self.store.save(receipt).await {
            warn!(receipt_id = %receipt.id(), error = %e, "Failed to store rejected receipt");
        }
    }

    /// Cancellation outcome; only reached before any receipt is created
    fn cancelled(
        &self,
        owner_id: &str,
        stage: PipelineStage,
        reconciled: Option<ReconciledReceipt>,
    ) -> ProcessingOutcome {
        info!(owner_id, stage = %stage, "Submission cancelled");

        self.event_bus.emit_lossy(ReceiptEvent::SubmissionCancelled {
            owner_id: owner_id.to_string(),
            stage: stage.to_string(),
            timestamp: Utc::now(),
        });

        ProcessingOutcome::Cancelled {
            stage,
            reconciled: reconciled.map(Box::new),
        }
    }
}

/// Failure reason when no provider produced a result
///
/// `UnprocessableInput` only if every provider rejected the image.
fn no_result_reason(run: &ProviderRun) -> Option<ValidationFailure> {
    if !run.all_unprocessable() {
        return None;
    }

    let message = run
        .failures
        .iter()
        .filter_map(|f| match &f.error {
            ProviderError::UnprocessableInput(msg) => Some(format!("{}: {}", f.provider, msg)),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("; ");

    Some(ValidationFailure::UnprocessableInput { message })
}
