//! Duplicate submission detection
//!
//! Duplicates are per owner: two owners submitting the same image are not
//! flagged. Receipts that ended in `ValidationFailed` or `Cancelled` never
//! count as a conflict, so a user can retry the same image.

use crate::db::{ReceiptStore, DUPLICATE_EXEMPT_STATUSES};
use crate::error::StorageError;
use crate::types::{DuplicateConflict, ImageFingerprint};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Duplicate detector over the persistence collaborator
#[derive(Clone)]
pub struct DuplicateDetector {
    store: Arc<dyn ReceiptStore>,
}

impl DuplicateDetector {
    pub fn new(store: Arc<dyn ReceiptStore>) -> Self {
        Self { store }
    }

    /// Check for a prior submission of `fingerprint` by `owner_id`
    ///
    /// # Returns
    /// - `Ok(None)` if no conflicting receipt exists
    /// - `Ok(Some(conflict))` identifying the earliest conflicting receipt
    ///
    /// # Errors
    /// `StorageError::Cancelled` if `cancel` fires before the query completes.
    pub async fn check_duplicate(
        &self,
        owner_id: &str,
        fingerprint: &ImageFingerprint,
        cancel: &CancellationToken,
    ) -> Result<Option<DuplicateConflict>, StorageError> {
        tracing::debug!(owner_id, fingerprint = %fingerprint, "Checking for duplicate submission");

        let existing = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(StorageError::Cancelled),
            found = self.store.find_by_owner_and_fingerprint(owner_id, fingerprint) => found?,
        };

        // ReceiptStore implementations are not required to filter exempt statuses
        let conflict = existing
            .filter(|receipt| !DUPLICATE_EXEMPT_STATUSES.contains(&receipt.status()))
            .map(|receipt| DuplicateConflict {
                existing_receipt_id: receipt.id(),
                fingerprint: fingerprint.clone(),
            });

        match &conflict {
            Some(c) => tracing::info!(
                owner_id,
                fingerprint = %fingerprint,
                existing_receipt_id = %c.existing_receipt_id,
                "Duplicate submission detected"
            ),
            None => tracing::debug!(owner_id, fingerprint = %fingerprint, "No duplicate found"),
        }

        Ok(conflict)
    }
}
