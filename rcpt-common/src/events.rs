//! Receipt lifecycle events and the broadcast event bus
//!
//! Status transitions are externally visible: every transition is emitted on
//! the `EventBus` so that UI or indexing subscribers can follow a receipt
//! without polling storage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Receipt lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReceiptStatus {
    /// Reconciled, awaiting acceptance decision
    PendingValidation,
    /// Accepted, awaiting persistence
    Validated,
    /// Rejected at validation (terminal)
    ValidationFailed,
    /// Persistence/finalization in progress
    Processing,
    /// Persisted and finalized (terminal)
    Processed,
    /// Failed after validation (terminal)
    ProcessingFailed,
    /// Cancelled by the caller before finalization (terminal)
    Cancelled,
}

impl ReceiptStatus {
    /// Check if status is terminal (no further transitions)
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ReceiptStatus::ValidationFailed
                | ReceiptStatus::Processed
                | ReceiptStatus::ProcessingFailed
                | ReceiptStatus::Cancelled
        )
    }

    /// Storage representation
    pub fn as_str(self) -> &'static str {
        match self {
            ReceiptStatus::PendingValidation => "PENDING_VALIDATION",
            ReceiptStatus::Validated => "VALIDATED",
            ReceiptStatus::ValidationFailed => "VALIDATION_FAILED",
            ReceiptStatus::Processing => "PROCESSING",
            ReceiptStatus::Processed => "PROCESSED",
            ReceiptStatus::ProcessingFailed => "PROCESSING_FAILED",
            ReceiptStatus::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for ReceiptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReceiptStatus {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING_VALIDATION" => Ok(ReceiptStatus::PendingValidation),
            "VALIDATED" => Ok(ReceiptStatus::Validated),
            "VALIDATION_FAILED" => Ok(ReceiptStatus::ValidationFailed),
            "PROCESSING" => Ok(ReceiptStatus::Processing),
            "PROCESSED" => Ok(ReceiptStatus::Processed),
            "PROCESSING_FAILED" => Ok(ReceiptStatus::ProcessingFailed),
            "CANCELLED" => Ok(ReceiptStatus::Cancelled),
            other => Err(crate::Error::InvalidInput(format!(
                "Unknown receipt status: {}",
                other
            ))),
        }
    }
}

/// Receipt pipeline events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ReceiptEvent {
    /// Submission accepted for processing
    SubmissionReceived {
        owner_id: String,
        fingerprint: String,
        timestamp: DateTime<Utc>,
    },

    /// Submission short-circuited as a duplicate
    DuplicateRejected {
        owner_id: String,
        fingerprint: String,
        existing_receipt_id: Uuid,
        timestamp: DateTime<Utc>,
    },

    /// Receipt status transition
    StatusChanged {
        receipt_id: Uuid,
        old_status: ReceiptStatus,
        new_status: ReceiptStatus,
        timestamp: DateTime<Utc>,
    },

    /// Submission cancelled by the caller
    SubmissionCancelled {
        owner_id: String,
        stage: String,
        timestamp: DateTime<Utc>,
    },
}

/// Broadcast event bus for receipt events
///
/// Cloning is cheap; all clones share the same channel.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ReceiptEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// `capacity` is the number of events buffered before the oldest are dropped
    /// for slow subscribers.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<ReceiptEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: ReceiptEvent,
    ) -> Result<usize, broadcast::error::SendError<ReceiptEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: ReceiptEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
