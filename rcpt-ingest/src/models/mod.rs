//! Receipt entity and lifecycle state machine

pub mod lifecycle;
pub mod receipt;

pub use lifecycle::{AcceptanceThresholds, ReceiptLifecycle, StatusTransition};
pub use receipt::Receipt;
