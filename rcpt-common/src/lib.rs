//! # RCPT Common Library
//!
//! Shared code for the receipt services including:
//! - Error types
//! - Bootstrap configuration loading and root folder resolution
//! - Receipt lifecycle events (`ReceiptEvent`) and the broadcast `EventBus`

pub mod config;
pub mod error;
pub mod events;

pub use error::{Error, Result};
