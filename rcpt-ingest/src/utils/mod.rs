//! Utility modules for rcpt-ingest

pub mod retry;

pub use retry::{retry_transient, RetryPolicy};
