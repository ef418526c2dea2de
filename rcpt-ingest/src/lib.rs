//! rcpt-ingest library interface
//!
//! Receipt intake pipeline: fingerprinting, duplicate detection, concurrent
//! OCR extraction, result reconciliation, and the receipt lifecycle.
//!
//! Entry point: [`ProcessingOrchestrator::process_submission`].

pub mod config;
pub mod db;
pub mod error;
pub mod fusion;
pub mod models;
pub mod providers;
pub mod services;
pub mod types;
pub mod utils;
pub mod workflow;

pub use crate::config::PipelineConfig;
pub use crate::error::{PipelineStage, ProcessingOutcome, ValidationFailure};
pub use crate::models::Receipt;
pub use crate::types::{RawSubmission, ReconciledReceipt};
pub use crate::workflow::ProcessingOrchestrator;
