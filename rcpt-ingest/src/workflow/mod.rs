//! Submission workflow
//!
//! `ProcessingOrchestrator` drives every other component for one submission;
//! none of the components call back into it.

pub mod orchestrator;

pub use orchestrator::ProcessingOrchestrator;
