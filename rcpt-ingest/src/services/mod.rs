//! Pipeline services for rcpt-ingest

pub mod duplicate_detector;
pub mod image_hasher;

pub use duplicate_detector::DuplicateDetector;
pub use image_hasher::ImageHasher;
