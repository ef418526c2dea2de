//! Image fingerprinting for duplicate detection
//!
//! Calculates the SHA-256 digest of the raw upload bytes. The digest is an
//! equality key only: identical bytes always yield the same fingerprint, and
//! there are no partial-match semantics.

use crate::types::ImageFingerprint;
use sha2::{Digest, Sha256};

/// Content hasher for uploaded images
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageHasher;

impl ImageHasher {
    pub fn new() -> Self {
        Self
    }

    /// Calculate the SHA-256 fingerprint of `bytes`
    ///
    /// Pure and infallible. Empty input still yields a valid digest; callers
    /// reject empty submissions upstream.
    pub fn fingerprint(&self, bytes: &[u8]) -> ImageFingerprint {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        let hash_hex = format!("{:x}", hasher.finalize());

        ImageFingerprint::from_digest_hex(hash_hex)
    }

    /// Fingerprint on the blocking pool (large images are CPU bound)
    pub async fn fingerprint_blocking(
        &self,
        bytes: std::sync::Arc<[u8]>,
    ) -> rcpt_common::Result<ImageFingerprint> {
        let hasher = *self;
        tokio::task::spawn_blocking(move || hasher.fingerprint(&bytes))
            .await
            .map_err(|e| rcpt_common::Error::Internal(format!("Hash calculation task failed: {}", e)))
    }
}
