//! Content digest for uploaded images.
//!
//! The digest keys the scan cache and the correction store: identical bytes
//! always map to the same digest, so a re-uploaded photo can be matched to
//! its earlier analysis without re-running inference.

use sha2::{Digest, Sha256};

/// Compute the deterministic content digest of raw image bytes.
///
/// Returns the sha-256 of the bytes as lowercase hex (64 chars).
pub fn content_digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}
