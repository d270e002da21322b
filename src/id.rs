//! ID generation for Abelana photos.

use chrono::{DateTime, Utc};
use rand::Rng;
use sha2::{Digest, Sha256};

/// Generate a photo suffix from owner + creation time + entropy.
/// Format: 12 hex chars of SHA256(owner + timestamp + random)
pub fn generate_photo_suffix(owner_id: &str, created_at: DateTime<Utc>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(owner_id.as_bytes());
    hasher.update(created_at.timestamp_nanos_opt().unwrap_or(0).to_le_bytes());
    // Same-instant uploads must still differ
    hasher.update(rand::rng().random::<[u8; 8]>());
    let hash = hasher.finalize();
    hash[..6].iter().map(|b| format!("{:02x}", b)).collect()
}
