use rand::Rng;
use sha2::{Digest, Sha256};

/// Generates a unique correlation ID for request tracing.
pub fn generate_correlation_id() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros();
    let random: u32 = rand::thread_rng().gen();
    format!("{:x}-{:08x}", timestamp & 0xFFFFFFFF, random)
}

/// First `bytes` bytes of the SHA-256 digest of `parts`, hex encoded. Parts
/// are separated by a unit separator so `("ab", "c")` and `("a", "bc")` differ.
pub fn short_digest(parts: &[&str], bytes: usize) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([0x1f]);
    }
    let digest = hasher.finalize();
    hex::encode(&digest[..bytes.min(digest.len())])
}

/// Lower-case hex encoding.
pub mod hex {
    pub fn encode(bytes: &[u8]) -> String {
        bytes.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_digest_separates_parts() {
        assert_ne!(short_digest(&["ab", "c"], 16), short_digest(&["a", "bc"], 16));
        assert_eq!(short_digest(&["x"], 16).len(), 32);
        assert_eq!(short_digest(&["x"], 4).len(), 8);
    }

    #[test]
    fn test_correlation_ids_differ() {
        assert_ne!(generate_correlation_id(), generate_correlation_id());
    }
}
