//! Checksums of uploaded files, recorded in the ingestion history.

use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 of raw file bytes.
pub fn calculate_checksum(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_consistency() {
        let content = b"time;station;rr\n01/01/2024 00:00;A;1,5\n";
        assert_eq!(calculate_checksum(content), calculate_checksum(content));
    }

    #[test]
    fn test_known_digest() {
        assert_eq!(
            calculate_checksum(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_different_content_different_checksum() {
        assert_ne!(calculate_checksum(b"a"), calculate_checksum(b"b"));
    }
}
