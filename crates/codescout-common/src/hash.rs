//! Content hashing helpers
//!
//! SHA-1 is used as a content fingerprint (file hashes, chunk hashes,
//! slug suffixes), never as a security primitive.

use sha1::{Digest, Sha1};

/// Lowercase hex SHA-1 digest of arbitrary bytes
pub fn sha1_hex(data: impl AsRef<[u8]>) -> String {
    let mut hasher = Sha1::new();
    hasher.update(data.as_ref());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha1_hex_stable() {
        let a = sha1_hex("fn main() {}");
        let b = sha1_hex("fn main() {}");
        assert_eq!(a, b, "Same content should produce same hash");
        assert_eq!(a.len(), 40);
    }

    #[test]
    fn test_sha1_hex_known_vector() {
        // sha1("abc")
        assert_eq!(sha1_hex("abc"), "a9993e364706816aba3e25717850c26c9cd0d89d");
    }

    #[test]
    fn test_sha1_hex_differs() {
        assert_ne!(sha1_hex("a"), sha1_hex("b"));
    }
}
