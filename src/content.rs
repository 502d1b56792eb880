//! Content normalization and hashing.
//!
//! Every content hash in the system is `"sha256:"` + lowercase hex of the
//! SHA-256 digest of the normalized body. Normalization folds CRLF and bare
//! CR line endings to LF and trims leading/trailing whitespace, so the same
//! logical document hashes identically regardless of which backend stored it.

use sha2::{Digest, Sha256};

pub const HASH_PREFIX: &str = "sha256:";

/// Fold line endings to LF and trim surrounding whitespace.
pub fn normalize(body: &str) -> String {
    body.replace("\r\n", "\n").replace('\r', "\n").trim().to_string()
}

/// Hash a body, normalizing text content first.
///
/// Non-UTF-8 bodies are hashed as raw bytes; line-ending normalization only
/// makes sense for text.
pub fn content_hash(body: &[u8]) -> String {
    let digest = match std::str::from_utf8(body) {
        Ok(text) => Sha256::digest(normalize(text).as_bytes()),
        Err(_) => Sha256::digest(body),
    };

    let mut out = String::with_capacity(HASH_PREFIX.len() + digest.len() * 2);
    out.push_str(HASH_PREFIX);
    for byte in digest {
        out.push_str(&format!("{:02x}", byte));
    }
    out
}

/// Strip the `sha256:` prefix if present.
pub fn strip_hash_prefix(hash: &str) -> &str {
    hash.strip_prefix(HASH_PREFIX).unwrap_or(hash)
}

/// Compare two hashes, ignoring an optional `sha256:` prefix on either side.
pub fn hashes_equal(a: &str, b: &str) -> bool {
    strip_hash_prefix(a).eq_ignore_ascii_case(strip_hash_prefix(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_folds_line_endings() {
        assert_eq!(normalize("a\r\nb\rc\n"), "a\nb\nc");
        assert_eq!(normalize("  spaced  "), "spaced");
    }

    #[test]
    fn test_hash_is_prefixed_lowercase_hex() {
        let hash = content_hash(b"hello");
        assert!(hash.starts_with("sha256:"));
        assert_eq!(hash.len(), "sha256:".len() + 64);
        assert!(hash[7..].chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_hash_determinism_across_line_endings() {
        let unix = content_hash(b"line one\nline two\n");
        let dos = content_hash(b"line one\r\nline two\r\n");
        let mac = content_hash(b"line one\rline two\r");
        assert_eq!(unix, dos);
        assert_eq!(unix, mac);
    }

    #[test]
    fn test_hashes_equal_prefix_insensitive() {
        let hash = content_hash(b"doc");
        let bare = strip_hash_prefix(&hash);
        assert!(hashes_equal(&hash, bare));
        assert!(hashes_equal(bare, &hash));
        assert!(!hashes_equal(&hash, &content_hash(b"other")));
    }

    #[test]
    fn test_binary_body_hashes_raw() {
        let body = [0xff, 0xfe, 0x00, 0x01];
        let first = content_hash(&body);
        let second = content_hash(&body);
        assert_eq!(first, second);
    }
}
