/// Compute the BLAKE3 hash of a byte slice, returning the hex-encoded digest.
#[must_use]
pub fn blake3_bytes(data: &[u8]) -> String {
    blake3::hash(data).to_hex().to_string()
}

/// Compute the BLAKE3 hash of an ordered sequence of string parts.
///
/// Every part is length-prefixed, so `["ab", "c"]` and `["a", "bc"]` hash differently.
#[must_use]
pub fn blake3_parts(parts: &[&str]) -> String {
    let mut hasher = blake3::Hasher::new();
    for part in parts {
        hasher.update(&(part.len() as u64).to_le_bytes());
        hasher.update(part.as_bytes());
    }
    hasher.finalize().to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blake3_bytes() {
        let hash = blake3_bytes(b"hello world");
        assert_eq!(
            hash,
            "d74981efa70a0c880b8d8c1985d075dbcbf679b99a5f9914e5aaf96b831a9e24"
        );
    }

    #[test]
    fn test_blake3_parts_is_deterministic() {
        assert_eq!(blake3_parts(&["types", "node"]), blake3_parts(&["types", "node"]));
    }

    #[test]
    fn test_blake3_parts_boundaries_matter() {
        assert_ne!(blake3_parts(&["ab", "c"]), blake3_parts(&["a", "bc"]));
        assert_ne!(blake3_parts(&["", "x"]), blake3_parts(&["x"]));
    }
}
