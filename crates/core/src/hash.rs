//! Dedup-key derivation.
//!
//! A dedup key identifies one version of the instruction text. Results
//! are stored per (identifier, target, dedup key), so editing the
//! instructions triggers recomputation without clobbering prior runs.

use sha2::{Digest, Sha256};

/// Number of hex characters kept from the full digest. Short enough to
/// read in file listings, long enough that collisions are not a
/// practical concern for instruction versions.
const DEDUP_KEY_LEN: usize = 16;

/// Compute a SHA-256 hex digest of the given bytes.
pub fn sha256_hex(data: &[u8]) -> String {
    let hash = Sha256::digest(data);
    format!("{hash:x}")
}

/// Derive the dedup key for an instruction text.
///
/// Whitespace is trimmed first so that trailing-newline edits do not
/// produce a new key.
pub fn dedup_key(instruction_text: &str) -> String {
    let mut hex = sha256_hex(instruction_text.trim().as_bytes());
    hex.truncate(DEDUP_KEY_LEN);
    hex
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_produces_known_hash() {
        let hash = sha256_hex(b"");
        assert_eq!(
            hash,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn dedup_key_is_stable_and_short() {
        let key = dedup_key("Return only the JSON object described.");
        assert_eq!(key.len(), 16);
        assert_eq!(key, dedup_key("Return only the JSON object described."));
    }

    #[test]
    fn dedup_key_ignores_surrounding_whitespace() {
        assert_eq!(dedup_key("prompt v3"), dedup_key("\n  prompt v3  \n"));
    }

    #[test]
    fn different_instructions_get_different_keys() {
        assert_ne!(dedup_key("prompt v1"), dedup_key("prompt v2"));
    }
}
