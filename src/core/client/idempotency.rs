use std::time::{SystemTime, UNIX_EPOCH};

use sha2::{Digest, Sha256};

/// Length of a generated idempotency key, in hex characters.
pub(crate) const KEY_LENGTH: usize = 32;

/// Produce a collision-resistant token for one mutating request.
///
/// Hashes a nanosecond timestamp together with a random value and truncates
/// the digest to 32 hex characters. Cheap enough to call on every mutating
/// request. Callers coordinating idempotency across their own retry logic
/// should supply an explicit key instead.
pub fn generate_idempotency_key() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let noise: u128 = rand::random();

    let mut hasher = Sha256::new();
    hasher.update(nanos.to_be_bytes());
    hasher.update(noise.to_be_bytes());
    let digest = hasher.finalize();

    hex::encode(&digest[..KEY_LENGTH / 2])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn keys_are_32_lowercase_hex_characters() {
        let key = generate_idempotency_key();
        assert_eq!(key.len(), KEY_LENGTH);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn keys_are_pairwise_distinct() {
        let keys: HashSet<String> = (0..256).map(|_| generate_idempotency_key()).collect();
        assert_eq!(keys.len(), 256);
    }
}
