//! Random id generation for shares and downloads.

use std::time::{SystemTime, UNIX_EPOCH};

use rand::RngCore;

/// Milliseconds since UNIX_EPOCH, produced once at entity creation time and
/// never recomputed so TTL math stays pure (spec.md §3).
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Opaque entity id: 16 random bytes, z-base-32 encoded. 128 bits of entropy
/// is ample for ids that live at most 15 minutes (TTL eviction) and are never
/// used as a security boundary by themselves — the peer-key check in
/// [`crate::auth`] is what authorizes access, not id secrecy.
pub fn new_id() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    crate::zbase32::encode(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn ids_are_distinct() {
        let ids: HashSet<String> = (0..1000).map(|_| new_id()).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn ids_are_nonempty() {
        assert!(!new_id().is_empty());
    }
}
