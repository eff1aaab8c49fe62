//! Constant-time comparison helpers for authenticated-peer key matching.
//!
//! Never short-circuit on the first differing byte: [`subtle::ConstantTimeEq`]
//! compares the whole slice in fixed time regardless of where (or whether) it
//! differs.

use subtle::ConstantTimeEq;

/// Compare two 32-byte keys in constant time.
pub fn keys_equal(a: &[u8; 32], b: &[u8; 32]) -> bool {
    a.ct_eq(b).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_keys_match() {
        let a = [9u8; 32];
        let b = [9u8; 32];
        assert!(keys_equal(&a, &b));
    }

    #[test]
    fn differing_last_byte_does_not_match() {
        let mut a = [9u8; 32];
        let b = [9u8; 32];
        a[31] = 0;
        assert!(!keys_equal(&a, &b));
    }

    #[test]
    fn differing_first_byte_does_not_match() {
        let mut a = [9u8; 32];
        let b = [9u8; 32];
        a[0] = 0;
        assert!(!keys_equal(&a, &b));
    }
}
