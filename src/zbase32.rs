//! z-base-32 encoding for device ids and share/download ids.
//!
//! z-base-32 (Zooko's base32) is human-friendlier than RFC 4648 base32 and is
//! what we use to turn 32-byte public keys into the `receiverDeviceId` /
//! `senderDeviceId` strings carried over HTTP. Decoding rejects both invalid
//! alphabet characters and the wrong decoded length as two distinct error
//! cases, per spec.

use data_encoding::{Encoding, Specification};
use std::sync::OnceLock;

const ALPHABET: &str = "ybndrfg8ejkmcpqxot1uwisza345h769";

fn encoding() -> &'static Encoding {
    static ENCODING: OnceLock<Encoding> = OnceLock::new();
    ENCODING.get_or_init(|| {
        let mut spec = Specification::new();
        spec.symbols.push_str(ALPHABET);
        spec.padding = None;
        spec.encoding().expect("z-base-32 specification is valid")
    })
}

/// Error returned by [`decode_key`].
#[derive(Debug, thiserror::Error)]
pub enum ZBase32Error {
    #[error("invalid z-base-32 alphabet")]
    InvalidAlphabet,
    #[error("decoded length {actual} does not match expected {expected}")]
    WrongLength { expected: usize, actual: usize },
}

/// Encode raw bytes as z-base-32 (no padding).
pub fn encode(bytes: &[u8]) -> String {
    encoding().encode(bytes)
}

/// `serde(serialize_with = ...)` helper: render a 32-byte key field as its
/// z-base-32 device id string instead of a raw byte array.
pub fn serialize_key<S>(key: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(&encode(key))
}

/// Decode a z-base-32 string, requiring the result be exactly 32 bytes (a
/// device public key). Distinguishes "bad alphabet" from "decoded but wrong
/// length" as required by spec.md §9.
pub fn decode_key(s: &str) -> Result<[u8; 32], ZBase32Error> {
    let bytes = encoding()
        .decode(s.as_bytes())
        .map_err(|_| ZBase32Error::InvalidAlphabet)?;
    if bytes.len() != 32 {
        return Err(ZBase32Error::WrongLength {
            expected: 32,
            actual: bytes.len(),
        });
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&bytes);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_32_bytes() {
        let key = [7u8; 32];
        let encoded = encode(&key);
        let decoded = decode_key(&encoded).unwrap();
        assert_eq!(decoded, key);
    }

    #[test]
    fn rejects_bad_alphabet() {
        // '0' and 'l' are not in the z-base-32 alphabet.
        let err = decode_key("0000l000000000000000000000000000000000000000000").unwrap_err();
        assert!(matches!(err, ZBase32Error::InvalidAlphabet));
    }

    #[test]
    fn rejects_wrong_length_distinctly() {
        let short = encode(&[1u8; 16]);
        let err = decode_key(&short).unwrap_err();
        assert!(matches!(
            err,
            ZBase32Error::WrongLength {
                expected: 32,
                actual: 16
            }
        ));
    }
}
