//! Key and value codecs for the hash tree.
//!
//! Keys must hash to a deterministic 32-bit value: the persistent routing
//! format consumes the hash 8 bits per directory level, so the hash function
//! is part of the on-disk format and must never depend on process state.

use std::hash::Hasher;

use siphasher::sip::SipHasher13;

use crate::error::{PenumbraError, Result};

/// Encoding, decoding, and hashing for tree keys.
pub trait KeyCodec: Sized + Eq {
    /// Deterministic 32-bit hash consumed by directory routing.
    fn hash_key(key: &Self) -> u32;

    fn encode_key(key: &Self, out: &mut Vec<u8>);

    fn decode_key(bytes: &[u8]) -> Result<Self>;
}

/// Encoding and decoding for tree values.
pub trait ValCodec: Sized {
    fn encode_val(value: &Self, out: &mut Vec<u8>);

    fn decode_val(bytes: &[u8]) -> Result<Self>;
}

/// Deterministic SipHash over raw bytes, truncated to the routing width.
fn sip32(bytes: &[u8]) -> u32 {
    let mut hasher = SipHasher13::new_with_keys(0, 0);
    hasher.write(bytes);
    hasher.finish() as u32
}

impl KeyCodec for u64 {
    fn hash_key(key: &Self) -> u32 {
        (key ^ (key >> 32)) as u32
    }

    fn encode_key(key: &Self, out: &mut Vec<u8>) {
        out.extend_from_slice(&key.to_be_bytes());
    }

    fn decode_key(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != 8 {
            return Err(PenumbraError::Corruption("u64 key length mismatch".into()));
        }
        let mut arr = [0u8; 8];
        arr.copy_from_slice(bytes);
        Ok(u64::from_be_bytes(arr))
    }
}

impl ValCodec for u64 {
    fn encode_val(value: &Self, out: &mut Vec<u8>) {
        out.extend_from_slice(&value.to_be_bytes());
    }

    fn decode_val(src: &[u8]) -> Result<Self> {
        if src.len() != 8 {
            return Err(PenumbraError::Corruption(
                "u64 value length mismatch".into(),
            ));
        }
        let mut arr = [0u8; 8];
        arr.copy_from_slice(src);
        Ok(u64::from_be_bytes(arr))
    }
}

impl KeyCodec for String {
    fn hash_key(key: &Self) -> u32 {
        sip32(key.as_bytes())
    }

    fn encode_key(key: &Self, out: &mut Vec<u8>) {
        out.extend_from_slice(key.as_bytes());
    }

    fn decode_key(bytes: &[u8]) -> Result<Self> {
        String::from_utf8(bytes.to_vec())
            .map_err(|_| PenumbraError::Corruption("string key not valid UTF-8".into()))
    }
}

impl ValCodec for String {
    fn encode_val(value: &Self, out: &mut Vec<u8>) {
        out.extend_from_slice(value.as_bytes());
    }

    fn decode_val(src: &[u8]) -> Result<Self> {
        String::from_utf8(src.to_vec())
            .map_err(|_| PenumbraError::Corruption("string value not valid UTF-8".into()))
    }
}

impl KeyCodec for Vec<u8> {
    fn hash_key(key: &Self) -> u32 {
        sip32(key)
    }

    fn encode_key(key: &Self, out: &mut Vec<u8>) {
        out.extend_from_slice(key);
    }

    fn decode_key(bytes: &[u8]) -> Result<Self> {
        Ok(bytes.to_vec())
    }
}

impl ValCodec for Vec<u8> {
    fn encode_val(value: &Self, out: &mut Vec<u8>) {
        out.extend_from_slice(value);
    }

    fn decode_val(src: &[u8]) -> Result<Self> {
        Ok(src.to_vec())
    }
}

/// Unit value used by the set wrapper; encodes to zero bytes.
impl ValCodec for () {
    fn encode_val(_value: &Self, _out: &mut Vec<u8>) {}

    fn decode_val(src: &[u8]) -> Result<Self> {
        if !src.is_empty() {
            return Err(PenumbraError::Corruption(
                "unit value with non-empty payload".into(),
            ));
        }
        Ok(())
    }
}
