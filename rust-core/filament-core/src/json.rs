//! # JSON Serialization Module
//!
//! JSON parsing using simd-json, serialization using serde_json.

use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Parse JSON bytes to a typed value using simd-json
///
/// simd-json parses in place, so the input is copied into a scratch buffer.
///
/// # Errors
///
/// Returns `Error::Decode` if the bytes are not valid JSON for `T`
pub fn parse_json<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    let mut scratch = bytes.to_vec();
    parse_json_bytes(&mut scratch)
}

/// Parse JSON from a mutable buffer without copying
///
/// # Errors
///
/// Returns `Error::Decode` if the bytes are not valid JSON for `T`
pub fn parse_json_bytes<T: DeserializeOwned>(bytes: &mut [u8]) -> Result<T> {
    simd_json::from_slice(bytes).map_err(|e| Error::Decode {
        media: "json",
        reason: e.to_string(),
    })
}

/// Serialize a value to JSON bytes
///
/// # Errors
///
/// Returns `Error::Encode` if the value cannot be represented as JSON
pub fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| Error::Encode {
        media: "json",
        reason: e.to_string(),
    })
}
