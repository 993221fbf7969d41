//! # JSON Serialization Module
//!
//! Request bodies are parsed with simd-json; responses are written with
//! serde_json.

use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

/// Parse JSON bytes to a typed value using simd-json
///
/// simd-json parses in place, so the input is copied into a scratch buffer.
///
/// # Errors
///
/// Returns `Error::Json` if parsing fails
pub fn parse_json<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    let mut scratch = bytes.to_vec();
    simd_json::serde::from_slice(&mut scratch)
        .map_err(|e| Error::Json(serde::de::Error::custom(format!("Parse error: {e}"))))
}

/// Parse a request body into a JSON object
///
/// Empty, unparseable or non-object bodies all yield an empty map.
#[must_use]
pub fn parse_body_object(body: Option<&[u8]>) -> Map<String, Value> {
    let Some(bytes) = body.filter(|b| !b.iter().all(u8::is_ascii_whitespace)) else {
        return Map::new();
    };
    match parse_json::<Value>(bytes) {
        Ok(Value::Object(map)) => map,
        Ok(_) => Map::new(),
        Err(e) => {
            tracing::debug!(error = %e, "Ignoring unparseable JSON body");
            Map::new()
        }
    }
}

/// Serialize a value to JSON string
///
/// # Errors
///
/// Returns `Error::Json` if the value cannot be serialized
pub fn to_json<T: Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}
