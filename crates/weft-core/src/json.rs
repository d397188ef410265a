//! JSON-safety helpers.
//!
//! Snapshot content must survive a serialize/deserialize round trip. Values
//! that cannot be encoded are dropped instead of failing the snapshot.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

/// Encode a value, returning `None` when serialization fails.
pub fn encode<T: Serialize + ?Sized>(value: &T) -> Option<Value> {
    match serde_json::to_value(value) {
        Ok(v) => Some(v),
        Err(e) => {
            debug!(error = %e, "value is not JSON-safe, dropping");
            None
        }
    }
}

/// Decode a value, returning `None` when the shape does not match.
pub fn decode<T: DeserializeOwned>(value: &Value) -> Option<T> {
    T::deserialize(value).ok()
}

/// Whether a value survives a text round trip unchanged.
///
/// Numbers that lose precision through `f64` text formatting are the only
/// realistic failure once a value is already a [`Value`].
pub fn round_trips(value: &Value) -> bool {
    serde_json::to_string(value)
        .ok()
        .and_then(|text| serde_json::from_str::<Value>(&text).ok())
        .is_some_and(|back| &back == value)
}
