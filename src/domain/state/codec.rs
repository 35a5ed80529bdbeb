//! Entry codec - type-erased payloads for arbitrary state types.
//!
//! The store never knows concrete application types. Values cross the
//! storage boundary as a [`TypedPayload`]: serialized bytes plus a type
//! discriminator that is checked again on decode.
//!
//! Encoding is `serde_json`. Output is deterministic for structs and ordered
//! maps; `HashMap` fields serialize in iteration order, so prefer `BTreeMap`
//! in state types that are compared byte-for-byte.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A state type that can be stored.
///
/// `TYPE_NAME` is the discriminator written next to the payload. Keep it
/// stable across releases; renaming it makes existing entries undecodable.
pub trait StateValue: Serialize + DeserializeOwned + Send + Sync {
    const TYPE_NAME: &'static str;
}

impl StateValue for serde_json::Value {
    const TYPE_NAME: &'static str = "json";
}

/// Serialized bytes tagged with the type they were produced from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypedPayload {
    pub type_name: String,
    pub data: Vec<u8>,
}

impl TypedPayload {
    pub fn new(type_name: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            type_name: type_name.into(),
            data,
        }
    }

    /// Size of the serialized bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Errors raised while encoding or decoding state values.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("Failed to serialize {type_name}: {reason}")]
    Serialization { type_name: String, reason: String },

    #[error("Payload holds {found} but {expected} was requested")]
    TypeMismatch { expected: String, found: String },

    #[error("Failed to deserialize {type_name}: {reason}")]
    Deserialization { type_name: String, reason: String },
}

/// Serializes a state value into a tagged payload.
pub fn encode<T: StateValue>(value: &T) -> Result<TypedPayload, CodecError> {
    let data = serde_json::to_vec(value).map_err(|e| CodecError::Serialization {
        type_name: T::TYPE_NAME.to_string(),
        reason: e.to_string(),
    })?;
    Ok(TypedPayload::new(T::TYPE_NAME, data))
}

/// Deserializes a payload, checking its discriminator first.
pub fn decode<T: StateValue>(payload: &TypedPayload) -> Result<T, CodecError> {
    if payload.type_name != T::TYPE_NAME {
        return Err(CodecError::TypeMismatch {
            expected: T::TYPE_NAME.to_string(),
            found: payload.type_name.clone(),
        });
    }

    serde_json::from_slice(&payload.data).map_err(|e| CodecError::Deserialization {
        type_name: T::TYPE_NAME.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeMap, HashMap};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct TurnCounter {
        turn: u32,
        last_speaker: Option<String>,
    }

    impl StateValue for TurnCounter {
        const TYPE_NAME: &'static str = "turn_counter";
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct DialogStack {
        frames: Vec<String>,
    }

    impl StateValue for DialogStack {
        const TYPE_NAME: &'static str = "dialog_stack";
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct Grid {
        cells: HashMap<(u8, u8), String>,
    }

    impl StateValue for Grid {
        const TYPE_NAME: &'static str = "grid";
    }

    #[test]
    fn encode_tags_payload_with_type_name() {
        let payload = encode(&TurnCounter {
            turn: 3,
            last_speaker: None,
        })
        .unwrap();

        assert_eq!(payload.type_name, "turn_counter");
        assert!(!payload.is_empty());
    }

    #[test]
    fn decode_restores_value() {
        let value = TurnCounter {
            turn: 42,
            last_speaker: Some("user".to_string()),
        };
        let payload = encode(&value).unwrap();

        let decoded: TurnCounter = decode(&payload).unwrap();

        assert_eq!(decoded, value);
    }

    #[test]
    fn decode_rejects_wrong_discriminator() {
        let payload = encode(&DialogStack {
            frames: vec!["root".to_string()],
        })
        .unwrap();

        let result: Result<TurnCounter, _> = decode(&payload);

        assert_eq!(
            result.unwrap_err(),
            CodecError::TypeMismatch {
                expected: "turn_counter".to_string(),
                found: "dialog_stack".to_string(),
            }
        );
    }

    #[test]
    fn decode_rejects_shape_mismatch() {
        let payload = TypedPayload::new("turn_counter", br#"{"turn":"not a number"}"#.to_vec());

        let result: Result<TurnCounter, _> = decode(&payload);

        assert!(matches!(result, Err(CodecError::Deserialization { .. })));
    }

    #[test]
    fn encode_fails_for_non_string_map_keys() {
        let mut cells = HashMap::new();
        cells.insert((1, 2), "x".to_string());

        let result = encode(&Grid { cells });

        assert!(matches!(result, Err(CodecError::Serialization { .. })));
    }

    #[test]
    fn encoding_is_deterministic_for_ordered_maps() {
        let mut a = BTreeMap::new();
        a.insert("b".to_string(), serde_json::json!(2));
        a.insert("a".to_string(), serde_json::json!(1));
        let value = serde_json::to_value(&a).unwrap();

        let first = encode(&value).unwrap();
        let second = encode(&value).unwrap();

        assert_eq!(first, second);
    }
}
