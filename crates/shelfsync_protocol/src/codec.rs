//! JSON value codec shared by every message type.

use crate::error::ProtocolResult;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

/// Encodes a message into a structured JSON value.
pub fn encode<T: Serialize>(message: &T) -> ProtocolResult<Value> {
    Ok(serde_json::to_value(message)?)
}

/// Decodes a message from a structured JSON value.
pub fn decode<T: DeserializeOwned>(value: Value) -> ProtocolResult<T> {
    Ok(serde_json::from_value(value)?)
}

/// Decodes every element of `values` that has the expected shape, skipping
/// the rest.
pub(crate) fn decode_lenient<T: DeserializeOwned>(values: Vec<Value>) -> Vec<T> {
    values
        .into_iter()
        .filter_map(|v| serde_json::from_value(v).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Item {
        uid: String,
    }

    #[test]
    fn decode_reports_shape_errors() {
        let result: ProtocolResult<Item> = decode(json!({"id": 1}));
        assert!(result.is_err());
    }

    #[test]
    fn lenient_decoding_skips_bad_entries() {
        let items: Vec<Item> =
            decode_lenient(vec![json!({"uid": "a"}), json!(42), json!({"uid": "b"})]);
        assert_eq!(items.len(), 2);
        assert_eq!(items[1].uid, "b");
    }
}
