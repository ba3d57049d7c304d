//! Reading position exchange.

use crate::bookmarks::TextPosition;
use crate::codec::{decode, encode};
use crate::error::ProtocolResult;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Last-read position of one book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionEntry {
    /// Content hash of the book.
    pub hash: String,
    /// Position in the text.
    #[serde(flatten)]
    pub position: TextPosition,
    /// When the position was recorded, milliseconds since the Unix epoch.
    pub timestamp: i64,
}

impl PositionEntry {
    /// Creates a position entry.
    pub fn new(hash: impl Into<String>, position: TextPosition, timestamp: i64) -> Self {
        Self {
            hash: hash.into(),
            position,
            timestamp,
        }
    }
}

/// Positions this device sends to the server.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PositionExchangeRequest {
    /// Client clock, milliseconds since the Unix epoch.
    pub timestamp: i64,
    /// Local last-read positions.
    pub positions: Vec<PositionEntry>,
}

impl PositionExchangeRequest {
    /// Encodes to a JSON value.
    pub fn to_value(&self) -> ProtocolResult<Value> {
        encode(self)
    }

    /// Decodes from a JSON value.
    pub fn from_value(value: Value) -> ProtocolResult<Self> {
        decode(value)
    }
}

/// Positions recorded by other devices.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PositionExchangeResponse {
    /// Positions the server holds for this account.
    #[serde(default)]
    pub positions: Vec<PositionEntry>,
}

impl PositionExchangeResponse {
    /// Encodes to a JSON value.
    pub fn to_value(&self) -> ProtocolResult<Value> {
        encode(self)
    }

    /// Decodes from a JSON value.
    pub fn from_value(value: Value) -> ProtocolResult<Self> {
        decode(value)
    }
}
