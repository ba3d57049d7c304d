//! Book catalogue messages: hash paging, verification and upload.

use crate::codec::{decode, encode};
use crate::error::{ProtocolError, ProtocolResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Error code the server reports when the uploaded content already exists.
pub const ALREADY_UPLOADED: &str = "ALREADY_UPLOADED";

/// Request for one page of the server's content hash catalogue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HashPageRequest {
    /// Zero-based page index.
    pub page_no: u32,
    /// Number of hashes per set and page.
    pub page_size: u32,
}

impl HashPageRequest {
    /// Creates a new page request.
    pub fn new(page_no: u32, page_size: u32) -> Self {
        Self { page_no, page_size }
    }

    /// Encodes to a JSON value.
    pub fn to_value(&self) -> ProtocolResult<Value> {
        encode(self)
    }
}

/// One page of the server's content hash catalogue.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HashPage {
    /// Hashes of content the server currently holds.
    pub actual: Vec<String>,
    /// Hashes of content the server once held and has since tombstoned.
    pub deleted: Vec<String>,
}

impl HashPage {
    /// Creates a page from both hash sets.
    pub fn new(actual: Vec<String>, deleted: Vec<String>) -> Self {
        Self { actual, deleted }
    }

    /// Decodes from a JSON value. Both sets must be present.
    pub fn from_value(value: Value) -> ProtocolResult<Self> {
        decode(value)
    }

    /// Returns true if this page terminates paging: both sets came back
    /// strictly shorter than the requested page size.
    pub fn is_last(&self, page_size: u32) -> bool {
        let page_size = page_size as usize;
        self.actual.len() < page_size && self.deleted.len() < page_size
    }
}

/// Verification request for a single content hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerificationRequest {
    /// The content hash.
    #[serde(rename = "sha1")]
    pub hash: String,
}

impl VerificationRequest {
    /// Creates a new verification request.
    pub fn new(hash: impl Into<String>) -> Self {
        Self { hash: hash.into() }
    }

    /// Encodes to a JSON value.
    pub fn to_value(&self) -> ProtocolResult<Value> {
        encode(self)
    }
}

/// What the server knows about a content hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookStatus {
    /// The server holds this content.
    #[serde(rename = "found")]
    Found,
    /// The server held this content and it was deleted.
    #[serde(rename = "deleted")]
    Deleted,
    /// The server has never seen this content.
    #[serde(rename = "not found")]
    NotFound,
}

/// Response to a [`VerificationRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationResponse {
    /// Server-side status of the hash.
    pub status: BookStatus,
    /// Every hash the server associates with the same book.
    #[serde(default)]
    pub hashes: Vec<String>,
}

impl VerificationResponse {
    /// Creates a response.
    pub fn new(status: BookStatus, hashes: Vec<String>) -> Self {
        Self { status, hashes }
    }

    /// Decodes from a JSON value. An unknown status is malformed.
    pub fn from_value(value: Value) -> ProtocolResult<Self> {
        decode(value)
    }
}

/// Result record returned by the upload endpoint.
///
/// The endpoint answers with a one-element list `[{"result": {...}}]`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UploadResult {
    /// Server id of the newly stored book.
    #[serde(default)]
    pub id: Option<String>,
    /// Canonical hashes of the stored content.
    #[serde(default)]
    pub hashes: Option<Vec<String>>,
    /// Error message when the upload was rejected.
    #[serde(default)]
    pub error: Option<String>,
    /// Machine-readable error code.
    #[serde(default)]
    pub code: Option<String>,
}

impl UploadResult {
    /// Extracts the result record from an upload response.
    ///
    /// Returns `Ok(None)` when the response is not a list of exactly one
    /// element: such a response carries no usable signal.
    pub fn from_response(value: Value) -> ProtocolResult<Option<Self>> {
        let mut items = match value {
            Value::Array(items) if items.len() == 1 => items,
            _ => return Ok(None),
        };
        let result = match items.pop() {
            Some(Value::Object(mut envelope)) => envelope
                .remove("result")
                .ok_or_else(|| ProtocolError::malformed("upload envelope lacks result"))?,
            _ => return Err(ProtocolError::malformed("upload envelope is not an object")),
        };
        decode(result).map(Some)
    }

    /// Wraps the result in the envelope the endpoint sends.
    pub fn into_response(self) -> ProtocolResult<Value> {
        Ok(Value::Array(vec![serde_json::json!({ "result": encode(&self)? })]))
    }

    /// Returns true if the server reports the content as already stored.
    pub fn is_already_uploaded(&self) -> bool {
        self.code.as_deref() == Some(ALREADY_UPLOADED)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn hash_page_termination() {
        let page = HashPage::new(vec!["a".into(), "b".into()], vec![]);
        assert!(page.is_last(3));
        assert!(!page.is_last(2));

        let page = HashPage::new(vec![], vec!["x".into(), "y".into()]);
        assert!(!page.is_last(2));
    }

    #[test]
    fn hash_page_requires_both_sets() {
        assert!(HashPage::from_value(json!({"actual": []})).is_err());
        let page = HashPage::from_value(json!({"actual": ["h1"], "deleted": []})).unwrap();
        assert_eq!(page.actual, vec!["h1".to_string()]);
    }

    #[test]
    fn verification_request_uses_sha1_key() {
        let value = VerificationRequest::new("abc").to_value().unwrap();
        assert_eq!(value, json!({"sha1": "abc"}));
    }

    #[test]
    fn verification_status_names() {
        let response =
            VerificationResponse::from_value(json!({"status": "not found"})).unwrap();
        assert_eq!(response.status, BookStatus::NotFound);
        assert!(response.hashes.is_empty());

        let response =
            VerificationResponse::from_value(json!({"status": "deleted", "hashes": ["h"]}))
                .unwrap();
        assert_eq!(response.status, BookStatus::Deleted);

        assert!(VerificationResponse::from_value(json!({"status": "gone"})).is_err());
    }

    #[test]
    fn upload_result_envelope() {
        let value = json!([{"result": {"id": "42", "hashes": ["h1", "h2"]}}]);
        let result = UploadResult::from_response(value).unwrap().unwrap();
        assert_eq!(result.id.as_deref(), Some("42"));
        assert_eq!(result.hashes.unwrap().len(), 2);
    }

    #[test]
    fn upload_result_without_single_element_is_no_signal() {
        assert!(UploadResult::from_response(json!([])).unwrap().is_none());
        assert!(UploadResult::from_response(json!([{}, {}])).unwrap().is_none());
        assert!(UploadResult::from_response(json!({"result": {}})).unwrap().is_none());
    }

    #[test]
    fn upload_result_already_uploaded_code() {
        let result = UploadResult {
            error: Some("duplicate".into()),
            code: Some(ALREADY_UPLOADED.into()),
            ..UploadResult::default()
        };
        assert!(result.is_already_uploaded());

        let value = result.clone().into_response().unwrap();
        let decoded = UploadResult::from_response(value).unwrap().unwrap();
        assert_eq!(decoded, result);
    }
}
