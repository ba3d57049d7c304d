//! Bookmark listing, update and fetch messages.

use crate::codec::{decode, decode_lenient, encode};
use crate::error::ProtocolResult;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Request for one page of the lightweight bookmark listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BookmarkPageRequest {
    /// Zero-based page index.
    pub page_no: u32,
    /// Number of bookmark infos per page.
    pub page_size: u32,
    /// Client clock, milliseconds since the Unix epoch.
    pub timestamp: i64,
}

impl BookmarkPageRequest {
    /// Creates a new page request.
    pub fn new(page_no: u32, page_size: u32, timestamp: i64) -> Self {
        Self {
            page_no,
            page_size,
            timestamp,
        }
    }

    /// Encodes to a JSON value.
    pub fn to_value(&self) -> ProtocolResult<Value> {
        encode(self)
    }
}

/// Server-side projection of a bookmark.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookmarkInfo {
    /// Bookmark uid, the merge key.
    pub uid: String,
    /// Version token of the server copy, if the server confirmed one.
    #[serde(default)]
    pub version_uid: Option<String>,
    /// Server-side modification time, milliseconds since the Unix epoch.
    #[serde(default)]
    pub modification_timestamp: i64,
}

impl BookmarkInfo {
    /// Creates a bookmark info.
    pub fn new(
        uid: impl Into<String>,
        version_uid: Option<String>,
        modification_timestamp: i64,
    ) -> Self {
        Self {
            uid: uid.into(),
            version_uid,
            modification_timestamp,
        }
    }
}

/// One page of the lightweight bookmark listing.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BookmarkPage {
    /// Live bookmarks on the server. Entries without a uid are dropped.
    pub actual: Vec<BookmarkInfo>,
    /// Uids the server has tombstoned.
    pub deleted: Vec<String>,
    /// Total number of live bookmarks on the server.
    pub count: u64,
}

#[derive(Deserialize)]
struct RawBookmarkPage {
    #[serde(default)]
    actual: Vec<Value>,
    #[serde(default)]
    deleted: Vec<String>,
    count: u64,
}

impl BookmarkPage {
    /// Decodes from a JSON value.
    ///
    /// The page itself must carry a `count`; individual entries that do not
    /// decode contribute nothing.
    pub fn from_value(value: Value) -> ProtocolResult<Self> {
        let raw: RawBookmarkPage = decode(value)?;
        Ok(Self {
            actual: decode_lenient(raw.actual),
            deleted: raw.deleted,
            count: raw.count,
        })
    }

    /// Encodes to a JSON value.
    pub fn to_value(&self) -> ProtocolResult<Value> {
        Ok(serde_json::json!({
            "actual": encode(&self.actual)?,
            "deleted": self.deleted,
            "count": self.count,
        }))
    }

    /// Returns true if no further page needs to be requested.
    pub fn is_last(&self, page_no: u32, page_size: u32) -> bool {
        self.count <= (u64::from(page_no) + 1) * u64::from(page_size)
    }
}

/// A position inside a book's text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TextPosition {
    /// Paragraph index.
    pub paragraph: i32,
    /// Element index inside the paragraph.
    pub element: i32,
    /// Character index inside the element.
    #[serde(rename = "char")]
    pub char_index: i32,
}

impl TextPosition {
    /// Creates a text position.
    pub fn new(paragraph: i32, element: i32, char_index: i32) -> Self {
        Self {
            paragraph,
            element,
            char_index,
        }
    }
}

/// Full bookmark content as exchanged with the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookmarkPayload {
    /// Bookmark uid.
    pub uid: String,
    /// Version token, absent until the server confirms a revision.
    #[serde(default)]
    pub version_uid: Option<String>,
    /// Content hash of the owning book.
    pub book_hash: String,
    /// Highlighted text.
    pub text: String,
    /// Highlight style.
    #[serde(default)]
    pub style_id: i32,
    /// Start of the highlighted range.
    pub start: TextPosition,
    /// End of the highlighted range.
    #[serde(default)]
    pub end: Option<TextPosition>,
    /// Creation time, milliseconds since the Unix epoch.
    pub creation_timestamp: i64,
    /// Last modification time, milliseconds since the Unix epoch.
    pub modification_timestamp: i64,
}

/// A single entry of a [`BookmarkUpdateBatch`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum BookmarkRequest {
    /// A bookmark the server has never seen.
    Add {
        /// Bookmark content.
        bookmark: BookmarkPayload,
    },
    /// A newer revision of a bookmark the server knows.
    Update {
        /// Bookmark content.
        bookmark: BookmarkPayload,
    },
    /// A bookmark deleted on the client.
    Delete {
        /// Bookmark uid.
        uid: String,
    },
}

impl BookmarkRequest {
    /// Returns the uid this request is about.
    pub fn uid(&self) -> &str {
        match self {
            BookmarkRequest::Add { bookmark } | BookmarkRequest::Update { bookmark } => {
                &bookmark.uid
            }
            BookmarkRequest::Delete { uid } => uid,
        }
    }
}

/// Batched bookmark changes sent in one request.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BookmarkUpdateBatch {
    /// Changes, adds first, then updates, then deletes.
    pub requests: Vec<BookmarkRequest>,
    /// Client clock, milliseconds since the Unix epoch.
    pub timestamp: i64,
}

impl BookmarkUpdateBatch {
    /// Creates an empty batch.
    pub fn new(timestamp: i64) -> Self {
        Self {
            requests: Vec::new(),
            timestamp,
        }
    }

    /// Returns true if there is nothing to send.
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// Encodes to a JSON value.
    pub fn to_value(&self) -> ProtocolResult<Value> {
        encode(self)
    }

    /// Decodes from a JSON value.
    pub fn from_value(value: Value) -> ProtocolResult<Self> {
        decode(value)
    }
}

/// Request for full bookmark content by uid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookmarkFetchRequest {
    /// Requested uids.
    pub uids: Vec<String>,
}

impl BookmarkFetchRequest {
    /// Creates a fetch request.
    pub fn new(uids: Vec<String>) -> Self {
        Self { uids }
    }

    /// Encodes to a JSON value.
    pub fn to_value(&self) -> ProtocolResult<Value> {
        encode(self)
    }
}

/// Response to a [`BookmarkFetchRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BookmarkFetchResponse {
    /// Bookmarks the server returned. Entries that do not decode are dropped.
    pub bookmarks: Vec<BookmarkPayload>,
}

#[derive(Deserialize)]
struct RawFetchResponse {
    #[serde(default)]
    bookmarks: Vec<Value>,
}

impl BookmarkFetchResponse {
    /// Decodes from a JSON value.
    pub fn from_value(value: Value) -> ProtocolResult<Self> {
        let raw: RawFetchResponse = decode(value)?;
        Ok(Self {
            bookmarks: decode_lenient(raw.bookmarks),
        })
    }

    /// Encodes to a JSON value.
    pub fn to_value(&self) -> ProtocolResult<Value> {
        Ok(serde_json::json!({ "bookmarks": encode(&self.bookmarks)? }))
    }
}
