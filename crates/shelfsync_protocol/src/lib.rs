//! # Shelfsync Protocol
//!
//! Wire types for the library synchronization protocol.
//!
//! This crate provides:
//! - Endpoint names relative to the server base URL
//! - Content-hash paging and status-by-hash verification messages
//! - The book upload result envelope
//! - Bookmark listing, update batch and fetch messages
//! - Reading position exchange messages
//! - JSON value encoding/decoding helpers
//!
//! This is a pure protocol crate with no I/O operations. Every message
//! travels as a `serde_json::Value`; decoding failures surface as
//! [`ProtocolError`] so callers can treat them as "no usable signal".

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod bookmarks;
mod codec;
mod error;
mod messages;
mod positions;

pub use bookmarks::{
    BookmarkFetchRequest, BookmarkFetchResponse, BookmarkInfo, BookmarkPage, BookmarkPageRequest,
    BookmarkPayload, BookmarkRequest, BookmarkUpdateBatch, TextPosition,
};
pub use codec::{decode, encode};
pub use error::{ProtocolError, ProtocolResult};
pub use messages::{
    BookStatus, HashPage, HashPageRequest, UploadResult, VerificationRequest,
    VerificationResponse, ALREADY_UPLOADED,
};
pub use positions::{PositionEntry, PositionExchangeRequest, PositionExchangeResponse};

/// Server endpoints, relative to the configured base URL.
pub mod endpoints {
    /// Paged listing of every content hash the server knows about.
    pub const ALL_HASHES_PAGED: &str = "app/all.hashes.paged";
    /// Verification of a single content hash.
    pub const BOOK_STATUS_BY_HASH: &str = "app/book.status.by.hash";
    /// Multipart book file upload.
    pub const BOOK_UPLOAD: &str = "app/book.upload";
    /// Bidirectional reading position exchange.
    pub const POSITION_EXCHANGE: &str = "sync/position.exchange";
    /// Paged lightweight bookmark listing.
    pub const BOOKMARKS_LITE_PAGED: &str = "sync/bookmarks.lite.paged";
    /// Batched bookmark add/update/delete.
    pub const UPDATE_BOOKMARKS: &str = "sync/update.bookmarks";
    /// Full bookmark payloads by uid.
    pub const BOOKMARKS_BY_UID: &str = "sync/bookmarks";
}
