//! Library entities the engine reconciles.

use serde::{Deserialize, Serialize};
use shelfsync_protocol::{BookmarkPayload, TextPosition};
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

/// Stable identifier of a book in the local library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BookId(pub i64);

impl fmt::Display for BookId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Labels that carry a book's externally visible sync status.
///
/// All four belong to one family: applying a status label removes the others.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SyncLabel {
    /// The server holds this book.
    Synchronised,
    /// The last upload attempt failed.
    SyncFailure,
    /// The server has deleted this book.
    SyncDeleted,
    /// The user asked to upload this book regardless of earlier outcomes.
    ToSync,
}

impl SyncLabel {
    /// Every sync label.
    pub const ALL: [SyncLabel; 4] = [
        SyncLabel::Synchronised,
        SyncLabel::SyncFailure,
        SyncLabel::SyncDeleted,
        SyncLabel::ToSync,
    ];

    /// Returns the label name as stored in the library.
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncLabel::Synchronised => "sync-success",
            SyncLabel::SyncFailure => "sync-failure",
            SyncLabel::SyncDeleted => "sync-deleted",
            SyncLabel::ToSync => "sync-tosync",
        }
    }
}

impl fmt::Display for SyncLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A book in the local library.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Book {
    /// Library identifier.
    pub id: BookId,
    /// Display title.
    #[serde(default)]
    pub title: String,
    /// Physical file, if the book has one.
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default)]
    labels: BTreeSet<SyncLabel>,
}

impl Book {
    /// Creates a book without a physical file.
    pub fn new(id: BookId, title: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            path: None,
            labels: BTreeSet::new(),
        }
    }

    /// Sets the physical file.
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Adds a label.
    pub fn with_label(mut self, label: SyncLabel) -> Self {
        self.labels.insert(label);
        self
    }

    /// Returns the sync labels currently set.
    pub fn labels(&self) -> &BTreeSet<SyncLabel> {
        &self.labels
    }

    /// Returns true if the label is set.
    pub fn has_label(&self, label: SyncLabel) -> bool {
        self.labels.contains(&label)
    }

    /// Sets a label.
    pub fn add_label(&mut self, label: SyncLabel) {
        self.labels.insert(label);
    }

    /// Clears a label.
    pub fn remove_label(&mut self, label: SyncLabel) {
        self.labels.remove(&label);
    }

    /// Returns true if the user forced an upload.
    pub fn is_forced(&self) -> bool {
        self.has_label(SyncLabel::ToSync)
    }
}

/// A bookmark in the local library.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bookmark {
    /// Globally unique id, the merge key.
    pub uid: String,
    /// Version token of the last confirmed sync, absent until then.
    #[serde(default)]
    pub version_uid: Option<String>,
    /// Owning book.
    pub book_id: BookId,
    /// Highlighted text.
    #[serde(default)]
    pub text: String,
    /// Highlight style.
    #[serde(default)]
    pub style_id: i32,
    /// Start of the highlighted range.
    #[serde(default)]
    pub start: TextPosition,
    /// End of the highlighted range.
    #[serde(default)]
    pub end: Option<TextPosition>,
    /// Creation time, milliseconds since the Unix epoch.
    #[serde(default)]
    pub creation_timestamp: i64,
    /// Last modification time, milliseconds since the Unix epoch.
    #[serde(default)]
    pub modification_timestamp: i64,
}

impl Bookmark {
    /// Creates a bookmark that has never been synced.
    pub fn new(
        uid: impl Into<String>,
        book_id: BookId,
        text: impl Into<String>,
        timestamp: i64,
    ) -> Self {
        Self {
            uid: uid.into(),
            version_uid: None,
            book_id,
            text: text.into(),
            style_id: 1,
            start: TextPosition::default(),
            end: None,
            creation_timestamp: timestamp,
            modification_timestamp: timestamp,
        }
    }

    /// Sets the version token.
    pub fn with_version(mut self, version_uid: impl Into<String>) -> Self {
        self.version_uid = Some(version_uid.into());
        self
    }

    /// Builds the wire representation, keyed by the owning book's content hash.
    pub fn to_payload(&self, book_hash: &str) -> BookmarkPayload {
        BookmarkPayload {
            uid: self.uid.clone(),
            version_uid: self.version_uid.clone(),
            book_hash: book_hash.to_string(),
            text: self.text.clone(),
            style_id: self.style_id,
            start: self.start,
            end: self.end,
            creation_timestamp: self.creation_timestamp,
            modification_timestamp: self.modification_timestamp,
        }
    }

    /// Builds a local bookmark from server content.
    pub fn from_payload(payload: BookmarkPayload, book_id: BookId) -> Self {
        Self {
            uid: payload.uid,
            version_uid: payload.version_uid,
            book_id,
            text: payload.text,
            style_id: payload.style_id,
            start: payload.start,
            end: payload.end,
            creation_timestamp: payload.creation_timestamp,
            modification_timestamp: payload.modification_timestamp,
        }
    }
}

/// Last-read position of a local book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadingPosition {
    /// The book.
    pub book_id: BookId,
    /// Position in the text.
    pub position: TextPosition,
    /// When the position was recorded, milliseconds since the Unix epoch.
    pub timestamp: i64,
}

impl ReadingPosition {
    /// Creates a reading position.
    pub fn new(book_id: BookId, position: TextPosition, timestamp: i64) -> Self {
        Self {
            book_id,
            position,
            timestamp,
        }
    }
}

/// A page of the local library.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BookQuery {
    /// Zero-based page index.
    pub page: usize,
    /// Books per page.
    pub page_size: usize,
}

impl BookQuery {
    /// Creates a query for the first page.
    pub fn new(page_size: usize) -> Self {
        Self {
            page: 0,
            page_size: page_size.max(1),
        }
    }

    /// Returns the query for the following page.
    pub fn next(&self) -> Self {
        Self {
            page: self.page + 1,
            page_size: self.page_size,
        }
    }

    /// Index of the first book on this page.
    pub fn offset(&self) -> usize {
        self.page * self.page_size
    }
}

/// A page of local bookmarks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BookmarkQuery {
    /// Zero-based page index.
    pub page: usize,
    /// Bookmarks per page.
    pub page_size: usize,
}

impl BookmarkQuery {
    /// Creates a query for the first page.
    pub fn new(page_size: usize) -> Self {
        Self {
            page: 0,
            page_size: page_size.max(1),
        }
    }

    /// Returns the query for the following page.
    pub fn next(&self) -> Self {
        Self {
            page: self.page + 1,
            page_size: self.page_size,
        }
    }

    /// Index of the first bookmark on this page.
    pub fn offset(&self) -> usize {
        self.page * self.page_size
    }
}

/// Current wall clock in milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_are_a_set() {
        let mut book = Book::new(BookId(1), "Moby Dick").with_label(SyncLabel::ToSync);
        assert!(book.is_forced());

        book.add_label(SyncLabel::SyncFailure);
        book.add_label(SyncLabel::SyncFailure);
        assert_eq!(book.labels().len(), 2);

        book.remove_label(SyncLabel::ToSync);
        assert!(!book.is_forced());
        assert!(book.has_label(SyncLabel::SyncFailure));
    }

    #[test]
    fn queries_page_forward() {
        let q = BookQuery::new(20);
        assert_eq!(q.offset(), 0);
        assert_eq!(q.next().next().offset(), 40);
        assert_eq!(BookmarkQuery::new(0).page_size, 1);
    }

    #[test]
    fn bookmark_payload_keeps_identity() {
        let bookmark = Bookmark::new("uid-1", BookId(3), "text", 100).with_version("v1");
        let payload = bookmark.to_payload("hash");
        assert_eq!(payload.book_hash, "hash");
        assert_eq!(Bookmark::from_payload(payload, BookId(3)), bookmark);
    }
}
