//! Local library capability consumed by the engine.

use crate::hashing::content_hash;
use crate::types::{Book, BookId, BookQuery, Bookmark, BookmarkQuery, ReadingPosition};
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use thiserror::Error;
use tracing::debug;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised by a [`BookStore`].
#[derive(Error, Debug)]
pub enum StoreError {
    /// No book with this id.
    #[error("book {0} not found")]
    BookNotFound(BookId),

    /// No bookmark with this uid.
    #[error("bookmark {0} not found")]
    BookmarkNotFound(String),

    /// File access failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The underlying storage rejected the operation.
    #[error("backend error: {0}")]
    Backend(String),
}

/// The local library: books, their files and hashes, bookmarks and reading
/// positions.
///
/// The engine never creates or destroys books. It reads and relabels them,
/// corrects hashes, and upserts, deletes or purges bookmarks.
pub trait BookStore: Send + Sync {
    /// Returns one page of the library, in a stable order.
    fn books(&self, query: &BookQuery) -> StoreResult<Vec<Book>>;

    /// Looks up a book by id.
    fn book_by_id(&self, id: BookId) -> StoreResult<Option<Book>>;

    /// Looks up a book by content hash.
    fn book_by_hash(&self, hash: &str) -> StoreResult<Option<Book>>;

    /// Returns the book's content hash, computing it if the store can.
    fn hash(&self, book: &Book) -> StoreResult<Option<String>>;

    /// Replaces the book's content hash.
    fn set_hash(&self, book: &Book, hash: &str) -> StoreResult<()>;

    /// Returns the size of the book's file, if it has one.
    fn file_size(&self, book: &Book) -> StoreResult<Option<u64>>;

    /// Persists the book, including its labels.
    fn save_book(&self, book: &Book) -> StoreResult<()>;

    /// Returns one page of bookmarks, in a stable order.
    fn bookmarks(&self, query: &BookmarkQuery) -> StoreResult<Vec<Bookmark>>;

    /// Inserts or replaces a bookmark, keyed by uid.
    fn save_bookmark(&self, bookmark: &Bookmark) -> StoreResult<()>;

    /// Deletes a bookmark, leaving a tombstone for its uid.
    fn delete_bookmark(&self, bookmark: &Bookmark) -> StoreResult<()>;

    /// Returns the uids of locally tombstoned bookmarks.
    fn deleted_bookmark_uids(&self) -> StoreResult<Vec<String>>;

    /// Forgets the tombstones of these uids.
    fn purge_bookmarks(&self, uids: &[String]) -> StoreResult<()>;

    /// Returns the last-read position of every book that has one.
    fn reading_positions(&self) -> StoreResult<Vec<ReadingPosition>>;

    /// Records a last-read position.
    fn save_reading_position(&self, position: &ReadingPosition) -> StoreResult<()>;
}

#[derive(Default)]
struct Library {
    books: BTreeMap<BookId, Book>,
    hashes: HashMap<BookId, String>,
    sizes: HashMap<BookId, u64>,
    bookmarks: Vec<Bookmark>,
    tombstones: BTreeSet<String>,
    positions: BTreeMap<BookId, ReadingPosition>,
    saves: u64,
    failures: VecDeque<String>,
}

impl Library {
    fn check_write(&mut self) -> StoreResult<()> {
        match self.failures.pop_front() {
            Some(message) => Err(StoreError::Backend(message)),
            None => Ok(()),
        }
    }
}

/// An in-memory book store.
///
/// Hashes not set explicitly are computed from the book's file on first
/// request and cached. File sizes not set explicitly come from the file
/// system.
#[derive(Default)]
pub struct MemoryBookStore {
    library: RwLock<Library>,
}

impl MemoryBookStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a book.
    pub fn insert_book(&self, book: Book) {
        self.library.write().books.insert(book.id, book);
    }

    /// Adds a book with a known content hash.
    pub fn insert_book_with_hash(&self, book: Book, hash: impl Into<String>) {
        let mut library = self.library.write();
        library.hashes.insert(book.id, hash.into());
        library.books.insert(book.id, book);
    }

    /// Overrides the file size reported for a book.
    pub fn set_file_size(&self, id: BookId, size: u64) {
        self.library.write().sizes.insert(id, size);
    }

    /// Adds a tombstone without a live bookmark.
    pub fn insert_tombstone(&self, uid: impl Into<String>) {
        self.library.write().tombstones.insert(uid.into());
    }

    /// Returns the stored copy of a book.
    pub fn book(&self, id: BookId) -> Option<Book> {
        self.library.read().books.get(&id).cloned()
    }

    /// Returns the stored hash of a book without computing it.
    pub fn stored_hash(&self, id: BookId) -> Option<String> {
        self.library.read().hashes.get(&id).cloned()
    }

    /// Returns a bookmark by uid.
    pub fn bookmark(&self, uid: &str) -> Option<Bookmark> {
        self.library
            .read()
            .bookmarks
            .iter()
            .find(|b| b.uid == uid)
            .cloned()
    }

    /// Returns every live bookmark.
    pub fn all_bookmarks(&self) -> Vec<Bookmark> {
        self.library.read().bookmarks.clone()
    }

    /// Returns the last-read position of a book.
    pub fn reading_position(&self, id: BookId) -> Option<ReadingPosition> {
        self.library.read().positions.get(&id).copied()
    }

    /// Makes the next write fail with [`StoreError::Backend`].
    pub fn fail_next_write(&self, message: impl Into<String>) {
        self.library.write().failures.push_back(message.into());
    }

    /// Number of [`BookStore::save_book`] calls so far.
    pub fn save_count(&self) -> u64 {
        self.library.read().saves
    }
}

impl BookStore for MemoryBookStore {
    fn books(&self, query: &BookQuery) -> StoreResult<Vec<Book>> {
        Ok(self
            .library
            .read()
            .books
            .values()
            .skip(query.offset())
            .take(query.page_size)
            .cloned()
            .collect())
    }

    fn book_by_id(&self, id: BookId) -> StoreResult<Option<Book>> {
        Ok(self.book(id))
    }

    fn book_by_hash(&self, hash: &str) -> StoreResult<Option<Book>> {
        let library = self.library.read();
        Ok(library
            .hashes
            .iter()
            .filter(|(_, h)| h.as_str() == hash)
            .filter_map(|(id, _)| library.books.get(id))
            .min_by_key(|b| b.id)
            .cloned())
    }

    fn hash(&self, book: &Book) -> StoreResult<Option<String>> {
        if let Some(hash) = self.stored_hash(book.id) {
            return Ok(Some(hash));
        }
        let path = match &book.path {
            Some(path) if path.is_file() => path,
            _ => return Ok(None),
        };
        let hash = content_hash(path)?;
        debug!(book_id = %book.id, %hash, "computed content hash");
        self.library.write().hashes.insert(book.id, hash.clone());
        Ok(Some(hash))
    }

    fn set_hash(&self, book: &Book, hash: &str) -> StoreResult<()> {
        let mut library = self.library.write();
        library.check_write()?;
        if !library.books.contains_key(&book.id) {
            return Err(StoreError::BookNotFound(book.id));
        }
        library.hashes.insert(book.id, hash.to_string());
        Ok(())
    }

    fn file_size(&self, book: &Book) -> StoreResult<Option<u64>> {
        if let Some(size) = self.library.read().sizes.get(&book.id) {
            return Ok(Some(*size));
        }
        match &book.path {
            Some(path) if path.is_file() => Ok(Some(std::fs::metadata(path)?.len())),
            _ => Ok(None),
        }
    }

    fn save_book(&self, book: &Book) -> StoreResult<()> {
        let mut library = self.library.write();
        library.check_write()?;
        if !library.books.contains_key(&book.id) {
            return Err(StoreError::BookNotFound(book.id));
        }
        library.books.insert(book.id, book.clone());
        library.saves += 1;
        Ok(())
    }

    fn bookmarks(&self, query: &BookmarkQuery) -> StoreResult<Vec<Bookmark>> {
        Ok(self
            .library
            .read()
            .bookmarks
            .iter()
            .skip(query.offset())
            .take(query.page_size)
            .cloned()
            .collect())
    }

    fn save_bookmark(&self, bookmark: &Bookmark) -> StoreResult<()> {
        let mut library = self.library.write();
        library.check_write()?;
        library.tombstones.remove(&bookmark.uid);
        match library.bookmarks.iter_mut().find(|b| b.uid == bookmark.uid) {
            Some(existing) => *existing = bookmark.clone(),
            None => library.bookmarks.push(bookmark.clone()),
        }
        Ok(())
    }

    fn delete_bookmark(&self, bookmark: &Bookmark) -> StoreResult<()> {
        let mut library = self.library.write();
        library.check_write()?;
        let before = library.bookmarks.len();
        library.bookmarks.retain(|b| b.uid != bookmark.uid);
        if library.bookmarks.len() == before {
            return Err(StoreError::BookmarkNotFound(bookmark.uid.clone()));
        }
        library.tombstones.insert(bookmark.uid.clone());
        Ok(())
    }

    fn deleted_bookmark_uids(&self) -> StoreResult<Vec<String>> {
        Ok(self.library.read().tombstones.iter().cloned().collect())
    }

    fn purge_bookmarks(&self, uids: &[String]) -> StoreResult<()> {
        let mut library = self.library.write();
        library.check_write()?;
        for uid in uids {
            library.tombstones.remove(uid);
        }
        Ok(())
    }

    fn reading_positions(&self) -> StoreResult<Vec<ReadingPosition>> {
        Ok(self.library.read().positions.values().copied().collect())
    }

    fn save_reading_position(&self, position: &ReadingPosition) -> StoreResult<()> {
        let mut library = self.library.write();
        library.check_write()?;
        library.positions.insert(position.book_id, *position);
        Ok(())
    }
}
