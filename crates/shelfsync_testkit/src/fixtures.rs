//! Test fixtures and library helpers.
//!
//! Provides an on-disk library backed by a temporary directory, wired to a
//! [`FakeSyncServer`].

use crate::server::{FakeSyncServer, FAKE_BASE_URL, FAKE_DOMAIN};
use shelfsync_engine::{
    content_hash, Book, BookId, BookStore, Bookmark, MemoryBookStore, SyncConfig, SyncOrchestrator,
};
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

/// A library whose book files live in a temporary directory.
pub struct TestLibrary {
    /// The book store.
    pub store: Arc<MemoryBookStore>,
    /// The server the library syncs with.
    pub server: Arc<FakeSyncServer>,
    /// Configuration pointing at the fake server.
    pub config: SyncConfig,
    dir: TempDir,
}

impl TestLibrary {
    /// Creates an empty library and server.
    pub fn new() -> Self {
        Self {
            store: Arc::new(MemoryBookStore::new()),
            server: Arc::new(FakeSyncServer::new()),
            config: SyncConfig::new(FAKE_BASE_URL, FAKE_DOMAIN),
            dir: TempDir::new().expect("Failed to create temp directory"),
        }
    }

    /// Replaces the configuration.
    #[must_use]
    pub fn with_config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    /// Writes a book file with `content` and adds the book to the library.
    ///
    /// The content hash is left for the store to compute.
    pub fn add_book(&self, id: i64, content: &[u8]) -> Book {
        let path = self.book_path(id);
        std::fs::write(&path, content).expect("Failed to write book file");
        let book = Book::new(BookId(id), format!("Book {id}")).with_path(path);
        self.store.insert_book(book.clone());
        book
    }

    /// Adds a book whose file claims to be `size` bytes long.
    pub fn add_sized_book(&self, id: i64, size: u64) -> Book {
        let book = self.add_book(id, format!("sized book {id}").as_bytes());
        self.store.set_file_size(book.id, size);
        book
    }

    /// Adds a book without a physical file.
    pub fn add_fileless_book(&self, id: i64) -> Book {
        let book = Book::new(BookId(id), format!("Book {id}"));
        self.store.insert_book(book.clone());
        book
    }

    /// Returns the content hash of a book file written by this library.
    pub fn hash_of(&self, id: i64) -> String {
        content_hash(&self.book_path(id)).expect("Failed to hash book file")
    }

    /// Adds a local bookmark.
    pub fn add_bookmark(&self, bookmark: &Bookmark) {
        self.store
            .save_bookmark(bookmark)
            .expect("Failed to save bookmark");
    }

    /// Returns the stored copy of a book.
    pub fn book(&self, id: i64) -> Book {
        self.store.book(BookId(id)).expect("Book should exist")
    }

    /// Creates an orchestrator over this library and server.
    pub fn orchestrator(&self) -> Arc<SyncOrchestrator<MemoryBookStore, FakeSyncServer>> {
        SyncOrchestrator::new(
            self.config.clone(),
            Arc::clone(&self.store),
            Arc::clone(&self.server),
        )
    }

    fn book_path(&self, id: i64) -> PathBuf {
        self.dir.path().join(format!("book-{id}.epub"))
    }
}

impl Default for TestLibrary {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs a test with a temporary library.
///
/// # Example
///
/// ```rust,ignore
/// use shelfsync_testkit::with_library;
///
/// #[test]
/// fn my_test() {
///     with_library(|lib| {
///         lib.add_book(1, b"content");
///         let report = lib.orchestrator().full_sync().unwrap();
///         assert_eq!(report.processed, 1);
///     });
/// }
/// ```
pub fn with_library<F, R>(f: F) -> R
where
    F: FnOnce(&TestLibrary) -> R,
{
    let library = TestLibrary::new();
    f(&library)
}
