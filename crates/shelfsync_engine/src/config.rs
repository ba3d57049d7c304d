//! Configuration for the sync engine.

use crate::error::{SyncError, SyncResult};
use std::fmt;

/// Largest book file the client will try to upload.
pub const DEFAULT_MAX_UPLOAD_SIZE: u64 = 50 * 1024 * 1024;

/// Independently switchable kinds of synchronized data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncCategory {
    /// Book files and their sync labels.
    Books,
    /// Last-read positions.
    Positions,
    /// Bookmarks and highlights.
    Bookmarks,
}

impl fmt::Display for SyncCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncCategory::Books => "books",
            SyncCategory::Positions => "positions",
            SyncCategory::Bookmarks => "bookmarks",
        };
        f.write_str(name)
    }
}

/// Per-category switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncCategories {
    /// Upload book files.
    pub books: bool,
    /// Exchange reading positions.
    pub positions: bool,
    /// Merge bookmarks.
    pub bookmarks: bool,
}

impl SyncCategories {
    /// Returns true if the given category is switched on.
    pub fn is_enabled(&self, category: SyncCategory) -> bool {
        match category {
            SyncCategory::Books => self.books,
            SyncCategory::Positions => self.positions,
            SyncCategory::Bookmarks => self.bookmarks,
        }
    }
}

impl Default for SyncCategories {
    fn default() -> Self {
        Self {
            books: true,
            positions: true,
            bookmarks: true,
        }
    }
}

/// Configuration for sync operations.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Master switch.
    pub enabled: bool,
    /// Server base URL, ending with `/`.
    pub base_url: String,
    /// Cookie domain of the server.
    pub domain: String,
    /// Category switches.
    pub categories: SyncCategories,
    /// Page size for the content hash catalogue.
    pub hash_page_size: u32,
    /// Page size for the bookmark listing.
    pub bookmark_page_size: u32,
    /// Page size when enumerating the local library.
    pub library_page_size: usize,
    /// Files of this size or larger are never uploaded.
    pub max_upload_size: u64,
    /// Name of the cookie holding the anti-forgery token.
    pub csrf_cookie: String,
}

impl SyncConfig {
    /// Creates a new sync configuration.
    pub fn new(base_url: impl Into<String>, domain: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        if !base_url.is_empty() && !base_url.ends_with('/') {
            base_url.push('/');
        }
        Self {
            enabled: true,
            base_url,
            domain: domain.into(),
            categories: SyncCategories::default(),
            hash_page_size: 500,
            bookmark_page_size: 100,
            library_page_size: 20,
            max_upload_size: DEFAULT_MAX_UPLOAD_SIZE,
            csrf_cookie: "csrftoken".into(),
        }
    }

    /// Sets the master switch.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Sets the category switches.
    pub fn with_categories(mut self, categories: SyncCategories) -> Self {
        self.categories = categories;
        self
    }

    /// Sets the hash catalogue page size.
    pub fn with_hash_page_size(mut self, size: u32) -> Self {
        self.hash_page_size = size.max(1);
        self
    }

    /// Sets the bookmark listing page size.
    pub fn with_bookmark_page_size(mut self, size: u32) -> Self {
        self.bookmark_page_size = size.max(1);
        self
    }

    /// Sets the local library page size.
    pub fn with_library_page_size(mut self, size: usize) -> Self {
        self.library_page_size = size.max(1);
        self
    }

    /// Sets the upload size limit.
    pub fn with_max_upload_size(mut self, size: u64) -> Self {
        self.max_upload_size = size;
        self
    }

    /// Returns the absolute URL of an endpoint.
    pub fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.base_url, endpoint)
    }

    /// Returns true if the category may talk to the server.
    pub fn is_enabled(&self, category: SyncCategory) -> bool {
        self.enabled && self.categories.is_enabled(category)
    }

    /// Fails with [`SyncError::SynchronizationDisabled`] if the category is off.
    pub fn ensure_enabled(&self, category: SyncCategory) -> SyncResult<()> {
        if self.is_enabled(category) {
            Ok(())
        } else {
            Err(SyncError::SynchronizationDisabled(category))
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new("", "")
    }
}
