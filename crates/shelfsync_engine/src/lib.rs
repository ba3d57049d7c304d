//! # Shelfsync Engine
//!
//! Reconciles a local book library with a remote library server.
//!
//! This crate provides:
//! - Paged loading of the server's content hash catalogue
//! - Per-book upload reconciliation with status labels
//! - Three-way bookmark merge planning and execution
//! - Reading position exchange
//! - A full/quick sync orchestrator with single-flight triggers
//! - `BookStore` and `SyncTransport` capabilities, with in-memory and
//!   HTTP-backed implementations
//!
//! ## Architecture
//!
//! The orchestrator runs two independent flows:
//! 1. **Full sync**: load the library into the upload queue, then reconcile
//!    each book against the server's hash catalogue, uploading what is
//!    missing and labelling every book with its outcome
//! 2. **Quick sync**: exchange reading positions, then merge bookmarks
//!
//! ## Key Invariants
//!
//! - A hash seen on the server is never treated as absent for the rest of
//!   a run
//! - Re-running a sync never duplicates uploads or deletions
//! - An authentication failure stops the full sync; every other failure is
//!   confined to one book
//! - Each flow runs at most once at a time

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Engine version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

mod config;
mod error;
mod events;
mod executor;
mod hashes;
mod hashing;
mod http;
mod orchestrator;
mod planner;
mod positions;
mod reconciler;
mod store;
mod transport;
mod types;

pub use config::{SyncCategories, SyncCategory, SyncConfig, DEFAULT_MAX_UPLOAD_SIZE};
pub use error::{SyncError, SyncResult};
pub use events::{EventFeed, FullSyncReport, QuickSyncReport, SyncEvent};
pub use executor::{BookmarkSyncExecutor, BookmarkSyncReport, ServerBookmarks};
pub use hashes::{HashSetLoader, ServerHashUniverse};
pub use hashing::content_hash;
pub use http::{HttpClient, HttpResponse, HttpTransport};
pub use orchestrator::{FlowState, SyncOrchestrator, FULL_SYNC_THREAD, QUICK_SYNC_THREAD};
pub use planner::{plan, BookmarkPlan};
pub use positions::PositionSyncer;
pub use reconciler::{BookUploadReconciler, Status};
pub use store::{BookStore, MemoryBookStore, StoreError, StoreResult};
pub use transport::{
    form_headers, Header, MockTransport, RecordedRequest, SyncTransport, CSRF_TOKEN, REFERER,
};
pub use types::{
    now_millis, Book, BookId, BookQuery, Bookmark, BookmarkQuery, ReadingPosition, SyncLabel,
};
