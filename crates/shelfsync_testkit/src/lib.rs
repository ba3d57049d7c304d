//! # Shelfsync Testkit
//!
//! Test utilities for Shelfsync.
//!
//! This crate provides:
//! - An in-memory library server implementing `SyncTransport`
//! - Temporary on-disk libraries wired to that server
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use shelfsync_testkit::prelude::*;
//!
//! #[test]
//! fn uploads_new_books() {
//!     with_library(|lib| {
//!         lib.add_book(1, b"content");
//!         lib.orchestrator().full_sync().unwrap();
//!         assert!(lib.server.has_book(&lib.hash_of(1)));
//!     });
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod server;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::server::*;
}

pub use fixtures::*;
pub use generators::*;
pub use server::*;
