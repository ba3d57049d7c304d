//! Per-book upload decision procedure.

use crate::config::{SyncCategory, SyncConfig};
use crate::error::{SyncError, SyncResult};
use crate::hashes::{HashSetLoader, ServerHashUniverse};
use crate::store::BookStore;
use crate::transport::{form_headers, SyncTransport};
use crate::types::{Book, SyncLabel};
use shelfsync_protocol::{
    endpoints, BookStatus, UploadResult, VerificationRequest, VerificationResponse,
};
use std::fmt;
use std::path::Path;
use tracing::{debug, info, warn};

/// Outcome of reconciling one book against the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Status {
    /// The server already holds the content.
    AlreadyUploaded,
    /// The content was uploaded in this run.
    Uploaded,
    /// The server deleted the content; the client should follow.
    ToBeDeleted,
    /// The upload was rejected or impossible.
    Failure,
    /// The server rejected the credentials. Ends the run.
    AuthenticationError,
    /// Transient server or network trouble; retried next run.
    ServerError,
    /// Book synchronization is switched off.
    SynchronizationDisabled,
    /// Skipped because an earlier run already failed on this book.
    FailedPreviously,
    /// Skipped because the book has no content hash yet.
    HashNotComputed,
}

impl Status {
    /// Every status, in declaration order.
    pub const ALL: [Status; 9] = [
        Status::AlreadyUploaded,
        Status::Uploaded,
        Status::ToBeDeleted,
        Status::Failure,
        Status::AuthenticationError,
        Status::ServerError,
        Status::SynchronizationDisabled,
        Status::FailedPreviously,
        Status::HashNotComputed,
    ];

    /// The sync label this outcome leaves on the book, if it changes labels
    /// at all.
    pub fn label(self) -> Option<SyncLabel> {
        match self {
            Status::AlreadyUploaded | Status::Uploaded => Some(SyncLabel::Synchronised),
            Status::ToBeDeleted => Some(SyncLabel::SyncDeleted),
            Status::Failure => Some(SyncLabel::SyncFailure),
            Status::AuthenticationError
            | Status::ServerError
            | Status::SynchronizationDisabled
            | Status::FailedPreviously
            | Status::HashNotComputed => None,
        }
    }

    /// Returns true if processing further books is pointless.
    pub fn is_fatal(self) -> bool {
        self == Status::AuthenticationError
    }

    /// Rewrites the book's sync labels for this outcome.
    ///
    /// Returns true if the labels were touched and the book must be saved.
    pub fn apply_to(self, book: &mut Book) -> bool {
        let Some(label) = self.label() else {
            return false;
        };
        for candidate in SyncLabel::ALL {
            if candidate == label {
                book.add_label(candidate);
            } else {
                book.remove_label(candidate);
            }
        }
        true
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Decides, book by book, whether content must be uploaded, and uploads it.
///
/// The reconciler owns the run's [`ServerHashUniverse`]. It is loaded
/// lazily, on the first book that cannot be decided locally, and grows with
/// every hash the server reveals along the way.
pub struct BookUploadReconciler<'a, S: BookStore, T: SyncTransport> {
    store: &'a S,
    transport: &'a T,
    config: &'a SyncConfig,
    universe: ServerHashUniverse,
}

impl<'a, S: BookStore, T: SyncTransport> BookUploadReconciler<'a, S, T> {
    /// Creates a reconciler that takes ownership of `universe`.
    pub fn new(
        store: &'a S,
        transport: &'a T,
        config: &'a SyncConfig,
        universe: ServerHashUniverse,
    ) -> Self {
        Self {
            store,
            transport,
            config,
            universe,
        }
    }

    /// Returns the hash universe as built so far.
    pub fn universe(&self) -> &ServerHashUniverse {
        &self.universe
    }

    /// Gives the hash universe back.
    pub fn into_universe(self) -> ServerHashUniverse {
        self.universe
    }

    /// Reconciles one book. Never fails: every error maps to a status.
    pub fn classify(&mut self, book: &Book) -> Status {
        match self.try_classify(book) {
            Ok(status) => status,
            Err(e) => {
                let status = status_for_error(&e);
                warn!(book_id = %book.id, error = %e, %status, "book reconciliation failed");
                status
            }
        }
    }

    fn try_classify(&mut self, book: &Book) -> SyncResult<Status> {
        let Some(hash) = self.store.hash(book)? else {
            return Ok(Status::HashNotComputed);
        };
        let force = book.is_forced();

        if self.universe.contains_actual(&hash) {
            return Ok(Status::AlreadyUploaded);
        }
        if !force && book.has_label(SyncLabel::SyncFailure) {
            return Ok(Status::FailedPreviously);
        }

        let Some(path) = book.path.as_deref() else {
            return Ok(Status::Failure);
        };
        match self.store.file_size(book)? {
            Some(size) if size < self.config.max_upload_size => {}
            size => {
                debug!(book_id = %book.id, ?size, "file missing or too large to upload");
                return Ok(Status::Failure);
            }
        }

        self.config.ensure_enabled(SyncCategory::Books)?;
        self.ensure_universe()?;

        if self.universe.contains_actual(&hash) {
            return Ok(Status::AlreadyUploaded);
        }
        if !force && self.universe.contains_deleted(&hash) {
            return Ok(Status::ToBeDeleted);
        }

        let verification = self.verify(&hash)?;
        match (verification.status, force) {
            (BookStatus::Found, false) => {
                self.universe.add_actual(verification.hashes);
                Ok(Status::AlreadyUploaded)
            }
            (BookStatus::Deleted, _) => {
                self.universe.add_deleted(verification.hashes);
                Ok(Status::ToBeDeleted)
            }
            (BookStatus::NotFound, _) | (BookStatus::Found, true) => {
                self.upload(book, path, &hash)
            }
        }
    }

    /// Loads the universe unless it is already complete. Transient failures
    /// are tolerated: the book is then decided by verification alone and the
    /// next book retries the load.
    fn ensure_universe(&mut self) -> SyncResult<()> {
        if self.universe.is_initialized() {
            return Ok(());
        }
        match HashSetLoader::new(self.transport, self.config).load(&mut self.universe) {
            Ok(()) => Ok(()),
            Err(e) if e.is_authentication() || e.is_disabled() => Err(e),
            Err(e) => {
                debug!(error = %e, "continuing without server hashes");
                Ok(())
            }
        }
    }

    fn verify(&self, hash: &str) -> SyncResult<VerificationResponse> {
        let request = VerificationRequest::new(hash);
        let response = self.transport.post_json(
            endpoints::BOOK_STATUS_BY_HASH,
            &request.to_value()?,
            &[],
        )?;
        VerificationResponse::from_value(response.clone()).map_err(|e| {
            SyncError::MalformedResponse(format!("unexpected verification response {response}: {e}"))
        })
    }

    fn upload(&mut self, book: &Book, path: &Path, hash: &str) -> SyncResult<Status> {
        let headers = form_headers(self.transport, self.config, endpoints::BOOK_STATUS_BY_HASH);

        let response = match self
            .transport
            .upload_file(endpoints::BOOK_UPLOAD, path, &headers)
        {
            Ok(response) => response,
            Err(SyncError::MalformedResponse(message)) => {
                warn!(book_id = %book.id, %message, "unparseable upload response");
                return Ok(Status::Failure);
            }
            Err(e) => return Err(e),
        };

        let result = match UploadResult::from_response(response.clone()) {
            Ok(Some(result)) => result,
            Ok(None) | Err(_) => {
                warn!(book_id = %book.id, %response, "UNEXPECTED RESPONSE");
                return Ok(Status::Failure);
            }
        };

        if let Some(hashes) = result.hashes.as_ref().filter(|h| !h.is_empty()) {
            self.universe.add_actual(hashes.iter().cloned());
            if !hashes.iter().any(|h| h == hash) {
                debug!(book_id = %book.id, canonical = %hashes[0], "correcting local hash");
                self.store.set_hash(book, &hashes[0])?;
            }
        }

        if let Some(error) = &result.error {
            warn!(book_id = %book.id, %error, code = ?result.code, "UPLOAD FAILURE");
            if result.is_already_uploaded() {
                return Ok(Status::AlreadyUploaded);
            }
            return Ok(Status::Failure);
        }
        if let Some(id) = &result.id {
            info!(book_id = %book.id, server_id = %id, "UPLOADED SUCCESSFULLY");
            return Ok(Status::Uploaded);
        }
        warn!(book_id = %book.id, %response, "UNEXPECTED RESPONSE");
        Ok(Status::Failure)
    }
}

fn status_for_error(error: &SyncError) -> Status {
    match error {
        SyncError::AuthenticationFailed(_) => Status::AuthenticationError,
        SyncError::SynchronizationDisabled(_) => Status::SynchronizationDisabled,
        SyncError::Network { .. } | SyncError::MalformedResponse(_) | SyncError::Protocol(_) => {
            Status::ServerError
        }
        SyncError::Store(_) | SyncError::Io(_) => Status::Failure,
    }
}
