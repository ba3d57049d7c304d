//! The two sync flows and their single-flight triggers.
//!
//! A *full* sync drains the upload queue through the
//! [`BookUploadReconciler`]. A *quick* sync exchanges reading positions
//! and merges bookmarks. Each flow runs on its own background thread and
//! at most once at a time; the flows do not exclude each other.
//!
//! ```text
//! full:  Idle -> LoadingQueue -> Processing -> Idle
//! quick: Idle -> Running -> Idle
//! ```

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::events::{EventFeed, FullSyncReport, QuickSyncReport, SyncEvent};
use crate::executor::BookmarkSyncExecutor;
use crate::hashes::ServerHashUniverse;
use crate::positions::PositionSyncer;
use crate::reconciler::BookUploadReconciler;
use crate::store::BookStore;
use crate::transport::SyncTransport;
use crate::types::{Book, BookId, BookQuery};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashSet, VecDeque};
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Name of the full sync worker thread.
pub const FULL_SYNC_THREAD: &str = "shelfsync-full";
/// Name of the quick sync worker thread.
pub const QUICK_SYNC_THREAD: &str = "shelfsync-quick";

/// Where a flow currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    /// Not running.
    Idle,
    /// Full sync: enumerating the library into the queue.
    LoadingQueue,
    /// Full sync: reconciling queued books.
    Processing,
    /// Quick sync: running.
    Running,
}

impl FlowState {
    /// Returns true unless the flow is idle.
    pub fn is_active(&self) -> bool {
        *self != FlowState::Idle
    }
}

/// Marks a flow as running for as long as it lives.
struct FlowGuard {
    state: Arc<Mutex<FlowState>>,
}

impl FlowGuard {
    fn try_acquire(state: &Arc<Mutex<FlowState>>, initial: FlowState) -> Option<Self> {
        let mut current = state.lock();
        if current.is_active() {
            return None;
        }
        *current = initial;
        Some(Self {
            state: Arc::clone(state),
        })
    }

    fn advance(&self, next: FlowState) {
        *self.state.lock() = next;
    }
}

impl Drop for FlowGuard {
    fn drop(&mut self) {
        *self.state.lock() = FlowState::Idle;
    }
}

/// FIFO of books awaiting upload reconciliation, without duplicates.
#[derive(Debug, Default)]
struct UploadQueue {
    books: VecDeque<Book>,
    ids: HashSet<BookId>,
}

impl UploadQueue {
    fn push(&mut self, book: Book) -> bool {
        if !self.ids.insert(book.id) {
            return false;
        }
        self.books.push_back(book);
        true
    }

    fn pop(&mut self) -> Option<Book> {
        let book = self.books.pop_front()?;
        self.ids.remove(&book.id);
        Some(book)
    }

    fn len(&self) -> usize {
        self.books.len()
    }
}

/// Drives both sync flows against one library and one server.
///
/// Create it with [`SyncOrchestrator::new`] and keep the returned `Arc`;
/// the triggers hand clones of it to worker threads. The configuration may
/// change at any time: each trigger, each queued book and each quick sync
/// step reads the current settings.
pub struct SyncOrchestrator<S: BookStore + 'static, T: SyncTransport + 'static> {
    config: RwLock<SyncConfig>,
    store: Arc<S>,
    transport: Arc<T>,
    queue: Mutex<UploadQueue>,
    full_state: Arc<Mutex<FlowState>>,
    quick_state: Arc<Mutex<FlowState>>,
    events: EventFeed,
}

impl<S: BookStore + 'static, T: SyncTransport + 'static> SyncOrchestrator<S, T> {
    /// Creates an orchestrator.
    pub fn new(config: SyncConfig, store: Arc<S>, transport: Arc<T>) -> Arc<Self> {
        Arc::new(Self {
            config: RwLock::new(config),
            store,
            transport,
            queue: Mutex::new(UploadQueue::default()),
            full_state: Arc::new(Mutex::new(FlowState::Idle)),
            quick_state: Arc::new(Mutex::new(FlowState::Idle)),
            events: EventFeed::new(),
        })
    }

    /// Returns a snapshot of the current configuration.
    pub fn config(&self) -> SyncConfig {
        self.config.read().clone()
    }

    /// Replaces the configuration. Running flows pick it up at their next
    /// book or step.
    pub fn set_config(&self, config: SyncConfig) {
        *self.config.write() = config;
    }

    /// Edits the configuration in place.
    pub fn update_config<F: FnOnce(&mut SyncConfig)>(&self, f: F) {
        f(&mut self.config.write());
    }

    /// Returns the library.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Returns the transport.
    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// Subscribes to sync notifications.
    pub fn subscribe(&self) -> Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Number of books waiting for the next full sync.
    pub fn queue_len(&self) -> usize {
        self.queue.lock().len()
    }

    /// Current state of the full flow.
    pub fn full_sync_state(&self) -> FlowState {
        *self.full_state.lock()
    }

    /// Current state of the quick flow.
    pub fn quick_sync_state(&self) -> FlowState {
        *self.quick_state.lock()
    }

    /// Returns true while a full sync runs.
    pub fn is_full_sync_running(&self) -> bool {
        self.full_sync_state().is_active()
    }

    /// Returns true while a quick sync runs.
    pub fn is_quick_sync_running(&self) -> bool {
        self.quick_sync_state().is_active()
    }

    /// Queues a book for the next full sync.
    ///
    /// Books without a file, or already queued, are ignored. Returns true if
    /// the book was queued.
    pub fn on_book_added(&self, book: Book) -> bool {
        if book.path.is_none() {
            return false;
        }
        let id = book.id;
        let queued = self.queue.lock().push(book);
        if queued {
            debug!(book_id = %id, "queued for upload");
        }
        queued
    }

    /// Requests a quick sync because the user opened a book.
    pub fn on_book_opened(self: &Arc<Self>, book: &Book) -> Option<JoinHandle<QuickSyncReport>> {
        debug!(book_id = %book.id, "book opened");
        self.run_quick_sync()
    }

    /// Starts a full sync on a background thread.
    ///
    /// Returns `None` without doing anything if synchronization is disabled
    /// or a full sync is already running.
    pub fn run_full_sync(self: &Arc<Self>) -> Option<JoinHandle<FullSyncReport>> {
        let guard = self.begin(&self.full_state, FlowState::LoadingQueue)?;
        let this = Arc::clone(self);
        spawn(FULL_SYNC_THREAD, move || this.full_sync_with(guard))
    }

    /// Starts a quick sync on a background thread.
    ///
    /// Returns `None` without doing anything if synchronization is disabled
    /// or a quick sync is already running.
    pub fn run_quick_sync(self: &Arc<Self>) -> Option<JoinHandle<QuickSyncReport>> {
        let guard = self.begin(&self.quick_state, FlowState::Running)?;
        let this = Arc::clone(self);
        spawn(QUICK_SYNC_THREAD, move || this.quick_sync_with(guard))
    }

    /// Runs a full sync on the calling thread.
    pub fn full_sync(&self) -> Option<FullSyncReport> {
        let guard = self.begin(&self.full_state, FlowState::LoadingQueue)?;
        Some(self.full_sync_with(guard))
    }

    /// Runs a quick sync on the calling thread.
    pub fn quick_sync(&self) -> Option<QuickSyncReport> {
        let guard = self.begin(&self.quick_state, FlowState::Running)?;
        Some(self.quick_sync_with(guard))
    }

    fn begin(&self, state: &Arc<Mutex<FlowState>>, initial: FlowState) -> Option<FlowGuard> {
        if !self.config.read().enabled {
            debug!("synchronization disabled");
            return None;
        }
        let guard = FlowGuard::try_acquire(state, initial);
        if guard.is_none() {
            debug!(?initial, "flow already running");
        }
        guard
    }

    fn full_sync_with(&self, guard: FlowGuard) -> FullSyncReport {
        let start = Instant::now();
        let mut report = FullSyncReport::default();
        self.transport.reload_cookies();

        if let Err(e) = self.load_queue() {
            warn!(error = %e, "failed to enumerate library");
        }

        guard.advance(FlowState::Processing);
        let mut universe = ServerHashUniverse::new();

        loop {
            let Some(queued) = self.queue.lock().pop() else {
                break;
            };
            let mut book = match self.store.book_by_id(queued.id) {
                Ok(Some(book)) => book,
                Ok(None) => {
                    debug!(book_id = %queued.id, "book left the library");
                    continue;
                }
                Err(e) => {
                    warn!(book_id = %queued.id, error = %e, "using queued copy");
                    queued
                }
            };

            let config = self.config();
            let mut reconciler =
                BookUploadReconciler::new(&*self.store, &*self.transport, &config, universe);
            let status = reconciler.classify(&book);
            universe = reconciler.into_universe();
            report.record(status);
            debug!(book_id = %book.id, %status, "reconciled");

            if status.apply_to(&mut book) {
                if let Err(e) = self.store.save_book(&book) {
                    warn!(book_id = %book.id, error = %e, "failed to save labels");
                }
            }

            if status.is_fatal() {
                report.aborted = true;
                warn!(remaining = self.queue_len(), "authentication failed, stopping");
                break;
            }
        }

        report.duration = start.elapsed();
        info!(%report, hashes = %universe, "full sync finished");
        drop(guard);
        self.events.emit(SyncEvent::FullSyncFinished(report.clone()));
        report
    }

    fn load_queue(&self) -> SyncResult<()> {
        let mut query = BookQuery::new(self.config.read().library_page_size.max(1));
        let mut queued = 0;
        loop {
            let page = self.store.books(&query)?;
            let done = page.len() < query.page_size;
            for book in page {
                if self.on_book_added(book) {
                    queued += 1;
                }
            }
            if done {
                break;
            }
            query = query.next();
        }
        debug!(queued, total = self.queue_len(), "library loaded");
        Ok(())
    }

    fn quick_sync_with(&self, guard: FlowGuard) -> QuickSyncReport {
        let mut report = QuickSyncReport::default();
        self.transport.reload_cookies();

        let config = self.config();
        match PositionSyncer::new(&*self.store, &*self.transport, &config).sync() {
            Ok(updated) => {
                report.positions_updated = updated;
                if updated {
                    self.events.emit(SyncEvent::PositionsUpdated);
                }
            }
            Err(e) => record_error(&mut report, "positions", e),
        }

        // Custom shelves are reserved for a later protocol revision.

        let config = self.config();
        match BookmarkSyncExecutor::new(&*self.store, &*self.transport, &config).sync() {
            Ok(bookmarks) => report.bookmarks = Some(bookmarks),
            Err(e) => record_error(&mut report, "bookmarks", e),
        }

        drop(guard);
        self.events
            .emit(SyncEvent::QuickSyncFinished(report.clone()));
        report
    }
}

fn record_error(report: &mut QuickSyncReport, step: &str, error: SyncError) {
    if error.is_disabled() {
        debug!(step, "skipped, disabled");
        return;
    }
    warn!(step, error = %error, "quick sync step failed");
    report.errors.push(format!("{step}: {error}"));
}

fn spawn<R, F>(name: &str, work: F) -> Option<JoinHandle<R>>
where
    R: Send + 'static,
    F: FnOnce() -> R + Send + 'static,
{
    match thread::Builder::new().name(name.to_string()).spawn(work) {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!(thread = name, error = %e, "failed to start sync thread");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconciler::Status;
    use crate::store::MemoryBookStore;
    use crate::config::SyncCategory;
    use crate::transport::{Header, MockTransport};
    use crate::types::SyncLabel;
    use serde_json::json;
    use shelfsync_protocol::endpoints;
    use std::path::Path;
    use std::sync::{OnceLock, Weak};

    fn book(id: i64) -> Book {
        Book::new(BookId(id), format!("book {id}")).with_path(format!("/library/{id}.epub"))
    }

    fn orchestrator(
        books: &[(i64, &str)],
    ) -> Arc<SyncOrchestrator<MemoryBookStore, MockTransport>> {
        let store = MemoryBookStore::new();
        for (id, hash) in books {
            store.insert_book_with_hash(book(*id), *hash);
            store.set_file_size(BookId(*id), 10);
        }
        let config = SyncConfig::new("https://books.example.com/", "books.example.com")
            .with_library_page_size(2);
        SyncOrchestrator::new(config, Arc::new(store), Arc::new(MockTransport::new()))
    }

    #[test]
    fn queue_deduplicates_and_requires_a_file() {
        let orchestrator = orchestrator(&[]);
        assert!(orchestrator.on_book_added(book(1)));
        assert!(!orchestrator.on_book_added(book(1)));
        assert!(!orchestrator.on_book_added(Book::new(BookId(2), "no file")));
        assert_eq!(orchestrator.queue_len(), 1);
    }

    #[test]
    fn full_sync_labels_every_book() {
        let orchestrator = orchestrator(&[(1, "h1"), (2, "h2"), (3, "h3")]);
        orchestrator.transport().set_response(
            endpoints::ALL_HASHES_PAGED,
            json!({"actual": ["h1"], "deleted": ["h2"]}),
        );
        orchestrator.transport().set_response(
            endpoints::BOOK_STATUS_BY_HASH,
            json!({"status": "found", "hashes": ["h3"]}),
        );
        let events = orchestrator.subscribe();

        let report = orchestrator.full_sync().unwrap();

        assert_eq!(report.processed, 3);
        assert_eq!(report.count(Status::AlreadyUploaded), 2);
        assert_eq!(report.count(Status::ToBeDeleted), 1);
        assert!(!report.aborted);
        let store = orchestrator.store();
        assert!(store.book(BookId(1)).unwrap().has_label(SyncLabel::Synchronised));
        assert!(store.book(BookId(2)).unwrap().has_label(SyncLabel::SyncDeleted));
        assert_eq!(orchestrator.queue_len(), 0);
        assert_eq!(orchestrator.full_sync_state(), FlowState::Idle);
        assert_eq!(
            events.try_recv().unwrap(),
            SyncEvent::FullSyncFinished(report)
        );
    }

    #[test]
    fn disabled_sync_does_not_start() {
        let store = Arc::new(MemoryBookStore::new());
        let config = SyncConfig::new("https://books.example.com/", "books.example.com")
            .with_enabled(false);
        let orchestrator = SyncOrchestrator::new(config, store, Arc::new(MockTransport::new()));
        assert!(orchestrator.run_full_sync().is_none());
        assert!(orchestrator.quick_sync().is_none());
    }

    #[test]
    fn disabling_sync_stops_later_triggers() {
        let orchestrator = orchestrator(&[]);
        orchestrator.set_config(orchestrator.config().with_enabled(false));
        assert!(orchestrator.full_sync().is_none());
        assert!(orchestrator.run_quick_sync().is_none());

        orchestrator.update_config(|config| config.enabled = true);
        assert!(orchestrator.full_sync().is_some());
    }

    /// Switches the books category off after the first upload.
    #[derive(Default)]
    struct DisablingTransport {
        inner: MockTransport,
        orchestrator: OnceLock<Weak<SyncOrchestrator<MemoryBookStore, DisablingTransport>>>,
    }

    impl SyncTransport for DisablingTransport {
        fn post_json(
            &self,
            endpoint: &str,
            body: &serde_json::Value,
            headers: &[Header],
        ) -> SyncResult<serde_json::Value> {
            self.inner.post_json(endpoint, body, headers)
        }

        fn upload_file(
            &self,
            endpoint: &str,
            file: &Path,
            headers: &[Header],
        ) -> SyncResult<serde_json::Value> {
            let response = self.inner.upload_file(endpoint, file, headers);
            if let Some(orchestrator) = self.orchestrator.get().and_then(Weak::upgrade) {
                orchestrator.update_config(|config| config.categories.books = false);
            }
            response
        }

        fn cookie_value(&self, domain: &str, name: &str) -> Option<String> {
            self.inner.cookie_value(domain, name)
        }

        fn reload_cookies(&self) {
            self.inner.reload_cookies();
        }
    }

    #[test]
    fn disabling_books_mid_drain() {
        let store = MemoryBookStore::new();
        for id in 1..=3 {
            store.insert_book_with_hash(book(id), format!("h{id}"));
            store.set_file_size(BookId(id), 10);
        }
        let transport = Arc::new(DisablingTransport::default());
        transport
            .inner
            .set_response(endpoints::ALL_HASHES_PAGED, json!({"actual": [], "deleted": []}));
        transport
            .inner
            .set_response(endpoints::BOOK_STATUS_BY_HASH, json!({"status": "not found"}));
        transport.inner.set_response(
            endpoints::BOOK_UPLOAD,
            json!([{"result": {"id": "srv-1", "hashes": ["h1"]}}]),
        );
        let config = SyncConfig::new("https://books.example.com/", "books.example.com");
        let orchestrator = SyncOrchestrator::new(config, Arc::new(store), Arc::clone(&transport));
        let _ = transport.orchestrator.set(Arc::downgrade(&orchestrator));

        let report = orchestrator.full_sync().unwrap();

        assert_eq!(report.processed, 3);
        assert_eq!(report.count(Status::Uploaded), 1);
        assert_eq!(report.count(Status::SynchronizationDisabled), 2);
        assert!(!report.aborted);
        assert_eq!(transport.inner.requests_to(endpoints::BOOK_UPLOAD).len(), 1);
        assert!(orchestrator.store().book(BookId(2)).unwrap().labels().is_empty());
        assert!(!orchestrator.config().is_enabled(SyncCategory::Books));
    }

    #[test]
    fn running_flow_rejects_second_trigger() {
        let orchestrator = orchestrator(&[]);
        let guard = FlowGuard::try_acquire(&orchestrator.full_state, FlowState::Processing).unwrap();
        assert!(orchestrator.is_full_sync_running());
        assert!(orchestrator.full_sync().is_none());
        assert!(orchestrator.run_full_sync().is_none());
        assert!(!orchestrator.is_quick_sync_running());

        drop(guard);
        assert!(!orchestrator.is_full_sync_running());
    }

    #[test]
    fn quick_sync_catches_failures() {
        let orchestrator = orchestrator(&[]);
        orchestrator
            .transport()
            .set_response(endpoints::POSITION_EXCHANGE, json!({"positions": []}));

        let handle = orchestrator.run_quick_sync().unwrap();
        assert_eq!(handle.thread().name(), Some(QUICK_SYNC_THREAD));
        let report = handle.join().unwrap();

        assert!(!report.positions_updated);
        assert!(report.bookmarks.is_none());
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].starts_with("bookmarks"));
        assert!(!orchestrator.is_quick_sync_running());
    }
}
