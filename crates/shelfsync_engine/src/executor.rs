//! Bookmark listing, planning and plan execution.

use crate::config::{SyncCategory, SyncConfig};
use crate::error::SyncResult;
use crate::planner::{plan, BookmarkPlan};
use crate::store::{BookStore, StoreError};
use crate::transport::{form_headers, SyncTransport};
use crate::types::{now_millis, BookId, Bookmark, BookmarkQuery};
use shelfsync_protocol::{
    endpoints, BookmarkFetchRequest, BookmarkFetchResponse, BookmarkInfo, BookmarkPage,
    BookmarkPageRequest, BookmarkRequest, BookmarkUpdateBatch,
};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use tracing::{debug, info};

/// The server's side of the bookmark merge, rebuilt every run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerBookmarks {
    /// Live bookmarks keyed by uid.
    pub infos: BTreeMap<String, BookmarkInfo>,
    /// Tombstoned uids.
    pub deleted: BTreeSet<String>,
}

/// What one bookmark sync run did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BookmarkSyncReport {
    /// Local tombstones forgotten.
    pub purged: usize,
    /// New bookmarks sent to the server.
    pub sent: usize,
    /// Revisions pushed to the server.
    pub updated_on_server: usize,
    /// Deletions pushed to the server.
    pub deleted_on_server: usize,
    /// Bookmarks deleted locally because the server deleted them.
    pub deleted_on_client: usize,
    /// Local bookmarks replaced by the server's revision.
    pub updated_on_client: usize,
    /// Bookmarks fetched that the client had never seen.
    pub fetched: usize,
    /// Actions dropped because the owning book has no content hash or is
    /// not in the library.
    pub skipped: usize,
}

impl fmt::Display for BookmarkSyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "purged={} sent={} updated_on_server={} deleted_on_server={} \
             deleted_on_client={} updated_on_client={} fetched={} skipped={}",
            self.purged,
            self.sent,
            self.updated_on_server,
            self.deleted_on_server,
            self.deleted_on_client,
            self.updated_on_client,
            self.fetched,
            self.skipped
        )
    }
}

/// Runs the bookmark half of a quick sync.
///
/// Content hashes of owning books are cached per book id for the lifetime
/// of the executor.
pub struct BookmarkSyncExecutor<'a, S: BookStore, T: SyncTransport> {
    store: &'a S,
    transport: &'a T,
    config: &'a SyncConfig,
    book_hashes: HashMap<BookId, Option<String>>,
}

impl<'a, S: BookStore, T: SyncTransport> BookmarkSyncExecutor<'a, S, T> {
    /// Creates an executor.
    pub fn new(store: &'a S, transport: &'a T, config: &'a SyncConfig) -> Self {
        Self {
            store,
            transport,
            config,
            book_hashes: HashMap::new(),
        }
    }

    /// Lists both sides, plans the merge and executes it.
    pub fn sync(&mut self) -> SyncResult<BookmarkSyncReport> {
        self.config.ensure_enabled(SyncCategory::Bookmarks)?;

        let server = self.load_server_bookmarks()?;
        let local = self.load_local_bookmarks()?;
        let local_deleted: BTreeSet<String> =
            self.store.deleted_bookmark_uids()?.into_iter().collect();

        let plan = plan(&local, &server.infos, &local_deleted, &server.deleted);
        info!(%plan, "bookmark plan");
        self.execute(&plan)
    }

    /// Pages through the server's bookmark listing.
    pub fn load_server_bookmarks(&self) -> SyncResult<ServerBookmarks> {
        let timestamp = now_millis();
        let page_size = self.config.bookmark_page_size.max(1);
        let mut server = ServerBookmarks::default();

        let mut page_no = 0;
        loop {
            let request = BookmarkPageRequest::new(page_no, page_size, timestamp);
            let response = self.transport.post_json(
                endpoints::BOOKMARKS_LITE_PAGED,
                &request.to_value()?,
                &[],
            )?;
            let page = BookmarkPage::from_value(response)?;
            let last = page.is_last(page_no, page_size);
            let exhausted = page.actual.is_empty() && page.deleted.is_empty();

            for info in page.actual {
                server.infos.insert(info.uid.clone(), info);
            }
            server.deleted.extend(page.deleted);

            if last || exhausted {
                break;
            }
            page_no += 1;
        }
        debug!(
            live = server.infos.len(),
            deleted = server.deleted.len(),
            pages = page_no + 1,
            "loaded server bookmarks"
        );
        Ok(server)
    }

    /// Pages through every local bookmark.
    pub fn load_local_bookmarks(&self) -> SyncResult<Vec<Bookmark>> {
        let mut query = BookmarkQuery::new(self.config.bookmark_page_size.max(1) as usize);
        let mut bookmarks = Vec::new();
        loop {
            let page = self.store.bookmarks(&query)?;
            let done = page.len() < query.page_size;
            bookmarks.extend(page);
            if done {
                return Ok(bookmarks);
            }
            query = query.next();
        }
    }

    /// Carries out a plan.
    ///
    /// Order: purge agreed deletions, send one batch with every server-bound
    /// change, apply server deletions locally, then fetch full content for
    /// everything the server holds a better copy of.
    pub fn execute(&mut self, plan: &BookmarkPlan) -> SyncResult<BookmarkSyncReport> {
        let mut report = BookmarkSyncReport::default();

        if !plan.to_purge.is_empty() {
            self.store.purge_bookmarks(&plan.to_purge)?;
            report.purged = plan.to_purge.len();
        }

        self.send_batch(plan, &mut report)?;

        if !plan.to_delete_on_client.is_empty() {
            let mut deleted = Vec::with_capacity(plan.to_delete_on_client.len());
            for bookmark in &plan.to_delete_on_client {
                match self.store.delete_bookmark(bookmark) {
                    Ok(()) => {}
                    Err(StoreError::BookmarkNotFound(uid)) => {
                        debug!(%uid, "bookmark already deleted locally");
                    }
                    Err(e) => return Err(e.into()),
                }
                deleted.push(bookmark.uid.clone());
            }
            // Both sides now agree; no tombstone needs to travel.
            self.store.purge_bookmarks(&deleted)?;
            report.deleted_on_client = deleted.len();
        }

        self.fetch(plan, &mut report)?;

        info!(%report, "bookmark sync finished");
        Ok(report)
    }

    fn send_batch(&mut self, plan: &BookmarkPlan, report: &mut BookmarkSyncReport) -> SyncResult<()> {
        let mut batch = BookmarkUpdateBatch::new(now_millis());

        for bookmark in &plan.to_send_to_server {
            match self.book_hash(bookmark.book_id)? {
                Some(hash) => {
                    batch.requests.push(BookmarkRequest::Add {
                        bookmark: bookmark.to_payload(&hash),
                    });
                    report.sent += 1;
                }
                None => report.skipped += 1,
            }
        }
        for bookmark in &plan.to_update_on_server {
            match self.book_hash(bookmark.book_id)? {
                Some(hash) => {
                    batch.requests.push(BookmarkRequest::Update {
                        bookmark: bookmark.to_payload(&hash),
                    });
                    report.updated_on_server += 1;
                }
                None => report.skipped += 1,
            }
        }
        for uid in &plan.to_delete_on_server {
            batch.requests.push(BookmarkRequest::Delete { uid: uid.clone() });
            report.deleted_on_server += 1;
        }

        if batch.is_empty() {
            return Ok(());
        }
        let headers = form_headers(self.transport, self.config, endpoints::BOOKMARKS_LITE_PAGED);
        self.transport
            .post_json(endpoints::UPDATE_BOOKMARKS, &batch.to_value()?, &headers)?;
        debug!(requests = batch.requests.len(), "sent bookmark batch");
        Ok(())
    }

    fn fetch(&mut self, plan: &BookmarkPlan, report: &mut BookmarkSyncReport) -> SyncResult<()> {
        let uids = plan.uids_to_fetch();
        if uids.is_empty() {
            return Ok(());
        }

        let headers = form_headers(self.transport, self.config, endpoints::BOOKMARKS_LITE_PAGED);
        let response = self.transport.post_json(
            endpoints::BOOKMARKS_BY_UID,
            &BookmarkFetchRequest::new(uids).to_value()?,
            &headers,
        )?;
        let response = BookmarkFetchResponse::from_value(response)?;

        let local_owners: HashMap<&str, BookId> = plan
            .to_update_on_client
            .iter()
            .map(|b| (b.uid.as_str(), b.book_id))
            .collect();

        for payload in response.bookmarks {
            let existing = local_owners.get(payload.uid.as_str()).copied();
            let book_id = match existing {
                Some(id) => id,
                None => match self.store.book_by_hash(&payload.book_hash)? {
                    Some(book) => book.id,
                    None => {
                        debug!(uid = %payload.uid, hash = %payload.book_hash, "bookmark for unknown book");
                        report.skipped += 1;
                        continue;
                    }
                },
            };
            self.store
                .save_bookmark(&Bookmark::from_payload(payload, book_id))?;
            if existing.is_some() {
                report.updated_on_client += 1;
            } else {
                report.fetched += 1;
            }
        }
        Ok(())
    }

    fn book_hash(&mut self, book_id: BookId) -> SyncResult<Option<String>> {
        if let Some(cached) = self.book_hashes.get(&book_id) {
            return Ok(cached.clone());
        }
        let hash = match self.store.book_by_id(book_id)? {
            Some(book) => self.store.hash(&book)?,
            None => None,
        };
        if hash.is_none() {
            debug!(%book_id, "no content hash, dropping its bookmark actions");
        }
        self.book_hashes.insert(book_id, hash.clone());
        Ok(hash)
    }
}
