//! An in-memory library server.
//!
//! [`FakeSyncServer`] implements [`SyncTransport`] directly, so engine
//! components can be exercised end to end without a network. It keeps a
//! request log and supports failure injection per endpoint.

use parking_lot::Mutex;
use serde_json::{json, Value};
use shelfsync_engine::{content_hash, Header, SyncError, SyncResult, SyncTransport, CSRF_TOKEN};
use shelfsync_protocol::{
    decode, encode, endpoints, BookStatus, BookmarkFetchResponse, BookmarkInfo, BookmarkPage,
    BookmarkPayload, BookmarkRequest, BookmarkUpdateBatch, HashPage, PositionEntry,
    PositionExchangeRequest, PositionExchangeResponse, UploadResult, VerificationResponse,
    ALREADY_UPLOADED,
};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Cookie domain the fake server issues its session for.
pub const FAKE_DOMAIN: &str = "books.test";
/// Base URL of the fake server.
pub const FAKE_BASE_URL: &str = "https://books.test/";
/// Anti-forgery token the fake server hands out.
pub const FAKE_CSRF_TOKEN: &str = "fake-csrf";

#[derive(Debug, Default)]
struct ServerState {
    /// Canonical hash -> every hash of the same book.
    books: BTreeMap<String, Vec<String>>,
    deleted_books: BTreeSet<String>,
    bookmarks: BTreeMap<String, BookmarkPayload>,
    deleted_bookmarks: BTreeSet<String>,
    positions: BTreeMap<String, PositionEntry>,
    next_id: u64,
    failures: HashMap<String, VecDeque<SyncError>>,
    rejecting_credentials: bool,
    log: Vec<(String, Vec<Header>)>,
}

impl ServerState {
    fn canonical(&self, hash: &str) -> Option<(&String, &Vec<String>)> {
        self.books
            .iter()
            .find(|(canonical, aliases)| *canonical == hash || aliases.iter().any(|h| h == hash))
    }

    fn next_version(&mut self, uid: &str) -> String {
        self.next_id += 1;
        format!("{uid}@{}", self.next_id)
    }
}

/// In-memory server speaking the library sync protocol.
#[derive(Default)]
pub struct FakeSyncServer {
    state: Mutex<ServerState>,
    cookie_reloads: AtomicUsize,
}

impl FakeSyncServer {
    /// Creates an empty server.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a book under `hash`.
    pub fn add_book(&self, hash: &str) {
        self.add_book_with_aliases(hash, &[]);
    }

    /// Stores a book known under several hashes; `canonical` comes first.
    pub fn add_book_with_aliases(&self, canonical: &str, aliases: &[&str]) {
        let mut hashes = vec![canonical.to_string()];
        hashes.extend(aliases.iter().map(|h| h.to_string()));
        self.state.lock().books.insert(canonical.to_string(), hashes);
    }

    /// Tombstones a book hash.
    pub fn delete_book(&self, hash: &str) {
        let mut state = self.state.lock();
        state.books.remove(hash);
        state.deleted_books.insert(hash.to_string());
    }

    /// Returns true if the server holds content with this hash.
    pub fn has_book(&self, hash: &str) -> bool {
        self.state.lock().canonical(hash).is_some()
    }

    /// Number of books held.
    pub fn book_count(&self) -> usize {
        self.state.lock().books.len()
    }

    /// Stores a bookmark as-is.
    pub fn put_bookmark(&self, payload: BookmarkPayload) {
        let mut state = self.state.lock();
        state.deleted_bookmarks.remove(&payload.uid);
        state.bookmarks.insert(payload.uid.clone(), payload);
    }

    /// Tombstones a bookmark.
    pub fn delete_bookmark(&self, uid: &str) {
        let mut state = self.state.lock();
        state.bookmarks.remove(uid);
        state.deleted_bookmarks.insert(uid.to_string());
    }

    /// Returns a stored bookmark.
    pub fn bookmark(&self, uid: &str) -> Option<BookmarkPayload> {
        self.state.lock().bookmarks.get(uid).cloned()
    }

    /// Returns true if the bookmark is tombstoned.
    pub fn is_bookmark_deleted(&self, uid: &str) -> bool {
        self.state.lock().deleted_bookmarks.contains(uid)
    }

    /// Records a position as if another device had sent it.
    pub fn put_position(&self, entry: PositionEntry) {
        self.state.lock().positions.insert(entry.hash.clone(), entry);
    }

    /// Returns the stored position for a book hash.
    pub fn position(&self, hash: &str) -> Option<PositionEntry> {
        self.state.lock().positions.get(hash).cloned()
    }

    /// Makes the next request to `endpoint` fail with `error`.
    pub fn fail_next(&self, endpoint: &str, error: SyncError) {
        self.state
            .lock()
            .failures
            .entry(endpoint.to_string())
            .or_default()
            .push_back(error);
    }

    /// Makes every request fail authentication until switched off.
    pub fn reject_credentials(&self, reject: bool) {
        self.state.lock().rejecting_credentials = reject;
    }

    /// Endpoints requested so far, in order.
    pub fn requests(&self) -> Vec<String> {
        self.state
            .lock()
            .log
            .iter()
            .map(|(endpoint, _)| endpoint.clone())
            .collect()
    }

    /// Number of requests to one endpoint.
    pub fn request_count(&self, endpoint: &str) -> usize {
        self.state
            .lock()
            .log
            .iter()
            .filter(|(e, _)| e == endpoint)
            .count()
    }

    /// Headers of the most recent request to `endpoint`.
    pub fn last_headers(&self, endpoint: &str) -> Option<Vec<Header>> {
        self.state
            .lock()
            .log
            .iter()
            .rev()
            .find(|(e, _)| e == endpoint)
            .map(|(_, headers)| headers.clone())
    }

    /// Number of cookie reloads so far.
    pub fn cookie_reloads(&self) -> usize {
        self.cookie_reloads.load(Ordering::SeqCst)
    }

    fn admit(&self, endpoint: &str, headers: &[Header]) -> SyncResult<()> {
        let mut state = self.state.lock();
        state.log.push((endpoint.to_string(), headers.to_vec()));
        if state.rejecting_credentials {
            return Err(SyncError::AuthenticationFailed("session expired".into()));
        }
        if let Some(error) = state
            .failures
            .get_mut(endpoint)
            .and_then(|queue| queue.pop_front())
        {
            return Err(error);
        }
        Ok(())
    }

    fn require_csrf(headers: &[Header]) -> SyncResult<()> {
        let valid = headers
            .iter()
            .any(|h| h.name == CSRF_TOKEN && h.value == FAKE_CSRF_TOKEN);
        if valid {
            Ok(())
        } else {
            Err(SyncError::AuthenticationFailed("CSRF token missing".into()))
        }
    }

    fn hash_page(&self, body: &Value) -> SyncResult<Value> {
        let (page_no, page_size) = paging(body)?;
        let state = self.state.lock();
        let actual: Vec<String> = state.books.values().flatten().cloned().collect();
        let deleted: Vec<String> = state.deleted_books.iter().cloned().collect();
        let page = HashPage::new(
            slice(&actual, page_no, page_size),
            slice(&deleted, page_no, page_size),
        );
        Ok(encode(&page)?)
    }

    fn status_by_hash(&self, body: &Value) -> SyncResult<Value> {
        let hash = body["sha1"]
            .as_str()
            .ok_or_else(|| SyncError::MalformedResponse("sha1 missing".into()))?;
        let state = self.state.lock();
        let response = if let Some((_, hashes)) = state.canonical(hash) {
            VerificationResponse::new(BookStatus::Found, hashes.clone())
        } else if state.deleted_books.contains(hash) {
            VerificationResponse::new(BookStatus::Deleted, vec![hash.to_string()])
        } else {
            VerificationResponse::new(BookStatus::NotFound, Vec::new())
        };
        Ok(encode(&response)?)
    }

    fn upload(&self, file: &Path) -> SyncResult<Value> {
        let result = match content_hash(file) {
            Err(e) => UploadResult {
                error: Some(format!("unreadable upload: {e}")),
                ..UploadResult::default()
            },
            Ok(hash) => {
                let mut state = self.state.lock();
                if let Some((_, hashes)) = state.canonical(&hash) {
                    UploadResult {
                        hashes: Some(hashes.clone()),
                        error: Some("already uploaded".into()),
                        code: Some(ALREADY_UPLOADED.into()),
                        ..UploadResult::default()
                    }
                } else {
                    state.next_id += 1;
                    let id = format!("srv-{}", state.next_id);
                    state.deleted_books.remove(&hash);
                    state.books.insert(hash.clone(), vec![hash.clone()]);
                    UploadResult {
                        id: Some(id),
                        hashes: Some(vec![hash]),
                        ..UploadResult::default()
                    }
                }
            }
        };
        Ok(result.into_response()?)
    }

    fn positions(&self, body: &Value) -> SyncResult<Value> {
        let request = PositionExchangeRequest::from_value(body.clone())?;
        let mut state = self.state.lock();
        for entry in request.positions {
            let newer = state
                .positions
                .get(&entry.hash)
                .map_or(true, |stored| entry.timestamp > stored.timestamp);
            if newer {
                state.positions.insert(entry.hash.clone(), entry);
            }
        }
        let response = PositionExchangeResponse {
            positions: state.positions.values().cloned().collect(),
        };
        Ok(response.to_value()?)
    }

    fn bookmark_page(&self, body: &Value) -> SyncResult<Value> {
        let (page_no, page_size) = paging(body)?;
        let state = self.state.lock();
        let infos: Vec<BookmarkInfo> = state
            .bookmarks
            .values()
            .map(|b| BookmarkInfo::new(b.uid.as_str(), b.version_uid.clone(), b.modification_timestamp))
            .collect();
        let page = BookmarkPage {
            actual: slice(&infos, page_no, page_size),
            deleted: if page_no == 0 {
                state.deleted_bookmarks.iter().cloned().collect()
            } else {
                Vec::new()
            },
            count: infos.len() as u64,
        };
        Ok(page.to_value()?)
    }

    fn update_bookmarks(&self, body: &Value) -> SyncResult<Value> {
        let batch = BookmarkUpdateBatch::from_value(body.clone())?;
        let mut state = self.state.lock();
        for request in batch.requests {
            match request {
                BookmarkRequest::Add { mut bookmark } | BookmarkRequest::Update { mut bookmark } => {
                    bookmark.version_uid = Some(state.next_version(&bookmark.uid));
                    state.deleted_bookmarks.remove(&bookmark.uid);
                    state.bookmarks.insert(bookmark.uid.clone(), bookmark);
                }
                BookmarkRequest::Delete { uid } => {
                    state.bookmarks.remove(&uid);
                    state.deleted_bookmarks.insert(uid);
                }
            }
        }
        Ok(json!({}))
    }

    fn bookmarks_by_uid(&self, body: &Value) -> SyncResult<Value> {
        let uids: Vec<String> = decode(body["uids"].clone())?;
        let state = self.state.lock();
        let response = BookmarkFetchResponse {
            bookmarks: uids
                .iter()
                .filter_map(|uid| state.bookmarks.get(uid).cloned())
                .collect(),
        };
        Ok(response.to_value()?)
    }
}

impl SyncTransport for FakeSyncServer {
    fn post_json(&self, endpoint: &str, body: &Value, headers: &[Header]) -> SyncResult<Value> {
        self.admit(endpoint, headers)?;
        match endpoint {
            endpoints::ALL_HASHES_PAGED => self.hash_page(body),
            endpoints::BOOK_STATUS_BY_HASH => self.status_by_hash(body),
            endpoints::POSITION_EXCHANGE => self.positions(body),
            endpoints::BOOKMARKS_LITE_PAGED => self.bookmark_page(body),
            endpoints::UPDATE_BOOKMARKS => {
                Self::require_csrf(headers)?;
                self.update_bookmarks(body)
            }
            endpoints::BOOKMARKS_BY_UID => {
                Self::require_csrf(headers)?;
                self.bookmarks_by_uid(body)
            }
            other => Err(SyncError::network_fatal(format!("404 {other}"))),
        }
    }

    fn upload_file(&self, endpoint: &str, file: &Path, headers: &[Header]) -> SyncResult<Value> {
        self.admit(endpoint, headers)?;
        if endpoint != endpoints::BOOK_UPLOAD {
            return Err(SyncError::network_fatal(format!("404 {endpoint}")));
        }
        Self::require_csrf(headers)?;
        self.upload(file)
    }

    fn cookie_value(&self, domain: &str, name: &str) -> Option<String> {
        (domain == FAKE_DOMAIN && name == "csrftoken").then(|| FAKE_CSRF_TOKEN.to_string())
    }

    fn reload_cookies(&self) {
        self.cookie_reloads.fetch_add(1, Ordering::SeqCst);
    }
}

fn paging(body: &Value) -> SyncResult<(usize, usize)> {
    let field = |name: &str| {
        body[name]
            .as_u64()
            .map(|n| n as usize)
            .ok_or_else(|| SyncError::MalformedResponse(format!("{name} missing")))
    };
    Ok((field("page_no")?, field("page_size")?.max(1)))
}

fn slice<T: Clone>(items: &[T], page_no: usize, page_size: usize) -> Vec<T> {
    items
        .iter()
        .skip(page_no * page_size)
        .take(page_size)
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use shelfsync_protocol::{HashPageRequest, TextPosition, VerificationRequest};

    #[test]
    fn hash_pages_cover_the_catalogue() {
        let server = FakeSyncServer::new();
        for i in 0..5 {
            server.add_book(&format!("h{i}"));
        }
        server.delete_book("h4");

        let page = |n| {
            let body = HashPageRequest::new(n, 2).to_value().unwrap();
            HashPage::from_value(server.post_json(endpoints::ALL_HASHES_PAGED, &body, &[]).unwrap())
                .unwrap()
        };
        assert_eq!(page(0).actual, vec!["h0".to_string(), "h1".to_string()]);
        assert_eq!(page(1).actual.len(), 2);
        assert!(page(2).is_last(2));
        assert_eq!(server.request_count(endpoints::ALL_HASHES_PAGED), 3);
    }

    #[test]
    fn status_reports_aliases_and_deletions() {
        let server = FakeSyncServer::new();
        server.add_book_with_aliases("canon", &["alias"]);
        server.delete_book("gone");

        let status = |hash: &str| {
            let body = VerificationRequest::new(hash).to_value().unwrap();
            VerificationResponse::from_value(
                server
                    .post_json(endpoints::BOOK_STATUS_BY_HASH, &body, &[])
                    .unwrap(),
            )
            .unwrap()
        };
        let found = status("alias");
        assert_eq!(found.status, BookStatus::Found);
        assert_eq!(found.hashes, vec!["canon".to_string(), "alias".to_string()]);
        assert_eq!(status("gone").status, BookStatus::Deleted);
        assert_eq!(status("new").status, BookStatus::NotFound);
    }

    #[test]
    fn uploads_need_the_csrf_token() {
        let server = FakeSyncServer::new();
        let err = server
            .upload_file(endpoints::BOOK_UPLOAD, Path::new("/nonexistent"), &[])
            .unwrap_err();
        assert!(err.is_authentication());
    }

    #[test]
    fn injected_failures_are_consumed_in_order() {
        let server = FakeSyncServer::new();
        server.fail_next(endpoints::POSITION_EXCHANGE, SyncError::network_retryable("503"));
        let body = PositionExchangeRequest::default().to_value().unwrap();

        assert!(server
            .post_json(endpoints::POSITION_EXCHANGE, &body, &[])
            .is_err());
        assert!(server
            .post_json(endpoints::POSITION_EXCHANGE, &body, &[])
            .is_ok());
    }

    #[test]
    fn positions_keep_the_newest_entry() {
        let server = FakeSyncServer::new();
        server.put_position(PositionEntry::new("h", TextPosition::new(5, 0, 0), 50));
        let request = PositionExchangeRequest {
            timestamp: 60,
            positions: vec![PositionEntry::new("h", TextPosition::new(1, 0, 0), 40)],
        };
        server
            .post_json(endpoints::POSITION_EXCHANGE, &request.to_value().unwrap(), &[])
            .unwrap();
        assert_eq!(server.position("h").unwrap().timestamp, 50);
    }

    #[test]
    fn rejecting_credentials_fails_everything() {
        let server = FakeSyncServer::new();
        server.reject_credentials(true);
        assert!(server
            .post_json(endpoints::ALL_HASHES_PAGED, &json!({}), &[])
            .unwrap_err()
            .is_authentication());
        assert_eq!(server.requests(), vec![endpoints::ALL_HASHES_PAGED.to_string()]);
    }
}
