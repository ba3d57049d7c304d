//! Transport layer abstraction for sync operations.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Name of the header carrying the originating page.
pub const REFERER: &str = "Referer";
/// Name of the header carrying the anti-forgery token.
pub const CSRF_TOKEN: &str = "X-CSRFToken";

/// An extra request header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    /// Header name.
    pub name: &'static str,
    /// Header value.
    pub value: String,
}

impl Header {
    /// Creates a `Referer` header.
    pub fn referer(url: impl Into<String>) -> Self {
        Self {
            name: REFERER,
            value: url.into(),
        }
    }

    /// Creates an anti-forgery token header.
    pub fn csrf_token(token: impl Into<String>) -> Self {
        Self {
            name: CSRF_TOKEN,
            value: token.into(),
        }
    }
}

/// Headers for requests that modify server state: the page the request
/// claims to come from, and the anti-forgery token from the session cookie
/// when one is present.
pub fn form_headers<T: SyncTransport + ?Sized>(
    transport: &T,
    config: &SyncConfig,
    referer_endpoint: &str,
) -> Vec<Header> {
    let mut headers = vec![Header::referer(config.url(referer_endpoint))];
    if let Some(token) = transport.cookie_value(&config.domain, &config.csrf_cookie) {
        headers.push(Header::csrf_token(token));
    }
    headers
}

/// A sync transport handles network communication with the sync server.
///
/// Endpoints are relative to the server base URL. Implementations report
/// rejected credentials as [`SyncError::AuthenticationFailed`], other
/// transport or server failures as [`SyncError::Network`], and bodies that
/// are not JSON as [`SyncError::MalformedResponse`].
pub trait SyncTransport: Send + Sync {
    /// Posts a JSON body and returns the decoded JSON response.
    fn post_json(&self, endpoint: &str, body: &Value, headers: &[Header]) -> SyncResult<Value>;

    /// Uploads a file and returns the decoded JSON response.
    fn upload_file(&self, endpoint: &str, file: &Path, headers: &[Header]) -> SyncResult<Value>;

    /// Returns the value of a session cookie.
    fn cookie_value(&self, domain: &str, name: &str) -> Option<String>;

    /// Reloads the authentication cookies from persistent storage.
    fn reload_cookies(&self);
}

/// A request seen by [`MockTransport`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRequest {
    /// Endpoint the request went to.
    pub endpoint: String,
    /// JSON body, for posts.
    pub body: Option<Value>,
    /// File, for uploads.
    pub file: Option<PathBuf>,
    /// Extra headers.
    pub headers: Vec<Header>,
}

/// A scripted transport for testing.
///
/// Replies queued for an endpoint are returned in order; once the queue is
/// empty the endpoint's fallback reply is returned, if any.
#[derive(Default)]
pub struct MockTransport {
    queued: Mutex<HashMap<String, VecDeque<SyncResult<Value>>>>,
    fallback: Mutex<HashMap<String, Value>>,
    cookies: Mutex<HashMap<(String, String), String>>,
    requests: Mutex<Vec<RecordedRequest>>,
    cookie_reloads: AtomicUsize,
}

impl MockTransport {
    /// Creates a new mock transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a reply for an endpoint.
    pub fn push_response(&self, endpoint: &str, response: Value) {
        self.push_result(endpoint, Ok(response));
    }

    /// Queues a failure for an endpoint.
    pub fn push_error(&self, endpoint: &str, error: SyncError) {
        self.push_result(endpoint, Err(error));
    }

    fn push_result(&self, endpoint: &str, result: SyncResult<Value>) {
        self.queued
            .lock()
            .entry(endpoint.to_string())
            .or_default()
            .push_back(result);
    }

    /// Sets the reply returned once an endpoint's queue is drained.
    pub fn set_response(&self, endpoint: &str, response: Value) {
        self.fallback.lock().insert(endpoint.to_string(), response);
    }

    /// Sets a cookie.
    pub fn set_cookie(&self, domain: &str, name: &str, value: &str) {
        self.cookies
            .lock()
            .insert((domain.to_string(), name.to_string()), value.to_string());
    }

    /// Returns every request seen so far.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }

    /// Returns the requests sent to one endpoint.
    pub fn requests_to(&self, endpoint: &str) -> Vec<RecordedRequest> {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.endpoint == endpoint)
            .cloned()
            .collect()
    }

    /// Number of [`SyncTransport::reload_cookies`] calls so far.
    pub fn cookie_reloads(&self) -> usize {
        self.cookie_reloads.load(Ordering::SeqCst)
    }

    fn reply(&self, request: RecordedRequest) -> SyncResult<Value> {
        let endpoint = request.endpoint.clone();
        self.requests.lock().push(request);

        if let Some(result) = self
            .queued
            .lock()
            .get_mut(&endpoint)
            .and_then(|queue| queue.pop_front())
        {
            return result;
        }
        self.fallback
            .lock()
            .get(&endpoint)
            .cloned()
            .ok_or_else(|| SyncError::network_fatal(format!("no mock response for {endpoint}")))
    }
}

impl SyncTransport for MockTransport {
    fn post_json(&self, endpoint: &str, body: &Value, headers: &[Header]) -> SyncResult<Value> {
        self.reply(RecordedRequest {
            endpoint: endpoint.to_string(),
            body: Some(body.clone()),
            file: None,
            headers: headers.to_vec(),
        })
    }

    fn upload_file(&self, endpoint: &str, file: &Path, headers: &[Header]) -> SyncResult<Value> {
        self.reply(RecordedRequest {
            endpoint: endpoint.to_string(),
            body: None,
            file: Some(file.to_path_buf()),
            headers: headers.to_vec(),
        })
    }

    fn cookie_value(&self, domain: &str, name: &str) -> Option<String> {
        self.cookies
            .lock()
            .get(&(domain.to_string(), name.to_string()))
            .cloned()
    }

    fn reload_cookies(&self) {
        self.cookie_reloads.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn queued_replies_come_first() {
        let transport = MockTransport::new();
        transport.set_response("a", json!("fallback"));
        transport.push_response("a", json!(1));
        transport.push_error("a", SyncError::AuthenticationFailed("401".into()));

        assert_eq!(transport.post_json("a", &json!({}), &[]).unwrap(), json!(1));
        assert!(transport
            .post_json("a", &json!({}), &[])
            .unwrap_err()
            .is_authentication());
        assert_eq!(
            transport.post_json("a", &json!({}), &[]).unwrap(),
            json!("fallback")
        );
        assert_eq!(transport.requests_to("a").len(), 3);
    }

    #[test]
    fn unscripted_endpoint_fails() {
        let transport = MockTransport::new();
        let result = transport.upload_file("up", Path::new("/tmp/book.epub"), &[]);
        assert!(matches!(result, Err(SyncError::Network { .. })));
        assert_eq!(
            transport.requests()[0].file.as_deref(),
            Some(Path::new("/tmp/book.epub"))
        );
    }

    #[test]
    fn cookies_and_reloads() {
        let transport = MockTransport::new();
        transport.set_cookie("example.com", "csrftoken", "t0k3n");
        assert_eq!(
            transport.cookie_value("example.com", "csrftoken").as_deref(),
            Some("t0k3n")
        );
        assert!(transport.cookie_value("other.com", "csrftoken").is_none());

        transport.reload_cookies();
        assert_eq!(transport.cookie_reloads(), 1);
    }

    #[test]
    fn form_headers_carry_referer_and_token() {
        let transport = MockTransport::new();
        let config = SyncConfig::new("https://books.example.com", "books.example.com");
        assert_eq!(
            form_headers(&transport, &config, "app/page"),
            vec![Header::referer("https://books.example.com/app/page")]
        );

        transport.set_cookie("books.example.com", "csrftoken", "t");
        assert_eq!(form_headers(&transport, &config, "app/page").len(), 2);
    }

    #[test]
    fn header_constructors() {
        assert_eq!(Header::referer("https://x/").name, "Referer");
        assert_eq!(Header::csrf_token("t").name, "X-CSRFToken");
    }
}
