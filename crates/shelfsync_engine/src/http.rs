//! HTTP transport implementation.
//!
//! This module provides an HTTP-based transport for the sync engine.
//! The actual HTTP client is abstracted via a trait to allow different
//! implementations (reqwest, ureq, a platform networking stack, etc.),
//! including the cookie jar that holds the session and anti-forgery token.

use crate::error::{SyncError, SyncResult};
use crate::transport::{Header, SyncTransport};
use parking_lot::RwLock;
use serde_json::Value;
use std::path::Path;
use tracing::warn;

/// Raw HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Response body.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Creates a response.
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Returns true for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Returns true if the server rejected the credentials.
    pub fn is_unauthorized(&self) -> bool {
        self.status == 401 || self.status == 403
    }
}

/// HTTP client abstraction.
///
/// Implement this trait to provide the actual HTTP transport. Errors are
/// connection-level failures; any response the server produced, whatever
/// its status, is returned as `Ok`.
pub trait HttpClient: Send + Sync {
    /// Sends a POST request with a JSON body.
    fn post(&self, url: &str, body: Vec<u8>, headers: &[Header]) -> Result<HttpResponse, String>;

    /// Sends a multipart file upload.
    fn upload(&self, url: &str, file: &Path, headers: &[Header]) -> Result<HttpResponse, String>;

    /// Returns a cookie from the client's jar.
    fn cookie(&self, domain: &str, name: &str) -> Option<String>;

    /// Reloads the cookie jar from persistent storage.
    fn reload_cookies(&self);
}

/// HTTP-based sync transport.
///
/// Uses JSON encoding for request and response bodies.
pub struct HttpTransport<C: HttpClient> {
    /// Base URL of the sync server (e.g., "https://books.example.com/").
    base_url: String,
    /// HTTP client implementation.
    client: C,
    /// Last error message.
    last_error: RwLock<Option<String>>,
}

impl<C: HttpClient> HttpTransport<C> {
    /// Creates a new HTTP transport.
    pub fn new(base_url: impl Into<String>, client: C) -> Self {
        Self {
            base_url: base_url.into(),
            client,
            last_error: RwLock::new(None),
        }
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the last error message.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.base_url, endpoint)
    }

    fn finish(
        &self,
        url: &str,
        response: Result<HttpResponse, String>,
    ) -> SyncResult<Value> {
        let response = response.map_err(|e| {
            warn!(%url, error = %e, "request failed");
            *self.last_error.write() = Some(e.clone());
            SyncError::network_retryable(e)
        })?;

        if response.is_unauthorized() {
            let message = format!("{url} returned {}", response.status);
            *self.last_error.write() = Some(message.clone());
            return Err(SyncError::AuthenticationFailed(message));
        }
        if !response.is_success() {
            let message = format!("{url} returned {}", response.status);
            *self.last_error.write() = Some(message.clone());
            return Err(SyncError::network_retryable(message));
        }

        *self.last_error.write() = None;

        serde_json::from_slice(&response.body)
            .map_err(|e| SyncError::MalformedResponse(format!("{url}: {e}")))
    }
}

impl<C: HttpClient> SyncTransport for HttpTransport<C> {
    fn post_json(&self, endpoint: &str, body: &Value, headers: &[Header]) -> SyncResult<Value> {
        let url = self.url(endpoint);
        let body = serde_json::to_vec(body)
            .map_err(|e| SyncError::MalformedResponse(format!("failed to encode request: {e}")))?;
        let response = self.client.post(&url, body, headers);
        self.finish(&url, response)
    }

    fn upload_file(&self, endpoint: &str, file: &Path, headers: &[Header]) -> SyncResult<Value> {
        let url = self.url(endpoint);
        let response = self.client.upload(&url, file, headers);
        self.finish(&url, response)
    }

    fn cookie_value(&self, domain: &str, name: &str) -> Option<String> {
        self.client.cookie(domain, name)
    }

    fn reload_cookies(&self) {
        self.client.reload_cookies();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct TestClient {
        response: RwLock<Option<HttpResponse>>,
        last_url: RwLock<Option<String>>,
        reloads: AtomicUsize,
    }

    impl TestClient {
        fn new() -> Self {
            Self {
                response: RwLock::new(None),
                last_url: RwLock::new(None),
                reloads: AtomicUsize::new(0),
            }
        }

        fn set_response(&self, resp: HttpResponse) {
            *self.response.write() = Some(resp);
        }

        fn respond(&self, url: &str) -> Result<HttpResponse, String> {
            *self.last_url.write() = Some(url.to_string());
            self.response
                .read()
                .clone()
                .ok_or_else(|| "connection refused".into())
        }
    }

    impl HttpClient for TestClient {
        fn post(
            &self,
            url: &str,
            _body: Vec<u8>,
            _headers: &[Header],
        ) -> Result<HttpResponse, String> {
            self.respond(url)
        }

        fn upload(
            &self,
            url: &str,
            _file: &Path,
            _headers: &[Header],
        ) -> Result<HttpResponse, String> {
            self.respond(url)
        }

        fn cookie(&self, _domain: &str, name: &str) -> Option<String> {
            (name == "csrftoken").then(|| "token".to_string())
        }

        fn reload_cookies(&self) {
            self.reloads.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn transport() -> HttpTransport<TestClient> {
        HttpTransport::new("https://books.example.com/", TestClient::new())
    }

    #[test]
    fn successful_post_decodes_json() {
        let transport = transport();
        transport
            .client
            .set_response(HttpResponse::new(200, br#"{"status":"found"}"#.to_vec()));

        let value = transport
            .post_json("app/book.status.by.hash", &json!({"sha1": "h"}), &[])
            .unwrap();
        assert_eq!(value, json!({"status": "found"}));
        assert_eq!(
            transport.client.last_url.read().as_deref(),
            Some("https://books.example.com/app/book.status.by.hash")
        );
        assert!(transport.last_error().is_none());
    }

    #[test]
    fn unauthorized_maps_to_authentication_failure() {
        let transport = transport();
        transport.client.set_response(HttpResponse::new(403, vec![]));

        let err = transport.post_json("x", &json!({}), &[]).unwrap_err();
        assert!(err.is_authentication());
        assert!(transport.last_error().is_some());
    }

    #[test]
    fn server_error_is_retryable() {
        let transport = transport();
        transport.client.set_response(HttpResponse::new(502, vec![]));

        let err = transport
            .upload_file("app/book.upload", Path::new("/b.epub"), &[])
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn connection_failure_is_retryable() {
        let transport = transport();
        let err = transport.post_json("x", &json!({}), &[]).unwrap_err();
        assert!(matches!(err, SyncError::Network { retryable: true, .. }));
        assert_eq!(transport.last_error().as_deref(), Some("connection refused"));
    }

    #[test]
    fn non_json_body_is_malformed() {
        let transport = transport();
        transport
            .client
            .set_response(HttpResponse::new(200, b"<html>".to_vec()));

        let err = transport.post_json("x", &json!({}), &[]).unwrap_err();
        assert!(matches!(err, SyncError::MalformedResponse(_)));
    }

    #[test]
    fn cookies_pass_through() {
        let transport = transport();
        assert_eq!(
            transport.cookie_value("books.example.com", "csrftoken").as_deref(),
            Some("token")
        );
        transport.reload_cookies();
        assert_eq!(transport.client.reloads.load(Ordering::SeqCst), 1);
    }
}
