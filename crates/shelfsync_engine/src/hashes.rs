//! The server's content hash catalogue and its paged loader.

use crate::config::{SyncCategory, SyncConfig};
use crate::error::SyncResult;
use crate::transport::SyncTransport;
use shelfsync_protocol::{endpoints, HashPage, HashPageRequest};
use std::collections::HashSet;
use std::fmt;
use tracing::{debug, warn};

/// Content hashes the server holds (`actual`) or has tombstoned (`deleted`).
///
/// The universe only grows during a run; it is marked initialized once the
/// loader has seen the final page.
#[derive(Debug, Clone, Default)]
pub struct ServerHashUniverse {
    actual: HashSet<String>,
    deleted: HashSet<String>,
    initialized: bool,
}

impl ServerHashUniverse {
    /// Creates an empty, uninitialized universe.
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges a complete catalogue, keeping hashes learned along the way.
    fn merge(&mut self, catalogue: ServerHashUniverse) {
        self.actual.extend(catalogue.actual);
        self.deleted.extend(catalogue.deleted);
        self.initialized |= catalogue.initialized;
    }

    /// Merges hashes of content the server holds.
    pub fn add_actual<I: IntoIterator<Item = String>>(&mut self, hashes: I) {
        self.actual.extend(hashes);
    }

    /// Merges hashes of content the server has deleted.
    pub fn add_deleted<I: IntoIterator<Item = String>>(&mut self, hashes: I) {
        self.deleted.extend(hashes);
    }

    /// Returns true if the server holds this content.
    pub fn contains_actual(&self, hash: &str) -> bool {
        self.actual.contains(hash)
    }

    /// Returns true if the server has deleted this content.
    pub fn contains_deleted(&self, hash: &str) -> bool {
        self.deleted.contains(hash)
    }

    /// Returns true once every page has been loaded.
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Number of hashes the server holds.
    pub fn actual_len(&self) -> usize {
        self.actual.len()
    }

    /// Number of hashes the server has deleted.
    pub fn deleted_len(&self) -> usize {
        self.deleted.len()
    }
}

impl fmt::Display for ServerHashUniverse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} HASHES ({})",
            self.actual.len(),
            self.deleted.len(),
            if self.initialized { "complete" } else { "partial" }
        )
    }
}

/// Pages the server's hash catalogue into a [`ServerHashUniverse`].
pub struct HashSetLoader<'a, T: SyncTransport> {
    transport: &'a T,
    config: &'a SyncConfig,
}

impl<'a, T: SyncTransport> HashSetLoader<'a, T> {
    /// Creates a loader.
    pub fn new(transport: &'a T, config: &'a SyncConfig) -> Self {
        Self { transport, config }
    }

    /// Loads every page into `universe`.
    ///
    /// Does nothing if the universe is already initialized. Pages are
    /// collected apart and merged only once the final page has arrived, so
    /// a failure, including disabled synchronization, returns the error and
    /// leaves `universe` exactly as it was: never half-populated with
    /// catalogue pages, and still holding every hash learned earlier.
    pub fn load(&self, universe: &mut ServerHashUniverse) -> SyncResult<()> {
        if universe.is_initialized() {
            return Ok(());
        }
        let catalogue = self.load_pages().map_err(|e| {
            warn!(error = %e, "failed to load server hashes");
            e
        })?;
        universe.merge(catalogue);
        debug!("LOADED: {}", universe);
        Ok(())
    }

    fn load_pages(&self) -> SyncResult<ServerHashUniverse> {
        self.config.ensure_enabled(SyncCategory::Books)?;
        self.transport.reload_cookies();

        let page_size = self.config.hash_page_size.max(1);
        let mut catalogue = ServerHashUniverse::new();
        let mut page_no = 0;
        while !catalogue.is_initialized() {
            let request = HashPageRequest::new(page_no, page_size);
            let response =
                self.transport
                    .post_json(endpoints::ALL_HASHES_PAGED, &request.to_value()?, &[])?;
            let page = HashPage::from_value(response)?;
            let last = page.is_last(page_size);

            catalogue.add_actual(page.actual);
            catalogue.add_deleted(page.deleted);
            if last {
                catalogue.initialized = true;
            }
            debug!(page_no, "RECEIVED: {}", catalogue);
            page_no += 1;
        }
        Ok(catalogue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncCategories;
    use crate::error::SyncError;
    use crate::transport::MockTransport;
    use serde_json::json;

    fn hashes(prefix: &str, n: usize) -> Vec<String> {
        (0..n).map(|i| format!("{prefix}{i}")).collect()
    }

    fn page(actual: usize, deleted: usize, page_no: usize) -> serde_json::Value {
        json!({
            "actual": hashes(&format!("a{page_no}-"), actual),
            "deleted": hashes(&format!("d{page_no}-"), deleted),
        })
    }

    fn config() -> SyncConfig {
        SyncConfig::new("https://books.example.com/", "books.example.com").with_hash_page_size(3)
    }

    #[test]
    fn pages_until_both_sets_are_short() {
        let transport = MockTransport::new();
        transport.push_response(endpoints::ALL_HASHES_PAGED, page(3, 0, 0));
        transport.push_response(endpoints::ALL_HASHES_PAGED, page(1, 3, 1));
        transport.push_response(endpoints::ALL_HASHES_PAGED, page(2, 2, 2));
        let config = config();

        let mut universe = ServerHashUniverse::new();
        HashSetLoader::new(&transport, &config)
            .load(&mut universe)
            .unwrap();

        assert!(universe.is_initialized());
        assert_eq!(universe.actual_len(), 6);
        assert_eq!(universe.deleted_len(), 5);
        assert!(universe.contains_actual("a2-1"));
        assert!(universe.contains_deleted("d1-2"));

        let requests = transport.requests_to(endpoints::ALL_HASHES_PAGED);
        assert_eq!(requests.len(), 3);
        assert_eq!(
            requests[2].body,
            Some(json!({"page_no": 2, "page_size": 3}))
        );
        assert_eq!(transport.cookie_reloads(), 1);
        assert_eq!(universe.to_string(), "6/5 HASHES (complete)");
    }

    #[test]
    fn initialized_universe_is_not_reloaded() {
        let transport = MockTransport::new();
        transport.push_response(endpoints::ALL_HASHES_PAGED, page(0, 0, 0));
        let config = config();
        let loader = HashSetLoader::new(&transport, &config);

        let mut universe = ServerHashUniverse::new();
        loader.load(&mut universe).unwrap();
        loader.load(&mut universe).unwrap();
        assert_eq!(transport.requests().len(), 1);
    }

    #[test]
    fn failure_discards_partial_pages() {
        let transport = MockTransport::new();
        transport.push_response(endpoints::ALL_HASHES_PAGED, page(3, 3, 0));
        transport.push_error(
            endpoints::ALL_HASHES_PAGED,
            SyncError::network_retryable("reset"),
        );
        let config = config();

        let mut universe = ServerHashUniverse::new();
        let err = HashSetLoader::new(&transport, &config)
            .load(&mut universe)
            .unwrap_err();

        assert!(err.is_retryable());
        assert!(!universe.is_initialized());
        assert_eq!(universe.actual_len(), 0);
        assert_eq!(universe.deleted_len(), 0);
    }

    #[test]
    fn failed_reload_keeps_observed_hashes() {
        let transport = MockTransport::new();
        transport.push_response(endpoints::ALL_HASHES_PAGED, page(3, 0, 0));
        transport.push_response(endpoints::ALL_HASHES_PAGED, json!({"actual": ["x"]}));
        let config = config();

        let mut universe = ServerHashUniverse::new();
        universe.add_actual(vec!["seen".to_string()]);
        universe.add_deleted(vec!["gone".to_string()]);
        let err = HashSetLoader::new(&transport, &config)
            .load(&mut universe)
            .unwrap_err();

        assert!(matches!(err, SyncError::Protocol(_)));
        assert!(!universe.is_initialized());
        assert!(universe.contains_actual("seen"));
        assert!(universe.contains_deleted("gone"));
        assert!(!universe.contains_actual("a0-0"));
        assert_eq!(universe.to_string(), "1/1 HASHES (partial)");
    }

    #[test]
    fn successful_load_merges_into_observed_hashes() {
        let transport = MockTransport::new();
        transport.push_response(endpoints::ALL_HASHES_PAGED, page(1, 1, 0));
        let config = config();

        let mut universe = ServerHashUniverse::new();
        universe.add_actual(vec!["seen".to_string()]);
        HashSetLoader::new(&transport, &config)
            .load(&mut universe)
            .unwrap();

        assert!(universe.is_initialized());
        assert!(universe.contains_actual("seen"));
        assert!(universe.contains_actual("a0-0"));
        assert_eq!(universe.to_string(), "2/1 HASHES (complete)");
    }

    #[test]
    fn disabled_sync_reraises_without_requests() {
        let transport = MockTransport::new();
        let config = config().with_categories(SyncCategories {
            books: false,
            ..SyncCategories::default()
        });

        let mut universe = ServerHashUniverse::new();
        universe.add_deleted(vec!["old".to_string()]);
        let err = HashSetLoader::new(&transport, &config)
            .load(&mut universe)
            .unwrap_err();

        assert!(err.is_disabled());
        assert!(!universe.is_initialized());
        assert!(universe.contains_deleted("old"));
        assert!(transport.requests().is_empty());
    }

    #[test]
    fn display_marks_partial_universe() {
        let mut universe = ServerHashUniverse::new();
        universe.add_actual(vec!["a".to_string()]);
        assert_eq!(universe.to_string(), "1/0 HASHES (partial)");
    }
}
