//! Property-based test generators using proptest.
//!
//! Provides strategies for bookmark merge inputs and server hash catalogues
//! that respect the invariants the library store maintains.

use proptest::prelude::*;
use shelfsync_engine::{BookId, Bookmark};
use shelfsync_protocol::BookmarkInfo;
use std::collections::{BTreeMap, BTreeSet};

/// Strategy for content hashes (lowercase hex).
pub fn hash_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[0-9a-f]{8}").expect("Invalid regex")
}

/// Strategy for optional version tokens drawn from a small pool, so that
/// equal and unequal tokens both show up often.
pub fn version_strategy() -> impl Strategy<Value = Option<String>> {
    prop::option::of(prop::sample::select(vec!["v1", "v2", "v3"]).prop_map(str::to_string))
}

/// Strategy for a bookmark with a given uid.
pub fn bookmark_strategy(uid: String) -> impl Strategy<Value = Bookmark> {
    (version_strategy(), 0i64..8, 1i64..4).prop_map(move |(version, timestamp, book)| {
        let mut bookmark = Bookmark::new(uid.clone(), BookId(book), "highlight", timestamp);
        bookmark.version_uid = version;
        bookmark
    })
}

/// The four inputs of a bookmark merge.
#[derive(Debug, Clone, Default)]
pub struct MergeInput {
    /// Live local bookmarks.
    pub local: Vec<Bookmark>,
    /// Server listing keyed by uid.
    pub server: BTreeMap<String, BookmarkInfo>,
    /// Local tombstones.
    pub local_deleted: BTreeSet<String>,
    /// Server tombstones.
    pub server_deleted: BTreeSet<String>,
}

impl MergeInput {
    /// Every uid mentioned by any input.
    pub fn all_uids(&self) -> BTreeSet<String> {
        self.local
            .iter()
            .map(|b| b.uid.clone())
            .chain(self.server.keys().cloned())
            .chain(self.local_deleted.iter().cloned())
            .chain(self.server_deleted.iter().cloned())
            .collect()
    }
}

#[derive(Debug, Clone, Copy)]
enum LocalRole {
    Absent,
    Live,
    Tombstone,
}

#[derive(Debug, Clone, Copy)]
enum ServerRole {
    Absent,
    Live,
    Tombstone,
}

fn local_role() -> impl Strategy<Value = LocalRole> {
    prop_oneof![
        Just(LocalRole::Absent),
        Just(LocalRole::Live),
        Just(LocalRole::Tombstone),
    ]
}

fn server_role() -> impl Strategy<Value = ServerRole> {
    prop_oneof![
        Just(ServerRole::Absent),
        Just(ServerRole::Live),
        Just(ServerRole::Tombstone),
    ]
}

/// Strategy for merge inputs over up to `max_uids` uids.
///
/// Each uid plays one role locally and one on the server. A uid is never
/// both live and tombstoned on the same side.
pub fn merge_input_strategy(max_uids: usize) -> impl Strategy<Value = MergeInput> {
    let role = (
        local_role(),
        version_strategy(),
        0i64..8,
        server_role(),
        version_strategy(),
        0i64..8,
    );
    prop::collection::vec(role, 0..max_uids).prop_map(|roles| {
        let mut input = MergeInput::default();
        for (i, (local, local_version, local_ts, server, server_version, server_ts)) in
            roles.into_iter().enumerate()
        {
            let uid = format!("bm-{i:03}");
            match local {
                LocalRole::Absent => {}
                LocalRole::Live => {
                    let mut bookmark = Bookmark::new(uid.clone(), BookId(1), "highlight", local_ts);
                    bookmark.version_uid = local_version;
                    input.local.push(bookmark);
                }
                LocalRole::Tombstone => {
                    input.local_deleted.insert(uid.clone());
                }
            }
            match server {
                ServerRole::Absent => {}
                ServerRole::Live => {
                    input.server.insert(
                        uid.clone(),
                        BookmarkInfo::new(uid.as_str(), server_version, server_ts),
                    );
                }
                ServerRole::Tombstone => {
                    input.server_deleted.insert(uid);
                }
            }
        }
        input
    })
}

/// Sizes of a server hash catalogue and the page size used to read it.
#[derive(Debug, Clone, Copy)]
pub struct CatalogueShape {
    /// Number of live hashes.
    pub actual: usize,
    /// Number of tombstoned hashes.
    pub deleted: usize,
    /// Page size.
    pub page_size: u32,
}

impl CatalogueShape {
    /// Number of page requests a correct loader issues.
    pub fn expected_requests(&self) -> usize {
        let page = self.page_size as usize;
        (self.actual / page).max(self.deleted / page) + 1
    }
}

/// Strategy for catalogue shapes, including exact multiples of the page size.
pub fn catalogue_shape_strategy() -> impl Strategy<Value = CatalogueShape> {
    (1u32..6).prop_flat_map(|page_size| {
        let max = page_size as usize * 4;
        (0..=max, 0..=max).prop_map(move |(actual, deleted)| CatalogueShape {
            actual,
            deleted,
            page_size,
        })
    })
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}
