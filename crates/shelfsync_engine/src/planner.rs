//! Three-way bookmark merge planning.
//!
//! [`plan`] compares the local bookmarks and tombstones with the server's
//! listing and tombstones, and assigns every uid to exactly one bucket of a
//! [`BookmarkPlan`]. It performs no I/O; the executor carries the plan out.

use crate::types::Bookmark;
use shelfsync_protocol::BookmarkInfo;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Actions that bring local and server bookmarks back in line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookmarkPlan {
    /// Local tombstones the server no longer lists. Forgotten locally.
    pub to_purge: Vec<String>,
    /// Local bookmarks the server has never seen.
    pub to_send_to_server: Vec<Bookmark>,
    /// Local bookmarks the server has deleted.
    pub to_delete_on_client: Vec<Bookmark>,
    /// Local bookmarks whose revision supersedes the server's.
    pub to_update_on_server: Vec<Bookmark>,
    /// Local bookmarks the server's revision supersedes.
    pub to_update_on_client: Vec<Bookmark>,
    /// Server uids the client has no record of.
    pub to_fetch_from_server: Vec<String>,
    /// Server uids the client has deleted.
    pub to_delete_on_server: Vec<String>,
    /// Uids already identical on both sides, or unconfirmed on both.
    pub converged: Vec<String>,
}

impl BookmarkPlan {
    /// Returns true if nothing needs to happen.
    pub fn is_empty(&self) -> bool {
        self.to_purge.is_empty()
            && self.to_send_to_server.is_empty()
            && self.to_delete_on_client.is_empty()
            && self.to_update_on_server.is_empty()
            && self.to_update_on_client.is_empty()
            && self.to_fetch_from_server.is_empty()
            && self.to_delete_on_server.is_empty()
    }

    /// Returns true if the plan needs a batch request to the server.
    pub fn has_server_changes(&self) -> bool {
        !self.to_send_to_server.is_empty()
            || !self.to_update_on_server.is_empty()
            || !self.to_delete_on_server.is_empty()
    }

    /// Uids the server must send full content for.
    pub fn uids_to_fetch(&self) -> Vec<String> {
        self.to_update_on_client
            .iter()
            .map(|b| b.uid.clone())
            .chain(self.to_fetch_from_server.iter().cloned())
            .collect()
    }

    /// Every bucket by name, with the uids it holds.
    pub fn buckets(&self) -> Vec<(&'static str, Vec<&str>)> {
        fn uids(bookmarks: &[Bookmark]) -> Vec<&str> {
            bookmarks.iter().map(|b| b.uid.as_str()).collect()
        }
        fn names(uids: &[String]) -> Vec<&str> {
            uids.iter().map(String::as_str).collect()
        }

        vec![
            ("purge", names(&self.to_purge)),
            ("send_to_server", uids(&self.to_send_to_server)),
            ("delete_on_client", uids(&self.to_delete_on_client)),
            ("update_on_server", uids(&self.to_update_on_server)),
            ("update_on_client", uids(&self.to_update_on_client)),
            ("fetch_from_server", names(&self.to_fetch_from_server)),
            ("delete_on_server", names(&self.to_delete_on_server)),
            ("converged", names(&self.converged)),
        ]
    }
}

impl fmt::Display for BookmarkPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (name, uids) in self.buckets() {
            if !first {
                f.write_str(", ")?;
            }
            first = false;
            write!(f, "{name}={}", uids.len())?;
        }
        Ok(())
    }
}

/// Computes the merge plan.
///
/// `server_infos` is the server's live listing keyed by uid. Tombstone sets
/// are authoritative for their own side. A local bookmark matched with a
/// server entry is decided by version tokens, then by modification time:
/// the local copy wins ties.
pub fn plan(
    local: &[Bookmark],
    server_infos: &BTreeMap<String, BookmarkInfo>,
    local_deleted: &BTreeSet<String>,
    server_deleted: &BTreeSet<String>,
) -> BookmarkPlan {
    let mut plan = BookmarkPlan {
        to_purge: local_deleted
            .iter()
            .filter(|uid| !server_infos.contains_key(*uid))
            .cloned()
            .collect(),
        ..BookmarkPlan::default()
    };

    let mut unmatched = server_infos.clone();
    for bookmark in local {
        match unmatched.remove(&bookmark.uid) {
            Some(info) => match (&info.version_uid, &bookmark.version_uid) {
                (None, Some(_)) => plan.to_update_on_server.push(bookmark.clone()),
                (None, None) => plan.converged.push(bookmark.uid.clone()),
                (Some(_), None) => plan.to_update_on_client.push(bookmark.clone()),
                (Some(theirs), Some(ours)) if theirs == ours => {
                    plan.converged.push(bookmark.uid.clone())
                }
                (Some(_), Some(_)) => {
                    if info.modification_timestamp <= bookmark.modification_timestamp {
                        plan.to_update_on_server.push(bookmark.clone());
                    } else {
                        plan.to_update_on_client.push(bookmark.clone());
                    }
                }
            },
            None if server_deleted.contains(&bookmark.uid) => {
                plan.to_delete_on_client.push(bookmark.clone())
            }
            None => plan.to_send_to_server.push(bookmark.clone()),
        }
    }

    for uid in unmatched.into_keys() {
        if local_deleted.contains(&uid) {
            plan.to_delete_on_server.push(uid);
        } else {
            plan.to_fetch_from_server.push(uid);
        }
    }

    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BookId;
    use proptest::prelude::*;
    use std::collections::HashMap;

    fn local(uid: &str, version: Option<&str>, ts: i64) -> Bookmark {
        let bookmark = Bookmark::new(uid, BookId(1), "text", ts);
        match version {
            Some(v) => bookmark.with_version(v),
            None => bookmark,
        }
    }

    fn infos(entries: &[(&str, Option<&str>, i64)]) -> BTreeMap<String, BookmarkInfo> {
        entries
            .iter()
            .map(|(uid, version, ts)| {
                (
                    uid.to_string(),
                    BookmarkInfo::new(*uid, version.map(str::to_string), *ts),
                )
            })
            .collect()
    }

    fn set(uids: &[&str]) -> BTreeSet<String> {
        uids.iter().map(|u| u.to_string()).collect()
    }

    fn uids(bookmarks: &[Bookmark]) -> Vec<&str> {
        bookmarks.iter().map(|b| b.uid.as_str()).collect()
    }

    #[test]
    fn unmatched_local_bookmarks() {
        let plan = plan(
            &[local("new", None, 1), local("gone", Some("v1"), 1)],
            &BTreeMap::new(),
            &BTreeSet::new(),
            &set(&["gone"]),
        );
        assert_eq!(uids(&plan.to_send_to_server), vec!["new"]);
        assert_eq!(uids(&plan.to_delete_on_client), vec!["gone"]);
    }

    #[test]
    fn version_tokens_decide_direction() {
        let plan = plan(
            &[
                local("pushed", Some("v1"), 1),
                local("novel", None, 1),
                local("pulled", None, 1),
                local("same", Some("v1"), 1),
            ],
            &infos(&[
                ("pushed", None, 5),
                ("novel", None, 5),
                ("pulled", Some("v2"), 0),
                ("same", Some("v1"), 9),
            ]),
            &BTreeSet::new(),
            &BTreeSet::new(),
        );
        assert_eq!(uids(&plan.to_update_on_server), vec!["pushed"]);
        assert_eq!(uids(&plan.to_update_on_client), vec!["pulled"]);
        assert_eq!(plan.converged, vec!["novel".to_string(), "same".to_string()]);
    }

    #[test]
    fn diverged_versions_use_timestamps() {
        let plan = plan(
            &[
                local("tie", Some("a"), 10),
                local("local-newer", Some("a"), 11),
                local("server-newer", Some("a"), 9),
            ],
            &infos(&[
                ("tie", Some("b"), 10),
                ("local-newer", Some("b"), 10),
                ("server-newer", Some("b"), 10),
            ]),
            &BTreeSet::new(),
            &BTreeSet::new(),
        );
        assert_eq!(uids(&plan.to_update_on_server), vec!["tie", "local-newer"]);
        assert_eq!(uids(&plan.to_update_on_client), vec!["server-newer"]);
    }

    #[test]
    fn leftover_server_uids() {
        let plan = plan(
            &[],
            &infos(&[("unseen", Some("v"), 1), ("deleted-here", Some("v"), 1)]),
            &set(&["deleted-here"]),
            &BTreeSet::new(),
        );
        assert_eq!(plan.to_fetch_from_server, vec!["unseen".to_string()]);
        assert_eq!(plan.to_delete_on_server, vec!["deleted-here".to_string()]);
        assert!(plan.to_purge.is_empty());
        assert_eq!(plan.uids_to_fetch(), vec!["unseen".to_string()]);
    }

    #[test]
    fn mutual_deletion_is_purged() {
        let plan = plan(
            &[],
            &BTreeMap::new(),
            &set(&["both", "local-only"]),
            &set(&["both"]),
        );
        assert_eq!(
            plan.to_purge,
            vec!["both".to_string(), "local-only".to_string()]
        );
        assert!(plan.to_delete_on_server.is_empty());
        assert!(plan.to_fetch_from_server.is_empty());
        assert!(!plan.has_server_changes());
    }

    #[test]
    fn display_lists_bucket_sizes() {
        let plan = plan(
            &[local("a", None, 1)],
            &BTreeMap::new(),
            &BTreeSet::new(),
            &BTreeSet::new(),
        );
        assert_eq!(
            plan.to_string(),
            "purge=0, send_to_server=1, delete_on_client=0, update_on_server=0, \
             update_on_client=0, fetch_from_server=0, delete_on_server=0, converged=0"
        );
        assert!(!plan.is_empty());
    }

    #[derive(Debug, Clone)]
    struct Scenario {
        local: Vec<Bookmark>,
        server: BTreeMap<String, BookmarkInfo>,
        local_deleted: BTreeSet<String>,
        server_deleted: BTreeSet<String>,
    }

    /// Each uid gets one local role and one server role. Live local
    /// bookmarks and local tombstones never share a uid, as in the store.
    fn version() -> impl Strategy<Value = Option<&'static str>> {
        prop::option::of(prop::sample::select(vec!["v1", "v2"]))
    }

    fn scenario() -> impl Strategy<Value = Scenario> {
        let uid = (0u8..3, version(), 0i64..4, 0u8..3, version(), 0i64..4);
        prop::collection::vec(uid, 0..24).prop_map(|roles| {
            let mut s = Scenario {
                local: Vec::new(),
                server: BTreeMap::new(),
                local_deleted: BTreeSet::new(),
                server_deleted: BTreeSet::new(),
            };
            for (i, (local_role, local_v, local_ts, server_role, server_v, server_ts)) in
                roles.into_iter().enumerate()
            {
                let uid = format!("uid-{i}");
                match local_role {
                    0 => {}
                    1 => s.local.push(local(&uid, local_v, local_ts)),
                    _ => {
                        s.local_deleted.insert(uid.clone());
                    }
                }
                match server_role {
                    0 => {}
                    1 => {
                        s.server.insert(
                            uid.clone(),
                            BookmarkInfo::new(uid.as_str(), server_v.map(str::to_string), server_ts),
                        );
                    }
                    _ => {
                        s.server_deleted.insert(uid);
                    }
                }
            }
            s
        })
    }

    proptest! {
        #[test]
        fn every_uid_lands_in_exactly_one_bucket(s in scenario()) {
            let plan = plan(&s.local, &s.server, &s.local_deleted, &s.server_deleted);

            let mut seen: HashMap<String, &str> = HashMap::new();
            for (bucket, uids) in plan.buckets() {
                for uid in uids {
                    let previous = seen.insert(uid.to_string(), bucket);
                    prop_assert!(previous.is_none(), "{} in {:?} and {}", uid, previous, bucket);
                }
            }

            for bookmark in &s.local {
                prop_assert!(seen.contains_key(&bookmark.uid));
            }
            for uid in s.server.keys() {
                prop_assert!(seen.contains_key(uid));
            }
            for uid in &s.local_deleted {
                prop_assert!(seen.contains_key(uid));
            }
        }

        #[test]
        fn mutual_deletions_never_reach_the_server(s in scenario()) {
            let plan = plan(&s.local, &s.server, &s.local_deleted, &s.server_deleted);
            for uid in s.local_deleted.intersection(&s.server_deleted) {
                prop_assert!(plan.to_purge.contains(uid));
                prop_assert!(!plan.to_delete_on_server.contains(uid));
                prop_assert!(!plan.to_fetch_from_server.contains(uid));
            }
        }

        #[test]
        fn tie_break_prefers_local_on_equal_or_newer(t_local in -5i64..5, t_server in -5i64..5) {
            let plan = plan(
                &[local("x", Some("local"), t_local)],
                &infos(&[("x", Some("server"), t_server)]),
                &BTreeSet::new(),
                &BTreeSet::new(),
            );
            prop_assert_eq!(plan.to_update_on_server.len() == 1, t_server <= t_local);
            prop_assert_eq!(plan.to_update_on_client.len() == 1, t_server > t_local);
        }
    }
}
