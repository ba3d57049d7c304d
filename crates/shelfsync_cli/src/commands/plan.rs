//! Plan command implementation.

use serde::Deserialize;
use shelfsync_engine::{plan, Bookmark, BookmarkPlan};
use shelfsync_protocol::BookmarkInfo;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::debug;

/// Both sides of a bookmark merge, as read from a snapshot file.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Snapshot {
    /// Live local bookmarks.
    pub local: Vec<Bookmark>,
    /// Server listing entries.
    pub server: Vec<BookmarkInfo>,
    /// Local tombstones.
    pub local_deleted: BTreeSet<String>,
    /// Server tombstones.
    pub server_deleted: BTreeSet<String>,
}

impl Snapshot {
    /// Reads a snapshot from a JSON file.
    pub fn load(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Computes the merge plan. Later server entries replace earlier ones
    /// with the same uid.
    pub fn plan(&self) -> BookmarkPlan {
        let infos: BTreeMap<String, BookmarkInfo> = self
            .server
            .iter()
            .map(|info| (info.uid.clone(), info.clone()))
            .collect();
        plan(&self.local, &infos, &self.local_deleted, &self.server_deleted)
    }
}

/// Runs the plan command.
pub fn run(path: &Path, show_all: bool, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let snapshot = Snapshot::load(path)?;
    debug!(
        local = snapshot.local.len(),
        server = snapshot.server.len(),
        "snapshot loaded"
    );
    let plan = snapshot.plan();

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&to_json(&plan, show_all))?),
        "text" => print_text(&plan, show_all),
        other => return Err(format!("Unknown format: {other}").into()),
    }
    Ok(())
}

fn visible(plan: &BookmarkPlan, show_all: bool) -> Vec<(&'static str, Vec<&str>)> {
    plan.buckets()
        .into_iter()
        .filter(|(name, _)| show_all || *name != "converged")
        .collect()
}

fn to_json(plan: &BookmarkPlan, show_all: bool) -> serde_json::Value {
    visible(plan, show_all)
        .into_iter()
        .map(|(name, uids)| (name.to_string(), serde_json::json!(uids)))
        .collect::<serde_json::Map<_, _>>()
        .into()
}

fn print_text(plan: &BookmarkPlan, show_all: bool) {
    println!("=== Bookmark Plan ===");
    if plan.is_empty() {
        println!("Nothing to do");
    }
    for (name, uids) in visible(plan, show_all) {
        if uids.is_empty() {
            continue;
        }
        println!("{name} ({}):", uids.len());
        for uid in uids {
            println!("  {uid}");
        }
    }
}
