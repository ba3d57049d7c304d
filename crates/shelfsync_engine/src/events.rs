//! Notifications published by the orchestrator.
//!
//! Observers (a UI, a scheduler) subscribe and receive every event emitted
//! after the subscription, in emission order:
//!
//! ```rust,ignore
//! let events = orchestrator.subscribe();
//! std::thread::spawn(move || {
//!     while let Ok(event) = events.recv() {
//!         println!("sync: {:?}", event);
//!     }
//! });
//! ```

use crate::executor::BookmarkSyncReport;
use crate::reconciler::Status;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::mpsc::{self, Receiver, Sender};
use std::time::Duration;

/// Outcome of one full sync run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FullSyncReport {
    /// Books taken off the queue and reconciled.
    pub processed: usize,
    /// Number of books per outcome.
    pub counts: BTreeMap<Status, u64>,
    /// True if the run stopped early on an authentication failure.
    pub aborted: bool,
    /// Wall-clock duration.
    pub duration: Duration,
}

impl FullSyncReport {
    /// Records one outcome.
    pub fn record(&mut self, status: Status) {
        self.processed += 1;
        *self.counts.entry(status).or_insert(0) += 1;
    }

    /// Number of books that ended with `status`.
    pub fn count(&self, status: Status) -> u64 {
        self.counts.get(&status).copied().unwrap_or(0)
    }
}

impl fmt::Display for FullSyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} books in {} ms",
            self.processed,
            self.duration.as_millis()
        )?;
        for (status, count) in &self.counts {
            write!(f, ", {status}: {count}")?;
        }
        if self.aborted {
            f.write_str(" (aborted)")?;
        }
        Ok(())
    }
}

/// Outcome of one quick sync run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuickSyncReport {
    /// True if the server moved at least one reading position.
    pub positions_updated: bool,
    /// Bookmark results, absent if bookmark sync did not complete.
    pub bookmarks: Option<BookmarkSyncReport>,
    /// Errors caught during the run.
    pub errors: Vec<String>,
}

/// A sync notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// Reading positions changed; readers may want to reload them.
    PositionsUpdated,
    /// A full sync run ended.
    FullSyncFinished(FullSyncReport),
    /// A quick sync run ended.
    QuickSyncFinished(QuickSyncReport),
}

/// Fan-out of [`SyncEvent`]s to subscribers.
///
/// Subscribers that hung up are dropped on the next emit.
#[derive(Default)]
pub struct EventFeed {
    subscribers: RwLock<Vec<Sender<SyncEvent>>>,
}

impl EventFeed {
    /// Creates a feed without subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes to future events.
    pub fn subscribe(&self) -> Receiver<SyncEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.write().push(tx);
        rx
    }

    /// Sends an event to every live subscriber.
    pub fn emit(&self, event: SyncEvent) {
        self.subscribers
            .write()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Returns the number of subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}
