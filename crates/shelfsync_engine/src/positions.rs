//! Last-read position exchange.

use crate::config::{SyncCategory, SyncConfig};
use crate::error::SyncResult;
use crate::store::BookStore;
use crate::transport::SyncTransport;
use crate::types::{now_millis, BookId, ReadingPosition};
use shelfsync_protocol::{
    endpoints, PositionEntry, PositionExchangeRequest, PositionExchangeResponse,
};
use std::collections::HashMap;
use tracing::debug;

/// Exchanges last-read positions with the server.
///
/// Positions travel keyed by content hash, so a book read on another
/// device maps back to the local copy with the same content.
pub struct PositionSyncer<'a, S: BookStore, T: SyncTransport> {
    store: &'a S,
    transport: &'a T,
    config: &'a SyncConfig,
}

impl<'a, S: BookStore, T: SyncTransport> PositionSyncer<'a, S, T> {
    /// Creates a syncer.
    pub fn new(store: &'a S, transport: &'a T, config: &'a SyncConfig) -> Self {
        Self {
            store,
            transport,
            config,
        }
    }

    /// Exchanges every stored position.
    pub fn sync(&self) -> SyncResult<bool> {
        self.config.ensure_enabled(SyncCategory::Positions)?;
        let local = self.store.reading_positions()?;
        self.exchange(&local)
    }

    /// Sends `local` and applies any newer position the server returns.
    ///
    /// Returns true if at least one local position changed.
    pub fn exchange(&self, local: &[ReadingPosition]) -> SyncResult<bool> {
        self.config.ensure_enabled(SyncCategory::Positions)?;

        let mut known: HashMap<BookId, ReadingPosition> = HashMap::new();
        let mut request = PositionExchangeRequest {
            timestamp: now_millis(),
            positions: Vec::with_capacity(local.len()),
        };
        for position in local {
            known.insert(position.book_id, *position);
            let Some(book) = self.store.book_by_id(position.book_id)? else {
                continue;
            };
            if let Some(hash) = self.store.hash(&book)? {
                request.positions.push(PositionEntry::new(
                    hash,
                    position.position,
                    position.timestamp,
                ));
            }
        }

        let response = self.transport.post_json(
            endpoints::POSITION_EXCHANGE,
            &request.to_value()?,
            &[],
        )?;
        let response = PositionExchangeResponse::from_value(response)?;

        let mut updated = false;
        for entry in response.positions {
            let Some(book) = self.store.book_by_hash(&entry.hash)? else {
                continue;
            };
            let newer = match known.get(&book.id) {
                Some(current) => {
                    entry.timestamp > current.timestamp && entry.position != current.position
                }
                None => true,
            };
            if !newer {
                continue;
            }
            let position = ReadingPosition::new(book.id, entry.position, entry.timestamp);
            self.store.save_reading_position(&position)?;
            known.insert(book.id, position);
            debug!(book_id = %book.id, timestamp = entry.timestamp, "position updated from server");
            updated = true;
        }
        Ok(updated)
    }
}
