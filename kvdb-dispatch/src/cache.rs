// Copyright 2021 Parity Technologies
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use crate::op::Format;
use kvdb_txn::{Cursor, Result, Session};
use log::trace;
use smallvec::SmallVec;

struct CachedCursor<C> {
	uri_hash: u64,
	cfg_hash: u64,
	cursor: C,
}

/// Per-worker list of open cursors keyed by format signature, most recently
/// opened at the head. Entries live until the worker shuts down; the list is
/// bounded by the number of distinct formats the worker observes, so there is
/// no eviction.
pub(crate) struct CursorCache<C> {
	entries: SmallVec<[CachedCursor<C>; 4]>,
}

impl<C: Cursor> CursorCache<C> {
	pub(crate) fn new() -> CursorCache<C> {
		CursorCache { entries: SmallVec::new() }
	}

	/// Return a cursor usable for `format`, opening and caching one on miss.
	/// An open failure propagates and leaves the cache unchanged.
	pub(crate) fn get_or_open<S>(&mut self, session: &S, format: &Format) -> Result<&mut C>
	where
		S: Session<Cursor = C>,
	{
		if let Some(pos) = self
			.entries
			.iter()
			.position(|entry| entry.uri_hash == format.uri_hash() && entry.cfg_hash == format.cfg_hash())
		{
			return Ok(&mut self.entries[pos].cursor);
		}

		let cursor = session.open_cursor(format.uri(), format.config())?;
		trace!("cached new cursor on {} ({} total)", format.uri(), self.entries.len() + 1);
		self.entries
			.insert(0, CachedCursor { uri_hash: format.uri_hash(), cfg_hash: format.cfg_hash(), cursor });
		Ok(&mut self.entries[0].cursor)
	}

	/// Reset the cached cursor for `format`, releasing any position it holds
	/// while keeping it open.
	pub(crate) fn reset(&mut self, format: &Format) {
		if let Some(entry) = self
			.entries
			.iter_mut()
			.find(|entry| entry.uri_hash == format.uri_hash() && entry.cfg_hash == format.cfg_hash())
		{
			entry.cursor.reset();
		}
	}

	pub(crate) fn len(&self) -> usize {
		self.entries.len()
	}
}
