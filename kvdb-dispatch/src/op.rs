// Copyright 2021 Parity Technologies
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use kvdb_txn::{DBKey, DBValue};
use parking_lot::Mutex;
use std::{
	collections::hash_map::DefaultHasher,
	hash::{Hash, Hasher},
	sync::{
		atomic::{AtomicU8, Ordering},
		Arc,
	},
};

/// The kind of record operation an [`Op`] describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
	/// Insert a record, overwriting any existing one.
	Insert,
	/// Update a record. Dispatched identically to [`OpKind::Insert`]; the
	/// distinction carries client intent only.
	Update,
	/// Remove the record under the key.
	Remove,
	/// Look the key up and mirror the found value back into the op.
	Search,
}

/// Lifecycle state of an [`Op`].
///
/// Transitions are linear: Free → Enqueued → Working → Free. Only the
/// submitter writes the op while free, only the queue owns it while enqueued,
/// only the executing worker touches it while working.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpState {
	/// Owned by the submitter; not visible to the dispatcher.
	Free = 0,
	/// On the queue, waiting for a worker.
	Enqueued = 1,
	/// Exclusively owned by the executing worker.
	Working = 2,
}

impl OpState {
	fn from_u8(raw: u8) -> OpState {
		match raw {
			0 => OpState::Free,
			1 => OpState::Enqueued,
			2 => OpState::Working,
			_ => unreachable!("op state is only ever written from OpState values"),
		}
	}
}

/// Identity of the cursor a table operation needs: the table URI plus the
/// cursor configuration string, with hashes precomputed at registration time
/// so cache lookups compare two integers before touching the strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Format {
	uri: String,
	config: String,
	uri_hash: u64,
	cfg_hash: u64,
}

fn hash_str(s: &str) -> u64 {
	let mut hasher = DefaultHasher::new();
	s.hash(&mut hasher);
	hasher.finish()
}

impl Format {
	/// Register a format for the given table URI and cursor configuration.
	pub fn new(uri: &str, config: &str) -> Format {
		Format {
			uri: uri.to_string(),
			config: config.to_string(),
			uri_hash: hash_str(uri),
			cfg_hash: hash_str(config),
		}
	}

	/// The table URI.
	pub fn uri(&self) -> &str {
		&self.uri
	}

	/// The cursor configuration string.
	pub fn config(&self) -> &str {
		&self.config
	}

	pub(crate) fn uri_hash(&self) -> u64 {
		self.uri_hash
	}

	pub(crate) fn cfg_hash(&self) -> u64 {
		self.cfg_hash
	}
}

/// Completion callback attached to an [`Op`].
pub trait Callback: Send + Sync {
	/// Invoked exactly once per operation, after it has executed and before
	/// the worker resolves its transaction. `result` is the engine outcome;
	/// `Err(NotFound)` is a valid outcome for search and remove. Returning
	/// `false` vetoes the commit: the transaction is rolled back even when
	/// the engine reported success.
	fn notify(&self, op: &Op, result: &kvdb_txn::Result<()>) -> bool;
}

const KEY_SET: u8 = 0b01;
const VALUE_SET: u8 = 0b10;

/// A unit of work submitted to the dispatcher, describing one record
/// operation against one table.
pub struct Op {
	id: u64,
	kind: OpKind,
	format: Arc<Format>,
	key: Mutex<DBKey>,
	value: Mutex<DBValue>,
	flags: AtomicU8,
	state: AtomicU8,
	callback: Option<Arc<dyn Callback>>,
}

impl Op {
	pub(crate) fn new(id: u64, kind: OpKind, format: Arc<Format>, callback: Option<Arc<dyn Callback>>) -> Op {
		Op {
			id,
			kind,
			format,
			key: Mutex::new(DBKey::new()),
			value: Mutex::new(DBValue::new()),
			flags: AtomicU8::new(0),
			state: AtomicU8::new(OpState::Free as u8),
			callback,
		}
	}

	/// Unique id assigned at allocation.
	pub fn id(&self) -> u64 {
		self.id
	}

	/// The operation kind.
	pub fn kind(&self) -> OpKind {
		self.kind
	}

	/// The format the operation runs against.
	pub fn format(&self) -> &Format {
		&self.format
	}

	/// Current lifecycle state.
	pub fn state(&self) -> OpState {
		OpState::from_u8(self.state.load(Ordering::Acquire))
	}

	/// Set the operation's key. Only meaningful while the op is free.
	pub fn set_key(&self, key: &[u8]) {
		*self.key.lock() = DBKey::from_slice(key);
		self.flags.fetch_or(KEY_SET, Ordering::AcqRel);
	}

	/// Set the operation's value. Only meaningful while the op is free.
	pub fn set_value(&self, value: &[u8]) {
		*self.value.lock() = value.to_vec();
		self.flags.fetch_or(VALUE_SET, Ordering::AcqRel);
	}

	/// The operation's key.
	pub fn key(&self) -> DBKey {
		self.key.lock().clone()
	}

	/// The operation's value. For a completed search this is the value found
	/// under the key.
	pub fn value(&self) -> DBValue {
		self.value.lock().clone()
	}

	pub(crate) fn transition(&self, from: OpState, to: OpState) -> bool {
		self.state
			.compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
			.is_ok()
	}

	pub(crate) fn set_state(&self, state: OpState) {
		self.state.store(state as u8, Ordering::Release);
	}

	// Mirror a search result back so `value` returns it to the caller.
	pub(crate) fn set_search_result(&self, value: DBValue) {
		*self.value.lock() = value;
		self.flags.fetch_or(VALUE_SET, Ordering::AcqRel);
	}

	pub(crate) fn notify(&self, result: &kvdb_txn::Result<()>) -> bool {
		match &self.callback {
			Some(callback) => callback.notify(self, result),
			None => true,
		}
	}

	// Return the op to the submitter: clear the key/value-set flags and go
	// back to the free state. Called only after the transaction is resolved.
	pub(crate) fn recycle(&self) {
		self.flags.store(0, Ordering::Release);
		self.set_state(OpState::Free);
	}
}
