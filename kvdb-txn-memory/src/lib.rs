// Copyright 2021 Parity Technologies
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! A transactional key-value store fulfilling the `kvdb-txn` traits, living
//! in memory. This is generally intended for tests and is not particularly
//! optimized.

use kvdb_txn::{Connection, Cursor, DBKey, DBValue, Error, Result, Session};
use parking_lot::{Mutex, RwLock};
use std::{
	collections::{BTreeMap, HashMap},
	sync::{
		atomic::{AtomicUsize, Ordering},
		Arc,
	},
};

enum KeyState {
	Insert(DBValue),
	Delete,
}

// Uncommitted writes of one session, keyed by (table uri, key).
type Overlay = HashMap<(String, DBKey), KeyState>;

struct Inner {
	tables: RwLock<HashMap<String, BTreeMap<DBKey, DBValue>>>,
	open_cursors: AtomicUsize,
}

/// An in-memory transactional key-value store.
pub struct InMemory {
	inner: Arc<Inner>,
}

/// Create an in-memory store with the given set of tables.
pub fn create<'a, I: IntoIterator<Item = &'a str>>(tables: I) -> InMemory {
	let tables = tables.into_iter().map(|uri| (uri.to_string(), BTreeMap::new())).collect();
	InMemory { inner: Arc::new(Inner { tables: RwLock::new(tables), open_cursors: AtomicUsize::new(0) }) }
}

impl InMemory {
	/// Get a committed value by key. Uncommitted session state is not visible.
	pub fn get(&self, uri: &str, key: &[u8]) -> Result<Option<DBValue>> {
		let tables = self.inner.tables.read();
		match tables.get(uri) {
			None => Err(Error::Backend(format!("no such table: {}", uri))),
			Some(table) => Ok(table.get(key).cloned()),
		}
	}

	/// The number of cursors currently open across all sessions.
	pub fn open_cursors(&self) -> usize {
		self.inner.open_cursors.load(Ordering::SeqCst)
	}
}

impl Connection for InMemory {
	type Session = MemorySession;

	fn open_session(&self) -> Result<MemorySession> {
		Ok(MemorySession { inner: self.inner.clone(), txn: Arc::new(Mutex::new(None)) })
	}
}

/// A session against an [`InMemory`] store.
///
/// An open transaction buffers writes in a per-session overlay; commit applies
/// the overlay to the shared tables, rollback discards it. Cursor operations
/// outside a transaction apply directly.
pub struct MemorySession {
	inner: Arc<Inner>,
	txn: Arc<Mutex<Option<Overlay>>>,
}

impl Session for MemorySession {
	type Cursor = MemoryCursor;

	fn begin_transaction(&self) -> Result<()> {
		let mut txn = self.txn.lock();
		if txn.is_some() {
			return Err(Error::Transaction("transaction already active".into()));
		}
		*txn = Some(Overlay::new());
		Ok(())
	}

	fn commit_transaction(&self) -> Result<()> {
		let overlay = match self.txn.lock().take() {
			Some(overlay) => overlay,
			None => return Err(Error::Transaction("no transaction active".into())),
		};
		let mut tables = self.inner.tables.write();
		for ((uri, key), state) in overlay {
			// the table existed when the cursor wrote to it
			if let Some(table) = tables.get_mut(&uri) {
				match state {
					KeyState::Insert(value) => {
						table.insert(key, value);
					}
					KeyState::Delete => {
						table.remove(&key);
					}
				}
			}
		}
		Ok(())
	}

	fn rollback_transaction(&self) -> Result<()> {
		match self.txn.lock().take() {
			Some(_) => Ok(()),
			None => Err(Error::Transaction("no transaction active".into())),
		}
	}

	fn open_cursor(&self, uri: &str, _config: &str) -> Result<MemoryCursor> {
		if !self.inner.tables.read().contains_key(uri) {
			return Err(Error::CursorOpen(uri.to_string()));
		}
		self.inner.open_cursors.fetch_add(1, Ordering::SeqCst);
		Ok(MemoryCursor {
			inner: self.inner.clone(),
			txn: self.txn.clone(),
			uri: uri.to_string(),
			key: DBKey::new(),
			value: DBValue::new(),
			found: None,
		})
	}
}

/// A cursor bound to one table of an [`InMemory`] store.
pub struct MemoryCursor {
	inner: Arc<Inner>,
	txn: Arc<Mutex<Option<Overlay>>>,
	uri: String,
	key: DBKey,
	value: DBValue,
	found: Option<DBValue>,
}

impl MemoryCursor {
	fn committed(&self, key: &[u8]) -> Option<DBValue> {
		self.inner.tables.read().get(&self.uri).and_then(|table| table.get(key).cloned())
	}
}

impl Cursor for MemoryCursor {
	fn set_raw_key(&mut self, key: &[u8]) {
		self.key = DBKey::from_slice(key);
		self.found = None;
	}

	fn set_raw_value(&mut self, value: &[u8]) {
		self.value = value.to_vec();
	}

	fn raw_value(&self) -> Result<DBValue> {
		self.found.clone().ok_or_else(|| Error::Backend("cursor is not positioned".into()))
	}

	fn insert(&mut self) -> Result<()> {
		let mut txn = self.txn.lock();
		match txn.as_mut() {
			Some(overlay) => {
				overlay.insert((self.uri.clone(), self.key.clone()), KeyState::Insert(self.value.clone()));
			}
			// no transaction open: apply directly
			None => {
				let mut tables = self.inner.tables.write();
				if let Some(table) = tables.get_mut(&self.uri) {
					table.insert(self.key.clone(), self.value.clone());
				}
			}
		}
		Ok(())
	}

	fn remove(&mut self) -> Result<()> {
		let mut txn = self.txn.lock();
		match txn.as_mut() {
			Some(overlay) => match overlay.get_mut(&(self.uri.clone(), self.key.clone())) {
				Some(state @ KeyState::Insert(_)) => {
					*state = KeyState::Delete;
					Ok(())
				}
				Some(KeyState::Delete) => Err(Error::NotFound),
				None => {
					if self.committed(&self.key).is_none() {
						return Err(Error::NotFound);
					}
					overlay.insert((self.uri.clone(), self.key.clone()), KeyState::Delete);
					Ok(())
				}
			},
			None => {
				let mut tables = self.inner.tables.write();
				match tables.get_mut(&self.uri).and_then(|table| table.remove(&self.key)) {
					Some(_) => Ok(()),
					None => Err(Error::NotFound),
				}
			}
		}
	}

	fn search(&mut self) -> Result<()> {
		let txn = self.txn.lock();
		if let Some(overlay) = txn.as_ref() {
			match overlay.get(&(self.uri.clone(), self.key.clone())) {
				Some(KeyState::Insert(value)) => {
					self.found = Some(value.clone());
					return Ok(());
				}
				Some(KeyState::Delete) => return Err(Error::NotFound),
				None => {}
			}
		}
		match self.committed(&self.key) {
			Some(value) => {
				self.found = Some(value);
				Ok(())
			}
			None => Err(Error::NotFound),
		}
	}

	fn reset(&mut self) {
		self.key.clear();
		self.value.clear();
		self.found = None;
	}
}

impl Drop for MemoryCursor {
	fn drop(&mut self) {
		self.inner.open_cursors.fetch_sub(1, Ordering::SeqCst);
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn put(cursor: &mut MemoryCursor, key: &[u8], value: &[u8]) {
		cursor.set_raw_key(key);
		cursor.set_raw_value(value);
		cursor.insert().unwrap();
	}

	#[test]
	fn commit_applies_overlay() {
		let db = create(["t:a"]);
		let session = db.open_session().unwrap();
		let mut cursor = session.open_cursor("t:a", "").unwrap();

		session.begin_transaction().unwrap();
		put(&mut cursor, b"k", b"v");
		assert!(db.get("t:a", b"k").unwrap().is_none(), "uncommitted write is invisible");
		session.commit_transaction().unwrap();

		assert_eq!(db.get("t:a", b"k").unwrap().unwrap(), b"v");
	}

	#[test]
	fn rollback_discards_overlay() {
		let db = create(["t:a"]);
		let session = db.open_session().unwrap();
		let mut cursor = session.open_cursor("t:a", "").unwrap();

		session.begin_transaction().unwrap();
		put(&mut cursor, b"k", b"v");
		session.rollback_transaction().unwrap();

		assert!(db.get("t:a", b"k").unwrap().is_none());
	}

	#[test]
	fn search_sees_own_transaction() {
		let db = create(["t:a"]);
		let session = db.open_session().unwrap();
		let mut cursor = session.open_cursor("t:a", "").unwrap();

		session.begin_transaction().unwrap();
		put(&mut cursor, b"k", b"v");
		cursor.set_raw_key(b"k");
		cursor.search().unwrap();
		assert_eq!(cursor.raw_value().unwrap(), b"v");
		session.rollback_transaction().unwrap();
	}

	#[test]
	fn search_does_not_see_removed_key() {
		let db = create(["t:a"]);
		let session = db.open_session().unwrap();
		let mut cursor = session.open_cursor("t:a", "").unwrap();
		put(&mut cursor, b"k", b"v");

		session.begin_transaction().unwrap();
		cursor.set_raw_key(b"k");
		cursor.remove().unwrap();
		cursor.set_raw_key(b"k");
		assert_eq!(cursor.search(), Err(Error::NotFound));
		session.commit_transaction().unwrap();

		assert!(db.get("t:a", b"k").unwrap().is_none());
	}

	#[test]
	fn remove_missing_key_is_not_found() {
		let db = create(["t:a"]);
		let session = db.open_session().unwrap();
		let mut cursor = session.open_cursor("t:a", "").unwrap();

		session.begin_transaction().unwrap();
		cursor.set_raw_key(b"missing");
		assert_eq!(cursor.remove(), Err(Error::NotFound));
		session.rollback_transaction().unwrap();
	}

	#[test]
	fn autocommit_outside_transaction() {
		let db = create(["t:a"]);
		let session = db.open_session().unwrap();
		let mut cursor = session.open_cursor("t:a", "").unwrap();

		put(&mut cursor, b"k", b"v");
		assert_eq!(db.get("t:a", b"k").unwrap().unwrap(), b"v");

		cursor.set_raw_key(b"k");
		cursor.remove().unwrap();
		assert!(db.get("t:a", b"k").unwrap().is_none());
	}

	#[test]
	fn nested_begin_is_an_error() {
		let db = create(["t:a"]);
		let session = db.open_session().unwrap();
		session.begin_transaction().unwrap();
		assert!(session.begin_transaction().is_err());
	}

	#[test]
	fn commit_without_begin_is_an_error() {
		let db = create(["t:a"]);
		let session = db.open_session().unwrap();
		assert!(session.commit_transaction().is_err());
	}

	#[test]
	fn unknown_table_fails_to_open() {
		let db = create(["t:a"]);
		let session = db.open_session().unwrap();
		assert!(matches!(session.open_cursor("t:b", ""), Err(Error::CursorOpen(uri)) if uri == "t:b"));
	}

	#[test]
	fn cursors_are_counted() {
		let db = create(["t:a"]);
		let session = db.open_session().unwrap();
		assert_eq!(db.open_cursors(), 0);
		let c1 = session.open_cursor("t:a", "").unwrap();
		let c2 = session.open_cursor("t:a", "").unwrap();
		assert_eq!(db.open_cursors(), 2);
		drop(c1);
		drop(c2);
		assert_eq!(db.open_cursors(), 0);
	}

	#[test]
	fn sessions_are_isolated() {
		let db = create(["t:a"]);
		let writer = db.open_session().unwrap();
		let reader = db.open_session().unwrap();
		let mut wc = writer.open_cursor("t:a", "").unwrap();
		let mut rc = reader.open_cursor("t:a", "").unwrap();

		writer.begin_transaction().unwrap();
		put(&mut wc, b"k", b"v");
		rc.set_raw_key(b"k");
		assert_eq!(rc.search(), Err(Error::NotFound));
		writer.commit_transaction().unwrap();

		rc.set_raw_key(b"k");
		rc.search().unwrap();
		assert_eq!(rc.raw_value().unwrap(), b"v");
	}
}
