// Copyright 2021 Parity Technologies
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Session/cursor abstraction for transactional key-value stores.
//!
//! Unlike the batch-oriented `KeyValueDB` family, the traits here model an
//! engine that hands out *sessions*, each owning at most one open transaction
//! and any number of *cursors* bound to a single table. Record operations go
//! through a cursor while a transaction is open on the owning session; the
//! caller decides whether the transaction commits or rolls back.
//!
//! The engine is expected to be internally synchronized at the connection
//! level, while a session (and every cursor opened from it) is confined to a
//! single thread by contract.

#![warn(missing_docs)]

mod error;

pub use error::{Error, Result};

use smallvec::SmallVec;

/// Database key. Keys are typically short, so they are stored inline.
pub type DBKey = SmallVec<[u8; 32]>;

/// Database value.
pub type DBValue = Vec<u8>;

/// A connection to a transactional key-value store.
///
/// The `Sync` bound implies interior synchronization for implementations;
/// sessions opened from a shared connection must not observe each other's
/// uncommitted state.
pub trait Connection: Send + Sync {
	/// The session type handed out by this connection.
	type Session: Session + Send;

	/// Open a new session. Each worker thread holds exactly one.
	fn open_session(&self) -> Result<Self::Session>;
}

/// A single-threaded context owning a transaction and any open cursors.
pub trait Session {
	/// The cursor type opened by this session.
	type Cursor: Cursor + Send;

	/// Begin a transaction. At most one transaction is open per session;
	/// beginning a second is an error.
	fn begin_transaction(&self) -> Result<()>;

	/// Commit the open transaction.
	fn commit_transaction(&self) -> Result<()>;

	/// Roll the open transaction back, discarding its writes.
	fn rollback_transaction(&self) -> Result<()>;

	/// Open a cursor on the table identified by `uri`, honouring the given
	/// configuration string. May fail, e.g. if the table does not exist.
	fn open_cursor(&self, uri: &str, config: &str) -> Result<Self::Cursor>;
}

/// An engine-provided handle bound to one table, used to read or write
/// records. Cursors are closed by dropping them.
pub trait Cursor {
	/// Set the cursor's key from raw bytes.
	fn set_raw_key(&mut self, key: &[u8]);

	/// Set the cursor's value from raw bytes.
	fn set_raw_value(&mut self, value: &[u8]);

	/// The value positioned under the cursor after a successful `search`.
	fn raw_value(&self) -> Result<DBValue>;

	/// Insert the current key/value pair. Existing records are overwritten.
	fn insert(&mut self) -> Result<()>;

	/// Remove the record under the current key. `Err(NotFound)` if absent.
	fn remove(&mut self) -> Result<()>;

	/// Position the cursor on the record under the current key.
	/// `Err(NotFound)` if absent.
	fn search(&mut self) -> Result<()>;

	/// Release any position held by the cursor, keeping it open for reuse.
	fn reset(&mut self);
}
