// Copyright 2021 Parity Technologies
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Shared tests for async dispatcher functionality, to be executed against
//! actual engines. Tables are only observed through search operations, so
//! every test here works with any `kvdb-txn` implementation.

use kvdb_dispatch::{Callback, Dispatcher, Error, Format, Op, OpKind, OpState, Result};
use kvdb_txn::{DBKey, DBValue, Error as EngineError};
use parking_lot::Mutex;
use std::{sync::Arc, thread};

/// A callback recording each completion (key and engine outcome) in arrival
/// order. A vetoing recorder additionally rejects every result, forcing a
/// rollback.
pub struct Recorder {
	accept: bool,
	log: Mutex<Vec<(DBKey, kvdb_txn::Result<()>)>>,
}

impl Recorder {
	/// A recorder that accepts every completion.
	pub fn new() -> Arc<Recorder> {
		Arc::new(Recorder { accept: true, log: Mutex::new(Vec::new()) })
	}

	/// A recorder that vetoes every completion.
	pub fn vetoing() -> Arc<Recorder> {
		Arc::new(Recorder { accept: false, log: Mutex::new(Vec::new()) })
	}

	/// Number of completions observed so far.
	pub fn completions(&self) -> usize {
		self.log.lock().len()
	}

	/// The completed keys, in callback order.
	pub fn keys(&self) -> Vec<DBKey> {
		self.log.lock().iter().map(|(key, _)| key.clone()).collect()
	}

	/// The engine outcomes, in callback order.
	pub fn results(&self) -> Vec<kvdb_txn::Result<()>> {
		self.log.lock().iter().map(|(_, result)| result.clone()).collect()
	}
}

impl Callback for Recorder {
	fn notify(&self, op: &Op, result: &kvdb_txn::Result<()>) -> bool {
		self.log.lock().push((op.key(), result.clone()));
		self.accept
	}
}

/// Build and submit one op, returning it for later inspection.
pub fn submit_op(
	dispatcher: &Dispatcher,
	kind: OpKind,
	format: &Arc<Format>,
	key: &[u8],
	value: Option<&[u8]>,
	callback: Option<Arc<dyn Callback>>,
) -> Result<Arc<Op>> {
	let op = dispatcher.new_op(kind, format.clone(), callback);
	op.set_key(key);
	if let Some(value) = value {
		op.set_value(value);
	}
	dispatcher.submit(&op)?;
	Ok(op)
}

/// Look a key up through the dispatcher itself: submit a search, flush, and
/// return the engine outcome together with the mirrored value.
pub fn lookup(dispatcher: &Dispatcher, format: &Arc<Format>, key: &[u8]) -> Result<kvdb_txn::Result<DBValue>> {
	let recorder = Recorder::new();
	let op = submit_op(dispatcher, OpKind::Search, format, key, None, Some(recorder.clone() as Arc<dyn Callback>))?;
	dispatcher.flush()?;
	let result = recorder.results().pop().expect("the search completed before the flush returned");
	Ok(result.map(|()| op.value()))
}

/// Inserts commit and are visible to later searches; the queue drains.
pub fn test_insert_ops_commit(dispatcher: &Dispatcher, uri: &str) -> Result<()> {
	let format = Arc::new(Format::new(uri, ""));
	let recorder = Recorder::new();

	let records: [(&[u8], &[u8]); 3] = [(b"1", b"x"), (b"2", b"y"), (b"3", b"z")];
	let mut ops = Vec::new();
	for (key, value) in records {
		ops.push(submit_op(
			dispatcher,
			OpKind::Insert,
			&format,
			key,
			Some(value),
			Some(recorder.clone() as Arc<dyn Callback>),
		)?);
	}
	dispatcher.flush()?;

	assert_eq!(recorder.completions(), 3);
	assert!(recorder.results().iter().all(|result| result.is_ok()));
	assert_eq!(dispatcher.pending(), 0);
	assert!(ops.iter().all(|op| op.state() == OpState::Free));

	for (key, value) in records {
		assert_eq!(lookup(dispatcher, &format, key)?, Ok(value.to_vec()));
	}
	Ok(())
}

/// With a single worker, callbacks fire in submission order.
///
/// The dispatcher must have been built with exactly one worker.
pub fn test_fifo_order_single_worker(dispatcher: &Dispatcher, uri: &str) -> Result<()> {
	let format = Arc::new(Format::new(uri, ""));
	let recorder = Recorder::new();

	let mut submitted = Vec::new();
	for i in 0..16u8 {
		let key = [i];
		submit_op(dispatcher, OpKind::Insert, &format, &key, Some(b"v"), Some(recorder.clone() as Arc<dyn Callback>))?;
		submitted.push(DBKey::from_slice(&key));
	}
	dispatcher.flush()?;

	assert_eq!(recorder.keys(), submitted, "a single worker drains in FIFO order");
	Ok(())
}

/// Every submitted op completes exactly once and returns to the free state.
pub fn test_no_op_is_lost(dispatcher: &Dispatcher, uri: &str, count: usize) -> Result<()> {
	let format = Arc::new(Format::new(uri, ""));
	let recorder = Recorder::new();

	let mut ops = Vec::with_capacity(count);
	for i in 0..count {
		let key = format!("key-{:05}", i);
		ops.push(submit_op(
			dispatcher,
			OpKind::Insert,
			&format,
			key.as_bytes(),
			Some(b"v"),
			Some(recorder.clone() as Arc<dyn Callback>),
		)?);
	}
	dispatcher.flush()?;

	assert_eq!(recorder.completions(), count);
	assert_eq!(dispatcher.pending(), 0);
	assert!(ops.iter().all(|op| op.state() == OpState::Free));
	Ok(())
}

/// Searching a missing key reports `NotFound` through the callback and
/// leaves the op's value buffer untouched.
pub fn test_search_missing_key(dispatcher: &Dispatcher, uri: &str) -> Result<()> {
	let format = Arc::new(Format::new(uri, ""));
	let recorder = Recorder::new();

	let op =
		submit_op(dispatcher, OpKind::Search, &format, b"absent", None, Some(recorder.clone() as Arc<dyn Callback>))?;
	dispatcher.flush()?;

	assert_eq!(recorder.results(), vec![Err(EngineError::NotFound)]);
	assert!(op.value().is_empty());
	assert_eq!(op.state(), OpState::Free);
	Ok(())
}

/// Searching an existing key mirrors the stored value back into the op.
pub fn test_search_existing_key(dispatcher: &Dispatcher, uri: &str) -> Result<()> {
	let format = Arc::new(Format::new(uri, ""));

	submit_op(dispatcher, OpKind::Insert, &format, b"k", Some(b"v"), None)?;
	dispatcher.flush()?;

	let recorder = Recorder::new();
	let op = submit_op(dispatcher, OpKind::Search, &format, b"k", None, Some(recorder.clone() as Arc<dyn Callback>))?;
	dispatcher.flush()?;

	assert_eq!(recorder.results(), vec![Ok(())]);
	assert_eq!(op.value(), b"v".to_vec());
	Ok(())
}

/// A returned flush means every previously submitted op has completed; ops
/// submitted afterwards are untouched by it.
pub fn test_flush_completes_prior_ops(dispatcher: &Dispatcher, uri: &str) -> Result<()> {
	let format = Arc::new(Format::new(uri, ""));

	let before = Recorder::new();
	let mut first = Vec::new();
	for i in 0..500usize {
		let key = format!("before-{:04}", i);
		first.push(submit_op(
			dispatcher,
			OpKind::Insert,
			&format,
			key.as_bytes(),
			Some(b"v"),
			Some(before.clone() as Arc<dyn Callback>),
		)?);
	}
	dispatcher.flush()?;

	assert_eq!(before.completions(), 500, "the flush returned before all prior ops completed");
	assert!(first.iter().all(|op| op.state() == OpState::Free));

	let after = Recorder::new();
	for i in 0..500usize {
		let key = format!("after-{:04}", i);
		submit_op(
			dispatcher,
			OpKind::Insert,
			&format,
			key.as_bytes(),
			Some(b"v"),
			Some(after.clone() as Arc<dyn Callback>),
		)?;
	}
	dispatcher.flush()?;
	assert_eq!(after.completions(), 500);
	Ok(())
}

/// Concurrent flushes serialize instead of interfering.
pub fn test_flushes_serialize(dispatcher: &Arc<Dispatcher>, uri: &str) -> Result<()> {
	let format = Arc::new(Format::new(uri, ""));
	for i in 0..200usize {
		let key = format!("key-{:04}", i);
		submit_op(dispatcher, OpKind::Insert, &format, key.as_bytes(), Some(b"v"), None)?;
	}

	let mut flushers = Vec::new();
	for _ in 0..2 {
		let dispatcher = dispatcher.clone();
		flushers.push(thread::spawn(move || dispatcher.flush()));
	}
	for flusher in flushers {
		flusher.join().expect("flusher thread must not panic")?;
	}
	assert_eq!(dispatcher.pending(), 0);
	Ok(())
}

/// A vetoed callback rolls the op's transaction back; its effect is absent
/// from the table while accepted ops commit.
pub fn test_callback_veto_rolls_back(dispatcher: &Dispatcher, uri: &str) -> Result<()> {
	let format = Arc::new(Format::new(uri, ""));
	let accepted = Recorder::new();
	let vetoed = Recorder::vetoing();

	let mut keys = Vec::new();
	for i in 1..=25usize {
		let key = format!("veto-{:02}", i);
		let callback = if i % 5 == 0 {
			vetoed.clone() as Arc<dyn Callback>
		} else {
			accepted.clone() as Arc<dyn Callback>
		};
		submit_op(dispatcher, OpKind::Insert, &format, key.as_bytes(), Some(b"v"), Some(callback))?;
		keys.push((i, key));
	}
	dispatcher.flush()?;

	assert_eq!(accepted.completions(), 20);
	assert_eq!(vetoed.completions(), 5);

	for (i, key) in keys {
		let found = lookup(dispatcher, &format, key.as_bytes())?;
		if i % 5 == 0 {
			assert_eq!(found, Err(EngineError::NotFound), "vetoed op {} must have rolled back", i);
		} else {
			assert_eq!(found, Ok(b"v".to_vec()));
		}
	}
	Ok(())
}

/// Removing a missing key is a committed `NotFound` outcome, not a failure.
pub fn test_remove_missing_key(dispatcher: &Dispatcher, uri: &str) -> Result<()> {
	let format = Arc::new(Format::new(uri, ""));
	let recorder = Recorder::new();

	let op =
		submit_op(dispatcher, OpKind::Remove, &format, b"absent", None, Some(recorder.clone() as Arc<dyn Callback>))?;
	dispatcher.flush()?;

	assert_eq!(recorder.results(), vec![Err(EngineError::NotFound)]);
	assert_eq!(op.state(), OpState::Free);
	Ok(())
}

/// After `close`, submissions and flushes are rejected; closing again is a
/// no-op.
pub fn test_close_rejects_further_work(dispatcher: &Dispatcher, uri: &str) -> Result<()> {
	let format = Arc::new(Format::new(uri, ""));
	submit_op(dispatcher, OpKind::Insert, &format, b"k", Some(b"v"), None)?;
	dispatcher.close()?;

	let op = dispatcher.new_op(OpKind::Insert, format.clone(), None);
	op.set_key(b"late");
	op.set_value(b"v");
	assert!(matches!(dispatcher.submit(&op), Err(Error::ShuttingDown)));
	assert!(matches!(dispatcher.flush(), Err(Error::ShuttingDown)));
	dispatcher.close()?;
	Ok(())
}
