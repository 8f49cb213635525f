// Copyright 2021 Parity Technologies
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use crate::{
	error::{Error, Result},
	op::{Callback, Format, Op, OpKind, OpState},
	options::Options,
	shared::{FlushFlags, QueueEntry, Shared},
	worker::Worker,
};
use kvdb_txn::{Connection, Session};
use log::{debug, trace, warn};
use parking_lot::Mutex;
use std::{
	mem,
	sync::{
		atomic::{AtomicU64, Ordering},
		Arc,
	},
	thread,
};

/// Asynchronous operation dispatcher: a fixed pool of worker threads draining
/// a shared FIFO queue of record operations against a transactional
/// key-value store.
pub struct Dispatcher {
	shared: Arc<Shared>,
	// Serializes flushes: a second flush waits until the first has cleared.
	flush_lock: Mutex<()>,
	next_op_id: AtomicU64,
	handles: Mutex<Vec<thread::JoinHandle<()>>>,
}

impl Dispatcher {
	/// Start a dispatcher against the given connection. One session is opened
	/// per configured worker before any thread is spawned, so an engine
	/// failure aborts startup cleanly.
	pub fn new<C: Connection>(conn: &C, options: Options) -> Result<Dispatcher>
	where
		C::Session: 'static,
		<C::Session as Session>::Cursor: 'static,
	{
		if options.workers == 0 {
			return Err(Error::Config("at least one worker is required".into()));
		}

		let mut sessions = Vec::with_capacity(options.workers);
		for _ in 0..options.workers {
			sessions.push(conn.open_session()?);
		}

		let shared = Arc::new(Shared::new(options));
		let mut handles = Vec::with_capacity(sessions.len());
		for (index, session) in sessions.into_iter().enumerate() {
			let worker = Worker::new(index, session, shared.clone());
			let spawned = thread::Builder::new().name(format!("kvdb-async-{}", index)).spawn(move || worker.run());
			match spawned {
				Ok(handle) => handles.push(handle),
				Err(err) => {
					// tear down the workers spawned so far
					shared.running.store(false, Ordering::Release);
					shared.ops_cond.notify_all();
					for handle in handles {
						let _ = handle.join();
					}
					return Err(Error::Spawn(err));
				}
			}
		}
		debug!("dispatcher started with {} workers", handles.len());

		Ok(Dispatcher { shared, flush_lock: Mutex::new(()), next_op_id: AtomicU64::new(1), handles: Mutex::new(handles) })
	}

	/// Allocate a free operation against the given format. The caller sets
	/// the key (and value) before submitting it.
	pub fn new_op(&self, kind: OpKind, format: Arc<Format>, callback: Option<Arc<dyn Callback>>) -> Arc<Op> {
		let id = self.next_op_id.fetch_add(1, Ordering::Relaxed);
		Arc::new(Op::new(id, kind, format, callback))
	}

	/// Append a free operation to the queue and wake a worker. Fails with
	/// [`Error::AlreadyQueued`] if the op is not free, and with
	/// [`Error::ShuttingDown`] once [`Dispatcher::close`] has begun.
	pub fn submit(&self, op: &Arc<Op>) -> Result<()> {
		if !self.shared.running() {
			return Err(Error::ShuttingDown);
		}
		if !op.transition(OpState::Free, OpState::Enqueued) {
			return Err(Error::AlreadyQueued);
		}
		{
			let mut state = self.shared.state.lock();
			if !self.shared.running() {
				op.set_state(OpState::Free);
				return Err(Error::ShuttingDown);
			}
			state.queue.push_back(QueueEntry::Work(op.clone()));
			state.cur_queue += 1;
			trace!("op {} enqueued, {} queued", op.id(), state.cur_queue);
		}
		self.shared.ops_cond.notify_one();
		Ok(())
	}

	/// Block until every operation submitted before this call has completed.
	///
	/// The flush is enqueued in FIFO position: operations submitted after it
	/// are not executed until every worker has crossed the flush barrier.
	/// Concurrent flushes serialize; each waits its turn.
	pub fn flush(&self) -> Result<()> {
		let _serialize = self.flush_lock.lock();
		if !self.shared.running() {
			return Err(Error::ShuttingDown);
		}

		let mut state = self.shared.state.lock();
		debug_assert!(!state.flush.in_progress, "flushes are serialized");
		state.flush = FlushFlags { in_progress: true, ..Default::default() };
		state.queue.push_back(QueueEntry::Flush);
		state.cur_queue += 1;
		debug!("flush enqueued behind {} ops", state.cur_queue - 1);
		// every worker participates in the barrier: wake them all
		self.shared.ops_cond.notify_all();

		while !state.flush.complete {
			if !self.shared.running() {
				state.flush = FlushFlags::default();
				state.flush_count = 0;
				return Err(Error::ShuttingDown);
			}
			let _ = self.shared.flush_cond.wait_for(&mut state, self.shared.options.flush_wait_timeout);
		}
		// reset for the next flush
		state.flush = FlushFlags::default();
		state.flush_count = 0;
		debug!("flush complete");
		Ok(())
	}

	/// Number of queued entries not yet claimed by a worker.
	pub fn pending(&self) -> usize {
		self.shared.state.lock().cur_queue
	}

	/// Drain the queue, stop the workers and join their threads. Every cached
	/// cursor is closed before a worker terminates. Idempotent; submissions
	/// racing with `close` are rejected or dropped with the queue.
	pub fn close(&self) -> Result<()> {
		if !self.shared.running() {
			return Ok(());
		}
		let drained = self.flush();
		self.shared.running.store(false, Ordering::Release);
		self.shared.ops_cond.notify_all();
		self.shared.flush_cond.notify_all();
		let handles = mem::take(&mut *self.handles.lock());
		for handle in handles {
			if handle.join().is_err() {
				warn!("async worker panicked during shutdown");
			}
		}
		debug!("dispatcher closed");
		drained
	}
}

impl Drop for Dispatcher {
	fn drop(&mut self) {
		if let Err(err) = self.close() {
			warn!("dispatcher shutdown failed: {}", err);
		}
	}
}
