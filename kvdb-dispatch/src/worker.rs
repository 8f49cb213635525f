// Copyright 2021 Parity Technologies
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use crate::{
	cache::CursorCache,
	error::Result,
	op::{Op, OpKind, OpState},
	shared::{QueueEntry, QueueState, Shared},
};
use kvdb_txn::{Cursor, Error as EngineError, Result as EngineResult, Session};
use log::{debug, trace, warn};
use parking_lot::MutexGuard;
use std::sync::Arc;

/// Run one operation against a cursor opened for its format: bind the key
/// (and value, for writes), dispatch on the kind, and for a successful search
/// mirror the found value back into the op.
fn execute<C: Cursor>(op: &Op, cursor: &mut C) -> EngineResult<()> {
	cursor.set_raw_key(&op.key());
	match op.kind() {
		OpKind::Insert | OpKind::Update => {
			cursor.set_raw_value(&op.value());
			cursor.insert()
		}
		OpKind::Remove => cursor.remove(),
		OpKind::Search => {
			cursor.search()?;
			let value = cursor.raw_value()?;
			op.set_search_result(value);
			Ok(())
		}
	}
}

/// A queue-draining worker: one engine session, one cursor cache, one thread.
pub(crate) struct Worker<S: Session> {
	index: usize,
	session: S,
	cache: CursorCache<S::Cursor>,
	shared: Arc<Shared>,
}

impl<S: Session> Worker<S> {
	pub(crate) fn new(index: usize, session: S, shared: Arc<Shared>) -> Worker<S> {
		Worker { index, session, cache: CursorCache::new(), shared }
	}

	/// The worker loop. Runs until the dispatcher's run flag clears, then
	/// closes every cached cursor and returns.
	pub(crate) fn run(mut self) {
		debug!("async worker {} starting", self.index);
		while self.shared.running() {
			let mut state = self.shared.state.lock();
			if state.flush.flushing {
				// a flush is converging: join the barrier before touching
				// the queue
				self.join_flush(&mut state, false);
			}
			debug_assert_eq!(state.queue.len(), state.cur_queue);
			match state.queue.pop_front() {
				Some(QueueEntry::Work(op)) => {
					state.cur_queue -= 1;
					let claimed = op.transition(OpState::Enqueued, OpState::Working);
					debug_assert!(claimed, "a queued op is always in the enqueued state");
					drop(state);
					if let Err(err) = self.handle_op(&op) {
						// the callback has already observed the outcome
						warn!("async worker {}: op {} failed: {}", self.index, op.id(), err);
					}
				}
				Some(QueueEntry::Flush) => {
					state.cur_queue -= 1;
					debug_assert!(state.flush.in_progress);
					// we popped the marker: arm the barrier and wait on it as
					// the first participant
					self.join_flush(&mut state, true);
					self.wait_for_work(state);
				}
				None => self.wait_for_work(state),
			}
		}
		debug!("async worker {} exiting, closing {} cached cursors", self.index, self.cache.len());
	}

	/// Converge on the flush barrier. `armed` is true for the worker that
	/// popped the flush marker; it counts itself as the first participant.
	/// The last worker to arrive completes the flush and releases everyone;
	/// the rest wait for the flushing flag to clear. Returns with the lock
	/// held.
	fn join_flush(&self, state: &mut MutexGuard<QueueState>, armed: bool) {
		if armed {
			state.flush.flushing = true;
			state.flush_count = 1;
			trace!("async worker {}: flush barrier armed", self.index);
		} else {
			state.flush_count += 1;
		}
		if state.flush_count == self.shared.options.workers {
			state.flush.complete = true;
			state.flush.flushing = false;
			trace!("async worker {}: flush barrier complete", self.index);
			MutexGuard::unlocked(state, || {
				self.shared.flush_cond.notify_all();
			});
		} else {
			// wait for the last worker; the timeout bounds a lost signal
			while state.flush.flushing && self.shared.running() {
				let _ = self.shared.flush_cond.wait_for(state, self.shared.options.flush_wait_timeout);
			}
		}
	}

	/// Block until work may be available. Waking with nothing to do is
	/// harmless: the loop re-checks the queue.
	fn wait_for_work(&self, mut state: MutexGuard<QueueState>) {
		if state.queue.is_empty() && self.shared.running() {
			let _ = self.shared.ops_cond.wait_for(&mut state, self.shared.options.idle_wait_timeout);
		}
	}

	/// Handle one op: begin a transaction, execute through a cached cursor,
	/// notify the callback, then commit or roll back. The op is recycled on
	/// every path once the transaction is resolved.
	fn handle_op(&mut self, op: &Op) -> Result<()> {
		debug_assert_eq!(op.state(), OpState::Working);

		if let Err(err) = self.session.begin_transaction() {
			// nothing to resolve; deliver the outcome and recycle
			op.notify(&Err(err.clone()));
			op.recycle();
			return Err(err.into());
		}

		let result = match self.cache.get_or_open(&self.session, op.format()) {
			Ok(cursor) => execute(op, cursor),
			Err(err) => {
				// the op never ran: end the transaction by rollback and
				// surface the open failure through the callback
				if let Err(e) = self.session.rollback_transaction() {
					warn!("async worker {}: rollback failed: {}", self.index, e);
				}
				op.notify(&Err(err.clone()));
				op.recycle();
				return Err(err.into());
			}
		};

		let accepted = op.notify(&result);
		let resolution = if accepted && matches!(result, Ok(()) | Err(EngineError::NotFound)) {
			self.session.commit_transaction()
		} else {
			self.session.rollback_transaction()
		};
		if let Err(err) = resolution {
			// recorded only; the op is recycled regardless
			warn!("async worker {}: op {} transaction resolution failed: {}", self.index, op.id(), err);
		}

		// the transaction is resolved: reset the cached cursor and release
		// the op back to its submitter
		self.cache.reset(op.format());
		op.recycle();
		Ok(())
	}
}
