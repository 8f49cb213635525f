// Copyright 2021 Parity Technologies
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use crate::{op::Op, options::Options};
use parking_lot::{Condvar, Mutex};
use std::{
	collections::VecDeque,
	sync::{
		atomic::{AtomicBool, Ordering},
		Arc,
	},
};

/// One queue slot: either a unit of work, or the marker delimiting a flush.
pub(crate) enum QueueEntry {
	Work(Arc<Op>),
	Flush,
}

/// Flush protocol flags, all guarded by the queue lock.
#[derive(Debug, Default)]
pub(crate) struct FlushFlags {
	/// A flush has been initiated and its marker enqueued.
	pub in_progress: bool,
	/// The marker has been popped; workers are converging on the barrier.
	/// While set, no worker dequeues anything.
	pub flushing: bool,
	/// Every worker crossed the barrier; the initiator may return.
	pub complete: bool,
}

/// Queue state guarded by the single dispatcher lock.
pub(crate) struct QueueState {
	pub queue: VecDeque<QueueEntry>,
	/// Count of queued entries; always equals `queue.len()`.
	pub cur_queue: usize,
	pub flush: FlushFlags,
	/// Workers that have reached the barrier of the current flush.
	pub flush_count: usize,
}

/// State shared between the dispatcher front-end and its workers.
pub(crate) struct Shared {
	pub state: Mutex<QueueState>,
	/// Signalled by producers on enqueue.
	pub ops_cond: Condvar,
	/// Signalled by the last worker reaching the flush barrier.
	pub flush_cond: Condvar,
	/// Cleared exactly once, at shutdown.
	pub running: AtomicBool,
	pub options: Options,
}

impl Shared {
	pub(crate) fn new(options: Options) -> Shared {
		Shared {
			state: Mutex::new(QueueState {
				queue: VecDeque::new(),
				cur_queue: 0,
				flush: FlushFlags::default(),
				flush_count: 0,
			}),
			ops_cond: Condvar::new(),
			flush_cond: Condvar::new(),
			running: AtomicBool::new(true),
			options,
		}
	}

	pub(crate) fn running(&self) -> bool {
		self.running.load(Ordering::Acquire)
	}
}
