// Copyright 2021 Parity Technologies
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use std::{cmp, time::Duration};

/// Dispatcher configuration.
#[derive(Debug, Clone)]
pub struct Options {
	/// Number of worker threads draining the queue. Fixed at startup.
	pub workers: usize,
	/// Max time a flush participant blocks on the flush condition before
	/// re-checking shared state. Bounds the damage of a lost signal.
	pub flush_wait_timeout: Duration,
	/// Max time an idle worker blocks waiting for work when the queue is
	/// empty.
	pub idle_wait_timeout: Duration,
}

impl Default for Options {
	fn default() -> Options {
		Options {
			workers: 2,
			flush_wait_timeout: Duration::from_millis(10),
			idle_wait_timeout: Duration::from_millis(100),
		}
	}
}

impl Options {
	/// Options with a worker count scaled to the host, capped so per-worker
	/// cursor caches stay small.
	pub fn auto() -> Options {
		Options { workers: cmp::max(2, cmp::min(num_cpus::get() / 2, 8)), ..Default::default() }
	}
}
