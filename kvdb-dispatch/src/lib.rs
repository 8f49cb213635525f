// Copyright 2021 Parity Technologies
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Asynchronous operation dispatcher for transactional key-value stores.
//!
//! Clients allocate operation records ([`Op`]) against a registered table
//! [`Format`], hand them to [`Dispatcher::submit`] and observe completion
//! through a per-op [`Callback`]. A fixed pool of worker threads drains the
//! shared FIFO queue; each worker owns an engine session (see `kvdb-txn`)
//! and executes every operation inside its own transaction, through a cursor
//! cached per (table URI, configuration) signature.
//!
//! ### Design details
//!
//! - The queue is drained strictly FIFO, but workers execute concurrently:
//!   completion order across operations is unspecified, and so is callback
//!   order.
//! - [`Dispatcher::flush`] enqueues a marker in FIFO position. The worker
//!   that pops the marker arms a barrier which every worker must reach before
//!   any later operation is executed. A completed flush therefore means
//!   "everything submitted before it is done; nothing submitted after it has
//!   started".
//! - A worker commits an operation's transaction only when the engine
//!   reported success or a not-found outcome *and* the callback accepted the
//!   result; otherwise it rolls back. Per-operation failures are delivered to
//!   the callback and never take a worker down.
//! - Condition waits carry a bounded timeout, so a lost signal degrades into
//!   a short stall instead of a wedged worker.

#![warn(missing_docs)]

mod cache;
mod dispatcher;
mod error;
mod op;
mod options;
mod shared;
mod worker;

pub use self::dispatcher::Dispatcher;
pub use self::error::{Error, Result};
pub use self::op::{Callback, Format, Op, OpKind, OpState};
pub use self::options::Options;
