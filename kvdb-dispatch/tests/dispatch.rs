// Copyright 2021 Parity Technologies
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use kvdb_dispatch::{Callback, Dispatcher, Error, Format, OpKind, OpState, Options};
use kvdb_dispatch_shared_tests as st;
use kvdb_txn::Error as EngineError;
use kvdb_txn_memory::InMemory;
use std::{sync::Arc, thread};

fn dispatcher(db: &InMemory, workers: usize) -> Dispatcher {
	Dispatcher::new(db, Options { workers, ..Default::default() }).expect("dispatcher starts")
}

#[test]
fn insert_ops_commit() {
	let db = kvdb_txn_memory::create(["t:a"]);
	let d = dispatcher(&db, 2);
	st::test_insert_ops_commit(&d, "t:a").unwrap();
}

#[test]
fn fifo_order_single_worker() {
	let db = kvdb_txn_memory::create(["t:a"]);
	let d = dispatcher(&db, 1);
	st::test_fifo_order_single_worker(&d, "t:a").unwrap();
}

#[test]
fn no_op_is_lost() {
	let db = kvdb_txn_memory::create(["t:a"]);
	let d = dispatcher(&db, 4);
	st::test_no_op_is_lost(&d, "t:a", 1000).unwrap();
}

#[test]
fn search_missing_key() {
	let db = kvdb_txn_memory::create(["t:a"]);
	let d = dispatcher(&db, 2);
	st::test_search_missing_key(&d, "t:a").unwrap();
}

#[test]
fn search_existing_key() {
	let db = kvdb_txn_memory::create(["t:a"]);
	let d = dispatcher(&db, 2);
	st::test_search_existing_key(&d, "t:a").unwrap();
}

#[test]
fn flush_completes_prior_ops() {
	let db = kvdb_txn_memory::create(["t:a"]);
	let d = dispatcher(&db, 4);
	st::test_flush_completes_prior_ops(&d, "t:a").unwrap();
}

#[test]
fn flushes_serialize() {
	let db = kvdb_txn_memory::create(["t:a"]);
	let d = Arc::new(dispatcher(&db, 4));
	st::test_flushes_serialize(&d, "t:a").unwrap();
}

#[test]
fn callback_veto_rolls_back() {
	let db = kvdb_txn_memory::create(["t:a"]);
	let d = dispatcher(&db, 4);
	st::test_callback_veto_rolls_back(&d, "t:a").unwrap();
}

#[test]
fn remove_missing_key() {
	let db = kvdb_txn_memory::create(["t:a"]);
	let d = dispatcher(&db, 2);
	st::test_remove_missing_key(&d, "t:a").unwrap();
}

#[test]
fn close_rejects_further_work() {
	let db = kvdb_txn_memory::create(["t:a"]);
	let d = dispatcher(&db, 2);
	st::test_close_rejects_further_work(&d, "t:a").unwrap();
}

#[test]
fn zero_workers_is_a_config_error() {
	let db = kvdb_txn_memory::create(["t:a"]);
	let result = Dispatcher::new(&db, Options { workers: 0, ..Default::default() });
	assert!(matches!(result, Err(Error::Config(_))));
}

#[test]
fn single_worker_caches_one_cursor() {
	let db = kvdb_txn_memory::create(["t:a"]);
	let d = dispatcher(&db, 1);
	let format = Arc::new(Format::new("t:a", ""));

	for (key, value) in [(b"1", b"x"), (b"2", b"y"), (b"3", b"z")] {
		st::submit_op(&d, OpKind::Insert, &format, key, Some(value), None).unwrap();
	}
	d.flush().unwrap();

	// all three ops went through the same cached cursor
	assert_eq!(db.open_cursors(), 1);
	assert_eq!(db.get("t:a", b"1").unwrap().unwrap(), b"x");
	assert_eq!(db.get("t:a", b"2").unwrap().unwrap(), b"y");
	assert_eq!(db.get("t:a", b"3").unwrap().unwrap(), b"z");

	d.close().unwrap();
	assert_eq!(db.open_cursors(), 0, "worker teardown closes cached cursors");
}

#[test]
fn concurrent_producers() {
	let db = kvdb_txn_memory::create(["t:a"]);
	let d = Arc::new(dispatcher(&db, 4));
	let format = Arc::new(Format::new("t:a", ""));

	let mut producers = Vec::new();
	for producer in 0..2 {
		let d = d.clone();
		let format = format.clone();
		producers.push(thread::spawn(move || {
			for i in 0..500usize {
				let key = format!("p{}-{:04}", producer, i);
				st::submit_op(&d, OpKind::Insert, &format, key.as_bytes(), Some(b"v"), None).unwrap();
			}
		}));
	}
	for producer in producers {
		producer.join().unwrap();
	}
	d.flush().unwrap();

	for producer in 0..2 {
		for i in 0..500usize {
			let key = format!("p{}-{:04}", producer, i);
			assert_eq!(db.get("t:a", key.as_bytes()).unwrap().unwrap(), b"v", "missing {}", key);
		}
	}
	// one format: at most one cached cursor per worker
	assert!(db.open_cursors() <= 4);

	d.close().unwrap();
	assert_eq!(db.open_cursors(), 0);
}

#[test]
fn cursor_open_failure_is_delivered() {
	let db = kvdb_txn_memory::create(["t:a"]);
	let d = dispatcher(&db, 2);

	let missing = Arc::new(Format::new("t:missing", ""));
	let recorder = st::Recorder::new();
	let op = st::submit_op(&d, OpKind::Insert, &missing, b"k", Some(b"v"), Some(recorder.clone() as Arc<dyn Callback>))
		.unwrap();
	d.flush().unwrap();

	assert_eq!(recorder.results(), vec![Err(EngineError::CursorOpen("t:missing".into()))]);
	assert_eq!(op.state(), OpState::Free);

	// the worker survives and keeps serving other formats
	let format = Arc::new(Format::new("t:a", ""));
	st::submit_op(&d, OpKind::Insert, &format, b"k", Some(b"v"), None).unwrap();
	d.flush().unwrap();
	assert_eq!(db.get("t:a", b"k").unwrap().unwrap(), b"v");
}

#[test]
fn close_drains_the_queue() {
	let db = kvdb_txn_memory::create(["t:a"]);
	let d = dispatcher(&db, 2);
	let format = Arc::new(Format::new("t:a", ""));
	let recorder = st::Recorder::new();

	let mut ops = Vec::new();
	for i in 0..100usize {
		let key = format!("key-{:03}", i);
		ops.push(
			st::submit_op(&d, OpKind::Insert, &format, key.as_bytes(), Some(b"v"), Some(recorder.clone() as Arc<dyn Callback>))
				.unwrap(),
		);
	}
	d.close().unwrap();

	assert_eq!(recorder.completions(), 100, "close drains everything already submitted");
	assert!(ops.iter().all(|op| op.state() == OpState::Free));
	assert_eq!(db.open_cursors(), 0);
}

#[test]
fn update_and_remove_round_trip() {
	let db = kvdb_txn_memory::create(["t:a"]);
	let d = dispatcher(&db, 2);
	let format = Arc::new(Format::new("t:a", ""));

	st::submit_op(&d, OpKind::Insert, &format, b"k", Some(b"v1"), None).unwrap();
	d.flush().unwrap();
	assert_eq!(db.get("t:a", b"k").unwrap().unwrap(), b"v1");

	st::submit_op(&d, OpKind::Update, &format, b"k", Some(b"v2"), None).unwrap();
	d.flush().unwrap();
	assert_eq!(db.get("t:a", b"k").unwrap().unwrap(), b"v2");

	st::submit_op(&d, OpKind::Remove, &format, b"k", None, None).unwrap();
	d.flush().unwrap();
	assert!(db.get("t:a", b"k").unwrap().is_none());
}

#[test]
fn distinct_formats_use_distinct_cursors() {
	let db = kvdb_txn_memory::create(["t:a", "t:b"]);
	let d = dispatcher(&db, 1);

	let a = Arc::new(Format::new("t:a", ""));
	let b = Arc::new(Format::new("t:b", ""));
	st::submit_op(&d, OpKind::Insert, &a, b"k", Some(b"v"), None).unwrap();
	st::submit_op(&d, OpKind::Insert, &b, b"k", Some(b"v"), None).unwrap();
	d.flush().unwrap();

	assert_eq!(db.open_cursors(), 2);
	assert_eq!(db.get("t:a", b"k").unwrap().unwrap(), b"v");
	assert_eq!(db.get("t:b", b"k").unwrap().unwrap(), b"v");
}
