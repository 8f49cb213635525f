// Copyright 2021 Parity Technologies
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use criterion::{criterion_group, criterion_main, Criterion};
use kvdb_dispatch::{Dispatcher, Format, OpKind, Options};
use std::sync::Arc;

fn submit_and_flush(c: &mut Criterion) {
	let db = kvdb_txn_memory::create(["bench"]);
	let dispatcher = Dispatcher::new(&db, Options { workers: 4, ..Default::default() }).unwrap();
	let format = Arc::new(Format::new("bench", ""));
	let mut next = 0u64;

	c.bench_function("submit_1000_inserts_and_flush", |b| {
		b.iter(|| {
			for _ in 0..1000 {
				next += 1;
				let op = dispatcher.new_op(OpKind::Insert, format.clone(), None);
				op.set_key(&next.to_be_bytes());
				op.set_value(b"value");
				dispatcher.submit(&op).unwrap();
			}
			dispatcher.flush().unwrap();
		})
	});
}

criterion_group!(benches, submit_and_flush);
criterion_main!(benches);
