//! Benchmark: write propagation through the dependency graph.
//!
//! Measures:
//! - fan-out: one signal read by many effects
//! - chain: a signal behind a line of computeds
//! - batch: many writes coalesced into one effect run

use std::cell::Cell;
use std::hint::black_box;
use std::rc::Rc;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use ripple_core::{Computed, Runtime};

fn fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("fan_out");
    for width in [10, 100, 1000] {
        group.bench_with_input(BenchmarkId::from_parameter(width), &width, |b, &width| {
            let rt = Runtime::new();
            let source = rt.signal(0_u64);
            let sink = Rc::new(Cell::new(0_u64));
            let _effects: Vec<_> = (0..width)
                .map(|_| {
                    let (source, sink) = (source.clone(), Rc::clone(&sink));
                    rt.effect(move || sink.set(sink.get().wrapping_add(source.get())))
                })
                .collect();

            let mut next = 0;
            b.iter(|| {
                next += 1;
                source.set(black_box(next));
            });
            black_box(sink.get());
        });
    }
    group.finish();
}

fn chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("computed_chain");
    for depth in [10, 100] {
        group.bench_with_input(BenchmarkId::from_parameter(depth), &depth, |b, &depth| {
            let rt = Runtime::new();
            let source = rt.signal(0_u64);
            let head = {
                let source = source.clone();
                rt.computed(move || source.get())
            };
            let tail: Computed<u64> = (0..depth).fold(head, |prev, _| {
                rt.computed(move || prev.get().wrapping_add(1))
            });

            let mut next = 0;
            b.iter(|| {
                next += 1;
                source.set(next);
                black_box(tail.get())
            });
        });
    }
    group.finish();
}

fn batched_writes(c: &mut Criterion) {
    c.bench_function("batch_100_writes", |b| {
        let rt = Runtime::new();
        let signals: Vec<_> = (0..100_u64).map(|i| rt.signal(i)).collect();
        let runs = Rc::new(Cell::new(0_u64));
        let _effect = {
            let (signals, runs) = (signals.clone(), Rc::clone(&runs));
            rt.effect(move || {
                let total: u64 = signals.iter().map(|signal| signal.get()).sum();
                runs.set(runs.get() + black_box(total) % 2);
            })
        };

        let mut round = 0;
        b.iter(|| {
            round += 1;
            rt.batch(|| {
                for signal in &signals {
                    signal.set(round);
                }
            });
        });
        black_box(runs.get());
    });
}

criterion_group!(benches, fan_out, chain, batched_writes);
criterion_main!(benches);
