//! Integration Tests for the Reactive Runtime
//!
//! These tests drive signals, computeds, effects, scopes, collections and
//! the scheduler together through the public API.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use ripple_core::graph::Job;
use ripple_core::{FlushMode, ReactiveError, Runtime, RuntimeConfig, WatchFlush, WatchOptions};

fn counter() -> Rc<Cell<u32>> {
    Rc::new(Cell::new(0))
}

/// A write re-runs exactly the effects that read the signal.
#[test]
fn effect_tracks_signal_dependency() {
    let rt = Runtime::new();
    let count = rt.signal(0);
    let other = rt.signal("idle");
    let observed = Rc::new(Cell::new(-1));

    let _effect = {
        let (count, observed) = (count.clone(), Rc::clone(&observed));
        rt.effect(move || observed.set(count.get()))
    };
    assert_eq!(observed.get(), 0);

    count.set(42);
    assert_eq!(observed.get(), 42);

    // Unrelated writes and equal writes change nothing.
    other.set("busy");
    count.set(42);
    assert_eq!(count.subscriber_count(), 1);
    assert_eq!(other.subscriber_count(), 0);
}

/// Writes inside a batch re-run each affected effect once.
#[test]
fn batch_coalesces_effect_runs() {
    let rt = Runtime::new();
    let first = rt.signal(String::from("Ada"));
    let last = rt.signal(String::from("Lovelace"));
    let names = Rc::new(RefCell::new(Vec::new()));

    let _effect = {
        let (first, last, names) = (first.clone(), last.clone(), Rc::clone(&names));
        rt.effect(move || {
            let full = format!("{} {}", first.get(), last.get());
            names.borrow_mut().push(full);
        })
    };

    rt.batch(|| {
        first.set(String::from("Grace"));
        last.set(String::from("Hopper"));
    });

    assert_eq!(*names.borrow(), vec!["Ada Lovelace", "Grace Hopper"]);
}

/// A computed whose result did not change does not re-run its readers.
#[test]
fn computed_with_equal_result_stops_propagation() {
    let rt = Runtime::new();
    let items = rt.signal(vec![1, 2, 3]);
    let sums = counter();
    let runs = counter();

    let sum = {
        let (items, sums) = (items.clone(), Rc::clone(&sums));
        rt.computed(move || {
            sums.set(sums.get() + 1);
            items.with(|items| items.iter().sum::<i32>())
        })
    };
    let _effect = {
        let (sum, runs) = (sum.clone(), Rc::clone(&runs));
        rt.effect(move || {
            sum.get();
            runs.set(runs.get() + 1);
        })
    };
    assert_eq!((sums.get(), runs.get()), (1, 1));

    items.set(vec![2, 1, 3]);
    assert_eq!((sums.get(), runs.get()), (2, 1));

    items.set(vec![2, 2, 3]);
    assert_eq!((sums.get(), runs.get()), (3, 2));
    assert_eq!(sum.get(), 7);
}

/// Dependencies not read by the latest run are unlinked.
#[test]
fn branch_switch_prunes_stale_dependencies() {
    let rt = Runtime::new();
    let use_a = rt.signal(true);
    let a = rt.signal(1);
    let b = rt.signal(2);
    let runs = counter();

    let effect = {
        let (use_a, a, b, runs) = (use_a.clone(), a.clone(), b.clone(), Rc::clone(&runs));
        rt.effect(move || {
            runs.set(runs.get() + 1);
            if use_a.get() {
                a.get()
            } else {
                b.get()
            }
        })
    };
    assert_eq!(effect.dependency_count(), 2);

    use_a.set(false);
    assert_eq!(runs.get(), 2);
    assert_eq!(a.subscriber_count(), 0);
    assert_eq!(effect.dependency_count(), 2);

    a.set(10);
    assert_eq!(runs.get(), 2);
    b.set(20);
    assert_eq!(runs.get(), 3);
}

/// Stopping a scope unlinks all of its effects and runs each cleanup once,
/// in registration order.
#[test]
fn scope_teardown_leaves_no_links() {
    let rt = Runtime::new();
    let source = rt.signal(0);
    let log = Rc::new(RefCell::new(Vec::new()));
    let scope = rt.effect_scope();

    scope
        .run(|| {
            for name in ["first", "second"] {
                let (source, log) = (source.clone(), Rc::clone(&log));
                let rt_inner = rt.clone();
                rt.effect(move || {
                    source.get();
                    let log = Rc::clone(&log);
                    rt_inner.on_effect_cleanup(move || log.borrow_mut().push(format!("{name} cleanup")));
                });
            }
            let log = Rc::clone(&log);
            rt.on_scope_dispose(move || log.borrow_mut().push("dispose".to_string()));
        })
        .unwrap();

    source.set(1);
    assert_eq!(*log.borrow(), vec!["first cleanup", "second cleanup"]);
    assert!(rt.stats().links > 0);

    log.borrow_mut().clear();
    scope.stop();
    scope.stop();

    assert_eq!(*log.borrow(), vec!["first cleanup", "second cleanup", "dispose"]);
    assert_eq!(rt.stats().links, 0);
    assert_eq!(source.subscriber_count(), 0);
    assert_eq!(scope.run(|| ()), Err(ReactiveError::ScopeStopped));
}

/// Jobs flush in id order, whatever order they were queued in.
#[test]
fn jobs_flush_in_id_order() {
    let rt = Runtime::new();
    let order = Rc::new(RefCell::new(Vec::new()));

    for id in [3, 1, 2] {
        let order = Rc::clone(&order);
        rt.queue_job(Job::with_id(id, move || order.borrow_mut().push(id)));
    }
    assert_eq!(rt.scheduler().queued_ids(), vec![Some(1), Some(2), Some(3)]);

    let report = rt.flush().unwrap();
    assert_eq!(report.jobs_run, 3);
    assert_eq!(*order.borrow(), vec![1, 2, 3]);
}

/// A panicking job is reported after every other job has run.
#[test]
fn flush_reports_job_panics() {
    let rt = Runtime::new();
    let ran = counter();

    rt.queue_job(Job::with_id(1, || panic!("broken job")));
    {
        let ran = Rc::clone(&ran);
        rt.queue_job(Job::with_id(2, move || ran.set(ran.get() + 1)));
    }

    let err = rt.flush().unwrap_err();
    assert_eq!(ran.get(), 1);
    assert_eq!(err.failures.len(), 1);
    assert!(matches!(
        &err.failures[0],
        ReactiveError::JobPanicked { message, .. } if message == "broken job"
    ));
}

/// A paused effect catches up once on resume.
#[test]
fn paused_effect_runs_once_on_resume() {
    let rt = Runtime::new();
    let value = rt.signal(0);
    let seen = Rc::new(RefCell::new(Vec::new()));

    let effect = {
        let (value, seen) = (value.clone(), Rc::clone(&seen));
        rt.effect(move || seen.borrow_mut().push(value.get()))
    };

    effect.pause();
    value.set(1);
    value.set(2);
    assert_eq!(*seen.borrow(), vec![0]);

    effect.resume();
    assert_eq!(*seen.borrow(), vec![0, 2]);

    effect.resume();
    assert_eq!(*seen.borrow(), vec![0, 2]);
}

/// Computeds over collections re-evaluate only for the keys they read.
#[test]
fn collections_feed_computeds_per_key() {
    let rt = Runtime::new();
    let prices = rt.reactive_map::<&str, u32>();
    prices.set("apple", 3);
    prices.set("pear", 5);
    let cart = rt.reactive_vec::<&str>();
    let evaluations = counter();

    let total = {
        let (prices, cart, evaluations) = (prices.clone(), cart.clone(), Rc::clone(&evaluations));
        rt.computed(move || {
            evaluations.set(evaluations.get() + 1);
            cart.to_vec()
                .iter()
                .map(|item| prices.get(item).unwrap_or(0))
                .sum::<u32>()
        })
    };

    cart.push("apple");
    cart.push("apple");
    assert_eq!(total.get(), 6);
    assert_eq!(evaluations.get(), 1);

    prices.set("pear", 7);
    assert_eq!(total.get(), 6);
    assert_eq!(evaluations.get(), 1);

    prices.set("apple", 4);
    assert_eq!(total.get(), 8);
    assert_eq!(evaluations.get(), 2);
}

/// Pre watchers run before render effects, post watchers after.
#[test]
fn watchers_and_render_effects_share_one_flush() {
    let rt = Runtime::new();
    let count = rt.signal(0);
    let log = Rc::new(RefCell::new(Vec::new()));

    let _render = {
        let (count, log) = (count.clone(), Rc::clone(&log));
        rt.render_effect(move || log.borrow_mut().push(format!("render {}", count.get())))
    };
    let _post = {
        let (count, log) = (count.clone(), Rc::clone(&log));
        rt.watch(
            move || count.get(),
            move |new, _| log.borrow_mut().push(format!("post {new}")),
            WatchOptions {
                flush: WatchFlush::Post,
                ..WatchOptions::default()
            },
        )
    };
    let _pre = {
        let (count, log) = (count.clone(), Rc::clone(&log));
        rt.watch(
            move || count.get(),
            move |new, old| log.borrow_mut().push(format!("pre {old:?} -> {new}")),
            WatchOptions::default(),
        )
    };

    log.borrow_mut().clear();
    count.set(1);
    assert!(log.borrow().is_empty());

    rt.flush().unwrap();
    assert_eq!(
        *log.borrow(),
        vec!["pre Some(0) -> 1", "render 1", "post 1"]
    );
}

/// With the tokio driver, queued jobs flush once the current task yields.
#[tokio::test]
async fn tokio_driver_flushes_on_next_tick() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let rt = Runtime::with_config(RuntimeConfig {
                flush: FlushMode::Tokio,
                ..RuntimeConfig::default()
            });
            let count = rt.signal(0);
            let seen = Rc::new(RefCell::new(Vec::new()));
            let _render = {
                let (count, seen) = (count.clone(), Rc::clone(&seen));
                rt.render_effect(move || seen.borrow_mut().push(count.get()))
            };

            count.set(1);
            count.set(2);
            assert_eq!(*seen.borrow(), vec![0]);
            assert!(rt.scheduler().has_pending());

            rt.next_tick().await;
            assert_eq!(*seen.borrow(), vec![0, 2]);
            assert!(!rt.scheduler().has_pending());
        })
        .await;
}

/// Configuration parses from JSON with defaults for missing fields.
#[test]
fn config_from_json() {
    let config: RuntimeConfig =
        serde_json::from_str(r#"{ "recursion_limit": 8, "flush": "manual" }"#).unwrap();
    let rt = Runtime::with_config(config);
    assert_eq!(rt.config().recursion_limit, 8);
    assert_eq!(rt.config().flush, FlushMode::Manual);
}
