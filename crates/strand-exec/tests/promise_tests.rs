//! Promise combinator behaviour, driven through the harness.

use parking_lot::Mutex;
use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;
use strand_exec::{Blocking, ExecHarness, Promise};

#[derive(Debug, thiserror::Error)]
#[error("bang")]
struct Bang;

#[test]
fn test_value_promise_yields_value() {
    let result = ExecHarness::yield_single(|_exec| Promise::value(42));
    assert_eq!(result.into_value(), Some(42));
}

#[test]
fn test_error_promise_yields_failure() {
    let result = ExecHarness::yield_single(|_exec| Promise::<i32>::error(Bang));
    assert_eq!(result.failure().unwrap().to_string(), "bang");
}

#[test]
fn test_promise_is_cold_until_subscribed() {
    let ran = Arc::new(AtomicBool::new(false));

    let observed = ran.clone();
    let unsubscribed = Promise::sync(move || {
        observed.store(true, Ordering::SeqCst);
        Ok::<_, Infallible>("computed")
    });
    drop(unsubscribed);
    assert!(!ran.load(Ordering::SeqCst));

    let observed = ran.clone();
    let result = ExecHarness::yield_single(move |_exec| {
        Promise::sync(move || {
            observed.store(true, Ordering::SeqCst);
            Ok::<_, Infallible>("computed")
        })
    });
    assert_eq!(result.into_value(), Some("computed"));
    assert!(ran.load(Ordering::SeqCst));
}

#[test]
fn test_map_transforms_success() {
    let result =
        ExecHarness::yield_single(|_exec| Promise::value("foo").map(|s| s.to_uppercase()));
    assert_eq!(result.into_value().unwrap(), "FOO");
}

#[test]
fn test_map_skipped_on_failure() {
    let mapped = Arc::new(AtomicBool::new(false));
    let observed = mapped.clone();
    let result = ExecHarness::yield_single(move |_exec| {
        Promise::<i32>::error(Bang).map(move |v| {
            observed.store(true, Ordering::SeqCst);
            v + 1
        })
    });
    assert!(result.is_error());
    assert!(!mapped.load(Ordering::SeqCst));
}

#[test]
fn test_try_map_error_becomes_failure() {
    let result = ExecHarness::yield_single(|_exec| {
        Promise::value(1).try_map(|_| Err::<i32, _>(Bang))
    });
    assert_eq!(result.failure().unwrap().to_string(), "bang");
}

#[test]
fn test_flat_map_chains() {
    let result = ExecHarness::yield_single(|_exec| {
        Promise::value(2).flat_map(|n| Promise::value(n * 10))
    });
    assert_eq!(result.into_value(), Some(20));
}

#[test]
fn test_flat_map_short_circuits_on_failure() {
    let invoked = Arc::new(AtomicBool::new(false));
    let observed = invoked.clone();
    let result = ExecHarness::yield_single(move |_exec| {
        Promise::<i32>::error(Bang).flat_map(move |n| {
            observed.store(true, Ordering::SeqCst);
            Promise::value(n)
        })
    });
    assert!(result.is_error());
    assert!(!invoked.load(Ordering::SeqCst));
}

#[test]
fn test_map_error_recovers() {
    let result = ExecHarness::yield_single(|_exec| {
        Promise::<String>::error(Bang).map_error(|_| "recovered".to_string())
    });
    assert_eq!(result.into_value().unwrap(), "recovered");
}

#[test]
fn test_try_map_error_can_substitute_failure() {
    #[derive(Debug, thiserror::Error)]
    #[error("worse")]
    struct Worse;

    let result = ExecHarness::yield_single(|_exec| {
        Promise::<i32>::error(Bang).try_map_error(|_| Err::<i32, _>(Worse))
    });
    assert_eq!(result.failure().unwrap().to_string(), "worse");
}

#[test]
fn test_on_error_consumes_failure_and_completes() {
    let seen = Arc::new(Mutex::new(None::<String>));
    let observed = seen.clone();
    let result = ExecHarness::yield_single(move |_exec| {
        Promise::<i32>::error(Bang)
            .on_error(move |fail| *observed.lock() = Some(fail.to_string()))
    });
    assert!(result.is_complete());
    assert_eq!(seen.lock().as_deref(), Some("bang"));
}

#[test]
fn test_on_error_when_nearest_match_wins() {
    let handled_by = Arc::new(Mutex::new(Vec::new()));
    let first = handled_by.clone();
    let second = handled_by.clone();
    let result = ExecHarness::yield_single(move |_exec| {
        Promise::<i32>::error(Bang)
            .on_error_when(|_| false, move |_| first.lock().push("first"))
            .on_error(move |_| second.lock().push("second"))
    });
    assert!(result.is_complete());
    assert_eq!(*handled_by.lock(), vec!["second"]);
}

#[test]
fn test_route_diverts_matching_value() {
    let collected = Arc::new(Mutex::new(Vec::new()));
    let collector = collected.clone();
    let result = ExecHarness::yield_single(move |_exec| {
        Promise::value(10).route(|n| *n > 5, move |n| collector.lock().push(n))
    });
    // The value was routed away: terminal signal is complete, not success.
    assert!(result.is_complete());
    assert_eq!(*collected.lock(), vec![10]);
}

#[test]
fn test_route_passes_non_matching_value() {
    let collected = Arc::new(Mutex::new(Vec::new()));
    let collector = collected.clone();
    let result = ExecHarness::yield_single(move |_exec| {
        Promise::value(3).route(|n| *n > 5, move |n| collector.lock().push(n))
    });
    assert_eq!(result.into_value(), Some(3));
    assert!(collected.lock().is_empty());
}

#[test]
fn test_wiretap_observes_without_altering() {
    let seen = Arc::new(Mutex::new(None::<i32>));
    let observed = seen.clone();
    let result = ExecHarness::yield_single(move |_exec| {
        Promise::value(5).wiretap(move |result| {
            *observed.lock() = result.value().copied();
        })
    });
    assert_eq!(result.into_value(), Some(5));
    assert_eq!(*seen.lock(), Some(5));
}

#[test]
fn test_on_yield_runs_before_upstream() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let from_yield = events.clone();
    let from_promise = events.clone();
    let result = ExecHarness::yield_single(move |_exec| {
        Promise::sync(move || {
            from_promise.lock().push("promise");
            Ok::<_, Infallible>("foo")
        })
        .on_yield(move || from_yield.lock().push("on_yield"))
    });
    assert!(result.is_success());
    assert_eq!(*events.lock(), vec!["on_yield", "promise"]);
}

#[test]
fn test_defer_holds_subscription_until_release() {
    let computed = Arc::new(AtomicBool::new(false));
    let computed_at_release = Arc::new(AtomicBool::new(true));
    let computed_in_promise = computed.clone();
    let computed_probe = computed.clone();
    let probe_result = computed_at_release.clone();

    let result = ExecHarness::yield_single(move |_exec| {
        Promise::sync(move || {
            computed_in_promise.store(true, Ordering::SeqCst);
            Ok::<_, Infallible>(1)
        })
        .defer(move |release| {
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(50));
                probe_result.store(computed_probe.load(Ordering::SeqCst), Ordering::SeqCst);
                release.release();
            });
        })
    });
    assert_eq!(result.into_value(), Some(1));
    // The upstream had not run when the releaser fired.
    assert!(!computed_at_release.load(Ordering::SeqCst));
}

#[test]
fn test_from_fn_bridges_external_callbacks() {
    let result = ExecHarness::yield_single(|_exec| {
        Promise::from_fn(|fulfiller| {
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(10));
                fulfiller.success("external");
            });
        })
    });
    assert_eq!(result.into_value(), Some("external"));
}

#[test]
fn test_abandoned_fulfiller_fails_the_promise() {
    let result = ExecHarness::yield_single(|_exec| {
        Promise::<i32>::from_fn(|fulfiller| {
            // Send it away and drop it unfired.
            thread::spawn(move || drop(fulfiller));
        })
    });
    assert!(result
        .failure()
        .unwrap()
        .to_string()
        .contains("abandoned"));
}

#[test]
fn test_exactly_one_terminal_signal() {
    let signals = Arc::new(AtomicUsize::new(0));
    let counter = signals.clone();
    let result = ExecHarness::yield_single(move |_exec| {
        Promise::value(1)
            .map(|n| n + 1)
            .wiretap(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
    });
    assert!(result.is_success());
    assert_eq!(signals.load(Ordering::SeqCst), 1);
}

#[test]
fn test_cache_replays_single_computation() {
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = runs.clone();
    let harness = ExecHarness::new();
    let (tx, rx) = mpsc::channel();

    let first = harness.yield_promise(move |execution| {
        let cached = Promise::sync(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, Infallible>(7)
        })
        .cache();
        for _ in 0..4 {
            let tx = tx.clone();
            let cached = cached.clone();
            execution.controller().fork().start(move |_exec| {
                cached.result(move |result| {
                    tx.send(result.into_value()).unwrap();
                });
                Ok(())
            });
        }
        cached.promise()
    });

    assert_eq!(first.into_value(), Some(7));
    for _ in 0..4 {
        assert_eq!(rx.recv_timeout(Duration::from_secs(10)).unwrap(), Some(7));
    }
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[test]
fn test_cache_idempotent_under_racing_subscribers() {
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = runs.clone();
    let harness = ExecHarness::with_controller(
        strand_exec::ExecController::builder()
            .num_threads(4)
            .blocking_threads(4)
            .build(),
    );
    let (tx, rx) = mpsc::channel();
    let subscribers = 16;

    let result = harness.yield_promise(move |execution| {
        let cached = Blocking::get(move || {
            // Slow computation so subscribers race with it.
            thread::sleep(Duration::from_millis(50));
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, Infallible>(99)
        })
        .cache();
        for _ in 0..subscribers {
            let tx = tx.clone();
            let cached = cached.clone();
            execution.controller().fork().start(move |_exec| {
                cached.result(move |result| {
                    tx.send(result.into_value()).unwrap();
                });
                Ok(())
            });
        }
        cached.promise()
    });

    assert_eq!(result.into_value(), Some(99));
    for _ in 0..subscribers {
        assert_eq!(rx.recv_timeout(Duration::from_secs(10)).unwrap(), Some(99));
    }
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[test]
fn test_fork_runs_on_other_execution_and_delivers_back() {
    let result = ExecHarness::yield_single(|execution| {
        let origin_id = execution.id();
        Promise::sync(move || {
            let here = strand_exec::Execution::try_current().unwrap().id();
            Ok::<_, Infallible>(here != origin_id)
        })
        .fork()
    });
    assert_eq!(result.into_value(), Some(true));
}

#[test]
fn test_blocking_then_map_scenario() {
    let result = ExecHarness::yield_single(|_exec| {
        Blocking::get(|| Ok::<_, Infallible>("foo".to_string())).map(|s| s.to_uppercase())
    });
    assert_eq!(result.into_value().unwrap(), "FOO");
}
