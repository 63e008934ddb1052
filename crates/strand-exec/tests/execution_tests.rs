//! Execution scheduling: ordering, interceptors, registry, blocking,
//! completion.

use parking_lot::Mutex;
use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;
use strand_exec::{
    failure, Blocking, Continuation, ExecController, ExecHarness, ExecInterceptor, ExecType,
    Execution, Promise,
};

#[derive(Debug, thiserror::Error)]
#[error("segment failed")]
struct SegmentFailed;

#[test]
fn test_segments_of_one_execution_never_overlap() {
    let controller = ExecController::builder()
        .num_threads(4)
        .blocking_threads(2)
        .build();

    let in_segment = Arc::new(AtomicBool::new(false));
    let overlaps = Arc::new(AtomicUsize::new(0));
    let processed = Arc::new(AtomicUsize::new(0));
    let (done_tx, done_rx) = mpsc::channel();

    // Acquire the hold from inside the initial segment so the execution
    // cannot complete before scheduling starts.
    let (hold_tx, hold_rx) = mpsc::channel();
    let execution = controller.fork().start(move |exec| {
        hold_tx.send(exec.hold()).unwrap();
        Ok(())
    });
    let hold = hold_rx.recv_timeout(Duration::from_secs(10)).unwrap();
    execution.on_complete(move |_exec| done_tx.send(()).unwrap());

    let threads = 4;
    let per_thread = 250;
    let mut handles = Vec::new();
    for _ in 0..threads {
        let execution = execution.clone();
        let in_segment = in_segment.clone();
        let overlaps = overlaps.clone();
        let processed = processed.clone();
        handles.push(thread::spawn(move || {
            for _ in 0..per_thread {
                let in_segment = in_segment.clone();
                let overlaps = overlaps.clone();
                let processed = processed.clone();
                execution.schedule(move |_exec| {
                    if in_segment.swap(true, Ordering::SeqCst) {
                        overlaps.fetch_add(1, Ordering::SeqCst);
                    }
                    std::hint::spin_loop();
                    in_segment.store(false, Ordering::SeqCst);
                    processed.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                });
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }
    drop(hold);

    done_rx.recv_timeout(Duration::from_secs(30)).unwrap();
    assert_eq!(processed.load(Ordering::SeqCst), threads * per_thread);
    assert_eq!(overlaps.load(Ordering::SeqCst), 0);
    assert!(execution.is_complete());
    controller.shutdown();
}

struct RecordingInterceptor {
    label: &'static str,
    events: Arc<Mutex<Vec<String>>>,
}

impl ExecInterceptor for RecordingInterceptor {
    fn intercept(&self, _execution: &Execution, exec_type: ExecType, continuation: Continuation) {
        self.events.lock().push(format!("{}:{exec_type:?}:in", self.label));
        continuation();
        self.events.lock().push(format!("{}:{exec_type:?}:out", self.label));
    }
}

#[test]
fn test_interceptors_nest_in_registration_order() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let controller = ExecController::builder()
        .num_threads(1)
        .blocking_threads(1)
        .interceptor(Arc::new(RecordingInterceptor {
            label: "outer",
            events: events.clone(),
        }))
        .interceptor(Arc::new(RecordingInterceptor {
            label: "inner",
            events: events.clone(),
        }))
        .build();

    let (tx, rx) = mpsc::channel();
    let segment_events = events.clone();
    controller.fork().start(move |_exec| {
        segment_events.lock().push("segment".to_string());
        tx.send(()).unwrap();
        Ok(())
    });
    rx.recv_timeout(Duration::from_secs(10)).unwrap();

    assert_eq!(
        *events.lock(),
        vec![
            "outer:Compute:in",
            "inner:Compute:in",
            "segment",
            "inner:Compute:out",
            "outer:Compute:out",
        ]
    );
    controller.shutdown();
}

#[test]
fn test_blocking_segments_are_classified_blocking() {
    let types = Arc::new(Mutex::new(Vec::new()));
    let recorded = types.clone();
    let controller = ExecController::builder()
        .num_threads(1)
        .blocking_threads(1)
        .interceptor(Arc::new(
            move |_exec: &Execution, exec_type: ExecType, continuation: Continuation| {
                recorded.lock().push(exec_type);
                continuation();
            },
        ))
        .build();

    let harness = ExecHarness::with_controller(controller);
    let result =
        harness.yield_promise(|_exec| Blocking::get(|| Ok::<_, Infallible>("done")));
    assert!(result.is_success());
    assert!(types.lock().contains(&ExecType::Blocking));
    assert!(types.lock().contains(&ExecType::Compute));
}

#[test]
fn test_adhoc_interceptor_wraps_remaining_segments() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let harness = ExecHarness::new();
    let recorded = events.clone();
    let segment_events = events.clone();
    harness
        .run(move |execution| {
            execution.add_interceptor(
                Arc::new(
                    move |_exec: &Execution, _exec_type: ExecType, continuation: Continuation| {
                        recorded.lock().push("wrap");
                        continuation();
                    },
                ),
                move |_exec| {
                    segment_events.lock().push("body");
                    Ok(())
                },
            );
            Ok(())
        })
        .unwrap();
    assert_eq!(*events.lock(), vec!["wrap", "body"]);
}

#[test]
fn test_registry_spans_segments_and_blocking() {
    #[derive(Debug, PartialEq)]
    struct RequestId(u64);

    let result = ExecHarness::new()
        .yield_promise(|execution| {
            execution.register(RequestId(77));
            Blocking::get(|| {
                // The registry is reachable from the blocking thread too.
                let execution = Execution::try_current().unwrap();
                let id = execution.get::<RequestId>().unwrap();
                Ok::<_, Infallible>(id.0)
            })
        })
        .into_value();
    assert_eq!(result, Some(77));
}

#[test]
fn test_unhandled_segment_failure_reaches_error_handler() {
    let seen = Arc::new(Mutex::new(None::<String>));
    let controller = ExecController::builder()
        .num_threads(1)
        .blocking_threads(1)
        .build();
    let (tx, rx) = mpsc::channel();
    let record = seen.clone();
    controller
        .fork()
        .on_error(move |_execution, fail| {
            *record.lock() = Some(fail.to_string());
            tx.send(()).unwrap();
            Ok(())
        })
        .start(|_exec| Err(failure(SegmentFailed)));
    rx.recv_timeout(Duration::from_secs(10)).unwrap();
    assert_eq!(seen.lock().as_deref(), Some("segment failed"));
    controller.shutdown();
}

#[test]
fn test_then_routes_failure_to_execution_error_handler() {
    let (tx, rx) = mpsc::channel();
    let controller = ExecController::builder()
        .num_threads(1)
        .blocking_threads(1)
        .build();
    controller
        .fork()
        .on_error(move |_execution, fail| {
            tx.send(fail.to_string()).unwrap();
            Ok(())
        })
        .start(|_exec| {
            Promise::<i32>::error(SegmentFailed).then(|_| unreachable!("promise failed"));
            Ok(())
        });
    assert_eq!(
        rx.recv_timeout(Duration::from_secs(10)).unwrap(),
        "segment failed"
    );
    controller.shutdown();
}

#[test]
fn test_failing_error_handler_still_terminates_execution() {
    let (tx, rx) = mpsc::channel();
    let controller = ExecController::builder()
        .num_threads(1)
        .blocking_threads(1)
        .build();
    controller
        .fork()
        .on_error(|_execution, fail| Err(fail))
        .on_complete(move |_execution| tx.send(()).unwrap())
        .start(|_exec| Err(failure(SegmentFailed)));
    // The handler re-raising must be swallowed; the execution completes.
    rx.recv_timeout(Duration::from_secs(10)).unwrap();
    controller.shutdown();
}

#[test]
fn test_on_complete_fires_once_after_drain() {
    let completions = Arc::new(AtomicUsize::new(0));
    let counter = completions.clone();
    ExecHarness::new()
        .run(move |execution| {
            let counter = counter.clone();
            execution.on_complete(move |_exec| {
                counter.fetch_add(1, Ordering::SeqCst);
            });
            // A couple of extra segments before completion.
            execution.schedule(|_exec| Ok(()));
            execution.schedule(|_exec| Ok(()));
            Ok(())
        })
        .unwrap();
    assert_eq!(completions.load(Ordering::SeqCst), 1);
}

#[test]
fn test_blocking_on_awaits_promise_from_blocking_thread() {
    let result = ExecHarness::yield_single(|_exec| {
        Blocking::get(|| {
            let inner = Blocking::on(Promise::value(21)).expect("bound execution");
            Ok::<_, Infallible>(inner.into_value().unwrap() * 2)
        })
    });
    assert_eq!(result.into_value(), Some(42));
}

#[test]
fn test_subscribing_outside_execution_fails_with_unmanaged_thread() {
    let (tx, rx) = mpsc::channel();
    Promise::value(5).result(move |result| {
        tx.send(result.failure().unwrap().to_string()).unwrap();
    });
    let message = rx.recv_timeout(Duration::from_secs(10)).unwrap();
    assert!(message.contains("not managed"));
}

#[test]
fn test_executions_on_different_loops_run_concurrently() {
    let controller = ExecController::builder()
        .num_threads(2)
        .blocking_threads(1)
        .build();
    let (tx, rx) = mpsc::channel();

    // Two executions that each wait for the other's side effect would
    // deadlock if executions could not run concurrently.
    let gate = Arc::new(AtomicBool::new(false));
    let opener = gate.clone();
    let tx_a = tx.clone();
    controller.fork().event_loop(0).start(move |_exec| {
        opener.store(true, Ordering::SeqCst);
        tx_a.send("a").unwrap();
        Ok(())
    });
    let tx_b = tx;
    controller.fork().event_loop(1).start(move |_exec| {
        while !gate.load(Ordering::SeqCst) {
            thread::yield_now();
        }
        tx_b.send("b").unwrap();
        Ok(())
    });

    let mut seen: Vec<&str> = vec![
        rx.recv_timeout(Duration::from_secs(10)).unwrap(),
        rx.recv_timeout(Duration::from_secs(10)).unwrap(),
    ];
    seen.sort_unstable();
    assert_eq!(seen, vec!["a", "b"]);
    controller.shutdown();
}
