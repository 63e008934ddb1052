//! Multi-subscribe promises that compute once and replay.

use crate::drain::{DrainQueue, Step};
use crate::promise::{Downstream, Promise, Upstream};
use crate::result::ExecResult;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A multi-subscribe promise produced by [`Promise::cache`].
///
/// The first subscription triggers the underlying computation exactly once;
/// every subscriber, including subscribers racing with the computation,
/// receives the same [`ExecResult`], synchronously once resolved.
pub struct CachedPromise<T: Clone + Send + 'static> {
    upstream: Arc<CachingUpstream<T>>,
}

impl<T: Clone + Send + 'static> Clone for CachedPromise<T> {
    fn clone(&self) -> Self {
        CachedPromise {
            upstream: self.upstream.clone(),
        }
    }
}

impl<T: Clone + Send + 'static> CachedPromise<T> {
    pub(crate) fn new(source: Box<dyn Upstream<T>>) -> Self {
        CachedPromise {
            upstream: Arc::new(CachingUpstream {
                source: Mutex::new(Some(source)),
                cached: Mutex::new(None),
                started: AtomicBool::new(false),
                waiting: DrainQueue::new(),
            }),
        }
    }

    /// Mint a fresh single-shot promise reading the shared result.
    pub fn promise(&self) -> Promise<T> {
        let upstream = self.upstream.clone();
        Promise::of(move |down: Downstream<T>| CachingUpstream::subscribe(&upstream, down))
    }

    /// Shorthand for `self.promise().then(action)`.
    pub fn then(&self, action: impl FnOnce(T) + Send + 'static) {
        self.promise().then(action);
    }

    /// Shorthand for `self.promise().result(handler)`.
    pub fn result(&self, handler: impl FnOnce(ExecResult<T>) + Send + 'static) {
        self.promise().result(handler);
    }
}

struct CachingUpstream<T: Clone + Send + 'static> {
    source: Mutex<Option<Box<dyn Upstream<T>>>>,
    cached: Mutex<Option<ExecResult<T>>>,
    started: AtomicBool,
    waiting: DrainQueue<Downstream<T>>,
}

impl<T: Clone + Send + 'static> CachingUpstream<T> {
    fn subscribe(this: &Arc<Self>, down: Downstream<T>) {
        let cached = { this.cached.lock().clone() };
        if let Some(result) = cached {
            down.accept(result);
            return;
        }
        this.waiting.push(down);
        Self::try_drain(this);
    }

    fn try_drain(this: &Arc<Self>) {
        let state = this.clone();
        this.waiting.drain_with(move |down| {
            let cached = { state.cached.lock().clone() };
            if let Some(result) = cached {
                down.accept(result);
                return Step::Consumed;
            }
            if state
                .started
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                let source = state
                    .source
                    .lock()
                    .take()
                    .expect("caching upstream started twice");
                let resolved = state.clone();
                source.connect(Downstream::new(move |result| {
                    *resolved.cached.lock() = Some(result.clone());
                    down.accept(result);
                    // Wake subscribers that queued while the computation ran.
                    Self::try_drain(&resolved);
                }));
                Step::Consumed
            } else {
                // Computation in flight; wait for its completion callback.
                Step::Yield(down)
            }
        });
    }
}
