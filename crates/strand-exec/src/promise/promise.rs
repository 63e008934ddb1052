//! The promise type and its combinators.

use crate::exec::Execution;
use crate::promise::cache::CachedPromise;
use crate::promise::fulfiller::Fulfiller;
use crate::promise::operation::Operation;
use crate::promise::throttle::Throttle;
use crate::promise::{Downstream, Upstream};
use crate::result::{failure, ExecResult, Failure};
use std::error::Error as StdError;

/// A lazy, single-subscription handle to an asynchronously computed value.
///
/// Constructing a promise does nothing; work begins only when a terminal
/// consumption method ([`then`](Promise::then), [`result`](Promise::result))
/// is invoked, from inside an execution. Every combinator and terminal
/// method consumes the promise, so a promise cannot be subscribed twice;
/// the single-subscription rule is enforced by ownership. Promises returned
/// by [`cache`](Promise::cache) are the explicit multi-subscribe exception.
pub struct Promise<T: Send + 'static> {
    upstream: Box<dyn Upstream<T>>,
}

impl<T: Send + 'static> Promise<T> {
    /// Create a promise from an upstream (typically a closure taking the
    /// [`Downstream`]).
    pub fn of(upstream: impl Upstream<T> + 'static) -> Promise<T> {
        Promise {
            upstream: Box::new(upstream),
        }
    }

    /// A promise already holding `value`.
    pub fn value(value: T) -> Promise<T> {
        Promise::of(move |down: Downstream<T>| down.success(value))
    }

    /// A promise that fails with `err`.
    pub fn error<E: StdError + Send + Sync + 'static>(err: E) -> Promise<T> {
        Promise::from_failure(failure(err))
    }

    /// A promise that fails with an existing [`Failure`].
    pub fn from_failure(fail: Failure) -> Promise<T> {
        Promise::of(move |down: Downstream<T>| down.error(fail))
    }

    /// A promise that signals completion without a value.
    pub fn completed() -> Promise<T> {
        Promise::of(|down: Downstream<T>| down.complete())
    }

    /// A promise computing its value synchronously when subscribed.
    pub fn sync<E>(f: impl FnOnce() -> Result<T, E> + Send + 'static) -> Promise<T>
    where
        E: StdError + Send + Sync + 'static,
    {
        Promise::of(move |down: Downstream<T>| match f() {
            Ok(value) => down.success(value),
            Err(err) => down.error(failure(err)),
        })
    }

    /// Bridge an external asynchronous callback API into the promise model.
    ///
    /// `action` receives a [`Fulfiller`] that may be cloned, sent to other
    /// threads, and fired exactly once. A second fulfilment is logged and
    /// dropped; dropping every fulfiller without firing fails the promise.
    pub fn from_fn(action: impl FnOnce(Fulfiller<T>) + Send + 'static) -> Promise<T> {
        Promise::of(move |down: Downstream<T>| action(Fulfiller::new(down)))
    }

    pub(crate) fn from_upstream(upstream: Box<dyn Upstream<T>>) -> Promise<T> {
        Promise { upstream }
    }

    pub(crate) fn into_upstream(self) -> Box<dyn Upstream<T>> {
        self.upstream
    }

    /// Subscribe within the current execution, delivering the signal as a
    /// new segment. Outside an execution the downstream immediately
    /// receives an [`ExecError::UnmanagedThread`](crate::ExecError) failure.
    fn connect(self, downstream: Downstream<T>) {
        match Execution::try_current() {
            Ok(execution) => {
                if execution.is_complete() {
                    return downstream.error(failure(crate::ExecError::ExecutionComplete));
                }
                let bound = execution.bind_downstream(downstream);
                self.upstream.connect(bound);
            }
            Err(err) => downstream.error(failure(err)),
        }
    }

    /// Terminal subscription: run `action` with the value.
    ///
    /// A failure reaching this point unhandled is routed to the execution's
    /// error handler; completion without a value runs nothing.
    pub fn then(self, action: impl FnOnce(T) + Send + 'static) {
        let execution = Execution::current();
        self.connect(Downstream::new(move |result| match result {
            ExecResult::Success(value) => action(value),
            ExecResult::Error(fail) => match execution {
                Some(execution) => execution.route_error(fail),
                None => {
                    tracing::error!(error = %fail, "unhandled promise failure outside an execution")
                }
            },
            ExecResult::Complete => {}
        }));
    }

    /// Terminal subscription: consume the [`ExecResult`] whichever signal
    /// arrives.
    pub fn result(self, handler: impl FnOnce(ExecResult<T>) + Send + 'static) {
        self.connect(Downstream::new(handler));
    }

    /// Transform the value. The source's failure or completion passes
    /// through unchanged without invoking `f`.
    pub fn map<U: Send + 'static>(self, f: impl FnOnce(T) -> U + Send + 'static) -> Promise<U> {
        let upstream = self.upstream;
        Promise::of(move |down: Downstream<U>| {
            upstream.connect(down.on_success(move |value, down| down.success(f(value))));
        })
    }

    /// Transform the value fallibly; an `Err` becomes the promise's
    /// failure.
    pub fn try_map<U, E>(self, f: impl FnOnce(T) -> Result<U, E> + Send + 'static) -> Promise<U>
    where
        U: Send + 'static,
        E: StdError + Send + Sync + 'static,
    {
        let upstream = self.upstream;
        Promise::of(move |down: Downstream<U>| {
            upstream.connect(down.on_success(move |value, down| match f(value) {
                Ok(mapped) => down.success(mapped),
                Err(err) => down.error(failure(err)),
            }));
        })
    }

    /// Chain an asynchronous step: on success, `f` produces the next
    /// promise, whose outcome becomes this promise's outcome. Failure of
    /// the source short-circuits without invoking `f`.
    pub fn flat_map<U: Send + 'static>(
        self,
        f: impl FnOnce(T) -> Promise<U> + Send + 'static,
    ) -> Promise<U> {
        let upstream = self.upstream;
        Promise::of(move |down: Downstream<U>| {
            upstream.connect(down.on_success(move |value, down| f(value).connect(down)));
        })
    }

    /// Recover from failure with a value.
    pub fn map_error(self, f: impl FnOnce(Failure) -> T + Send + 'static) -> Promise<T> {
        let upstream = self.upstream;
        Promise::of(move |down: Downstream<T>| {
            upstream.connect(down.on_error(move |fail, down| down.success(f(fail))));
        })
    }

    /// Recover from failure fallibly; an `Err` substitutes a new failure.
    pub fn try_map_error<E>(
        self,
        f: impl FnOnce(Failure) -> Result<T, E> + Send + 'static,
    ) -> Promise<T>
    where
        E: StdError + Send + Sync + 'static,
    {
        let upstream = self.upstream;
        Promise::of(move |down: Downstream<T>| {
            upstream.connect(down.on_error(move |fail, down| match f(fail) {
                Ok(value) => down.success(value),
                Err(err) => down.error(failure(err)),
            }));
        })
    }

    /// Consume a failure with a side-effecting handler; the downstream then
    /// observes completion without a value. Success is unaffected.
    pub fn on_error(self, handler: impl FnOnce(Failure) + Send + 'static) -> Promise<T> {
        self.on_error_when(|_| true, handler)
    }

    /// As [`on_error`](Promise::on_error), but only for failures matching
    /// `predicate`; others pass through to handlers attached later in the
    /// chain (the nearest matching handler is consulted first).
    pub fn on_error_when(
        self,
        predicate: impl FnOnce(&Failure) -> bool + Send + 'static,
        handler: impl FnOnce(Failure) + Send + 'static,
    ) -> Promise<T> {
        let upstream = self.upstream;
        Promise::of(move |down: Downstream<T>| {
            upstream.connect(down.on_error(move |fail, down| {
                if predicate(&fail) {
                    handler(fail);
                    down.complete();
                } else {
                    down.error(fail);
                }
            }));
        })
    }

    /// Route values matching `predicate` away: `action` receives the value
    /// and the subscriber observes completion without a value. Values not
    /// matching pass through unchanged.
    pub fn route(
        self,
        predicate: impl FnOnce(&T) -> bool + Send + 'static,
        action: impl FnOnce(T) + Send + 'static,
    ) -> Promise<T> {
        let upstream = self.upstream;
        Promise::of(move |down: Downstream<T>| {
            upstream.connect(down.on_success(move |value, down| {
                if predicate(&value) {
                    action(value);
                    down.complete();
                } else {
                    down.success(value);
                }
            }));
        })
    }

    /// Observe the value without consuming it; the value then passes
    /// through.
    pub fn next(self, action: impl FnOnce(&T) + Send + 'static) -> Promise<T> {
        let upstream = self.upstream;
        Promise::of(move |down: Downstream<T>| {
            upstream.connect(down.on_success(move |value, down| {
                action(&value);
                down.success(value);
            }));
        })
    }

    /// Observe the result as a side effect without altering what is
    /// delivered downstream.
    pub fn wiretap(self, listener: impl FnOnce(&ExecResult<T>) + Send + 'static) -> Promise<T> {
        let upstream = self.upstream;
        Promise::of(move |down: Downstream<T>| {
            upstream.connect(Downstream::new(move |result| {
                listener(&result);
                down.accept(result);
            }));
        })
    }

    /// Run `f` when the promise is activated, before the upstream is
    /// connected.
    pub fn on_yield(self, f: impl FnOnce() + Send + 'static) -> Promise<T> {
        let upstream = self.upstream;
        Promise::of(move |down: Downstream<T>| {
            f();
            upstream.connect(down);
        })
    }

    /// Defer the subscription of this promise until the releaser's
    /// [`Release`] handle is invoked (from any thread).
    ///
    /// This defers the subscription, not the delivery of the value.
    pub fn defer(self, releaser: impl FnOnce(Release) + Send + 'static) -> Promise<T> {
        let upstream = self.upstream;
        Promise::of(move |down: Downstream<T>| {
            let execution = match Execution::try_current() {
                Ok(execution) => execution,
                Err(err) => return down.error(failure(err)),
            };
            releaser(Release {
                trigger: Box::new(move || {
                    execution.schedule(move |_exec| {
                        upstream.connect(down);
                        Ok(())
                    });
                }),
            });
        })
    }

    /// Gate this promise's activation through `throttle`.
    pub fn throttled(self, throttle: &Throttle) -> Promise<T> {
        throttle.throttle(self)
    }

    /// Convert into a multi-subscribe promise that computes its result
    /// exactly once and replays it to every subscriber.
    pub fn cache(self) -> CachedPromise<T>
    where
        T: Clone,
    {
        CachedPromise::new(self.upstream)
    }

    /// Subscribe this promise in a newly forked execution, delivering the
    /// outcome back to the subscribing execution.
    pub fn fork(self) -> Promise<T> {
        let upstream = self.upstream;
        Promise::of(move |down: Downstream<T>| {
            let execution = match Execution::try_current() {
                Ok(execution) => execution,
                Err(err) => return down.error(failure(err)),
            };
            execution.controller().fork().start(move |_exec| {
                Promise::from_upstream(upstream).result(move |result| down.accept(result));
                Ok(())
            });
        })
    }

    /// Discard the value, viewing this promise as fire-and-forget work.
    pub fn operation(self) -> Operation {
        Operation::from_promise(self.map(|_| ()))
    }
}

/// Single-use handle releasing a deferred promise subscription.
///
/// See [`Promise::defer`].
pub struct Release {
    trigger: Box<dyn FnOnce() + Send>,
}

impl Release {
    /// Allow the deferred subscription to proceed.
    pub fn release(self) {
        (self.trigger)();
    }
}
