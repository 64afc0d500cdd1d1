//! One-shot, externally completed values.
//!
//! A [`Future`] starts out `Pending` and transitions exactly once to
//! `Resolved`, carrying a [`Result`]. The transition is driven from the
//! outside through [`Future::complete`], typically by the event loop once a
//! timer expires or a socket read finishes. Interested parties observe the
//! value by registering continuations with [`Future::request`], which fire in
//! registration order when the future resolves.
//!
//! Combinators ([`Future::map`], [`Future::and_then`], [`Future::then`])
//! build derived futures without exposing any future-in-future nesting to
//! callers.

use std::any::Any;
use std::fmt;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use crate::{Error, Result};

/// Continuation invoked with the success value.
type OkFn<T> = Box<dyn FnOnce(T) + Send>;

/// Continuation invoked with the failure value.
type ErrFn = Box<dyn FnOnce(Error) + Send>;

/// Message used when a derived future is completed by its own machinery.
/// Exactly one branch of a `request` pair ever fires, so a second completion
/// here is a bug in this module, not in caller code.
const RESOLVED_TWICE: &str = "derived future must resolve exactly once";

/// The two states a [`Future`] moves through.
///
/// Modeled as an explicit enum rather than a nullable result field: while
/// pending, the ordered continuation list exists; once resolved, only the
/// immutable result does.
enum State<T> {
    /// Not yet completed. Holds `(on_ok, on_err)` pairs in registration
    /// order, consumed when the future resolves.
    Pending(Vec<(OkFn<T>, ErrFn)>),
    /// Completed. The stored result is cloned out to late registrants.
    Resolved(Result<T>),
}

/// A one-shot container for a value that is not yet known.
///
/// Cloning a `Future` clones the handle, not the value: all clones observe
/// the same resolution. The value type must be [`Clone`] because every
/// registered continuation receives its own copy of the result.
///
/// The shared state lives behind an `Arc<Mutex<_>>` so the owning thread can
/// hold the future while the event loop thread completes it. Neither
/// [`request`](Future::request) nor [`complete`](Future::complete) ever
/// blocks beyond that brief state swap; continuations run outside the lock.
pub struct Future<T> {
    state: Arc<Mutex<State<T>>>,
    /// Registration id assigned by the runtime for cancellation. `None` for
    /// futures produced by combinators or constructed directly.
    key: Option<u64>,
}

/// Result of a [`then`](Future::then) continuation.
///
/// An explicit tagged variant so the dispatch is a static match: either the
/// continuation already knows the value, or it hands back a future to chain.
#[derive(Debug)]
pub enum Outcome<T> {
    /// A plain value; completes the result future directly with `Ok`.
    Immediate(T),
    /// A future to connect; the result future resolves when it does, with
    /// its result forwarded verbatim.
    Chained(Future<T>),
}

impl<T> Future<T> {
    /// Creates an unresolved future, to be completed externally.
    pub fn pending() -> Self {
        Future {
            state: Arc::new(Mutex::new(State::Pending(Vec::new()))),
            key: None,
        }
    }

    /// Lifts a plain value into a future already resolved with `Ok(value)`.
    pub fn unit(value: T) -> Self {
        Future {
            state: Arc::new(Mutex::new(State::Resolved(Ok(value)))),
            key: None,
        }
    }

    /// Returns `true` once the future has been completed.
    pub fn is_resolved(&self) -> bool {
        let state = self.state.lock().expect("future state lock poisoned");
        matches!(*state, State::Resolved(_))
    }

    /// Creates an unresolved future carrying a runtime registration id.
    pub(crate) fn with_key(key: u64) -> Self {
        Future {
            state: Arc::new(Mutex::new(State::Pending(Vec::new()))),
            key: Some(key),
        }
    }

    /// The runtime registration id, if this future was produced by a
    /// `spawn_*` entry point.
    pub(crate) fn key(&self) -> Option<u64> {
        self.key
    }
}

impl<T: Clone + Send + 'static> Future<T> {
    /// Registers interest in the eventual result.
    ///
    /// If the future is still pending, the pair is appended to the
    /// continuation list; continuations fire exactly once, in registration
    /// order, when the future resolves. If the future has already resolved,
    /// the matching branch is invoked immediately and synchronously on the
    /// caller's thread with a clone of the stored result.
    pub fn request<S, F>(&self, on_ok: S, on_err: F)
    where
        S: FnOnce(T) + Send + 'static,
        F: FnOnce(Error) + Send + 'static,
    {
        let result = {
            let mut state = self.state.lock().expect("future state lock poisoned");
            match &mut *state {
                State::Pending(waiters) => {
                    waiters.push((Box::new(on_ok), Box::new(on_err)));
                    return;
                }
                State::Resolved(result) => result.clone(),
            }
        };

        // Fire outside the lock so the continuation may itself inspect or
        // derive from this future.
        match result {
            Ok(value) => on_ok(value),
            Err(err) => on_err(err),
        }
    }

    /// Transitions `Pending` to `Resolved`, firing every registered
    /// continuation in registration order with a clone of `result`.
    ///
    /// Resolution is one-way and single-writer: completing an already
    /// resolved future returns [`Error::AlreadyResolved`] and leaves the
    /// stored result untouched.
    pub fn complete(&self, result: Result<T>) -> Result<()> {
        let waiters = {
            let mut state = self.state.lock().expect("future state lock poisoned");
            match &mut *state {
                State::Resolved(_) => return Err(Error::AlreadyResolved),
                State::Pending(waiters) => {
                    let waiters = mem::take(waiters);
                    *state = State::Resolved(result.clone());
                    waiters
                }
            }
        };

        for (on_ok, on_err) in waiters {
            match result.clone() {
                Ok(value) => on_ok(value),
                Err(err) => on_err(err),
            }
        }

        Ok(())
    }

    /// Returns a future resolving to `Ok(f(x))` when `self` resolves to
    /// `Ok(x)`. An `Err` is forwarded unchanged without invoking `f`. A panic
    /// inside `f` is caught and surfaces as [`Error::Transform`].
    pub fn map<U, F>(&self, f: F) -> Future<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        let out = Future::pending();
        let ok_out = out.clone();
        let err_out = out.clone();

        self.request(
            move |value| {
                let result = match panic::catch_unwind(AssertUnwindSafe(move || f(value))) {
                    Ok(mapped) => Ok(mapped),
                    Err(payload) => Err(Error::Transform(panic_message(payload))),
                };
                ok_out.complete(result).expect(RESOLVED_TWICE);
            },
            move |err| err_out.complete(Err(err)).expect(RESOLVED_TWICE),
        );

        out
    }

    /// Monadic join: `f` returns a future, and the returned outer future
    /// resolves exactly when that inner future does, with its result
    /// forwarded verbatim. No nesting is observable by callers.
    ///
    /// An `Err` is forwarded unchanged without invoking `f`; a panic inside
    /// `f` surfaces as [`Error::Transform`].
    pub fn and_then<U, F>(&self, f: F) -> Future<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Future<U> + Send + 'static,
    {
        let out = Future::pending();
        let ok_out = out.clone();
        let err_out = out.clone();

        self.request(
            move |value| match panic::catch_unwind(AssertUnwindSafe(move || f(value))) {
                Ok(inner) => forward(inner, ok_out),
                Err(payload) => ok_out
                    .complete(Err(Error::Transform(panic_message(payload))))
                    .expect(RESOLVED_TWICE),
            },
            move |err| err_out.complete(Err(err)).expect(RESOLVED_TWICE),
        );

        out
    }

    /// Generalizes [`map`](Future::map) and [`and_then`](Future::and_then):
    /// each branch returns an [`Outcome`], so a continuation can decide at
    /// runtime whether it already has a value or a future to chain, without
    /// any runtime type inspection on this side.
    ///
    /// A panic inside either branch surfaces as [`Error::Transform`].
    pub fn then<U, S, F>(&self, on_ok: S, on_err: F) -> Future<U>
    where
        U: Clone + Send + 'static,
        S: FnOnce(T) -> Outcome<U> + Send + 'static,
        F: FnOnce(Error) -> Outcome<U> + Send + 'static,
    {
        let out = Future::pending();
        let ok_out = out.clone();
        let err_out = out.clone();

        self.request(
            move |value| {
                let outcome = panic::catch_unwind(AssertUnwindSafe(move || on_ok(value)));
                settle(ok_out, outcome);
            },
            move |err| {
                let outcome = panic::catch_unwind(AssertUnwindSafe(move || on_err(err)));
                settle(err_out, outcome);
            },
        );

        out
    }
}

/// Completes `out` according to a continuation's [`Outcome`], converting a
/// caught panic into [`Error::Transform`].
fn settle<U: Clone + Send + 'static>(out: Future<U>, outcome: std::thread::Result<Outcome<U>>) {
    match outcome {
        Ok(Outcome::Immediate(value)) => out.complete(Ok(value)).expect(RESOLVED_TWICE),
        Ok(Outcome::Chained(inner)) => forward(inner, out),
        Err(payload) => out
            .complete(Err(Error::Transform(panic_message(payload))))
            .expect(RESOLVED_TWICE),
    }
}

/// Connects `inner` to `out`: when `inner` resolves, `out` is completed with
/// the same result.
fn forward<U: Clone + Send + 'static>(inner: Future<U>, out: Future<U>) {
    let ok_out = out.clone();
    inner.request(
        move |value| ok_out.complete(Ok(value)).expect(RESOLVED_TWICE),
        move |err| out.complete(Err(err)).expect(RESOLVED_TWICE),
    );
}

/// Best-effort extraction of a panic payload's message.
fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "continuation panicked".to_string()
    }
}

impl<T> Clone for Future<T> {
    fn clone(&self) -> Self {
        Future {
            state: Arc::clone(&self.state),
            key: self.key,
        }
    }
}

impl<T> fmt::Debug for Future<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock().expect("future state lock poisoned");
        let tag = match &*state {
            State::Pending(waiters) => format!("Pending({} waiters)", waiters.len()),
            State::Resolved(Ok(_)) => "Resolved(Ok)".to_string(),
            State::Resolved(Err(err)) => format!("Resolved(Err({err}))"),
        };
        f.debug_struct("Future").field("state", &tag).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;

    #[test]
    fn test_unit_fires_immediately() {
        let (tx, rx) = mpsc::channel();
        Future::unit(7).request(move |v| tx.send(v).unwrap(), |_| panic!("err branch"));
        assert_eq!(rx.try_recv(), Ok(7));
    }

    #[test]
    fn test_complete_delivers_to_registered() {
        let fut = Future::pending();
        let (tx, rx) = mpsc::channel();
        fut.request(move |v: i32| tx.send(v).unwrap(), |_| panic!("err branch"));

        assert!(!fut.is_resolved());
        fut.complete(Ok(42)).unwrap();
        assert!(fut.is_resolved());
        assert_eq!(rx.try_recv(), Ok(42));
    }

    #[test]
    fn test_second_complete_rejected() {
        let fut = Future::unit(1);
        match fut.complete(Ok(2)) {
            Err(Error::AlreadyResolved) => {}
            other => panic!("expected AlreadyResolved, got {other:?}"),
        }

        // The stored result is untouched.
        let (tx, rx) = mpsc::channel();
        fut.request(move |v| tx.send(v).unwrap(), |_| panic!("err branch"));
        assert_eq!(rx.try_recv(), Ok(1));
    }

    #[test]
    fn test_late_request_fires_exactly_once() {
        let fut = Future::pending();
        fut.complete(Ok("done")).unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = Arc::clone(&calls);
        fut.request(
            move |v| {
                assert_eq!(v, "done");
                calls2.fetch_add(1, Ordering::SeqCst);
            },
            |_| panic!("err branch"),
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_continuations_fire_in_registration_order() {
        let fut = Future::pending();
        let order = Arc::new(Mutex::new(Vec::new()));

        for tag in 1..=3 {
            let order = Arc::clone(&order);
            fut.request(move |_: u8| order.lock().unwrap().push(tag), |_| {});
        }

        fut.complete(Ok(0)).unwrap();
        assert_eq!(*order.lock().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_map_applies_transform() {
        let (tx, rx) = mpsc::channel();
        Future::unit(10)
            .map(|v| v * 2)
            .request(move |v| tx.send(v).unwrap(), |_| panic!("err branch"));
        assert_eq!(rx.try_recv(), Ok(20));
    }

    #[test]
    fn test_map_panic_becomes_transform_err() {
        let (tx, rx) = mpsc::channel();
        Future::unit(10)
            .map(|_: i32| -> i32 { panic!("boom") })
            .request(|_| panic!("ok branch"), move |e| tx.send(e).unwrap());

        match rx.try_recv() {
            Ok(Error::Transform(msg)) => assert_eq!(msg, "boom"),
            other => panic!("expected Transform, got {other:?}"),
        }
    }

    #[test]
    fn test_map_skips_transform_on_err() {
        let fut: Future<i32> = Future::pending();
        let (tx, rx) = mpsc::channel();

        fut.map(|_| panic!("must not run"))
            .request(|_: i32| panic!("ok branch"), move |e| tx.send(e).unwrap());

        fut.complete(Err(Error::Transform("upstream".into()))).unwrap();
        match rx.try_recv() {
            Ok(Error::Transform(msg)) => assert_eq!(msg, "upstream"),
            other => panic!("expected forwarded Err, got {other:?}"),
        }
    }

    #[test]
    fn test_and_then_joins_inner_future() {
        let inner: Future<&str> = Future::pending();
        let inner2 = inner.clone();
        let invocations = Arc::new(AtomicUsize::new(0));
        let invocations2 = Arc::clone(&invocations);

        let (tx, rx) = mpsc::channel();
        let outer = Future::unit(5).and_then(move |v| {
            assert_eq!(v, 5);
            invocations2.fetch_add(1, Ordering::SeqCst);
            inner2
        });
        outer.request(move |v| tx.send(v).unwrap(), |_| panic!("err branch"));

        // Outer resolves exactly when the inner future does.
        assert!(rx.try_recv().is_err());
        inner.complete(Ok("joined")).unwrap();
        assert_eq!(rx.try_recv(), Ok("joined"));
        assert_eq!(invocations.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_and_then_forwards_inner_err() {
        let (tx, rx) = mpsc::channel();
        Future::unit(1)
            .and_then(|_| {
                let inner: Future<i32> = Future::pending();
                inner.complete(Err(Error::Transform("inner".into()))).unwrap();
                inner
            })
            .request(|_| panic!("ok branch"), move |e| tx.send(e).unwrap());

        match rx.try_recv() {
            Ok(Error::Transform(msg)) => assert_eq!(msg, "inner"),
            other => panic!("expected inner Err, got {other:?}"),
        }
    }

    #[test]
    fn test_and_then_skips_transform_on_err() {
        let fut: Future<i32> = Future::pending();
        let (tx, rx) = mpsc::channel();

        fut.and_then(|_| -> Future<i32> { panic!("must not run") })
            .request(|_| panic!("ok branch"), move |e| tx.send(e).unwrap());

        fut.complete(Err(Error::AlreadyResolved)).unwrap();
        match rx.try_recv() {
            Ok(Error::AlreadyResolved) => {}
            other => panic!("expected forwarded Err, got {other:?}"),
        }
    }

    #[test]
    fn test_then_immediate_outcome() {
        let (tx, rx) = mpsc::channel();
        Future::unit(3)
            .then(
                |v| Outcome::Immediate(v + 1),
                |_| Outcome::Immediate(0),
            )
            .request(move |v| tx.send(v).unwrap(), |_| panic!("err branch"));
        assert_eq!(rx.try_recv(), Ok(4));
    }

    #[test]
    fn test_then_chained_outcome() {
        let inner: Future<i32> = Future::pending();
        let inner2 = inner.clone();
        let (tx, rx) = mpsc::channel();

        Future::unit(3)
            .then(move |_| Outcome::Chained(inner2), |_| Outcome::Immediate(0))
            .request(move |v| tx.send(v).unwrap(), |_| panic!("err branch"));

        assert!(rx.try_recv().is_err());
        inner.complete(Ok(99)).unwrap();
        assert_eq!(rx.try_recv(), Ok(99));
    }

    #[test]
    fn test_then_err_branch_recovers() {
        let fut: Future<i32> = Future::pending();
        let (tx, rx) = mpsc::channel();

        fut.then(
            |v| Outcome::Immediate(v),
            |_| Outcome::Immediate(-1),
        )
        .request(move |v| tx.send(v).unwrap(), |_| panic!("err branch"));

        fut.complete(Err(Error::AlreadyResolved)).unwrap();
        assert_eq!(rx.try_recv(), Ok(-1));
    }

    #[test]
    fn test_then_panic_becomes_transform_err() {
        let (tx, rx) = mpsc::channel();
        Future::unit(1)
            .then(
                |_: i32| -> Outcome<i32> { panic!("then boom") },
                |_| Outcome::Immediate(0),
            )
            .request(|_| panic!("ok branch"), move |e| tx.send(e).unwrap());

        match rx.try_recv() {
            Ok(Error::Transform(msg)) => assert_eq!(msg, "then boom"),
            other => panic!("expected Transform, got {other:?}"),
        }
    }
}
