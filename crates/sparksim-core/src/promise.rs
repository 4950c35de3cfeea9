//! Single-assignment completion cell resolved under tick control.
//!
//! Modeled as the tagged variant the spec's design notes describe:
//! `{Pending(continuations) | Fulfilled(v) | Rejected(e)}`. There is no
//! green-thread runtime behind this — `then` either appends a continuation
//! (if still pending) or runs it immediately against the already-settled
//! value. `resolve`/`reject` drain and run every registered continuation in
//! registration order before returning, which is what makes resolution
//! happen "within a tick": whichever tick's code calls `resolve`/`reject`
//! is the tick the continuations run in.
//!
//! Promises are single-threaded (`Rc<RefCell<..>>`, not `Arc<Mutex<..>>`) —
//! the simulator forbids OS threads entirely, so there is nothing to
//! synchronize against.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_PROMISE_ID: AtomicU64 = AtomicU64::new(1);

type Continuation<T, E> = Box<dyn FnOnce(Result<T, E>)>;

enum State<T, E> {
    Pending(Vec<Continuation<T, E>>),
    Fulfilled(T),
    Rejected(E),
}

struct Inner<T, E> {
    id: u64,
    state: State<T, E>,
}

/// A single-assignment result cell.
///
/// Cloning a `Promise` shares the same underlying cell (it is a handle, not
/// a value) — this is what lets a scheduler hand out a promise to a caller
/// while also holding the handle it resolves later.
pub struct Promise<T, E> {
    inner: Rc<RefCell<Inner<T, E>>>,
}

impl<T, E> Clone for Promise<T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: Clone + 'static, E: Clone + 'static> Promise<T, E> {
    /// Create a new unresolved promise.
    #[must_use]
    pub fn pending() -> Self {
        Self {
            inner: Rc::new(RefCell::new(Inner {
                id: NEXT_PROMISE_ID.fetch_add(1, Ordering::Relaxed),
                state: State::Pending(Vec::new()),
            })),
        }
    }

    /// Create an already-fulfilled promise.
    #[must_use]
    pub fn fulfilled(value: T) -> Self {
        Self {
            inner: Rc::new(RefCell::new(Inner {
                id: NEXT_PROMISE_ID.fetch_add(1, Ordering::Relaxed),
                state: State::Fulfilled(value),
            })),
        }
    }

    /// Create an already-rejected promise.
    #[must_use]
    pub fn rejected(error: E) -> Self {
        Self {
            inner: Rc::new(RefCell::new(Inner {
                id: NEXT_PROMISE_ID.fetch_add(1, Ordering::Relaxed),
                state: State::Rejected(error),
            })),
        }
    }

    /// Stable identity for logging/cancellation bookkeeping.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.borrow().id
    }

    /// Resolve with a success value. A no-op if already settled.
    pub fn resolve(&self, value: T) {
        self.settle(Ok(value));
    }

    /// Resolve with a failure value. A no-op if already settled.
    pub fn reject(&self, error: E) {
        self.settle(Err(error));
    }

    fn settle(&self, result: Result<T, E>) {
        let continuations = {
            let mut inner = self.inner.borrow_mut();
            match &inner.state {
                State::Pending(_) => {
                    let State::Pending(cbs) = std::mem::replace(
                        &mut inner.state,
                        match &result {
                            Ok(v) => State::Fulfilled(v.clone()),
                            Err(e) => State::Rejected(e.clone()),
                        },
                    ) else {
                        unreachable!()
                    };
                    cbs
                }
                // Already settled: resolution is idempotent, second call is
                // a no-op.
                State::Fulfilled(_) | State::Rejected(_) => return,
            }
        };
        for cb in continuations {
            cb(result.clone());
        }
    }

    /// Register a continuation that runs once this promise settles.
    ///
    /// If already settled, the continuation runs immediately (still
    /// synchronously, in the calling tick). If still pending, it is
    /// appended and will run — in registration order, alongside any other
    /// continuations — the moment `resolve`/`reject` is called.
    pub fn then(&self, continuation: impl FnOnce(Result<T, E>) + 'static) {
        let ready = {
            let mut inner = self.inner.borrow_mut();
            match &mut inner.state {
                State::Pending(cbs) => {
                    cbs.push(Box::new(continuation));
                    None
                }
                State::Fulfilled(v) => Some(Ok(v.clone())),
                State::Rejected(e) => Some(Err(e.clone())),
            }
        };
        if let Some(result) = ready {
            continuation(result);
        }
    }

    /// Whether this promise has settled (fulfilled or rejected).
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        !matches!(self.inner.borrow().state, State::Pending(_))
    }

    /// Non-blocking read of the settled value, if any. Never blocks on
    /// wall-clock time — callers drive ticks via
    /// [`crate::runner::SimulationRunner::run_until`] until this returns
    /// `Some`.
    #[must_use]
    pub fn peek(&self) -> Option<Result<T, E>> {
        match &self.inner.borrow().state {
            State::Pending(_) => None,
            State::Fulfilled(v) => Some(Ok(v.clone())),
            State::Rejected(e) => Some(Err(e.clone())),
        }
    }

    /// Cancel an unresolved promise, rejecting it with `on_cancel()`.
    /// A no-op if already settled.
    pub fn cancel(&self, on_cancel: impl FnOnce() -> E) {
        let should_reject = matches!(self.inner.borrow().state, State::Pending(_));
        if should_reject {
            self.reject(on_cancel());
        }
    }

    /// Resolve when every input promise resolves; the first rejection (in
    /// input order) rejects the aggregate.
    #[must_use]
    pub fn all(promises: Vec<Promise<T, E>>) -> Promise<Vec<T>, E> {
        let aggregate = Promise::<Vec<T>, E>::pending();
        if promises.is_empty() {
            aggregate.resolve(Vec::new());
            return aggregate;
        }

        let total = promises.len();
        let values: Rc<RefCell<Vec<Option<T>>>> = Rc::new(RefCell::new(vec![None; total]));
        let remaining = Rc::new(RefCell::new(total));
        let settled = Rc::new(RefCell::new(false));

        for (index, promise) in promises.into_iter().enumerate() {
            let values = Rc::clone(&values);
            let remaining = Rc::clone(&remaining);
            let settled = Rc::clone(&settled);
            let aggregate = aggregate.clone();
            promise.then(move |result| {
                if *settled.borrow() {
                    return;
                }
                match result {
                    Ok(value) => {
                        values.borrow_mut()[index] = Some(value);
                        *remaining.borrow_mut() -= 1;
                        if *remaining.borrow() == 0 {
                            *settled.borrow_mut() = true;
                            let collected = values
                                .borrow_mut()
                                .iter_mut()
                                .map(|slot| slot.take().expect("all slots filled"))
                                .collect();
                            aggregate.resolve(collected);
                        }
                    }
                    Err(error) => {
                        *settled.borrow_mut() = true;
                        aggregate.reject(error);
                    }
                }
            });
        }

        aggregate
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::Promise;

    #[test]
    fn resolves_exactly_once() {
        let p = Promise::<i32, String>::pending();
        let calls = Rc::new(RefCell::new(0));
        {
            let calls = Rc::clone(&calls);
            p.then(move |_| *calls.borrow_mut() += 1);
        }
        p.resolve(1);
        p.resolve(2);
        p.reject("nope".into());
        assert_eq!(*calls.borrow(), 1);
        assert_eq!(p.peek(), Some(Ok(1)));
    }

    #[test]
    fn then_on_already_settled_runs_immediately() {
        let p = Promise::<i32, String>::fulfilled(7);
        let mut seen = None;
        p.then(|r| seen = Some(r));
        assert_eq!(seen, Some(Ok(7)));
    }

    #[test]
    fn continuations_run_in_registration_order() {
        let p = Promise::<i32, String>::pending();
        let order = Rc::new(RefCell::new(Vec::new()));
        for i in 0..3 {
            let order = Rc::clone(&order);
            p.then(move |_| order.borrow_mut().push(i));
        }
        p.resolve(1);
        assert_eq!(*order.borrow(), vec![0, 1, 2]);
    }

    #[test]
    fn all_resolves_when_every_input_resolves() {
        let a = Promise::<i32, String>::pending();
        let b = Promise::<i32, String>::pending();
        let agg = Promise::all(vec![a.clone(), b.clone()]);
        assert!(!agg.is_resolved());
        a.resolve(1);
        assert!(!agg.is_resolved());
        b.resolve(2);
        assert_eq!(agg.peek(), Some(Ok(vec![1, 2])));
    }

    #[test]
    fn all_rejects_on_first_failure() {
        let a = Promise::<i32, String>::pending();
        let b = Promise::<i32, String>::pending();
        let agg = Promise::all(vec![a.clone(), b.clone()]);
        a.reject("boom".into());
        b.resolve(2);
        assert_eq!(agg.peek(), Some(Err("boom".to_string())));
    }

    #[test]
    fn cancel_rejects_unresolved_promise() {
        let p = Promise::<i32, String>::pending();
        p.cancel(|| "cancelled".to_string());
        assert_eq!(p.peek(), Some(Err("cancelled".to_string())));
    }

    #[test]
    fn cancel_after_resolution_is_noop() {
        let p = Promise::<i32, String>::pending();
        p.resolve(5);
        p.cancel(|| "cancelled".to_string());
        assert_eq!(p.peek(), Some(Ok(5)));
    }
}
