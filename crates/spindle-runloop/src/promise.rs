//! Settle-once promises.
//!
//! A promise moves from pending to fulfilled or rejected exactly once; the
//! first write wins and later writes are ignored. Reactions for the outcome
//! run in registration order, and reactions registered after settlement run
//! immediately. A failing reaction is logged and never affects what other
//! consumers observe.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use serde::Serialize;
use tracing::warn;

use crate::error::{Error, Result};

type FulfillReaction<T> = Box<dyn FnOnce(T) -> Result<()>>;
type RejectReaction = Box<dyn FnOnce(Error) -> Result<()>>;

/// Settlement status of a promise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PromiseStatus {
    Pending,
    Fulfilled,
    Rejected,
}

enum State<T> {
    Pending {
        on_fulfill: Vec<FulfillReaction<T>>,
        on_reject: Vec<RejectReaction>,
        /// Set once the promise adopts another one; direct writes are then ignored.
        locked: bool,
    },
    Fulfilled(T),
    Rejected(Error),
}

/// A settle-once value shared by every clone.
pub struct Promise<T> {
    state: Rc<RefCell<State<T>>>,
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Self {
            state: Rc::clone(&self.state),
        }
    }
}

impl<T> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = match &*self.state.borrow() {
            State::Pending { .. } => PromiseStatus::Pending,
            State::Fulfilled(_) => PromiseStatus::Fulfilled,
            State::Rejected(_) => PromiseStatus::Rejected,
        };
        f.debug_struct("Promise").field("status", &status).finish()
    }
}

impl<T: Clone + 'static> Promise<T> {
    /// A pending promise.
    pub fn pending() -> Self {
        Self {
            state: Rc::new(RefCell::new(State::Pending {
                on_fulfill: Vec::new(),
                on_reject: Vec::new(),
                locked: false,
            })),
        }
    }

    /// Create a promise and hand its [`Resolver`] to `body`.
    ///
    /// An error returned by `body` rejects the promise unless it already settled.
    pub fn new<F>(body: F) -> Self
    where
        F: FnOnce(Resolver<T>) -> Result<()>,
    {
        let promise = Self::pending();
        if let Err(error) = body(promise.resolver()) {
            promise.reject(error);
        }
        promise
    }

    /// An already fulfilled promise.
    pub fn resolved(value: T) -> Self {
        Self {
            state: Rc::new(RefCell::new(State::Fulfilled(value))),
        }
    }

    /// An already rejected promise.
    pub fn rejected(error: Error) -> Self {
        Self {
            state: Rc::new(RefCell::new(State::Rejected(error))),
        }
    }

    /// Resolve/reject capability for this promise.
    pub fn resolver(&self) -> Resolver<T> {
        Resolver {
            promise: self.clone(),
        }
    }

    /// Fulfill with `value`. No-op if already settled or adopting.
    pub fn resolve(&self, value: T) {
        if self.is_writable() {
            self.settle(Ok(value));
        }
    }

    /// Reject with `error`. No-op if already settled or adopting.
    pub fn reject(&self, error: Error) {
        if self.is_writable() {
            self.settle(Err(error));
        }
    }

    /// Reject with a reason that is not an error; it arrives as [`Error::Rejected`].
    pub fn reject_value<R>(&self, reason: R)
    where
        R: fmt::Debug + Send + Sync + 'static,
    {
        self.reject(Error::rejected(reason));
    }

    /// Adopt the eventual outcome of `other`.
    ///
    /// Adoption chains of any depth flatten. Resolving a promise with itself
    /// is a logic error.
    pub fn resolve_with(&self, other: &Promise<T>) -> Result<()> {
        if Rc::ptr_eq(&self.state, &other.state) {
            return Err(Error::logic("a promise cannot be resolved with itself"));
        }
        {
            let mut state = self.state.borrow_mut();
            match &mut *state {
                State::Pending { locked, .. } if !*locked => *locked = true,
                _ => return Ok(()),
            }
        }
        let on_value = self.clone();
        let on_error = self.clone();
        other.then(move |value| {
            on_value.settle(Ok(value));
            Ok(())
        });
        other.except(move |error| {
            on_error.settle(Err(error));
            Ok(())
        });
        Ok(())
    }

    /// Current status.
    pub fn status(&self) -> PromiseStatus {
        match &*self.state.borrow() {
            State::Pending { .. } => PromiseStatus::Pending,
            State::Fulfilled(_) => PromiseStatus::Fulfilled,
            State::Rejected(_) => PromiseStatus::Rejected,
        }
    }

    /// Whether the promise is still pending.
    pub fn is_pending(&self) -> bool {
        self.status() == PromiseStatus::Pending
    }

    /// The outcome, once settled.
    pub fn result(&self) -> Option<Result<T>> {
        match &*self.state.borrow() {
            State::Pending { .. } => None,
            State::Fulfilled(value) => Some(Ok(value.clone())),
            State::Rejected(error) => Some(Err(error.clone())),
        }
    }

    /// React to fulfillment.
    pub fn then<F>(&self, reaction: F) -> &Self
    where
        F: FnOnce(T) -> Result<()> + 'static,
    {
        let value = match &mut *self.state.borrow_mut() {
            State::Pending { on_fulfill, .. } => {
                on_fulfill.push(Box::new(reaction));
                return self;
            }
            State::Fulfilled(value) => value.clone(),
            State::Rejected(_) => return self,
        };
        report(reaction(value));
        self
    }

    /// React to rejection.
    pub fn except<F>(&self, reaction: F) -> &Self
    where
        F: FnOnce(Error) -> Result<()> + 'static,
    {
        let error = match &mut *self.state.borrow_mut() {
            State::Pending { on_reject, .. } => {
                on_reject.push(Box::new(reaction));
                return self;
            }
            State::Rejected(error) => error.clone(),
            State::Fulfilled(_) => return self,
        };
        report(reaction(error));
        self
    }

    /// React to either outcome.
    pub fn finally<F>(&self, reaction: F) -> &Self
    where
        F: FnOnce() -> Result<()> + 'static,
    {
        let on_value = Rc::new(RefCell::new(Some(reaction)));
        let on_error = Rc::clone(&on_value);
        self.then(move |_| run_once(&on_value));
        self.except(move |_| run_once(&on_error));
        self
    }

    fn is_writable(&self) -> bool {
        matches!(
            &*self.state.borrow(),
            State::Pending { locked: false, .. }
        )
    }

    /// Settle, ignoring the adoption lock. No-op once settled.
    fn settle(&self, outcome: Result<T>) {
        let (on_fulfill, on_reject) = {
            let mut state = self.state.borrow_mut();
            if !matches!(&*state, State::Pending { .. }) {
                return;
            }
            let settled = match &outcome {
                Ok(value) => State::Fulfilled(value.clone()),
                Err(error) => State::Rejected(error.clone()),
            };
            match std::mem::replace(&mut *state, settled) {
                State::Pending {
                    on_fulfill,
                    on_reject,
                    ..
                } => (on_fulfill, on_reject),
                _ => return,
            }
        };

        match outcome {
            Ok(value) => {
                drop(on_reject);
                for reaction in on_fulfill {
                    report(reaction(value.clone()));
                }
            }
            Err(error) => {
                drop(on_fulfill);
                for reaction in on_reject {
                    report(reaction(error.clone()));
                }
            }
        }
    }
}

fn run_once<F>(slot: &RefCell<Option<F>>) -> Result<()>
where
    F: FnOnce() -> Result<()>,
{
    let reaction = slot.borrow_mut().take();
    match reaction {
        Some(reaction) => reaction(),
        None => Ok(()),
    }
}

fn report(result: Result<()>) {
    if let Err(e) = result {
        warn!("Promise reaction failed: {}", e);
    }
}

/// Capability to settle one promise.
pub struct Resolver<T> {
    promise: Promise<T>,
}

impl<T> Clone for Resolver<T> {
    fn clone(&self) -> Self {
        Self {
            promise: self.promise.clone(),
        }
    }
}

impl<T: Clone + 'static> Resolver<T> {
    /// Fulfill the promise.
    pub fn resolve(&self, value: T) {
        self.promise.resolve(value);
    }

    /// Adopt another promise's outcome.
    pub fn resolve_with(&self, other: &Promise<T>) -> Result<()> {
        self.promise.resolve_with(other)
    }

    /// Reject the promise.
    pub fn reject(&self, error: Error) {
        self.promise.reject(error);
    }

    /// Reject with a non-error reason.
    pub fn reject_value<R>(&self, reason: R)
    where
        R: fmt::Debug + Send + Sync + 'static,
    {
        self.promise.reject_value(reason);
    }
}

#[cfg(test)]
#[path = "promise_tests.rs"]
mod tests;
