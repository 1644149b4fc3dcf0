//! Suspension bridge between coroutines and the driver.
//!
//! A [`Suspension`] belongs to the context that created it. The context
//! parks on [`Suspension::suspend`]; some other party later calls
//! [`Suspension::resume`] or [`Suspension::throw`] to deliver the outcome
//! and wake it.

use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

use tracing::{error, trace};

use crate::callback::CallbackId;
use crate::config::EscapePolicy;
use crate::driver::{ContextId, Driver, DriverInner};
use crate::error::{Error, Result};
use crate::promise::Promise;

/// Outcome of checking a suspension's owner before delivering to it.
///
/// `Escape` means the owning driver is gone; it never leaves this module.
enum Flow<T> {
    Continue(T),
    Escape,
}

enum Slot<T> {
    Idle,
    Suspended(Option<Waker>),
    Delivered(Result<T>),
}

struct SuspensionInner<T> {
    context: ContextId,
    generation: u64,
    escape_policy: EscapePolicy,
    driver: Weak<DriverInner>,
    state: RefCell<Slot<T>>,
}

/// Resume handle for one suspendable context.
pub struct Suspension<T> {
    inner: Rc<SuspensionInner<T>>,
}

impl<T> Clone for Suspension<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for Suspension<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Suspension")
            .field("context", &self.inner.context)
            .field("generation", &self.inner.generation)
            .field("suspended", &self.is_suspended())
            .finish()
    }
}

impl<T> Suspension<T> {
    fn new(driver: &Driver, context: ContextId) -> Self {
        Self {
            inner: Rc::new(SuspensionInner {
                context,
                generation: driver.inner.generation.get(),
                escape_policy: driver.config().escape_policy,
                driver: driver.downgrade(),
                state: RefCell::new(Slot::Idle),
            }),
        }
    }

    /// Whether the owning context is parked on this suspension.
    pub fn is_suspended(&self) -> bool {
        matches!(*self.inner.state.borrow(), Slot::Suspended(_))
    }

    /// Park the owning context until a value or error is delivered.
    pub fn suspend(&self) -> SuspendFuture<T> {
        SuspendFuture {
            suspension: self.clone(),
            started: false,
        }
    }

    /// Deliver a value to the parked context.
    pub fn resume(&self, value: T) -> Result<()> {
        self.deliver(Ok(value))
    }

    /// Deliver an error to the parked context.
    pub fn throw(&self, error: Error) -> Result<()> {
        self.deliver(Err(error))
    }

    fn deliver(&self, outcome: Result<T>) -> Result<()> {
        let driver = match self.owner()? {
            Flow::Continue(driver) => driver,
            Flow::Escape => return self.escape(),
        };

        let waker = {
            let mut state = self.inner.state.borrow_mut();
            match std::mem::replace(&mut *state, Slot::Idle) {
                Slot::Suspended(waker) => {
                    *state = Slot::Delivered(outcome);
                    waker
                }
                other => {
                    *state = other;
                    return Err(Error::logic(
                        "suspension must be suspended before it can be resumed",
                    ));
                }
            }
        };
        trace!(
            "Resuming {:?} (generation {})",
            self.inner.context,
            driver.generation.get()
        );
        if let Some(waker) = waker {
            waker.wake();
        }
        Ok(())
    }

    fn owner(&self) -> Result<Flow<Rc<DriverInner>>> {
        let Some(driver) = self.inner.driver.upgrade() else {
            return Ok(Flow::Escape);
        };
        if driver.generation.get() != self.inner.generation {
            return Err(Error::ForkedSuspension);
        }
        Ok(Flow::Continue(driver))
    }

    fn escape(&self) -> Result<()> {
        match self.inner.escape_policy {
            EscapePolicy::Exit => {
                error!(
                    "Suspension of {:?} resumed after its event loop exited; terminating",
                    self.inner.context
                );
                std::process::exit(1);
            }
            EscapePolicy::Error => Err(Error::LoopExited),
        }
    }
}

/// Future returned by [`Suspension::suspend`].
pub struct SuspendFuture<T> {
    suspension: Suspension<T>,
    started: bool,
}

impl<T> Future for SuspendFuture<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let inner = &this.suspension.inner;

        if !this.started {
            if let Some(driver) = inner.driver.upgrade() {
                if driver.current.get() != inner.context {
                    return Poll::Ready(Err(Error::logic(
                        "suspension can only be suspended by the context that created it",
                    )));
                }
            }
            let mut state = inner.state.borrow_mut();
            if !matches!(*state, Slot::Idle) {
                return Poll::Ready(Err(Error::logic("suspension is already suspended")));
            }
            *state = Slot::Suspended(Some(cx.waker().clone()));
            this.started = true;
            return Poll::Pending;
        }

        let mut state = inner.state.borrow_mut();
        match std::mem::replace(&mut *state, Slot::Idle) {
            Slot::Delivered(outcome) => {
                this.started = false;
                Poll::Ready(outcome)
            }
            Slot::Suspended(_) => {
                *state = Slot::Suspended(Some(cx.waker().clone()));
                Poll::Pending
            }
            Slot::Idle => Poll::Ready(Err(Error::logic("suspension was reset while suspended"))),
        }
    }
}

impl<T> Drop for SuspendFuture<T> {
    fn drop(&mut self) {
        if !self.started {
            return;
        }
        if let Ok(mut state) = self.suspension.inner.state.try_borrow_mut() {
            *state = Slot::Idle;
        }
    }
}

/// Cancels a callback when dropped.
pub(crate) struct CallbackGuard<'a> {
    driver: &'a Driver,
    id: CallbackId,
}

impl<'a> CallbackGuard<'a> {
    pub(crate) fn new(driver: &'a Driver, id: CallbackId) -> Self {
        Self { driver, id }
    }
}

impl Drop for CallbackGuard<'_> {
    fn drop(&mut self) {
        self.driver.cancel(self.id);
    }
}

impl Driver {
    /// Suspension for the current context.
    ///
    /// Fails with [`Error::NoSuspension`] inside a callback: the callback
    /// context drains the queues and must never block.
    pub fn get_suspension<T>(&self) -> Result<Suspension<T>> {
        match self.current_context() {
            ContextId::Callback => Err(Error::NoSuspension(
                "callbacks run in the callback context; spawn a task to suspend",
            )),
            context => Ok(Suspension::new(self, context)),
        }
    }

    /// Await a promise from the current context.
    ///
    /// Non-error rejection reasons arrive as [`Error::Rejected`].
    pub async fn await_promise<T: Clone + 'static>(&self, promise: &Promise<T>) -> Result<T> {
        if let Some(result) = promise.result() {
            return result;
        }
        let suspension = self.get_suspension::<T>()?;
        let on_fulfill = suspension.clone();
        let on_reject = suspension.clone();
        promise.then(move |value| on_fulfill.resume(value));
        promise.except(move |error| on_reject.throw(error));
        suspension.suspend().await
    }

    /// Suspend the current context for `duration`. Returns the time actually slept.
    pub async fn sleep(&self, duration: Duration) -> Result<Duration> {
        let suspension = self.get_suspension::<Duration>()?;
        let started = Instant::now();
        let resumer = suspension.clone();
        let timer = self.delay(duration, move |_, _| resumer.resume(started.elapsed()));
        let _guard = CallbackGuard::new(self, timer);
        suspension.suspend().await
    }
}

#[cfg(test)]
#[path = "suspension_tests.rs"]
mod tests;
