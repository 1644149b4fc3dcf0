//! Counting rendezvous for coroutines.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use tracing::{trace, warn};

use crate::driver::Driver;
use crate::error::{Error, Result};
use crate::suspension::{CallbackGuard, Suspension};

struct WaitGroupInner {
    count: Cell<usize>,
    /// Parked contexts in arrival order.
    waiters: RefCell<BTreeMap<u64, Suspension<()>>>,
    next_waiter: Cell<u64>,
}

/// Waits until a counter drops to zero.
///
/// `add` raises the counter, `done` lowers it, and every context parked in
/// `wait` is released once it reaches zero.
#[derive(Clone)]
pub struct WaitGroup {
    inner: Rc<WaitGroupInner>,
}

/// Removes a waiter that left `wait` without being released.
struct Registration<'a> {
    group: &'a WaitGroup,
    key: u64,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        self.group.inner.waiters.borrow_mut().remove(&self.key);
    }
}

impl WaitGroup {
    /// Create a group with an initial count.
    pub fn new(count: usize) -> Self {
        Self {
            inner: Rc::new(WaitGroupInner {
                count: Cell::new(count),
                waiters: RefCell::new(BTreeMap::new()),
                next_waiter: Cell::new(0),
            }),
        }
    }

    /// Current count.
    pub fn count(&self) -> usize {
        self.inner.count.get()
    }

    /// Whether the count is zero.
    pub fn is_done(&self) -> bool {
        self.inner.count.get() == 0
    }

    /// Number of parked contexts.
    pub fn waiter_count(&self) -> usize {
        self.inner.waiters.borrow().len()
    }

    /// Raise the count by `delta`. Zero is a no-op.
    pub fn add(&self, delta: usize) {
        if delta == 0 {
            return;
        }
        let count = self.inner.count.get().saturating_add(delta);
        self.inner.count.set(count);
    }

    /// Lower the count by one, releasing every waiter at zero.
    pub fn done(&self) -> Result<()> {
        let count = self.inner.count.get();
        if count == 0 {
            return Err(Error::logic("WaitGroup::done called with a count of zero"));
        }
        self.inner.count.set(count - 1);
        if count > 1 {
            return Ok(());
        }

        let waiters = std::mem::take(&mut *self.inner.waiters.borrow_mut());
        trace!("WaitGroup done; releasing {} waiters", waiters.len());
        for suspension in waiters.into_values() {
            if let Err(e) = suspension.resume(()) {
                warn!("Failed to release WaitGroup waiter: {}", e);
            }
        }
        Ok(())
    }

    /// Park the current context until the count reaches zero.
    ///
    /// With a timeout, fails with [`Error::Timeout`] if the group is not done
    /// in time.
    pub async fn wait(&self, driver: &Driver, timeout: Option<Duration>) -> Result<()> {
        if self.is_done() {
            return Ok(());
        }

        let suspension = driver.get_suspension::<()>()?;
        let key = self.inner.next_waiter.get();
        self.inner.next_waiter.set(key + 1);
        self.inner
            .waiters
            .borrow_mut()
            .insert(key, suspension.clone());
        let _registration = Registration { group: self, key };

        let _timer = timeout.map(|after| {
            let group = self.clone();
            let waiter = suspension.clone();
            let id = driver.delay(after, move |_, _| {
                let removed = group.inner.waiters.borrow_mut().remove(&key);
                match removed {
                    Some(_) => waiter.throw(Error::Timeout(after)),
                    None => Ok(()),
                }
            });
            CallbackGuard::new(driver, id)
        });

        suspension.suspend().await
    }
}

impl fmt::Debug for WaitGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WaitGroup")
            .field("count", &self.count())
            .field("waiters", &self.waiter_count())
            .finish()
    }
}

#[cfg(test)]
#[path = "wait_group_tests.rs"]
mod tests;
