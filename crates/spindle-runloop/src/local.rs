//! Context-local storage.
//!
//! Values are stored per execution context. The callback context's values
//! are cleared after every callback, a task's values when it completes, and
//! everything after a fork.

use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::driver::{ContextId, Driver};

static NEXT_KEY: AtomicU64 = AtomicU64::new(0);

/// A value with a separate instance per execution context.
pub struct ContextLocal<T> {
    key: u64,
    init: Rc<dyn Fn() -> T>,
}

impl<T> Clone for ContextLocal<T> {
    fn clone(&self) -> Self {
        Self {
            key: self.key,
            init: Rc::clone(&self.init),
        }
    }
}

impl<T> fmt::Debug for ContextLocal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextLocal").field("key", &self.key).finish()
    }
}

impl<T: Clone + 'static> ContextLocal<T> {
    /// Create a local whose value starts as `init()` in every context.
    pub fn new<F>(init: F) -> Self
    where
        F: Fn() -> T + 'static,
    {
        Self {
            key: NEXT_KEY.fetch_add(1, Ordering::Relaxed),
            init: Rc::new(init),
        }
    }

    /// Value for the current context, initializing it on first access.
    pub fn get(&self, driver: &Driver) -> T {
        let context = driver.current_context();
        let existing = driver
            .inner
            .locals
            .borrow()
            .get(&context)
            .and_then(|values| values.get(&self.key))
            .and_then(|value| value.downcast_ref::<T>())
            .cloned();
        if let Some(value) = existing {
            return value;
        }
        let value = (self.init)();
        self.set(driver, value.clone());
        value
    }

    /// Replace the value for the current context.
    pub fn set(&self, driver: &Driver, value: T) {
        let context = driver.current_context();
        let previous = driver
            .inner
            .locals
            .borrow_mut()
            .entry(context)
            .or_default()
            .insert(self.key, Box::new(value));
        drop(previous);
    }

    /// Reset the current context's value to its initial state.
    pub fn unset(&self, driver: &Driver) {
        let context = driver.current_context();
        let removed = driver
            .inner
            .locals
            .borrow_mut()
            .get_mut(&context)
            .and_then(|values| values.remove(&self.key));
        drop(removed);
    }
}

impl Driver {
    pub(crate) fn clear_locals(&self, context: ContextId) {
        let removed = self.inner.locals.borrow_mut().remove(&context);
        drop(removed);
    }
}
