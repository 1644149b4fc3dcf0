//! Callback execution context.
//!
//! Microtasks and ready callbacks are drained one at a time. A pending
//! interrupt stops the drain early; whatever is still queued stays queued
//! for the next drain.

use tracing::debug;

use crate::callback::{CallbackId, CallbackKind};
use crate::driver::{ContextId, Driver, Microtask};

impl Driver {
    pub(crate) fn invoke_callbacks(&self) {
        let inner = &self.inner;
        let previous = inner.current.replace(ContextId::Callback);

        loop {
            if !self.invoke_microtasks() {
                break;
            }
            let next = inner.callback_queue.borrow_mut().pop_front();
            let Some(id) = next else {
                break;
            };
            self.invoke_callback(id);
            self.clear_locals(ContextId::Callback);
            if self.has_interrupt() {
                break;
            }
        }

        inner.current.set(previous);
    }

    /// Run microtasks until the queue is empty. Returns `false` when interrupted.
    fn invoke_microtasks(&self) -> bool {
        let inner = &self.inner;
        loop {
            if self.has_interrupt() {
                return false;
            }
            self.collect_woken();
            if self.has_interrupt() {
                return false;
            }

            let next = inner.microtasks.borrow_mut().pop_front();
            let Some(microtask) = next else {
                return true;
            };
            inner.idle.set(false);
            inner.metrics.record_microtask();
            match microtask {
                Microtask::Thunk(thunk) => {
                    if let Err(e) = thunk(self) {
                        self.error("microtask", e);
                    }
                }
                Microtask::Resume(task) => self.poll_task(task),
            }
        }
    }

    fn invoke_callback(&self, id: CallbackId) {
        let Some(entry) = self.entry(id) else {
            return;
        };
        if !entry.invokable.get() {
            return;
        }

        if entry.kind.is_one_shot() {
            self.cancel(id);
        } else if let CallbackKind::Timer { repeat: true, .. } = entry.kind {
            // Re-arming clears `invokable`, so a second report in this tick is skipped.
            self.disable(id);
            if let Err(e) = self.enable(id) {
                self.error("repeat re-arm", e);
                return;
            }
        }

        self.inner.idle.set(false);
        self.inner.metrics.record_callback();

        let result = match entry.action.try_borrow_mut() {
            Ok(mut action) => action(self, id, entry.payload()),
            Err(_) => {
                debug!("{} is already executing; skipped", id);
                return;
            }
        };
        if let Err(e) = result {
            self.error(&format!("callback {id}"), e);
        }
    }
}
