//! Callback registration and lifecycle.

use std::os::fd::RawFd;
use std::rc::Rc;
use std::time::{Duration, Instant};

use tracing::trace;

use crate::callback::{Action, CallbackEntry, CallbackId, CallbackKind, Payload};
use crate::driver::Driver;
use crate::error::{Error, Result};

impl Driver {
    fn register(&self, kind: CallbackKind, action: Action) -> CallbackId {
        let inner = &self.inner;
        let raw = inner.next_callback_id.get();
        inner.next_callback_id.set(raw + 1);
        let id = CallbackId::from_raw(raw);

        let entry = Rc::new(CallbackEntry::new(id, kind, action));
        entry.arm(Instant::now());
        inner.callbacks.borrow_mut().insert(id, entry);
        self.queue_activation(id, kind);

        trace!("Registered {} ({})", id, kind.label());
        id
    }

    fn queue_activation(&self, id: CallbackId, kind: CallbackKind) {
        match kind {
            CallbackKind::Defer => self.inner.defer_queue.borrow_mut().push(id),
            _ => self.inner.enable_queue.borrow_mut().push(id),
        }
    }

    pub(crate) fn entry(&self, id: CallbackId) -> Option<Rc<CallbackEntry>> {
        self.inner.callbacks.borrow().get(&id).cloned()
    }

    // ========================================================================
    // Registration
    // ========================================================================

    /// Run `action` once on the next tick.
    pub fn defer<F>(&self, action: F) -> CallbackId
    where
        F: FnOnce(&Driver, CallbackId) -> Result<()> + 'static,
    {
        let mut action = Some(action);
        self.register(
            CallbackKind::Defer,
            Box::new(move |driver, id, _| match action.take() {
                Some(action) => action(driver, id),
                None => Ok(()),
            }),
        )
    }

    /// Run `action` once after `interval`.
    pub fn delay<F>(&self, interval: Duration, action: F) -> CallbackId
    where
        F: FnOnce(&Driver, CallbackId) -> Result<()> + 'static,
    {
        let mut action = Some(action);
        self.register(
            CallbackKind::Timer {
                interval,
                repeat: false,
            },
            Box::new(move |driver, id, _| match action.take() {
                Some(action) => action(driver, id),
                None => Ok(()),
            }),
        )
    }

    /// Run `action` every `interval` until the callback is disabled or cancelled.
    pub fn repeat<F>(&self, interval: Duration, mut action: F) -> CallbackId
    where
        F: FnMut(&Driver, CallbackId) -> Result<()> + 'static,
    {
        self.register(
            CallbackKind::Timer {
                interval,
                repeat: true,
            },
            Box::new(move |driver, id, _| action(driver, id)),
        )
    }

    /// Run `action` whenever `fd` is readable.
    pub fn on_readable<F>(&self, fd: RawFd, action: F) -> CallbackId
    where
        F: FnMut(&Driver, CallbackId, RawFd) -> Result<()> + 'static,
    {
        self.register(CallbackKind::Readable(fd), stream_action(action))
    }

    /// Run `action` whenever `fd` is writable.
    pub fn on_writable<F>(&self, fd: RawFd, action: F) -> CallbackId
    where
        F: FnMut(&Driver, CallbackId, RawFd) -> Result<()> + 'static,
    {
        self.register(CallbackKind::Writable(fd), stream_action(action))
    }

    /// Run `action` whenever the process receives `signo`.
    pub fn on_signal<F>(&self, signo: i32, mut action: F) -> CallbackId
    where
        F: FnMut(&Driver, CallbackId, i32) -> Result<()> + 'static,
    {
        self.register(
            CallbackKind::Signal(signo),
            Box::new(move |driver, id, payload| match payload {
                Payload::Signal(signo) => action(driver, id, signo),
                _ => Ok(()),
            }),
        )
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Enable a callback. Re-enabling a timer restarts its interval from now.
    pub fn enable(&self, id: CallbackId) -> Result<CallbackId> {
        let entry = self.entry(id).ok_or(Error::InvalidCallback(id))?;
        if entry.enabled.get() {
            return Ok(id);
        }
        entry.enabled.set(true);
        entry.arm(Instant::now());
        self.queue_activation(id, entry.kind);
        trace!("Enabled {}", id);
        Ok(id)
    }

    /// Disable a callback. Unknown or disabled callbacks are left alone.
    pub fn disable(&self, id: CallbackId) -> CallbackId {
        let Some(entry) = self.entry(id) else {
            return id;
        };
        if !entry.enabled.replace(false) {
            return id;
        }
        entry.invokable.set(false);

        let inner = &self.inner;
        match entry.kind {
            CallbackKind::Defer => {
                inner.defer_queue.borrow_mut().retain(|queued| *queued != id);
            }
            kind => {
                let pending = {
                    let mut queue = inner.enable_queue.borrow_mut();
                    let position = queue.iter().position(|queued| *queued == id);
                    position.map(|index| queue.remove(index)).is_some()
                };
                if !pending {
                    inner.backend.borrow_mut().deactivate(id, kind);
                }
            }
        }
        trace!("Disabled {}", id);
        id
    }

    /// Disable and forget a callback. Cancelling twice is a no-op.
    pub fn cancel(&self, id: CallbackId) {
        self.disable(id);
        let removed = self.inner.callbacks.borrow_mut().remove(&id);
        if removed.is_some() {
            trace!("Cancelled {}", id);
        }
    }

    /// Let the callback keep the loop alive.
    pub fn reference(&self, id: CallbackId) -> Result<CallbackId> {
        let entry = self.entry(id).ok_or(Error::InvalidCallback(id))?;
        entry.referenced.set(true);
        Ok(id)
    }

    /// Stop the callback from keeping the loop alive. Unknown ids are ignored.
    pub fn unreference(&self, id: CallbackId) -> CallbackId {
        if let Some(entry) = self.entry(id) {
            entry.referenced.set(false);
        }
        id
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    /// Ids of every registered callback, in registration order.
    pub fn identifiers(&self) -> Vec<CallbackId> {
        self.inner.callbacks.borrow().keys().copied().collect()
    }

    /// Whether the callback is enabled.
    pub fn is_enabled(&self, id: CallbackId) -> Result<bool> {
        self.entry(id)
            .map(|entry| entry.enabled.get())
            .ok_or(Error::InvalidCallback(id))
    }

    /// Whether the callback keeps the loop alive.
    pub fn is_referenced(&self, id: CallbackId) -> Result<bool> {
        self.entry(id)
            .map(|entry| entry.referenced.get())
            .ok_or(Error::InvalidCallback(id))
    }

    /// What the callback waits for.
    pub fn kind(&self, id: CallbackId) -> Result<CallbackKind> {
        self.entry(id)
            .map(|entry| entry.kind)
            .ok_or(Error::InvalidCallback(id))
    }
}

fn stream_action<F>(mut action: F) -> Action
where
    F: FnMut(&Driver, CallbackId, RawFd) -> Result<()> + 'static,
{
    Box::new(move |driver, id, payload| match payload {
        Payload::Stream(fd) => action(driver, id, fd),
        _ => Ok(()),
    })
}
