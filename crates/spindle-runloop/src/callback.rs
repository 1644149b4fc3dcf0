//! Callback definitions.
//!
//! A callback is a registered unit of work with an enablement lifecycle.
//! The registry in [`crate::Driver`] owns every [`CallbackEntry`]; the
//! backend only ever sees ids and [`Activation`] records.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::os::fd::RawFd;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::driver::Driver;
use crate::error::Result;

/// Opaque callback handle.
///
/// Ids are assigned monotonically and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CallbackId(u64);

impl CallbackId {
    /// Build an id from its raw value.
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw value of the id.
    pub const fn as_raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for CallbackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cb#{}", self.0)
    }
}

/// What a callback waits for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallbackKind {
    /// Runs on the next tick without touching the backend.
    Defer,
    /// Fires after `interval`; repeats when `repeat` is set.
    Timer { interval: Duration, repeat: bool },
    /// Fires while the descriptor is readable.
    Readable(RawFd),
    /// Fires while the descriptor is writable.
    Writable(RawFd),
    /// Fires when the process receives the signal.
    Signal(i32),
}

impl CallbackKind {
    /// One-shot kinds are cancelled right before their single invocation.
    pub fn is_one_shot(&self) -> bool {
        matches!(
            self,
            CallbackKind::Defer | CallbackKind::Timer { repeat: false, .. }
        )
    }

    /// Short label used in logs and introspection.
    pub fn label(&self) -> &'static str {
        match self {
            CallbackKind::Defer => "defer",
            CallbackKind::Timer { repeat: false, .. } => "delay",
            CallbackKind::Timer { repeat: true, .. } => "repeat",
            CallbackKind::Readable(_) => "on_readable",
            CallbackKind::Writable(_) => "on_writable",
            CallbackKind::Signal(_) => "on_signal",
        }
    }
}

/// A callback handed to the backend for activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Activation {
    pub id: CallbackId,
    pub kind: CallbackKind,
    /// Absolute expiration for timers. A timer whose interval does not fit
    /// in an `Instant` carries `None` and never expires.
    pub expiration: Option<Instant>,
}

/// Kind-specific argument passed to an action.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Payload {
    None,
    Stream(RawFd),
    Signal(i32),
}

pub(crate) type Action = Box<dyn FnMut(&Driver, CallbackId, Payload) -> Result<()>>;

/// Registry entry for one callback.
pub(crate) struct CallbackEntry {
    pub(crate) id: CallbackId,
    pub(crate) kind: CallbackKind,
    pub(crate) enabled: Cell<bool>,
    pub(crate) referenced: Cell<bool>,
    pub(crate) invokable: Cell<bool>,
    pub(crate) expiration: Cell<Option<Instant>>,
    pub(crate) action: RefCell<Action>,
}

impl CallbackEntry {
    pub(crate) fn new(id: CallbackId, kind: CallbackKind, action: Action) -> Self {
        Self {
            id,
            kind,
            enabled: Cell::new(true),
            referenced: Cell::new(true),
            invokable: Cell::new(false),
            expiration: Cell::new(None),
            action: RefCell::new(action),
        }
    }

    /// Recompute the expiration from `now`. No-op for non-timer kinds.
    pub(crate) fn arm(&self, now: Instant) {
        if let CallbackKind::Timer { interval, .. } = self.kind {
            self.expiration.set(now.checked_add(interval));
        }
    }

    pub(crate) fn activation(&self) -> Activation {
        Activation {
            id: self.id,
            kind: self.kind,
            expiration: self.expiration.get(),
        }
    }

    pub(crate) fn payload(&self) -> Payload {
        match self.kind {
            CallbackKind::Readable(fd) | CallbackKind::Writable(fd) => Payload::Stream(fd),
            CallbackKind::Signal(signo) => Payload::Signal(signo),
            CallbackKind::Defer | CallbackKind::Timer { .. } => Payload::None,
        }
    }
}

impl fmt::Debug for CallbackEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackEntry")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("enabled", &self.enabled.get())
            .field("referenced", &self.referenced.get())
            .field("invokable", &self.invokable.get())
            .finish()
    }
}
