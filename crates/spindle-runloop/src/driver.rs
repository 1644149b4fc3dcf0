//! Driver core: state, construction and control.
//!
//! The driver is split across several files the same way its responsibilities
//! are split:
//!
//! - `driver_registry.rs`: callback registration and lifecycle
//! - `driver_tick.rs`: the main loop and the tick engine
//! - `driver_invoke.rs`: the callback execution context
//! - `task.rs`: coroutine tasks, wakers and `block_on`
//! - `fork.rs`: fork hooks and child-side reset

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::Arc;

use tracing::{debug, error, info};

use crate::backend::{Backend, PollBackend};
use crate::callback::{CallbackEntry, CallbackId};
use crate::config::DriverConfig;
use crate::error::{Error, Result};
use crate::fork::ForkHookId;
use crate::metrics::{DriverMetrics, MetricsSnapshot};
use crate::task::{ReadyList, TaskSlot};

/// Identity of an execution context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum ContextId {
    /// Top-level program code, outside the loop or inside `block_on`.
    Main,
    /// The callback execution context that drains the queues.
    Callback,
    /// A spawned coroutine.
    Task(u64),
}

/// Deferred unit of work run before the next callback.
pub(crate) enum Microtask {
    Thunk(Box<dyn FnOnce(&Driver) -> Result<()>>),
    Resume(u64),
}

/// Single pending action for the main loop.
#[derive(Debug)]
pub(crate) enum Interrupt {
    /// An error escaped the error path; `run()` returns it.
    Uncaught(Error),
    /// The top-level suspension was resumed.
    ResumeMain,
}

/// Why the main loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LoopExit {
    Drained,
    Stopped,
    MainResumed,
}

pub(crate) type ErrorHandler = Rc<dyn Fn(&Driver, Error) -> Result<()>>;
pub(crate) type ForkHook = Rc<dyn Fn(&Driver) -> Result<()>>;

pub(crate) struct DriverInner {
    pub(crate) config: DriverConfig,
    pub(crate) next_callback_id: Cell<u64>,

    /// Callback registry.
    pub(crate) callbacks: RefCell<BTreeMap<CallbackId, Rc<CallbackEntry>>>,

    /// Callbacks waiting to be handed to the backend.
    pub(crate) enable_queue: RefCell<Vec<CallbackId>>,

    /// Defer callbacks waiting to be promoted.
    pub(crate) defer_queue: RefCell<Vec<CallbackId>>,

    pub(crate) microtasks: RefCell<VecDeque<Microtask>>,

    /// Ready callbacks, invoked in FIFO order.
    pub(crate) callback_queue: RefCell<VecDeque<CallbackId>>,

    pub(crate) idle: Cell<bool>,
    pub(crate) stopped: Cell<bool>,
    pub(crate) running: Cell<bool>,
    pub(crate) awaiting_main: Cell<bool>,
    pub(crate) interrupt: RefCell<Option<Interrupt>>,
    pub(crate) error_handler: RefCell<Option<ErrorHandler>>,
    pub(crate) backend: RefCell<Box<dyn Backend>>,

    /// Context currently executing.
    pub(crate) current: Cell<ContextId>,

    /// Spawned coroutines by context id.
    pub(crate) tasks: RefCell<HashMap<u64, TaskSlot>>,
    pub(crate) ready: Arc<ReadyList>,
    pub(crate) next_context_id: Cell<u64>,

    /// Bumped on every fork; suspensions remember the value they were created under.
    pub(crate) generation: Cell<u64>,
    pub(crate) fork_hooks: RefCell<BTreeMap<ForkHookId, ForkHook>>,
    pub(crate) next_fork_hook_id: Cell<u64>,

    /// Context-local values by context, then by key.
    pub(crate) locals: RefCell<HashMap<ContextId, HashMap<u64, Box<dyn Any>>>>,

    pub(crate) metrics: DriverMetrics,
}

/// The event loop driver.
///
/// `Driver` is a cheap handle (`Rc`) and is passed explicitly to every
/// callback, reaction and combinator. It is neither `Send` nor `Sync`: all
/// scheduler state lives on the thread that created it.
#[derive(Clone)]
pub struct Driver {
    pub(crate) inner: Rc<DriverInner>,
}

impl Driver {
    /// Create a driver with the default configuration and the poll backend.
    pub fn new() -> Self {
        Self::with_config(DriverConfig::default())
    }

    /// Create a driver with the poll backend.
    pub fn with_config(config: DriverConfig) -> Self {
        let backend = PollBackend::new(config.max_block());
        Self::with_backend(config, Box::new(backend))
    }

    /// Create a driver on a custom backend.
    pub fn with_backend(config: DriverConfig, backend: Box<dyn Backend>) -> Self {
        debug!("Driver created (backend: {})", backend.name());
        let capacity = config.queue_capacity;
        Self {
            inner: Rc::new(DriverInner {
                config,
                next_callback_id: Cell::new(0),
                callbacks: RefCell::new(BTreeMap::new()),
                enable_queue: RefCell::new(Vec::with_capacity(capacity)),
                defer_queue: RefCell::new(Vec::with_capacity(capacity)),
                microtasks: RefCell::new(VecDeque::with_capacity(capacity)),
                callback_queue: RefCell::new(VecDeque::with_capacity(capacity)),
                idle: Cell::new(false),
                stopped: Cell::new(false),
                running: Cell::new(false),
                awaiting_main: Cell::new(false),
                interrupt: RefCell::new(None),
                error_handler: RefCell::new(None),
                backend: RefCell::new(backend),
                current: Cell::new(ContextId::Main),
                tasks: RefCell::new(HashMap::new()),
                ready: Arc::new(ReadyList::default()),
                next_context_id: Cell::new(0),
                generation: Cell::new(0),
                fork_hooks: RefCell::new(BTreeMap::new()),
                next_fork_hook_id: Cell::new(0),
                locals: RefCell::new(HashMap::new()),
                metrics: DriverMetrics::new(),
            }),
        }
    }

    /// Get the configuration.
    pub fn config(&self) -> &DriverConfig {
        &self.inner.config
    }

    /// Name of the backend in use.
    pub fn backend_name(&self) -> &'static str {
        self.inner.backend.borrow().name()
    }

    /// Get metrics.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    /// Whether `run()` is active.
    pub fn is_running(&self) -> bool {
        self.inner.running.get()
    }

    /// Stop the loop after the current tick.
    pub fn stop(&self) {
        debug!("Driver: stop requested");
        self.inner.stopped.set(true);
    }

    /// Queue a microtask.
    ///
    /// Microtasks run in FIFO order before the next callback and are drained
    /// completely before the loop may block.
    pub fn queue<F>(&self, thunk: F)
    where
        F: FnOnce(&Driver) -> Result<()> + 'static,
    {
        self.inner
            .microtasks
            .borrow_mut()
            .push_back(Microtask::Thunk(Box::new(thunk)));
    }

    /// Install the handler for errors escaping callbacks and microtasks.
    ///
    /// An error returned by the handler is escalated and ends `run()`.
    pub fn set_error_handler<F>(&self, handler: F)
    where
        F: Fn(&Driver, Error) -> Result<()> + 'static,
    {
        *self.inner.error_handler.borrow_mut() = Some(Rc::new(handler));
    }

    /// Remove the error handler.
    pub fn clear_error_handler(&self) {
        self.inner.error_handler.borrow_mut().take();
    }

    /// Drop every callback, task, queued microtask and hook.
    ///
    /// Actions and tasks commonly capture the driver, which keeps it alive
    /// through an `Rc` cycle; shutting down releases them.
    pub fn shutdown(&self) {
        let inner = &self.inner;
        inner.stopped.set(true);

        // Take everything out first: dropping actions and futures can call back in.
        let callbacks = std::mem::take(&mut *inner.callbacks.borrow_mut());
        for entry in callbacks.values() {
            if entry.enabled.replace(false) {
                inner.backend.borrow_mut().deactivate(entry.id, entry.kind);
            }
        }
        let tasks = std::mem::take(&mut *inner.tasks.borrow_mut());
        let microtasks = std::mem::take(&mut *inner.microtasks.borrow_mut());
        let hooks = std::mem::take(&mut *inner.fork_hooks.borrow_mut());
        let locals = std::mem::take(&mut *inner.locals.borrow_mut());
        let handler = inner.error_handler.borrow_mut().take();
        inner.enable_queue.borrow_mut().clear();
        inner.defer_queue.borrow_mut().clear();
        inner.callback_queue.borrow_mut().clear();
        inner.ready.clear();

        info!(
            "Driver shut down ({} callbacks, {} tasks dropped)",
            callbacks.len(),
            tasks.len()
        );
        drop((callbacks, tasks, microtasks, hooks, locals, handler));
    }

    pub(crate) fn downgrade(&self) -> Weak<DriverInner> {
        Rc::downgrade(&self.inner)
    }

    pub(crate) fn current_context(&self) -> ContextId {
        self.inner.current.get()
    }

    // ========================================================================
    // Interrupts and error routing
    // ========================================================================

    /// Occupy the interrupt slot.
    ///
    /// An uncaught error displaces a pending `ResumeMain`; any other second
    /// interrupt is logged and dropped.
    pub(crate) fn set_interrupt(&self, interrupt: Interrupt) {
        let mut slot = self.inner.interrupt.borrow_mut();
        match (slot.as_ref(), &interrupt) {
            (None, _) => *slot = Some(interrupt),
            (Some(Interrupt::ResumeMain), Interrupt::Uncaught(_)) => {
                debug!("Uncaught error displaces pending top-level resume");
                *slot = Some(interrupt);
            }
            (Some(pending), _) => {
                error!(
                    "Interrupt already pending ({:?}); dropping {:?}",
                    pending, interrupt
                );
            }
        }
    }

    pub(crate) fn has_interrupt(&self) -> bool {
        self.inner.interrupt.borrow().is_some()
    }

    pub(crate) fn take_interrupt(&self) -> Option<Interrupt> {
        self.inner.interrupt.borrow_mut().take()
    }

    /// Route an error from `origin` to the error handler, or escalate it.
    pub(crate) fn error(&self, origin: &str, error: Error) {
        self.inner.metrics.record_error();
        let handler = self.inner.error_handler.borrow().clone();
        let escalated = match handler {
            Some(handler) => match handler(self, error) {
                Ok(()) => return,
                Err(e) => {
                    error!("Error handler failed for {}: {}", origin, e);
                    e
                }
            },
            None => error,
        };
        debug!("Uncaught error from {}: {}", origin, escalated);
        self.set_interrupt(Interrupt::Uncaught(Error::uncaught(origin, escalated)));
    }
}

impl Default for Driver {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Driver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Driver")
            .field("backend", &self.backend_name())
            .field("callbacks", &self.inner.callbacks.borrow().len())
            .field("tasks", &self.inner.tasks.borrow().len())
            .field("running", &self.inner.running.get())
            .field("stopped", &self.inner.stopped.get())
            .finish()
    }
}

#[cfg(test)]
#[path = "driver_tests.rs"]
mod tests;
