//! Main loop and tick engine.

use std::cell::Cell;
use std::time::Instant;

use tracing::{debug, info, trace};

use crate::callback::Activation;
use crate::driver::{ContextId, Driver, Interrupt, LoopExit};
use crate::error::{Error, Result};

/// Clears the running flag when the loop unwinds.
struct RunningGuard<'a>(&'a Cell<bool>);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

impl Driver {
    /// Run the loop until it runs out of referenced work or is stopped.
    ///
    /// Returns the first uncaught error from a callback or microtask.
    pub fn run(&self) -> Result<()> {
        match self.run_loop(true)? {
            LoopExit::Drained | LoopExit::Stopped => Ok(()),
            LoopExit::MainResumed => {
                debug!("Top-level suspension resumed outside block_on");
                Ok(())
            }
        }
    }

    /// Whether no enabled and referenced callback remains and no work is queued.
    pub fn is_empty(&self) -> bool {
        let inner = &self.inner;
        let no_callbacks = !inner
            .callbacks
            .borrow()
            .values()
            .any(|entry| entry.enabled.get() && entry.referenced.get());
        no_callbacks
            && inner.microtasks.borrow().is_empty()
            && inner.callback_queue.borrow().is_empty()
            && inner.ready.is_empty()
    }

    /// Loop until drained, stopped, interrupted or the top-level future is
    /// resumed. `fresh` discards a stop request left over from an earlier
    /// run; re-entries from `block_on` keep it.
    pub(crate) fn run_loop(&self, fresh: bool) -> Result<LoopExit> {
        let inner = &self.inner;
        if matches!(inner.current.get(), ContextId::Task(_)) {
            return Err(Error::InsideCoroutine);
        }
        if inner.running.get() {
            return Err(Error::AlreadyRunning);
        }

        inner.running.set(true);
        let _running = RunningGuard(&inner.running);
        if fresh {
            inner.stopped.set(false);
        }
        inner.metrics.mark_start();
        debug!("Driver: Entry");

        // ┌─────────────────────────────────────────────────────────────┐
        // │ Drain whatever was queued before the loop started.          │
        // └─────────────────────────────────────────────────────────────┘
        self.invoke_callbacks();

        loop {
            match self.take_interrupt() {
                Some(Interrupt::Uncaught(error)) => {
                    info!("Driver: Exit on uncaught error");
                    return Err(error);
                }
                Some(Interrupt::ResumeMain) => {
                    debug!("Driver: Exit to resume top-level suspension");
                    return Ok(LoopExit::MainResumed);
                }
                None => {}
            }

            if inner.stopped.get() {
                debug!("Driver: Exit (stopped)");
                return Ok(LoopExit::Stopped);
            }
            if self.is_empty() {
                debug!("Driver: Exit (no referenced callbacks)");
                return Ok(LoopExit::Drained);
            }

            let previous_idle = inner.idle.replace(true);
            self.tick(previous_idle);
            self.invoke_callbacks();
        }
    }

    pub(crate) fn tick(&self, previous_idle: bool) {
        let inner = &self.inner;

        // ┌─────────────────────────────────────────────────────────────┐
        // │ 1. Activate: hand the enable queue to the backend.          │
        // └─────────────────────────────────────────────────────────────┘
        let enabling = std::mem::take(&mut *inner.enable_queue.borrow_mut());
        let activations: Vec<Activation> = enabling
            .iter()
            .filter_map(|id| self.entry(*id))
            .filter(|entry| entry.enabled.get())
            .map(|entry| {
                entry.invokable.set(true);
                entry.activation()
            })
            .collect();
        if !activations.is_empty() {
            trace!("Activating {} callbacks", activations.len());
            let result = inner.backend.borrow_mut().activate(&activations);
            if let Err(e) = result {
                self.error("backend activation", e);
            }
        }

        // ┌─────────────────────────────────────────────────────────────┐
        // │ 2. Promote deferred callbacks straight to the ready queue.  │
        // └─────────────────────────────────────────────────────────────┘
        let deferred = std::mem::take(&mut *inner.defer_queue.borrow_mut());
        for id in deferred {
            if let Some(entry) = self.entry(id) {
                if entry.enabled.get() {
                    entry.invokable.set(true);
                    inner.callback_queue.borrow_mut().push_back(id);
                }
            }
        }

        // ┌─────────────────────────────────────────────────────────────┐
        // │ 3. Blocking decision. Ready work always runs before a wait. │
        // └─────────────────────────────────────────────────────────────┘
        let mut blocking = previous_idle && !inner.stopped.get() && !self.is_empty();
        if blocking {
            self.invoke_callbacks();
            if self.has_interrupt() {
                return;
            }
            if !inner.enable_queue.borrow().is_empty()
                || !inner.defer_queue.borrow().is_empty()
                || inner.stopped.get()
                || self.is_empty()
            {
                blocking = false;
            }
        }

        // ┌─────────────────────────────────────────────────────────────┐
        // │ 4. Dispatch: wait for readiness and queue ready callbacks.  │
        // └─────────────────────────────────────────────────────────────┘
        inner.metrics.record_tick(blocking);
        let mut ready = Vec::new();
        let started = Instant::now();
        let result = inner.backend.borrow_mut().dispatch(blocking, &mut ready);
        inner.metrics.record_dispatch_time(started.elapsed());
        if let Err(e) = result {
            self.error("backend dispatch", e);
        }
        if !ready.is_empty() {
            trace!("Dispatch: {} ready (blocking={})", ready.len(), blocking);
            inner.callback_queue.borrow_mut().extend(ready);
        }
    }
}
