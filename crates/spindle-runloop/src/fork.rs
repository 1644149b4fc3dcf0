//! Fork hooks and child-side reset.

use std::fmt;
use std::rc::Rc;

use nix::unistd::ForkResult;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::driver::Driver;
use crate::error::Result;

/// Handle for a registered fork hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ForkHookId(u64);

impl fmt::Display for ForkHookId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fork-hook#{}", self.0)
    }
}

impl Driver {
    /// Register a hook to run in the child after a fork.
    pub fn on_fork<F>(&self, hook: F) -> ForkHookId
    where
        F: Fn(&Driver) -> Result<()> + 'static,
    {
        let raw = self.inner.next_fork_hook_id.get();
        self.inner.next_fork_hook_id.set(raw + 1);
        let id = ForkHookId(raw);
        self.inner.fork_hooks.borrow_mut().insert(id, Rc::new(hook));
        id
    }

    /// Remove a fork hook. Unknown ids are ignored.
    pub fn cancel_fork_hook(&self, id: ForkHookId) {
        self.inner.fork_hooks.borrow_mut().remove(&id);
    }

    /// Reset process-local state in a freshly forked child.
    ///
    /// Suspensions created before this call refuse to resume afterwards.
    /// Hook failures are logged and do not stop the remaining hooks.
    pub fn after_fork(&self) -> Result<()> {
        let inner = &self.inner;
        inner.generation.set(inner.generation.get() + 1);
        let locals = std::mem::take(&mut *inner.locals.borrow_mut());
        drop(locals);
        inner.ready.clear();

        let hooks: Vec<_> = inner.fork_hooks.borrow().values().cloned().collect();
        debug!("Running {} fork hooks", hooks.len());
        for hook in hooks {
            if let Err(e) = hook(self) {
                warn!("Fork hook failed: {}", e);
            }
        }

        inner.backend.borrow_mut().after_fork()
    }

    /// Fork the process, running [`Driver::after_fork`] in the child.
    pub fn fork(&self) -> Result<ForkResult> {
        // SAFETY: the driver is single-threaded; the child only resets driver
        // state before returning to the caller.
        let result = unsafe { nix::unistd::fork() }?;
        match result {
            ForkResult::Parent { child } => info!("Forked child process {}", child),
            ForkResult::Child => self.after_fork()?,
        }
        Ok(result)
    }
}
