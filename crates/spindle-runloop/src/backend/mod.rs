//! Pluggable I/O backends.
//!
//! The driver owns the callback lifecycle; a backend only waits. It receives
//! newly enabled callbacks through [`Backend::activate`], forgets them in
//! [`Backend::deactivate`], and in [`Backend::dispatch`] reports which of the
//! active callbacks became ready.
//!
//! A backend reports a timer at most once per activation: after firing, the
//! driver either cancels the timer or re-enables it, which activates it again.

mod manual;
mod poll;
mod signal;

pub use manual::{ManualBackend, ManualHandle};
pub use poll::PollBackend;

use crate::callback::{Activation, CallbackId, CallbackKind};
use crate::error::Result;

/// I/O readiness backend driven by the tick engine.
pub trait Backend {
    /// Short backend name for logs and introspection.
    fn name(&self) -> &'static str;

    /// Start watching the given callbacks. Defer callbacks never reach a backend.
    fn activate(&mut self, callbacks: &[Activation]) -> Result<()>;

    /// Stop watching a callback. Unknown ids are ignored.
    fn deactivate(&mut self, id: CallbackId, kind: CallbackKind);

    /// Wait for readiness and push ready ids onto `ready`.
    ///
    /// With `blocking == false` the backend must only collect readiness that
    /// is already available.
    fn dispatch(&mut self, blocking: bool, ready: &mut Vec<CallbackId>) -> Result<()>;

    /// Reset process-local resources in a freshly forked child.
    fn after_fork(&mut self) -> Result<()> {
        Ok(())
    }
}
