//! Error types for the scheduling kernel.

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::callback::CallbackId;

/// Errors raised by the driver, suspensions, promises and wait groups.
///
/// `Error` is `Clone` because a single rejection is delivered to every
/// consumer of a promise.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// Unknown callback id on an operation that requires the callback to exist.
    #[error("Invalid callback identifier: {0}")]
    InvalidCallback(CallbackId),

    /// An error escaped a callback or microtask with no error handler installed.
    #[error("Uncaught error from {origin}: {source}")]
    Uncaught {
        origin: String,
        source: Box<Error>,
    },

    /// A promise was rejected with a reason that is not itself an error.
    #[error("Promise rejected: {0}")]
    Rejected(RejectReason),

    /// Every input of `Promise::any` was rejected.
    #[error("All {} promises were rejected", .0.len())]
    Aggregate(Vec<Error>),

    /// A wait did not complete in time.
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// `run()` was called while the loop is running.
    #[error("The event loop is already running")]
    AlreadyRunning,

    /// `run()` was called from a coroutine.
    #[error("The event loop cannot be run from inside a coroutine")]
    InsideCoroutine,

    /// The calling context cannot be suspended.
    #[error("No suspendable context: {0}")]
    NoSuspension(&'static str),

    /// The loop ran out of work before the top-level suspension was resumed.
    #[error(
        "Event loop terminated without resuming the current suspension \
         (a coroutine deadlock, or an unreferenced or cancelled callback)"
    )]
    Unresumed,

    /// API misuse, such as resuming a suspension that is not suspended.
    #[error("Logic error: {0}")]
    Logic(String),

    /// The suspension was created before a fork and belongs to the parent.
    #[error("Suspension was created before fork and cannot be resumed in the child")]
    ForkedSuspension,

    /// The driver owning a suspension no longer exists.
    #[error("The owning event loop has exited")]
    LoopExited,

    /// I/O failure from a backend.
    #[error("I/O error: {0}")]
    Io(Arc<std::io::Error>),

    /// System call failure from a backend.
    #[error("System error: {0}")]
    Sys(#[from] nix::errno::Errno),

    /// Application error.
    #[error("{0}")]
    Custom(Arc<dyn std::error::Error + Send + Sync>),
}

impl Error {
    /// Wrap an application error.
    pub fn custom<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Error::Custom(Arc::new(error))
    }

    /// Application error from a plain message.
    pub fn msg(message: impl Into<String>) -> Self {
        Error::Custom(Arc::new(Message(message.into())))
    }

    /// Wrap a non-error rejection reason.
    pub fn rejected<R>(reason: R) -> Self
    where
        R: fmt::Debug + Send + Sync + 'static,
    {
        Error::Rejected(RejectReason::new(reason))
    }

    pub(crate) fn logic(message: impl Into<String>) -> Self {
        Error::Logic(message.into())
    }

    pub(crate) fn uncaught(origin: impl Into<String>, source: Error) -> Self {
        Error::Uncaught {
            origin: origin.into(),
            source: Box::new(source),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Error::Io(Arc::new(error))
    }
}

/// Result type for kernel operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug)]
struct Message(String);

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for Message {}

/// A rejection reason that is not an error value.
///
/// The original value is kept and can be recovered with [`RejectReason::downcast_ref`].
#[derive(Clone)]
pub struct RejectReason {
    description: String,
    value: Arc<dyn Any + Send + Sync>,
}

impl RejectReason {
    /// Capture a reason value.
    pub fn new<R>(reason: R) -> Self
    where
        R: fmt::Debug + Send + Sync + 'static,
    {
        Self {
            description: format!("{reason:?}"),
            value: Arc::new(reason),
        }
    }

    /// Debug rendering of the original value.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Borrow the original value if it has type `R`.
    pub fn downcast_ref<R: 'static>(&self) -> Option<&R> {
        self.value.downcast_ref::<R>()
    }
}

impl fmt::Debug for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RejectReason")
            .field(&self.description)
            .finish()
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.description)
    }
}
