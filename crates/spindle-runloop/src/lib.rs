//! # Spindle RunLoop
//!
//! Single-threaded cooperative scheduling kernel: many suspendable execution
//! contexts multiplexed over one OS thread by a tick-driven event loop.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                        Application code                              │
//! │   defer / delay / repeat / on_readable / on_signal      spawn / await │
//! └───────────────┬──────────────────────────────────────────┬───────────┘
//!                 │                                          │
//! ┌───────────────▼──────────────┐          ┌────────────────▼───────────┐
//! │      Callback Registry       │          │   Coroutines & Suspensions │
//! │  enable / disable / cancel   │          │   resume / throw / suspend │
//! └───────────────┬──────────────┘          └────────────────┬───────────┘
//!                 │                                          │
//! ┌───────────────▼──────────────────────────────────────────▼───────────┐
//! │                        Driver (tick engine)                          │
//! │  activate → promote deferred → blocking decision → dispatch          │
//! │  microtasks → ready callbacks (callback execution context)           │
//! └───────────────┬──────────────────────────────────────────────────────┘
//!                 │
//! ┌───────────────▼──────────────┐     Promise · all / any / race / all_settled
//! │   Backend (poll / manual)    │     WaitGroup
//! └──────────────────────────────┘
//! ```
//!
//! ## Key Components
//!
//! - [`Driver`]: the event loop, callback registry and coroutine executor
//! - [`Backend`]: pluggable readiness backend ([`PollBackend`], [`ManualBackend`])
//! - [`Suspension`]: resume handle for one execution context
//! - [`Promise`]: settle-once value with reactions and combinators
//! - [`WaitGroup`]: counting rendezvous
//! - [`ContextLocal`]: per-context storage
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use spindle_runloop::{Driver, Promise};
//!
//! let driver = Driver::new();
//! let sleeper = driver.clone();
//! let task: Promise<Duration> = driver.spawn(async move {
//!     sleeper.sleep(Duration::from_millis(10)).await
//! });
//! let slept = driver.wait(&task).unwrap();
//! assert!(slept >= Duration::from_millis(10));
//! ```

pub mod backend;
pub mod callback;
pub mod config;
pub mod error;
pub mod fork;
pub mod info;
pub mod local;
pub mod metrics;
pub mod promise;
pub mod suspension;
pub mod wait_group;

mod combinators;
mod driver;
mod driver_invoke;
mod driver_registry;
mod driver_tick;
mod task;

pub use backend::{Backend, ManualBackend, ManualHandle, PollBackend};
pub use callback::{Activation, CallbackId, CallbackKind};
pub use config::{DriverConfig, EscapePolicy};
pub use driver::Driver;
pub use error::{Error, RejectReason, Result};
pub use fork::ForkHookId;
pub use info::{DriverInfo, KindCounts};
pub use local::ContextLocal;
pub use metrics::{DriverMetrics, MetricsSnapshot};
pub use nix::unistd::ForkResult;
pub use promise::{Promise, PromiseStatus, Resolver};
pub use suspension::{SuspendFuture, Suspension};
pub use wait_group::WaitGroup;
