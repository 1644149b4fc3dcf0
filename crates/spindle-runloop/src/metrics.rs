//! Driver metrics collection.

use std::cell::Cell;
use std::time::{Duration, Instant};

use serde::Serialize;

/// Driver counters.
///
/// The driver is single-threaded, so plain `Cell`s are enough.
#[derive(Debug, Default)]
pub struct DriverMetrics {
    /// Total number of ticks.
    ticks: Cell<u64>,

    /// Ticks whose dispatch was allowed to block.
    blocking_ticks: Cell<u64>,

    /// Total callbacks invoked.
    callbacks_invoked: Cell<u64>,

    /// Total microtasks executed.
    microtasks_run: Cell<u64>,

    /// Total tasks spawned.
    tasks_spawned: Cell<u64>,

    /// Total tasks completed.
    tasks_completed: Cell<u64>,

    /// Errors routed through the error path.
    errors: Cell<u64>,

    /// Total time spent inside backend dispatch (microseconds).
    dispatch_time_us: Cell<u64>,

    /// Start time of the first run.
    start_time: Cell<Option<Instant>>,
}

fn bump(counter: &Cell<u64>, by: u64) {
    counter.set(counter.get().saturating_add(by));
}

impl DriverMetrics {
    /// Create new metrics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the start of the first run.
    pub fn mark_start(&self) {
        if self.start_time.get().is_none() {
            self.start_time.set(Some(Instant::now()));
        }
    }

    /// Get uptime in seconds.
    pub fn uptime_secs(&self) -> u64 {
        self.start_time
            .get()
            .map(|t| t.elapsed().as_secs())
            .unwrap_or(0)
    }

    /// Record a tick.
    pub fn record_tick(&self, blocking: bool) {
        bump(&self.ticks, 1);
        if blocking {
            bump(&self.blocking_ticks, 1);
        }
    }

    /// Record a callback invocation.
    pub fn record_callback(&self) {
        bump(&self.callbacks_invoked, 1);
    }

    /// Record a microtask.
    pub fn record_microtask(&self) {
        bump(&self.microtasks_run, 1);
    }

    /// Record a spawned task.
    pub fn record_spawn(&self) {
        bump(&self.tasks_spawned, 1);
    }

    /// Record a completed task.
    pub fn record_completion(&self) {
        bump(&self.tasks_completed, 1);
    }

    /// Record an error routed to the handler or escalated.
    pub fn record_error(&self) {
        bump(&self.errors, 1);
    }

    /// Record time spent in backend dispatch.
    pub fn record_dispatch_time(&self, elapsed: Duration) {
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        bump(&self.dispatch_time_us, micros);
    }

    /// Get a snapshot of the metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_secs: self.uptime_secs(),
            ticks: self.ticks.get(),
            blocking_ticks: self.blocking_ticks.get(),
            callbacks_invoked: self.callbacks_invoked.get(),
            microtasks_run: self.microtasks_run.get(),
            tasks_spawned: self.tasks_spawned.get(),
            tasks_completed: self.tasks_completed.get(),
            errors: self.errors.get(),
            dispatch_time_us: self.dispatch_time_us.get(),
        }
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub ticks: u64,
    pub blocking_ticks: u64,
    pub callbacks_invoked: u64,
    pub microtasks_run: u64,
    pub tasks_spawned: u64,
    pub tasks_completed: u64,
    pub errors: u64,
    pub dispatch_time_us: u64,
}

impl MetricsSnapshot {
    /// Tasks spawned but not yet completed.
    pub fn active_tasks(&self) -> u64 {
        self.tasks_spawned.saturating_sub(self.tasks_completed)
    }

    /// Average callbacks per tick.
    pub fn callbacks_per_tick(&self) -> f64 {
        if self.ticks == 0 {
            return 0.0;
        }
        self.callbacks_invoked as f64 / self.ticks as f64
    }

    /// Average dispatch time in milliseconds.
    pub fn avg_dispatch_time_ms(&self) -> f64 {
        if self.ticks == 0 {
            return 0.0;
        }
        (self.dispatch_time_us as f64 / self.ticks as f64) / 1000.0
    }
}

#[cfg(test)]
#[path = "metrics_tests.rs"]
mod tests;
