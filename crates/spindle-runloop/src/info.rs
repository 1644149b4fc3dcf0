//! Driver introspection.

use serde::Serialize;

use crate::callback::CallbackKind;
use crate::driver::Driver;
use crate::metrics::MetricsSnapshot;

/// Enabled and disabled callbacks of one kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct KindCounts {
    pub enabled: usize,
    pub disabled: usize,
}

impl KindCounts {
    fn count(&mut self, enabled: bool) {
        if enabled {
            self.enabled += 1;
        } else {
            self.disabled += 1;
        }
    }
}

/// Snapshot of the registry and run state.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DriverInfo {
    pub backend: String,
    pub defer: KindCounts,
    pub delay: KindCounts,
    pub repeat: KindCounts,
    pub on_readable: KindCounts,
    pub on_writable: KindCounts,
    pub on_signal: KindCounts,
    /// Enabled callbacks that keep the loop alive.
    pub referenced: usize,
    /// Enabled callbacks that do not.
    pub unreferenced: usize,
    pub running: bool,
    pub tasks: usize,
    pub metrics: MetricsSnapshot,
}

impl Driver {
    /// Summarize the registry and run state.
    pub fn info(&self) -> DriverInfo {
        let mut info = DriverInfo {
            backend: self.backend_name().to_string(),
            running: self.is_running(),
            tasks: self.task_count(),
            metrics: self.metrics(),
            ..DriverInfo::default()
        };

        for entry in self.inner.callbacks.borrow().values() {
            let enabled = entry.enabled.get();
            let counts = match entry.kind {
                CallbackKind::Defer => &mut info.defer,
                CallbackKind::Timer { repeat: false, .. } => &mut info.delay,
                CallbackKind::Timer { repeat: true, .. } => &mut info.repeat,
                CallbackKind::Readable(_) => &mut info.on_readable,
                CallbackKind::Writable(_) => &mut info.on_writable,
                CallbackKind::Signal(_) => &mut info.on_signal,
            };
            counts.count(enabled);
            if enabled {
                if entry.referenced.get() {
                    info.referenced += 1;
                } else {
                    info.unreferenced += 1;
                }
            }
        }
        info
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_info_counts_by_kind() {
        let driver = Driver::new();
        driver.defer(|_, _| Ok(()));
        let delay = driver.delay(Duration::from_secs(1), |_, _| Ok(()));
        let repeat = driver.repeat(Duration::from_secs(1), |_, _| Ok(()));
        driver.disable(delay);
        driver.unreference(repeat);

        let info = driver.info();
        assert_eq!(info.backend, "poll");
        assert_eq!(info.defer, KindCounts { enabled: 1, disabled: 0 });
        assert_eq!(info.delay, KindCounts { enabled: 0, disabled: 1 });
        assert_eq!(info.repeat, KindCounts { enabled: 1, disabled: 0 });
        assert_eq!(info.referenced, 1);
        assert_eq!(info.unreferenced, 1);
        assert!(!info.running);
        driver.shutdown();
    }

    #[test]
    fn test_info_serializes() {
        let driver = Driver::new();
        let json = serde_json::to_value(driver.info()).unwrap();
        assert_eq!(json["backend"], "poll");
        assert_eq!(json["defer"]["enabled"], 0);
    }
}
