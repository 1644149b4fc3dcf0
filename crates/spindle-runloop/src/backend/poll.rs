//! Reference backend built on poll(2).
//!
//! Streams are level-triggered: a watched descriptor is reported on every
//! dispatch while it stays ready. Timers live in a min-heap ordered by
//! (expiration, activation order) with lazy removal; the heap is compacted
//! once stale entries outnumber live ones. A timer without an expiration is
//! tracked as active but never enters the heap. Signals arrive through the
//! self-pipe in [`super::signal`].

use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap, HashMap};
use std::os::fd::{BorrowedFd, RawFd};
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use tracing::{debug, trace};

use super::Backend;
use super::signal::SignalPipe;
use crate::callback::{Activation, CallbackId, CallbackKind};
use crate::error::Result;

/// Stale heap entries tolerated before a compaction pass.
const COMPACT_SLACK: usize = 64;

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
struct TimerSlot {
    expiration: Instant,
    sequence: u64,
    id: CallbackId,
}

/// poll(2) backend with a timer heap and self-pipe signals.
pub struct PollBackend {
    max_block: Option<Duration>,
    timers: BinaryHeap<Reverse<TimerSlot>>,
    active_timers: HashMap<CallbackId, u64>,
    readers: BTreeMap<CallbackId, RawFd>,
    writers: BTreeMap<CallbackId, RawFd>,
    signals: BTreeMap<CallbackId, i32>,
    signal_pipe: Option<SignalPipe>,
    sequence: u64,
}

impl PollBackend {
    /// Create a backend. `max_block` caps a single blocking wait.
    pub fn new(max_block: Option<Duration>) -> Self {
        Self {
            max_block,
            timers: BinaryHeap::new(),
            active_timers: HashMap::new(),
            readers: BTreeMap::new(),
            writers: BTreeMap::new(),
            signals: BTreeMap::new(),
            signal_pipe: None,
            sequence: 0,
        }
    }

    /// Number of active timers.
    pub fn timer_count(&self) -> usize {
        self.active_timers.len()
    }

    /// Number of watched descriptors (readers and writers).
    pub fn stream_count(&self) -> usize {
        self.readers.len() + self.writers.len()
    }

    fn activate_one(&mut self, activation: &Activation) -> Result<()> {
        match activation.kind {
            CallbackKind::Defer => {}
            CallbackKind::Timer { .. } => {
                self.sequence += 1;
                if let Some(expiration) = activation.expiration {
                    self.timers.push(Reverse(TimerSlot {
                        expiration,
                        sequence: self.sequence,
                        id: activation.id,
                    }));
                }
                if self.active_timers.insert(activation.id, self.sequence).is_some() {
                    self.compact_timers();
                }
            }
            CallbackKind::Readable(fd) => {
                self.readers.insert(activation.id, fd);
            }
            CallbackKind::Writable(fd) => {
                self.writers.insert(activation.id, fd);
            }
            CallbackKind::Signal(signo) => {
                if self.signal_pipe.is_none() {
                    self.signal_pipe = Some(SignalPipe::open()?);
                }
                if let Some(pipe) = self.signal_pipe.as_mut() {
                    pipe.watch(signo)?;
                }
                self.signals.insert(activation.id, signo);
            }
        }
        Ok(())
    }

    /// Drop heap entries that no longer match an active timer once they
    /// outnumber the live ones.
    fn compact_timers(&mut self) {
        if self.timers.len() <= 2 * self.active_timers.len() + COMPACT_SLACK {
            return;
        }
        let before = self.timers.len();
        let active = &self.active_timers;
        self.timers
            .retain(|Reverse(slot)| active.get(&slot.id) == Some(&slot.sequence));
        trace!("Compacted timer heap: {} -> {}", before, self.timers.len());
    }

    /// Earliest live timer expiration, discarding stale heap entries.
    fn next_expiration(&mut self) -> Option<Instant> {
        while let Some(Reverse(top)) = self.timers.peek() {
            if self.active_timers.get(&top.id) == Some(&top.sequence) {
                return Some(top.expiration);
            }
            self.timers.pop();
        }
        None
    }

    /// Wait budget for this dispatch; `None` waits indefinitely.
    fn timeout(&mut self, blocking: bool) -> Option<Duration> {
        if !blocking {
            return Some(Duration::ZERO);
        }
        let now = Instant::now();
        let wait = match self.next_expiration() {
            Some(expiration) => Some(expiration.saturating_duration_since(now)),
            None if self.active_timers.is_empty()
                && self.readers.is_empty()
                && self.writers.is_empty()
                && self.signals.is_empty() =>
            {
                // Nothing could ever wake us.
                Some(Duration::ZERO)
            }
            None => None,
        };
        match (wait, self.max_block) {
            (Some(wait), Some(cap)) => Some(wait.min(cap)),
            (None, cap) => cap,
            (wait, None) => wait,
        }
    }

    fn expire_timers(&mut self, ready: &mut Vec<CallbackId>) {
        let now = Instant::now();
        while let Some(Reverse(top)) = self.timers.peek() {
            if top.expiration > now {
                break;
            }
            let Some(Reverse(slot)) = self.timers.pop() else {
                break;
            };
            if self.active_timers.get(&slot.id) == Some(&slot.sequence) {
                self.active_timers.remove(&slot.id);
                ready.push(slot.id);
            }
        }
    }
}

impl Default for PollBackend {
    fn default() -> Self {
        Self::new(None)
    }
}

impl Backend for PollBackend {
    fn name(&self) -> &'static str {
        "poll"
    }

    fn activate(&mut self, callbacks: &[Activation]) -> Result<()> {
        let mut first_error = None;
        for activation in callbacks {
            if let Err(e) = self.activate_one(activation) {
                debug!("Activation of {} failed: {}", activation.id, e);
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn deactivate(&mut self, id: CallbackId, kind: CallbackKind) {
        match kind {
            CallbackKind::Defer => {}
            CallbackKind::Timer { .. } => {
                if self.active_timers.remove(&id).is_some() {
                    self.compact_timers();
                }
            }
            CallbackKind::Readable(_) => {
                self.readers.remove(&id);
            }
            CallbackKind::Writable(_) => {
                self.writers.remove(&id);
            }
            CallbackKind::Signal(_) => {
                if let (Some(signo), Some(pipe)) =
                    (self.signals.remove(&id), self.signal_pipe.as_mut())
                {
                    pipe.unwatch(signo);
                }
            }
        }
    }

    fn dispatch(&mut self, blocking: bool, ready: &mut Vec<CallbackId>) -> Result<()> {
        let timeout = self.timeout(blocking);

        // (owner, fd, interest); owner `None` is the signal pipe.
        let mut targets: Vec<(Option<CallbackId>, RawFd, PollFlags)> = Vec::new();
        targets.extend(self.readers.iter().map(|(id, fd)| (Some(*id), *fd, PollFlags::POLLIN)));
        targets.extend(self.writers.iter().map(|(id, fd)| (Some(*id), *fd, PollFlags::POLLOUT)));
        if let Some(pipe) = &self.signal_pipe {
            targets.push((None, pipe.read_fd(), PollFlags::POLLIN));
        }

        let poll_timeout = match timeout {
            None => PollTimeout::NONE,
            Some(wait) => PollTimeout::try_from(ceil_millis(wait)).unwrap_or(PollTimeout::MAX),
        };
        trace!(
            "poll: {} descriptors, blocking={}, timeout={:?}",
            targets.len(),
            blocking,
            timeout
        );

        let mut signal_ready = false;
        {
            let mut fds: Vec<PollFd<'_>> = targets
                .iter()
                .map(|(_, fd, interest)| {
                    // SAFETY: callers keep watched descriptors open while their
                    // callback is enabled; a closed one is reported as POLLNVAL.
                    let fd = unsafe { BorrowedFd::borrow_raw(*fd) };
                    PollFd::new(fd, *interest)
                })
                .collect();

            match poll(&mut fds, poll_timeout) {
                Ok(_) => {
                    let failure = PollFlags::POLLHUP | PollFlags::POLLERR | PollFlags::POLLNVAL;
                    for ((owner, _, interest), pollfd) in targets.iter().zip(fds.iter()) {
                        let revents = pollfd.revents().unwrap_or(PollFlags::empty());
                        if !revents.intersects(*interest | failure) {
                            continue;
                        }
                        match owner {
                            Some(id) => ready.push(*id),
                            None => signal_ready = true,
                        }
                    }
                }
                Err(Errno::EINTR) => {
                    signal_ready = self.signal_pipe.is_some();
                }
                Err(e) => return Err(e.into()),
            }
        }

        self.expire_timers(ready);

        if signal_ready {
            if let Some(pipe) = self.signal_pipe.as_mut() {
                let pending = pipe.take_pending();
                for (id, signo) in &self.signals {
                    if pending.contains(signo) {
                        ready.push(*id);
                    }
                }
            }
        }

        Ok(())
    }

    fn after_fork(&mut self) -> Result<()> {
        if let Some(pipe) = self.signal_pipe.as_mut() {
            pipe.reopen()?;
        }
        Ok(())
    }
}

/// Round up to whole milliseconds so a sub-millisecond wait does not spin.
fn ceil_millis(duration: Duration) -> Duration {
    let millis = duration.as_nanos().div_ceil(1_000_000);
    Duration::from_millis(u64::try_from(millis).unwrap_or(u64::MAX))
}

#[cfg(test)]
#[path = "poll_tests.rs"]
mod tests;
