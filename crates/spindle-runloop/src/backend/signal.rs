//! Signal delivery through self-pipes.
//!
//! Every open [`SignalPipe`] claims a slot in a fixed table of wake
//! descriptors. The handler writes the signal number as one byte to each
//! claimed slot, so backends never share or steal each other's wakeups; a
//! pipe reports only the signals it watches. Handler installation is
//! refcounted process-wide and the previous disposition comes back once the
//! last watcher in any backend is gone.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs::File;
use std::io::Read;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::sync::atomic::{AtomicI32, Ordering};

use nix::errno::Errno;
use nix::fcntl::{FcntlArg, FdFlag, OFlag, fcntl};
use nix::sys::signal::{SaFlags, SigAction, SigHandler, SigSet, Signal, sigaction};
use parking_lot::Mutex;
use tracing::debug;

use crate::error::Result;

/// Maximum number of signal pipes open at once in a process.
const MAX_PIPES: usize = 32;

static WAKE_FDS: [AtomicI32; MAX_PIPES] = [const { AtomicI32::new(-1) }; MAX_PIPES];

static INSTALLED: Mutex<BTreeMap<i32, Installed>> = parking_lot::const_mutex(BTreeMap::new());

struct Installed {
    previous: SigAction,
    watchers: usize,
}

extern "C" fn on_signal(signo: nix::libc::c_int) {
    let Ok(byte) = u8::try_from(signo) else {
        return;
    };
    let saved = Errno::last_raw();
    for slot in &WAKE_FDS {
        let fd = slot.load(Ordering::SeqCst);
        if fd >= 0 {
            // SAFETY: write(2) is async-signal-safe; a full pipe already guarantees a wakeup.
            unsafe {
                nix::libc::write(fd, (&byte as *const u8).cast(), 1);
            }
        }
    }
    Errno::set_raw(saved);
}

/// One backend's signal pipe and the signals it watches.
pub(crate) struct SignalPipe {
    reader: File,
    writer: OwnedFd,
    slot: usize,
    watching: HashMap<i32, usize>,
}

impl SignalPipe {
    pub(crate) fn open() -> Result<Self> {
        let (reader, writer) = nonblocking_pipe()?;
        let fd = writer.as_raw_fd();
        let slot = WAKE_FDS
            .iter()
            .position(|slot| {
                slot.compare_exchange(-1, fd, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
            })
            .ok_or_else(|| {
                debug!("All {} signal pipe slots are taken", MAX_PIPES);
                Errno::EMFILE
            })?;
        Ok(Self {
            reader: File::from(reader),
            writer,
            slot,
            watching: HashMap::new(),
        })
    }

    pub(crate) fn read_fd(&self) -> RawFd {
        self.reader.as_raw_fd()
    }

    /// Count one more watcher for `signo`, installing the handler for the
    /// first watcher in the process.
    pub(crate) fn watch(&mut self, signo: i32) -> Result<()> {
        let signal = Signal::try_from(signo)?;
        {
            let mut installed = INSTALLED.lock();
            match installed.get_mut(&signo) {
                Some(entry) => entry.watchers += 1,
                None => {
                    let action = SigAction::new(
                        SigHandler::Handler(on_signal),
                        SaFlags::SA_RESTART,
                        SigSet::empty(),
                    );
                    // SAFETY: the handler only touches atomics and calls write(2).
                    let previous = unsafe { sigaction(signal, &action)? };
                    debug!("Signal handler installed for {}", signal);
                    installed.insert(
                        signo,
                        Installed {
                            previous,
                            watchers: 1,
                        },
                    );
                }
            }
        }
        *self.watching.entry(signo).or_insert(0) += 1;
        Ok(())
    }

    /// Drop one watcher for `signo`.
    pub(crate) fn unwatch(&mut self, signo: i32) {
        let Some(count) = self.watching.get_mut(&signo) else {
            return;
        };
        *count -= 1;
        if *count == 0 {
            self.watching.remove(&signo);
        }
        release(signo, 1);
    }

    /// Drain the pipe and return the watched signals received since the last call.
    pub(crate) fn take_pending(&mut self) -> Vec<i32> {
        let mut received = BTreeSet::new();
        let mut buf = [0u8; 64];
        while let Ok(n) = self.reader.read(&mut buf) {
            received.extend(buf[..n].iter().map(|byte| i32::from(*byte)));
            if n < buf.len() {
                break;
            }
        }
        received
            .into_iter()
            .filter(|signo| self.watching.contains_key(signo))
            .collect()
    }

    /// Replace the pipe in a forked child, keeping the slot and the watches.
    pub(crate) fn reopen(&mut self) -> Result<()> {
        let (reader, writer) = nonblocking_pipe()?;
        WAKE_FDS[self.slot].store(writer.as_raw_fd(), Ordering::SeqCst);
        self.reader = File::from(reader);
        self.writer = writer;
        Ok(())
    }
}

impl Drop for SignalPipe {
    fn drop(&mut self) {
        WAKE_FDS[self.slot].store(-1, Ordering::SeqCst);
        for (signo, count) in self.watching.drain() {
            release(signo, count);
        }
    }
}

fn nonblocking_pipe() -> Result<(OwnedFd, OwnedFd)> {
    let (reader, writer) = nix::unistd::pipe()?;
    for fd in [reader.as_raw_fd(), writer.as_raw_fd()] {
        fcntl(fd, FcntlArg::F_SETFL(OFlag::O_NONBLOCK))?;
        fcntl(fd, FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC))?;
    }
    Ok((reader, writer))
}

/// Give back `count` process-wide watches of `signo`, restoring the previous
/// disposition after the last.
fn release(signo: i32, count: usize) {
    let mut installed = INSTALLED.lock();
    let Some(entry) = installed.get_mut(&signo) else {
        return;
    };
    entry.watchers = entry.watchers.saturating_sub(count);
    if entry.watchers > 0 {
        return;
    }
    if let (Some(entry), Ok(signal)) = (installed.remove(&signo), Signal::try_from(signo)) {
        // SAFETY: reinstates the disposition that was active before the first watch.
        let _ = unsafe { sigaction(signal, &entry.previous) };
        debug!("Signal handler restored for {}", signal);
    }
}
