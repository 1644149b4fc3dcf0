use super::*;
use std::io::Write;
use std::os::fd::AsRawFd;
use std::os::unix::net::UnixStream;

use nix::sys::signal::{Signal, raise};

static SIGNAL_TESTS: parking_lot::Mutex<()> = parking_lot::const_mutex(());

fn timer(id: u64, after: Duration) -> Activation {
    Activation {
        id: CallbackId::from_raw(id),
        kind: CallbackKind::Timer {
            interval: after,
            repeat: false,
        },
        expiration: Some(Instant::now() + after),
    }
}

#[test]
fn test_ceil_millis() {
    assert_eq!(ceil_millis(Duration::ZERO), Duration::ZERO);
    assert_eq!(ceil_millis(Duration::from_micros(1)), Duration::from_millis(1));
    assert_eq!(ceil_millis(Duration::from_micros(2500)), Duration::from_millis(3));
    assert_eq!(ceil_millis(Duration::from_millis(7)), Duration::from_millis(7));
}

#[test]
fn test_nonblocking_dispatch_with_nothing_watched() {
    let mut backend = PollBackend::default();
    let mut ready = Vec::new();
    backend.dispatch(false, &mut ready).unwrap();
    backend.dispatch(true, &mut ready).unwrap();
    assert!(ready.is_empty());
}

#[test]
fn test_timers_fire_in_expiration_order() {
    let mut backend = PollBackend::default();
    backend
        .activate(&[
            timer(1, Duration::from_millis(30)),
            timer(2, Duration::from_millis(10)),
            timer(3, Duration::from_millis(20)),
        ])
        .unwrap();
    assert_eq!(backend.timer_count(), 3);

    let mut fired = Vec::new();
    while fired.len() < 3 {
        let mut ready = Vec::new();
        backend.dispatch(true, &mut ready).unwrap();
        fired.extend(ready);
    }
    assert_eq!(
        fired,
        vec![
            CallbackId::from_raw(2),
            CallbackId::from_raw(3),
            CallbackId::from_raw(1)
        ]
    );
    assert_eq!(backend.timer_count(), 0);
}

#[test]
fn test_equal_expirations_keep_activation_order() {
    let mut backend = PollBackend::default();
    let expiration = Instant::now();
    let activations: Vec<Activation> = [5, 3, 9]
        .into_iter()
        .map(|id| Activation {
            id: CallbackId::from_raw(id),
            kind: CallbackKind::Timer {
                interval: Duration::ZERO,
                repeat: false,
            },
            expiration: Some(expiration),
        })
        .collect();
    backend.activate(&activations).unwrap();

    let mut ready = Vec::new();
    backend.dispatch(false, &mut ready).unwrap();
    assert_eq!(
        ready,
        vec![
            CallbackId::from_raw(5),
            CallbackId::from_raw(3),
            CallbackId::from_raw(9)
        ]
    );
}

#[test]
fn test_deactivated_timer_never_fires() {
    let mut backend = PollBackend::default();
    backend.activate(&[timer(1, Duration::ZERO)]).unwrap();
    backend.deactivate(
        CallbackId::from_raw(1),
        CallbackKind::Timer {
            interval: Duration::ZERO,
            repeat: false,
        },
    );
    let mut ready = Vec::new();
    backend.dispatch(false, &mut ready).unwrap();
    assert!(ready.is_empty());
}

#[test]
fn test_reactivated_timer_uses_latest_expiration() {
    let mut backend = PollBackend::default();
    let id = CallbackId::from_raw(1);
    let kind = CallbackKind::Timer {
        interval: Duration::from_secs(60),
        repeat: false,
    };
    backend.activate(&[timer(1, Duration::ZERO)]).unwrap();
    backend.deactivate(id, kind);
    backend.activate(&[timer(1, Duration::from_secs(60))]).unwrap();

    let mut ready = Vec::new();
    backend.dispatch(false, &mut ready).unwrap();
    assert!(ready.is_empty());
    assert_eq!(backend.timer_count(), 1);
}

#[test]
fn test_timer_without_expiration_never_fires() {
    let mut backend = PollBackend::new(Some(Duration::from_millis(5)));
    backend
        .activate(&[Activation {
            id: CallbackId::from_raw(1),
            kind: CallbackKind::Timer {
                interval: Duration::MAX,
                repeat: false,
            },
            expiration: None,
        }])
        .unwrap();
    assert_eq!(backend.timer_count(), 1);
    assert!(backend.timers.is_empty());

    let mut ready = Vec::new();
    backend.dispatch(true, &mut ready).unwrap();
    backend.dispatch(false, &mut ready).unwrap();
    assert!(ready.is_empty());
    assert_eq!(backend.timeout(true), Some(Duration::from_millis(5)));
}

#[test]
fn test_cancelled_timers_do_not_accumulate() {
    let mut backend = PollBackend::default();
    let kind = CallbackKind::Timer {
        interval: Duration::from_secs(3600),
        repeat: false,
    };
    for raw in 0..1000 {
        backend.activate(&[timer(raw, Duration::from_secs(3600))]).unwrap();
        backend.deactivate(CallbackId::from_raw(raw), kind);
    }
    assert_eq!(backend.timer_count(), 0);
    assert!(backend.timers.len() <= COMPACT_SLACK + 1);

    for _ in 0..1000 {
        backend.activate(&[timer(7, Duration::from_secs(3600))]).unwrap();
    }
    assert_eq!(backend.timer_count(), 1);
    assert!(backend.timers.len() <= COMPACT_SLACK + 3);
}

#[test]
fn test_max_block_caps_wait() {
    let mut backend = PollBackend::new(Some(Duration::from_millis(5)));
    backend.activate(&[timer(1, Duration::from_secs(60))]).unwrap();

    let started = Instant::now();
    let mut ready = Vec::new();
    backend.dispatch(true, &mut ready).unwrap();
    assert!(ready.is_empty());
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[test]
fn test_readable_and_writable_streams() {
    let (mut left, right) = UnixStream::pair().unwrap();
    let mut backend = PollBackend::default();
    backend
        .activate(&[
            Activation {
                id: CallbackId::from_raw(1),
                kind: CallbackKind::Readable(right.as_raw_fd()),
                expiration: None,
            },
            Activation {
                id: CallbackId::from_raw(2),
                kind: CallbackKind::Writable(left.as_raw_fd()),
                expiration: None,
            },
        ])
        .unwrap();
    assert_eq!(backend.stream_count(), 2);

    let mut ready = Vec::new();
    backend.dispatch(false, &mut ready).unwrap();
    assert_eq!(ready, vec![CallbackId::from_raw(2)]);

    left.write_all(b"x").unwrap();
    ready.clear();
    backend.dispatch(false, &mut ready).unwrap();
    assert_eq!(ready, vec![CallbackId::from_raw(1), CallbackId::from_raw(2)]);

    backend.deactivate(CallbackId::from_raw(1), CallbackKind::Readable(right.as_raw_fd()));
    ready.clear();
    backend.dispatch(false, &mut ready).unwrap();
    assert_eq!(ready, vec![CallbackId::from_raw(2)]);
}

#[test]
fn test_streams_reported_before_timers() {
    let (left, _right) = UnixStream::pair().unwrap();
    let mut backend = PollBackend::default();
    backend
        .activate(&[
            timer(1, Duration::ZERO),
            Activation {
                id: CallbackId::from_raw(2),
                kind: CallbackKind::Writable(left.as_raw_fd()),
                expiration: None,
            },
        ])
        .unwrap();

    let mut ready = Vec::new();
    backend.dispatch(false, &mut ready).unwrap();
    assert_eq!(ready, vec![CallbackId::from_raw(2), CallbackId::from_raw(1)]);
}

fn signal_activation(id: u64, signal: Signal) -> Activation {
    Activation {
        id: CallbackId::from_raw(id),
        kind: CallbackKind::Signal(signal as i32),
        expiration: None,
    }
}

#[test]
fn test_signal_delivery() {
    let _serial = SIGNAL_TESTS.lock();
    let signo = Signal::SIGUSR2 as i32;
    let mut backend = PollBackend::default();
    backend
        .activate(&[Activation {
            id: CallbackId::from_raw(1),
            kind: CallbackKind::Signal(signo),
            expiration: None,
        }])
        .unwrap();

    raise(Signal::SIGUSR2).unwrap();

    let mut ready = Vec::new();
    for _ in 0..10 {
        backend.dispatch(false, &mut ready).unwrap();
        if !ready.is_empty() {
            break;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(ready, vec![CallbackId::from_raw(1)]);

    backend.deactivate(CallbackId::from_raw(1), CallbackKind::Signal(signo));
}

#[test]
fn test_dropping_one_backend_keeps_signals_flowing_to_another() {
    let _serial = SIGNAL_TESTS.lock();
    let mut first = PollBackend::new(Some(Duration::from_millis(200)));
    first.activate(&[signal_activation(1, Signal::SIGUSR1)]).unwrap();
    {
        let mut second = PollBackend::new(Some(Duration::from_millis(200)));
        second.activate(&[signal_activation(2, Signal::SIGUSR1)]).unwrap();
    }

    raise(Signal::SIGUSR1).unwrap();

    let mut ready = Vec::new();
    for _ in 0..5 {
        first.dispatch(true, &mut ready).unwrap();
        if !ready.is_empty() {
            break;
        }
    }
    assert_eq!(ready, vec![CallbackId::from_raw(1)]);

    first.deactivate(CallbackId::from_raw(1), CallbackKind::Signal(Signal::SIGUSR1 as i32));
}

#[test]
fn test_each_backend_sees_only_its_own_signals() {
    let _serial = SIGNAL_TESTS.lock();
    let mut first = PollBackend::default();
    let mut second = PollBackend::default();
    first.activate(&[signal_activation(1, Signal::SIGUSR1)]).unwrap();
    second
        .activate(&[
            signal_activation(2, Signal::SIGUSR1),
            signal_activation(3, Signal::SIGUSR2),
        ])
        .unwrap();

    raise(Signal::SIGUSR1).unwrap();
    raise(Signal::SIGUSR2).unwrap();

    let mut from_first = Vec::new();
    let mut from_second = Vec::new();
    for _ in 0..10 {
        if from_first.is_empty() {
            first.dispatch(false, &mut from_first).unwrap();
        }
        if from_second.len() < 2 {
            second.dispatch(false, &mut from_second).unwrap();
        }
        if !from_first.is_empty() && from_second.len() == 2 {
            break;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(from_first, vec![CallbackId::from_raw(1)]);
    from_second.sort();
    assert_eq!(from_second, vec![CallbackId::from_raw(2), CallbackId::from_raw(3)]);

    first.deactivate(CallbackId::from_raw(1), CallbackKind::Signal(Signal::SIGUSR1 as i32));
    second.deactivate(CallbackId::from_raw(2), CallbackKind::Signal(Signal::SIGUSR1 as i32));
    second.deactivate(CallbackId::from_raw(3), CallbackKind::Signal(Signal::SIGUSR2 as i32));
}
