//! Scripted backend for tests.
//!
//! Nothing becomes ready on its own: readiness is pushed through a
//! [`ManualHandle`] or produced by a dispatch hook. Every call the driver
//! makes is recorded so tests can assert on the tick engine's behavior.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use super::Backend;
use crate::callback::{Activation, CallbackId, CallbackKind};
use crate::error::Result;

type DispatchHook = Box<dyn FnMut(&[Activation], &mut Vec<CallbackId>)>;

#[derive(Default)]
struct ManualState {
    active: BTreeMap<CallbackId, Activation>,
    activations: Vec<Activation>,
    deactivations: Vec<CallbackId>,
    pending: Vec<CallbackId>,
    blocking: Vec<bool>,
    forks: usize,
    hook: Option<DispatchHook>,
}

/// Backend whose readiness is controlled by a [`ManualHandle`].
pub struct ManualBackend {
    state: Rc<RefCell<ManualState>>,
}

/// Test-side handle onto a [`ManualBackend`].
#[derive(Clone)]
pub struct ManualHandle {
    state: Rc<RefCell<ManualState>>,
}

impl ManualBackend {
    /// Create a backend and the handle that controls it.
    pub fn new() -> (Self, ManualHandle) {
        let state = Rc::new(RefCell::new(ManualState::default()));
        (
            Self {
                state: Rc::clone(&state),
            },
            ManualHandle { state },
        )
    }
}

impl ManualHandle {
    /// Report `id` as ready on the next dispatch.
    pub fn push_ready(&self, id: CallbackId) {
        self.state.borrow_mut().pending.push(id);
    }

    /// Install a hook run on every dispatch with the active callbacks.
    ///
    /// The hook must not call back into this handle.
    pub fn on_dispatch<F>(&self, hook: F)
    where
        F: FnMut(&[Activation], &mut Vec<CallbackId>) + 'static,
    {
        self.state.borrow_mut().hook = Some(Box::new(hook));
    }

    /// Every activation received, in order.
    pub fn activations(&self) -> Vec<Activation> {
        self.state.borrow().activations.clone()
    }

    /// Every deactivation received, in order.
    pub fn deactivations(&self) -> Vec<CallbackId> {
        self.state.borrow().deactivations.clone()
    }

    /// Whether `id` is currently activated.
    pub fn is_active(&self, id: CallbackId) -> bool {
        self.state.borrow().active.contains_key(&id)
    }

    /// Currently activated callbacks.
    pub fn active(&self) -> Vec<CallbackId> {
        self.state.borrow().active.keys().copied().collect()
    }

    /// Number of dispatches so far.
    pub fn dispatch_count(&self) -> usize {
        self.state.borrow().blocking.len()
    }

    /// The `blocking` flag of every dispatch, in order.
    pub fn blocking_history(&self) -> Vec<bool> {
        self.state.borrow().blocking.clone()
    }

    /// Number of `after_fork` calls.
    pub fn fork_count(&self) -> usize {
        self.state.borrow().forks
    }
}

impl Backend for ManualBackend {
    fn name(&self) -> &'static str {
        "manual"
    }

    fn activate(&mut self, callbacks: &[Activation]) -> Result<()> {
        let mut state = self.state.borrow_mut();
        for activation in callbacks {
            state.active.insert(activation.id, *activation);
            state.activations.push(*activation);
        }
        Ok(())
    }

    fn deactivate(&mut self, id: CallbackId, _kind: CallbackKind) {
        let mut state = self.state.borrow_mut();
        state.active.remove(&id);
        state.deactivations.push(id);
    }

    fn dispatch(&mut self, blocking: bool, ready: &mut Vec<CallbackId>) -> Result<()> {
        let (mut hook, active) = {
            let mut state = self.state.borrow_mut();
            state.blocking.push(blocking);
            ready.append(&mut state.pending);
            let active: Vec<Activation> = state.active.values().copied().collect();
            (state.hook.take(), active)
        };
        if let Some(hook) = hook.as_mut() {
            hook(&active, ready);
        }
        let mut state = self.state.borrow_mut();
        if state.hook.is_none() {
            state.hook = hook;
        }
        Ok(())
    }

    fn after_fork(&mut self) -> Result<()> {
        self.state.borrow_mut().forks += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_activation_lifecycle() {
        let (mut backend, handle) = ManualBackend::new();
        let id = CallbackId::from_raw(1);
        backend
            .activate(&[Activation {
                id,
                kind: CallbackKind::Readable(0),
                expiration: None,
            }])
            .unwrap();
        assert!(handle.is_active(id));
        assert_eq!(handle.activations().len(), 1);

        backend.deactivate(id, CallbackKind::Readable(0));
        assert!(!handle.is_active(id));
        assert_eq!(handle.deactivations(), vec![id]);
    }

    #[test]
    fn test_pushed_ready_ids_are_reported_once() {
        let (mut backend, handle) = ManualBackend::new();
        handle.push_ready(CallbackId::from_raw(4));
        handle.push_ready(CallbackId::from_raw(4));

        let mut ready = Vec::new();
        backend.dispatch(true, &mut ready).unwrap();
        assert_eq!(ready, vec![CallbackId::from_raw(4), CallbackId::from_raw(4)]);

        ready.clear();
        backend.dispatch(false, &mut ready).unwrap();
        assert!(ready.is_empty());
        assert_eq!(handle.dispatch_count(), 2);
        assert_eq!(handle.blocking_history(), vec![true, false]);
    }

    #[test]
    fn test_dispatch_hook_sees_active_callbacks() {
        let (mut backend, handle) = ManualBackend::new();
        handle.on_dispatch(|active, ready| {
            ready.extend(active.iter().map(|a| a.id));
        });
        backend
            .activate(&[Activation {
                id: CallbackId::from_raw(9),
                kind: CallbackKind::Signal(10),
                expiration: None,
            }])
            .unwrap();

        let mut ready = Vec::new();
        backend.dispatch(false, &mut ready).unwrap();
        backend.dispatch(false, &mut ready).unwrap();
        assert_eq!(ready, vec![CallbackId::from_raw(9), CallbackId::from_raw(9)]);
    }

    #[test]
    fn test_after_fork_is_counted() {
        let (mut backend, handle) = ManualBackend::new();
        backend.after_fork().unwrap();
        assert_eq!(handle.fork_count(), 1);
        assert_eq!(backend.name(), "manual");
    }
}
