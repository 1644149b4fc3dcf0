//! Coroutine tasks.
//!
//! Every spawned future is one execution context with its own integer id.
//! Wakers are the only objects that may cross threads: they push the task id
//! onto a mutex-guarded ready list, and the driver turns woken ids into
//! resume microtasks on its next drain.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};

use futures::FutureExt;
use futures::future::LocalBoxFuture;
use futures::task::{ArcWake, waker};
use parking_lot::Mutex;
use tracing::trace;

use crate::driver::{ContextId, Driver, Interrupt, LoopExit, Microtask};
use crate::error::{Error, Result};
use crate::promise::Promise;

/// Task ids woken since the last drain, plus the top-level wake flag.
#[derive(Debug, Default)]
pub(crate) struct ReadyList {
    tasks: Mutex<VecDeque<u64>>,
    main: AtomicBool,
}

impl ReadyList {
    fn push(&self, task: u64) {
        self.tasks.lock().push_back(task);
    }

    fn drain(&self) -> Vec<u64> {
        self.tasks.lock().drain(..).collect()
    }

    fn take_main(&self) -> bool {
        self.main.swap(false, Ordering::AcqRel)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.tasks.lock().is_empty()
    }

    pub(crate) fn clear(&self) {
        self.tasks.lock().clear();
        self.main.store(false, Ordering::Release);
    }
}

/// Waker for a spawned task.
pub(crate) struct TaskWaker {
    id: u64,
    ready: Arc<ReadyList>,
    /// Set while a resume is pending, so repeated wakes queue one poll.
    scheduled: AtomicBool,
}

impl ArcWake for TaskWaker {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        if !arc_self.scheduled.swap(true, Ordering::AcqRel) {
            arc_self.ready.push(arc_self.id);
        }
    }
}

/// Waker for the top-level future driven by [`Driver::block_on`].
struct MainWaker {
    ready: Arc<ReadyList>,
}

impl ArcWake for MainWaker {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        arc_self.ready.main.store(true, Ordering::Release);
    }
}

pub(crate) struct TaskSlot {
    /// `None` while the task is being polled.
    future: Option<LocalBoxFuture<'static, ()>>,
    waker: Arc<TaskWaker>,
}

impl Driver {
    /// Spawn a coroutine and return the promise its result settles.
    ///
    /// The coroutine first runs on the next microtask drain.
    pub fn spawn<T, F>(&self, future: F) -> Promise<T>
    where
        T: Clone + 'static,
        F: Future<Output = Result<T>> + 'static,
    {
        let inner = &self.inner;
        let promise = Promise::pending();
        let settle = promise.clone();
        let task = async move {
            match future.await {
                Ok(value) => settle.resolve(value),
                Err(error) => settle.reject(error),
            }
        };

        let id = inner.next_context_id.get() + 1;
        inner.next_context_id.set(id);
        let waker = Arc::new(TaskWaker {
            id,
            ready: Arc::clone(&inner.ready),
            scheduled: AtomicBool::new(true),
        });
        inner.tasks.borrow_mut().insert(
            id,
            TaskSlot {
                future: Some(task.boxed_local()),
                waker,
            },
        );
        inner.microtasks.borrow_mut().push_back(Microtask::Resume(id));
        inner.metrics.record_spawn();
        trace!("Spawned task {}", id);
        promise
    }

    /// Number of live coroutines.
    pub fn task_count(&self) -> usize {
        self.inner.tasks.borrow().len()
    }

    /// Drive `future` from top-level code, running the loop while it is pending.
    ///
    /// Fails with [`Error::Unresumed`] if the loop runs out of work first.
    pub fn block_on<F: Future>(&self, future: F) -> Result<F::Output> {
        let inner = &self.inner;
        if matches!(inner.current.get(), ContextId::Task(_)) {
            return Err(Error::InsideCoroutine);
        }
        if inner.running.get() {
            return Err(Error::AlreadyRunning);
        }

        let main_waker = waker(Arc::new(MainWaker {
            ready: Arc::clone(&inner.ready),
        }));
        let mut cx = Context::from_waker(&main_waker);
        let mut future = pin!(future);
        inner.stopped.set(false);

        loop {
            inner.ready.take_main();
            if let Poll::Ready(output) = future.as_mut().poll(&mut cx) {
                return Ok(output);
            }
            if inner.ready.take_main() {
                continue;
            }

            inner.awaiting_main.set(true);
            let exit = self.run_loop(false);
            inner.awaiting_main.set(false);
            match exit? {
                LoopExit::MainResumed => continue,
                LoopExit::Drained | LoopExit::Stopped => return Err(Error::Unresumed),
            }
        }
    }

    /// Wait for `promise` from top-level code.
    pub fn wait<T: Clone + 'static>(&self, promise: &Promise<T>) -> Result<T> {
        self.block_on(self.await_promise(promise))?
    }

    /// Move woken task ids onto the microtask queue.
    pub(crate) fn collect_woken(&self) {
        let inner = &self.inner;
        let woken = inner.ready.drain();
        if !woken.is_empty() {
            let mut microtasks = inner.microtasks.borrow_mut();
            microtasks.extend(woken.into_iter().map(Microtask::Resume));
        }
        if inner.awaiting_main.get() && inner.ready.take_main() {
            self.set_interrupt(Interrupt::ResumeMain);
        }
    }

    pub(crate) fn poll_task(&self, id: u64) {
        let inner = &self.inner;
        let taken = {
            let mut tasks = inner.tasks.borrow_mut();
            tasks
                .get_mut(&id)
                .and_then(|slot| slot.future.take().map(|f| (f, Arc::clone(&slot.waker))))
        };
        let Some((mut future, task_waker)) = taken else {
            return;
        };

        task_waker.scheduled.store(false, Ordering::Release);
        let task_waker = waker(task_waker);
        let mut cx = Context::from_waker(&task_waker);

        let previous = inner.current.replace(ContextId::Task(id));
        let poll = future.as_mut().poll(&mut cx);
        inner.current.set(previous);

        match poll {
            Poll::Ready(()) => {
                let slot = inner.tasks.borrow_mut().remove(&id);
                drop(slot);
                self.clear_locals(ContextId::Task(id));
                inner.metrics.record_completion();
                trace!("Task {} completed", id);
            }
            Poll::Pending => {
                let mut tasks = inner.tasks.borrow_mut();
                if let Some(slot) = tasks.get_mut(&id) {
                    slot.future = Some(future);
                    return;
                }
                // Dropped by shutdown while suspended.
                drop(tasks);
                drop(future);
            }
        }
    }
}
