/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Implementation of [microtasks](https://html.spec.whatwg.org/multipage/#microtask) and
//! the per-thread microtask queue that drives every stream algorithm.
//!
//! Promise reactions are enqueued as microtasks. Host algorithms (start, pull,
//! write, transform...) are futures, spawned as local tasks which are resumed
//! from a checkpoint once their waker fires. Awaiting a [`Promise`] performs a
//! checkpoint, so any executor polling the outermost future drives the queue.
//!
//! [`Promise`]: crate::promise::Promise

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::task::{Context, Waker};

use futures::future::LocalBoxFuture;
use futures::task::{ArcWake, waker};
use futures::FutureExt;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

/// A job run to completion during a checkpoint.
pub type Microtask = Box<dyn FnOnce()>;

type TaskId = usize;

/// Tasks woken since the last checkpoint, plus the wakers of whoever is
/// driving the loop from the outside. Wakers may fire from any thread.
#[derive(Default)]
struct WakeQueue {
    woken: Mutex<VecDeque<TaskId>>,
    drivers: Mutex<Vec<Waker>>,
}

impl WakeQueue {
    fn wake_drivers(&self) {
        let drivers = std::mem::take(&mut *self.drivers.lock());
        for driver in drivers {
            driver.wake();
        }
    }
}

struct TaskWaker {
    id: TaskId,
    queue: Arc<WakeQueue>,
}

impl ArcWake for TaskWaker {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        arc_self.queue.woken.lock().push_back(arc_self.id);
        arc_self.queue.wake_drivers();
    }
}

/// A collection of microtasks in FIFO order, and the local tasks waiting to be resumed.
#[derive(Default)]
pub struct MicrotaskQueue {
    /// The list of enqueued microtasks that will be invoked at the next microtask checkpoint.
    microtask_queue: RefCell<VecDeque<Microtask>>,
    tasks: RefCell<FxHashMap<TaskId, LocalBoxFuture<'static, ()>>>,
    next_task_id: Cell<TaskId>,
    wake_queue: Arc<WakeQueue>,
    /// <https://html.spec.whatwg.org/multipage/#performing-a-microtask-checkpoint>
    performing_a_microtask_checkpoint: Cell<bool>,
    /// Set while a task is being polled outside of a checkpoint.
    polling_task: Cell<bool>,
}

thread_local!(static MICROTASK_QUEUE: MicrotaskQueue = MicrotaskQueue::default());

/// Restores a flag to its previous value when dropped.
struct FlagGuard<'a> {
    flag: &'a Cell<bool>,
    previous: bool,
}

impl<'a> FlagGuard<'a> {
    fn set(flag: &'a Cell<bool>) -> FlagGuard<'a> {
        let previous = flag.replace(true);
        FlagGuard { flag, previous }
    }
}

impl Drop for FlagGuard<'_> {
    fn drop(&mut self) {
        self.flag.set(self.previous);
    }
}

impl MicrotaskQueue {
    /// Add a new microtask to this queue. It will be invoked as part of the next
    /// microtask checkpoint.
    pub fn enqueue(&self, job: Microtask) {
        self.microtask_queue.borrow_mut().push_back(job);
        if !self.performing_a_microtask_checkpoint.get() {
            self.wake_queue.wake_drivers();
        }
    }

    /// Poll `future` once right away, and keep it as a local task if it is not done.
    pub fn spawn(&self, future: LocalBoxFuture<'static, ()>) {
        let id = self.next_task_id.get();
        self.next_task_id.set(id.wrapping_add(1));
        self.poll_task(id, future);
    }

    fn poll_task(&self, id: TaskId, mut task: LocalBoxFuture<'static, ()>) {
        let waker = waker(Arc::new(TaskWaker {
            id,
            queue: self.wake_queue.clone(),
        }));
        let mut cx = Context::from_waker(&waker);
        let pending = {
            let _guard = FlagGuard::set(&self.polling_task);
            task.poll_unpin(&mut cx).is_pending()
        };
        if pending {
            self.tasks.borrow_mut().insert(id, task);
        }
    }

    fn resume_task(&self, id: TaskId) {
        // A task may be woken more than once, or after it completed.
        let task = self.tasks.borrow_mut().remove(&id);
        if let Some(task) = task {
            self.poll_task(id, task);
        }
    }

    /// <https://html.spec.whatwg.org/multipage/#perform-a-microtask-checkpoint>
    /// Perform a microtask checkpoint, executing all queued microtasks and
    /// resuming woken tasks until there is nothing left to run.
    pub fn checkpoint(&self) {
        if self.performing_a_microtask_checkpoint.get() || self.polling_task.get() {
            return;
        }

        // Step 1
        let _guard = FlagGuard::set(&self.performing_a_microtask_checkpoint);
        debug!("Now performing a microtask checkpoint");

        // Step 2
        loop {
            let job = self.microtask_queue.borrow_mut().pop_front();
            if let Some(job) = job {
                job();
                continue;
            }
            let woken = self.wake_queue.woken.lock().pop_front();
            match woken {
                Some(id) => self.resume_task(id),
                None => break,
            }
        }
    }

    /// Remember the waker of a future driving the loop from outside, so that
    /// it is polled again when a task is woken or a microtask is queued.
    pub fn register_driver(&self, driver: &Waker) {
        // Tasks are resumed by their own waker.
        if self.performing_a_microtask_checkpoint.get() || self.polling_task.get() {
            return;
        }
        let mut drivers = self.wake_queue.drivers.lock();
        if !drivers.iter().any(|known| known.will_wake(driver)) {
            drivers.push(driver.clone());
        }
    }

    pub fn empty(&self) -> bool {
        self.microtask_queue.borrow().is_empty() && self.wake_queue.woken.lock().is_empty()
    }

    /// The number of spawned tasks that have not completed yet.
    pub fn pending_tasks(&self) -> usize {
        self.tasks.borrow().len()
    }
}

/// Queue a microtask on the current thread.
pub fn enqueue_microtask(job: impl FnOnce() + 'static) {
    MICROTASK_QUEUE.with(|queue| queue.enqueue(Box::new(job)));
}

/// Spawn a local task on the current thread. The future is polled once before
/// this returns.
pub fn spawn_local(future: impl Future<Output = ()> + 'static) {
    MICROTASK_QUEUE.with(|queue| queue.spawn(future.boxed_local()));
}

/// Run all microtasks and woken tasks of the current thread.
pub fn checkpoint() {
    MICROTASK_QUEUE.with(|queue| queue.checkpoint());
}

pub(crate) fn register_driver(driver: &Waker) {
    MICROTASK_QUEUE.with(|queue| queue.register_driver(driver));
}

/// Whether the current thread has no microtask or woken task left to run.
pub fn is_idle() -> bool {
    MICROTASK_QUEUE.with(|queue| queue.empty())
}
