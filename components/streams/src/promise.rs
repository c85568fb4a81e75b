/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! A settle-once completion handle with any number of waiters.
//!
//! A [`Promise`] is resolved or rejected at most once. Native handlers appended
//! to it run as microtasks, whether they were appended before or after it
//! settled. A promise is also a future: awaiting it performs a microtask
//! checkpoint first, then yields the settled value.

use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

use crate::error::{Error, Fallible};
use crate::microtask::{self, enqueue_microtask, spawn_local};

#[derive(Clone)]
enum PromiseState<T> {
    Pending,
    Fulfilled(T),
    Rejected(Error),
}

type Reaction<T> = Box<dyn FnOnce(Fallible<T>)>;

struct PromiseInner<T> {
    state: RefCell<PromiseState<T>>,
    reactions: RefCell<Vec<Reaction<T>>>,
    wakers: RefCell<Vec<Waker>>,
}

pub struct Promise<T> {
    inner: Rc<PromiseInner<T>>,
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Promise<T> {
        Promise {
            inner: self.inner.clone(),
        }
    }
}

impl<T> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match *self.inner.state.borrow() {
            PromiseState::Pending => "pending",
            PromiseState::Fulfilled(_) => "fulfilled",
            PromiseState::Rejected(_) => "rejected",
        };
        f.debug_struct("Promise").field("state", &state).finish()
    }
}

impl<T: Clone + 'static> Default for Promise<T> {
    fn default() -> Promise<T> {
        Promise::new()
    }
}

impl<T: Clone + 'static> Promise<T> {
    pub fn new() -> Promise<T> {
        Promise {
            inner: Rc::new(PromiseInner {
                state: RefCell::new(PromiseState::Pending),
                reactions: RefCell::new(vec![]),
                wakers: RefCell::new(vec![]),
            }),
        }
    }

    pub fn new_resolved(value: T) -> Promise<T> {
        let promise = Promise::new();
        promise.resolve(value);
        promise
    }

    pub fn new_rejected(error: Error) -> Promise<T> {
        let promise = Promise::new();
        promise.reject(error);
        promise
    }

    /// A promise settled with the output of `future`, which is spawned as a
    /// local task and polled once before this returns.
    pub fn from_future<F>(future: F) -> Promise<T>
    where
        F: Future<Output = Fallible<T>> + 'static,
    {
        let promise = Promise::new();
        let settle = promise.clone();
        spawn_local(async move {
            match future.await {
                Ok(value) => settle.resolve(value),
                Err(error) => settle.reject(error),
            }
        });
        promise
    }

    pub fn resolve(&self, value: T) {
        self.settle(PromiseState::Fulfilled(value));
    }

    pub fn reject(&self, error: Error) {
        self.settle(PromiseState::Rejected(error));
    }

    fn settle(&self, state: PromiseState<T>) {
        {
            let mut current = self.inner.state.borrow_mut();
            if !matches!(*current, PromiseState::Pending) {
                debug!("Ignoring the settlement of an already settled promise");
                return;
            }
            *current = state;
        }
        let reactions = std::mem::take(&mut *self.inner.reactions.borrow_mut());
        for reaction in reactions {
            self.queue_reaction(reaction);
        }
        let wakers = std::mem::take(&mut *self.inner.wakers.borrow_mut());
        for waker in wakers {
            waker.wake();
        }
    }

    fn queue_reaction(&self, reaction: Reaction<T>) {
        let Some(result) = self.result() else {
            unreachable!("Reactions are only queued for a settled promise.");
        };
        enqueue_microtask(move || reaction(result));
    }

    /// Run `on_fulfilled` or `on_rejected` in a microtask once this promise settles.
    pub fn append_native_handler<F, R>(&self, on_fulfilled: F, on_rejected: R)
    where
        F: FnOnce(T) + 'static,
        R: FnOnce(Error) + 'static,
    {
        let reaction: Reaction<T> = Box::new(move |result| match result {
            Ok(value) => on_fulfilled(value),
            Err(error) => on_rejected(error),
        });
        if self.is_pending() {
            self.inner.reactions.borrow_mut().push(reaction);
        } else {
            self.queue_reaction(reaction);
        }
    }

    /// Mark a rejection as handled. Reactions are only observed by those who
    /// ask, so this simply appends a handler that does nothing.
    pub fn set_promise_is_handled(&self) {
        self.append_native_handler(|_| {}, |_| {});
    }

    pub fn is_pending(&self) -> bool {
        matches!(*self.inner.state.borrow(), PromiseState::Pending)
    }

    pub fn is_fulfilled(&self) -> bool {
        matches!(*self.inner.state.borrow(), PromiseState::Fulfilled(_))
    }

    pub fn is_rejected(&self) -> bool {
        matches!(*self.inner.state.borrow(), PromiseState::Rejected(_))
    }

    /// The settled value, if any, without waiting.
    pub fn result(&self) -> Option<Fallible<T>> {
        match &*self.inner.state.borrow() {
            PromiseState::Pending => None,
            PromiseState::Fulfilled(value) => Some(Ok(value.clone())),
            PromiseState::Rejected(error) => Some(Err(error.clone())),
        }
    }

    /// Whether both handles refer to the same promise.
    pub fn ptr_eq(&self, other: &Promise<T>) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T: Clone + 'static> Future for Promise<T> {
    type Output = Fallible<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Fallible<T>> {
        microtask::checkpoint();
        if let Some(result) = self.result() {
            return Poll::Ready(result);
        }
        let mut wakers = self.inner.wakers.borrow_mut();
        if !wakers.iter().any(|known| known.will_wake(cx.waker())) {
            wakers.push(cx.waker().clone());
        }
        microtask::register_driver(cx.waker());
        Poll::Pending
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use futures::executor::block_on;

    use super::*;
    use crate::microtask::checkpoint;

    #[test]
    fn test_settles_once() {
        let promise = Promise::new();
        promise.resolve(1);
        promise.resolve(2);
        promise.reject(Error::Undefined);
        assert!(promise.is_fulfilled());
        assert_eq!(promise.result(), Some(Ok(1)));
    }

    #[test]
    fn test_handlers_run_as_microtasks() {
        let promise = Promise::<u8>::new();
        let seen = Rc::new(Cell::new(0));
        let before = seen.clone();
        promise.append_native_handler(move |value| before.set(before.get() + value), |_| {});
        promise.resolve(2);
        assert_eq!(seen.get(), 0);
        checkpoint();
        assert_eq!(seen.get(), 2);

        let after = seen.clone();
        promise.append_native_handler(move |value| after.set(after.get() + value), |_| {});
        assert_eq!(seen.get(), 2);
        checkpoint();
        assert_eq!(seen.get(), 4);
    }

    #[test]
    fn test_rejection_reaches_every_waiter() {
        let promise = Promise::<()>::new();
        let first = promise.clone();
        let second = promise.clone();
        promise.reject(Error::reason("gone"));
        assert_eq!(block_on(first), Err(Error::reason("gone")));
        assert_eq!(block_on(second), Err(Error::reason("gone")));
    }

    #[test]
    fn test_from_future_awaiting_another_promise() {
        let gate = Promise::<u32>::new();
        let waiting = gate.clone();
        let promise = Promise::from_future(async move { Ok(waiting.await? * 2) });
        assert!(promise.is_pending());
        gate.resolve(21);
        assert_eq!(block_on(promise), Ok(42));
    }
}
