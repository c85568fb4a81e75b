/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Sources and sinks shared by the stream tests.

use std::cell::{Cell, RefCell};
use std::fmt::Display;
use std::rc::Rc;

use futures::FutureExt;
use futures::channel::oneshot;
use streams::readablestreamdefaultcontroller::ReadableStreamDefaultController;
use streams::writablestreamdefaultcontroller::WritableStreamDefaultController;
use streams::{Error, HostFuture, UnderlyingSink, UnderlyingSource, settled};

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// What happened to a sink, in order.
#[derive(Clone, Default)]
pub struct SinkLog(Rc<RefCell<Vec<String>>>);

impl SinkLog {
    pub fn push(&self, entry: String) {
        self.0.borrow_mut().push(entry);
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.borrow().clone()
    }
}

/// A sink recording every call. Writing `fail_on` fails, and the first write
/// after a gate is installed only completes once the gate is opened.
#[derive(Default)]
pub struct RecordingSink {
    pub log: SinkLog,
    pub fail_on: Option<String>,
    pub gate: RefCell<Option<oneshot::Receiver<()>>>,
}

impl RecordingSink {
    pub fn new(log: &SinkLog) -> RecordingSink {
        RecordingSink {
            log: log.clone(),
            ..Default::default()
        }
    }

    pub fn failing_on(log: &SinkLog, chunk: &str) -> RecordingSink {
        RecordingSink {
            log: log.clone(),
            fail_on: Some(chunk.to_owned()),
            ..Default::default()
        }
    }

    /// Returns the sender opening the gate.
    pub fn gated(log: &SinkLog) -> (RecordingSink, oneshot::Sender<()>) {
        let (sender, receiver) = oneshot::channel();
        let sink = RecordingSink {
            log: log.clone(),
            gate: RefCell::new(Some(receiver)),
            ..Default::default()
        };
        (sink, sender)
    }
}

impl<T: Clone + Display + 'static> UnderlyingSink<T> for RecordingSink {
    fn write(&self, chunk: T, _controller: &WritableStreamDefaultController<T>) -> HostFuture {
        let chunk = chunk.to_string();
        self.log.push(format!("write:{}", chunk));
        if self.fail_on.as_deref() == Some(chunk.as_str()) {
            return settled(Err(Error::reason("sink failure")));
        }
        match self.gate.borrow_mut().take() {
            Some(gate) => async move {
                let _ = gate.await;
                Ok(())
            }
            .boxed_local(),
            None => settled(Ok(())),
        }
    }

    fn close(&self) -> HostFuture {
        self.log.push("close".to_owned());
        settled(Ok(()))
    }

    fn abort(&self, reason: Error) -> HostFuture {
        self.log.push(format!("abort:{}", reason));
        settled(Ok(()))
    }
}

/// Enqueues 1, 2, 3... one per pull, and closes after `limit` chunks if set.
#[derive(Default)]
pub struct CountingSource {
    pub pulls: Rc<Cell<usize>>,
    pub cancel_reason: Rc<RefCell<Option<Error>>>,
    pub limit: Option<i32>,
    next: Cell<i32>,
}

impl CountingSource {
    pub fn unbounded() -> CountingSource {
        CountingSource::default()
    }

    pub fn with_limit(limit: i32) -> CountingSource {
        CountingSource {
            limit: Some(limit),
            ..Default::default()
        }
    }
}

impl UnderlyingSource<i32> for CountingSource {
    fn pull(&self, controller: &ReadableStreamDefaultController<i32>) -> HostFuture {
        self.pulls.set(self.pulls.get() + 1);
        if self.limit.is_some_and(|limit| self.next.get() >= limit) {
            return settled(controller.close());
        }
        self.next.set(self.next.get() + 1);
        settled(controller.enqueue(self.next.get()))
    }

    fn cancel(&self, reason: Error) -> HostFuture {
        *self.cancel_reason.borrow_mut() = Some(reason);
        settled(Ok(()))
    }
}

/// A source that never produces anything on its own.
pub struct IdleSource {
    pub cancel_reason: Rc<RefCell<Option<Error>>>,
}

impl IdleSource {
    pub fn new() -> IdleSource {
        IdleSource {
            cancel_reason: Rc::new(RefCell::new(None)),
        }
    }
}

impl<T: Clone + 'static> UnderlyingSource<T> for IdleSource {
    fn cancel(&self, reason: Error) -> HostFuture {
        *self.cancel_reason.borrow_mut() = Some(reason);
        settled(Ok(()))
    }
}
