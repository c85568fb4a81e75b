/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use crate::error::{Error, Fallible};
use crate::promise::Promise;
use crate::queue::QueueWithSizes;
use crate::queuingstrategy::SizeAlgorithm;
use crate::readablestream::{ReadableStream, WeakReadableStream};
use crate::readablestreamdefaultreader::ReadRequest;
use crate::underlyingsource::{CancelAlgorithm, PullAlgorithm, SourceAlgorithms};

struct ControllerInner<T: Clone + 'static> {
    /// <https://streams.spec.whatwg.org/#readablestreamdefaultcontroller-queue>
    queue: RefCell<QueueWithSizes<T>>,

    /// <https://streams.spec.whatwg.org/#readablestreamdefaultcontroller-pullalgorithm>
    pull_algorithm: RefCell<Option<PullAlgorithm<T>>>,

    /// <https://streams.spec.whatwg.org/#readablestreamdefaultcontroller-cancelalgorithm>
    cancel_algorithm: RefCell<Option<CancelAlgorithm>>,

    /// <https://streams.spec.whatwg.org/#readablestreamdefaultcontroller-stream>
    stream: WeakReadableStream<T>,

    /// <https://streams.spec.whatwg.org/#readablestreamdefaultcontroller-strategyhwm>
    strategy_hwm: f64,

    /// <https://streams.spec.whatwg.org/#readablestreamdefaultcontroller-strategysizealgorithm>
    strategy_size: RefCell<Option<SizeAlgorithm<T>>>,

    /// <https://streams.spec.whatwg.org/#readablestreamdefaultcontroller-closerequested>
    close_requested: Cell<bool>,

    /// <https://streams.spec.whatwg.org/#readablestreamdefaultcontroller-started>
    started: Cell<bool>,

    /// <https://streams.spec.whatwg.org/#readablestreamdefaultcontroller-pulling>
    pulling: Cell<bool>,

    /// <https://streams.spec.whatwg.org/#readablestreamdefaultcontroller-pullagain>
    pull_again: Cell<bool>,
}

/// <https://streams.spec.whatwg.org/#readablestreamdefaultcontroller>
pub struct ReadableStreamDefaultController<T: Clone + 'static> {
    inner: Rc<ControllerInner<T>>,
}

impl<T: Clone + 'static> Clone for ReadableStreamDefaultController<T> {
    fn clone(&self) -> ReadableStreamDefaultController<T> {
        ReadableStreamDefaultController {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Clone + 'static> fmt::Debug for ReadableStreamDefaultController<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadableStreamDefaultController")
            .field("queue_size", &self.inner.queue.borrow().total_size())
            .field("close_requested", &self.inner.close_requested.get())
            .field("started", &self.inner.started.get())
            .field("pulling", &self.inner.pulling.get())
            .finish()
    }
}

impl<T: Clone + 'static> ReadableStreamDefaultController<T> {
    pub(crate) fn new(
        stream: WeakReadableStream<T>,
        strategy_hwm: f64,
        strategy_size: SizeAlgorithm<T>,
    ) -> ReadableStreamDefaultController<T> {
        ReadableStreamDefaultController {
            inner: Rc::new(ControllerInner {
                queue: RefCell::new(QueueWithSizes::default()),
                pull_algorithm: RefCell::new(None),
                cancel_algorithm: RefCell::new(None),
                stream,
                strategy_hwm,
                strategy_size: RefCell::new(Some(strategy_size)),
                close_requested: Default::default(),
                started: Default::default(),
                pulling: Default::default(),
                pull_again: Default::default(),
            }),
        }
    }

    fn stream(&self) -> Option<ReadableStream<T>> {
        self.inner.stream.upgrade()
    }

    /// <https://streams.spec.whatwg.org/#set-up-readable-stream-default-controller>
    pub(crate) fn set_up(&self, algorithms: SourceAlgorithms<T>) {
        let SourceAlgorithms {
            start,
            pull,
            cancel,
        } = algorithms;

        // Set controller.[[pullAlgorithm]] to pullAlgorithm.
        *self.inner.pull_algorithm.borrow_mut() = Some(pull);

        // Set controller.[[cancelAlgorithm]] to cancelAlgorithm.
        *self.inner.cancel_algorithm.borrow_mut() = Some(cancel);

        // Let startResult be the result of performing startAlgorithm.
        // Let startPromise be a promise resolved with startResult.
        let start_promise = Promise::from_future(start(self));

        // Upon fulfillment of startPromise,
        let fulfilled = self.clone();
        // Upon rejection of startPromise with reason r,
        let rejected = self.clone();
        start_promise.append_native_handler(
            move |()| {
                // Set controller.[[started]] to true.
                fulfilled.inner.started.set(true);

                // Assert: controller.[[pulling]] is false.
                assert!(!fulfilled.inner.pulling.get());

                // Assert: controller.[[pullAgain]] is false.
                assert!(!fulfilled.inner.pull_again.get());

                // Perform ! ReadableStreamDefaultControllerCallPullIfNeeded(controller).
                fulfilled.call_pull_if_needed();
            },
            move |error| {
                // Perform ! ReadableStreamDefaultControllerError(controller, r).
                rejected.error(error);
            },
        );
    }

    /// <https://streams.spec.whatwg.org/#readable-stream-default-controller-should-call-pull>
    fn should_call_pull(&self) -> bool {
        // Let stream be controller.[[stream]].
        let Some(stream) = self.stream() else {
            return false;
        };

        // If ! ReadableStreamDefaultControllerCanCloseOrEnqueue(controller) is false, return false.
        if !self.can_close_or_enqueue() {
            return false;
        }

        // If controller.[[started]] is false, return false.
        if !self.inner.started.get() {
            return false;
        }

        // If ! IsReadableStreamLocked(stream) is true
        // and ! ReadableStreamGetNumReadRequests(stream) > 0, return true.
        if stream.is_locked() && stream.get_num_read_requests() > 0 {
            return true;
        }

        // Let desiredSize be ! ReadableStreamDefaultControllerGetDesiredSize(controller).
        // Assert: desiredSize is not null.
        let Some(desired_size) = self.get_desired_size() else {
            unreachable!("Desired size cannot be null while the stream can be enqueued to.");
        };

        // If desiredSize > 0, return true.
        desired_size > 0.
    }

    /// <https://streams.spec.whatwg.org/#readable-stream-default-controller-call-pull-if-needed>
    pub(crate) fn call_pull_if_needed(&self) {
        // Let shouldPull be ! ReadableStreamDefaultControllerShouldCallPull(controller).
        // If shouldPull is false, return.
        if !self.should_call_pull() {
            return;
        }

        // If controller.[[pulling]] is true,
        if self.inner.pulling.get() {
            // Set controller.[[pullAgain]] to true.
            self.inner.pull_again.set(true);
            return;
        }

        // Assert: controller.[[pullAgain]] is false.
        assert!(!self.inner.pull_again.get());

        let Some(pull_algorithm) = self.inner.pull_algorithm.borrow().clone() else {
            return;
        };

        // Set controller.[[pulling]] to true.
        self.inner.pulling.set(true);

        // Let pullPromise be the result of performing controller.[[pullAlgorithm]].
        let pull_promise = Promise::from_future(pull_algorithm(self));

        let fulfilled = self.clone();
        let rejected = self.clone();
        pull_promise.append_native_handler(
            move |()| {
                // Upon fulfillment of pullPromise,
                // Set controller.[[pulling]] to false.
                fulfilled.inner.pulling.set(false);

                // If controller.[[pullAgain]] is true,
                if fulfilled.inner.pull_again.get() {
                    // Set controller.[[pullAgain]] to false.
                    fulfilled.inner.pull_again.set(false);

                    // Perform ! ReadableStreamDefaultControllerCallPullIfNeeded(controller).
                    fulfilled.call_pull_if_needed();
                }
            },
            move |error| {
                // Upon rejection of pullPromise with reason e,
                // Perform ! ReadableStreamDefaultControllerError(controller, e).
                rejected.error(error);
            },
        );
    }

    /// <https://streams.spec.whatwg.org/#rs-default-controller-private-cancel>
    pub(crate) fn perform_cancel_steps(&self, reason: Error) -> Promise<()> {
        // Perform ! ResetQueue(this).
        self.inner.queue.borrow_mut().reset();

        // Let result be the result of performing this.[[cancelAlgorithm]], passing reason.
        let cancel_algorithm = self.inner.cancel_algorithm.borrow().clone();
        let result = match cancel_algorithm {
            Some(cancel_algorithm) => Promise::from_future(cancel_algorithm(reason)),
            None => Promise::new_resolved(()),
        };

        // Perform ! ReadableStreamDefaultControllerClearAlgorithms(this).
        self.clear_algorithms();

        // Return result.
        result
    }

    /// <https://streams.spec.whatwg.org/#rs-default-controller-private-pull>
    pub(crate) fn perform_pull_steps(&self, read_request: ReadRequest<T>) {
        // Let stream be this.[[stream]].
        let Some(stream) = self.stream() else {
            return;
        };

        // If this.[[queue]] is not empty,
        let chunk = {
            let mut queue = self.inner.queue.borrow_mut();
            if queue.is_empty() {
                None
            } else {
                // Let chunk be ! DequeueValue(this).
                Some(queue.dequeue_value())
            }
        };

        match chunk {
            Some(chunk) => {
                // If this.[[closeRequested]] is true and this.[[queue]] is empty,
                if self.inner.close_requested.get() && self.inner.queue.borrow().is_empty() {
                    // Perform ! ReadableStreamDefaultControllerClearAlgorithms(this).
                    self.clear_algorithms();

                    // Perform ! ReadableStreamClose(stream).
                    stream.close();
                } else {
                    // Otherwise, perform ! ReadableStreamDefaultControllerCallPullIfNeeded(this).
                    self.call_pull_if_needed();
                }

                // Perform readRequest’s chunk steps, given chunk.
                read_request.chunk_steps(chunk);
            },
            None => {
                // Perform ! ReadableStreamAddReadRequest(stream, readRequest).
                stream.add_read_request(read_request);

                // Perform ! ReadableStreamDefaultControllerCallPullIfNeeded(this).
                self.call_pull_if_needed();
            },
        }
    }

    /// <https://streams.spec.whatwg.org/#readable-stream-default-controller-enqueue>
    pub(crate) fn enqueue_chunk(&self, chunk: T) -> Fallible<()> {
        // If ! ReadableStreamDefaultControllerCanCloseOrEnqueue(controller) is false, return.
        if !self.can_close_or_enqueue() {
            return Ok(());
        }

        let Some(stream) = self.stream() else {
            return Ok(());
        };

        // If ! IsReadableStreamLocked(stream) is true
        // and ! ReadableStreamGetNumReadRequests(stream) > 0,
        // perform ! ReadableStreamFulfillReadRequest(stream, chunk, false).
        if stream.is_locked() && stream.get_num_read_requests() > 0 {
            stream.fulfill_read_request(chunk, false);
        } else {
            // Let result be the result of performing controller.[[strategySizeAlgorithm]],
            // passing in chunk, and interpreting the result as a completion record.
            let strategy_size = self.inner.strategy_size.borrow().clone();
            let size = match strategy_size {
                Some(strategy_size) => match strategy_size(&chunk) {
                    // Let chunkSize be result.[[Value]].
                    Ok(size) => size,
                    // If result is an abrupt completion,
                    Err(error) => {
                        // Perform ! ReadableStreamDefaultControllerError(controller, result.[[Value]]).
                        self.error(error.clone());

                        // Return result.
                        return Err(error);
                    },
                },
                None => 1.,
            };

            // Let enqueueResult be EnqueueValueWithSize(controller, chunk, chunkSize).
            let enqueue_result = self
                .inner
                .queue
                .borrow_mut()
                .enqueue_value_with_size(chunk, size);
            if let Err(error) = enqueue_result {
                // If enqueueResult is an abrupt completion,
                // Perform ! ReadableStreamDefaultControllerError(controller, enqueueResult.[[Value]]).
                self.error(error.clone());

                // Return enqueueResult.
                return Err(error);
            }
        }

        // Perform ! ReadableStreamDefaultControllerCallPullIfNeeded(controller).
        self.call_pull_if_needed();

        Ok(())
    }

    /// <https://streams.spec.whatwg.org/#readable-stream-default-controller-clear-algorithms>
    fn clear_algorithms(&self) {
        // Set controller.[[pullAlgorithm]] to undefined.
        self.inner.pull_algorithm.borrow_mut().take();

        // Set controller.[[cancelAlgorithm]] to undefined.
        self.inner.cancel_algorithm.borrow_mut().take();

        // Set controller.[[strategySizeAlgorithm]] to undefined.
        self.inner.strategy_size.borrow_mut().take();
    }

    /// <https://streams.spec.whatwg.org/#readable-stream-default-controller-close>
    pub(crate) fn request_close(&self) {
        // If ! ReadableStreamDefaultControllerCanCloseOrEnqueue(controller) is false, return.
        if !self.can_close_or_enqueue() {
            return;
        }

        let Some(stream) = self.stream() else {
            return;
        };

        // Set controller.[[closeRequested]] to true.
        self.inner.close_requested.set(true);

        // If controller.[[queue]] is empty,
        if self.inner.queue.borrow().is_empty() {
            // Perform ! ReadableStreamDefaultControllerClearAlgorithms(controller).
            self.clear_algorithms();

            // Perform ! ReadableStreamClose(stream).
            stream.close();
        }
    }

    /// <https://streams.spec.whatwg.org/#readable-stream-default-controller-get-desired-size>
    pub(crate) fn get_desired_size(&self) -> Option<f64> {
        let stream = self.stream()?;

        // If state is "errored", return null.
        if stream.is_errored() {
            return None;
        }

        // If state is "closed", return 0.
        if stream.is_closed() {
            return Some(0.0);
        }

        // Return controller.[[strategyHWM]] − controller.[[queueTotalSize]].
        let queue = self.inner.queue.borrow();
        Some(self.inner.strategy_hwm - queue.total_size())
    }

    /// <https://streams.spec.whatwg.org/#readable-stream-default-controller-has-backpressure>
    pub(crate) fn has_backpressure(&self) -> bool {
        // If ! ReadableStreamDefaultControllerShouldCallPull(controller) is true, return false.
        // Otherwise, return true.
        !self.should_call_pull()
    }

    /// <https://streams.spec.whatwg.org/#readable-stream-default-controller-can-close-or-enqueue>
    pub(crate) fn can_close_or_enqueue(&self) -> bool {
        let Some(stream) = self.stream() else {
            return false;
        };

        // If controller.[[closeRequested]] is false and state is "readable", return true.
        // Otherwise, return false.
        !self.inner.close_requested.get() && stream.is_readable()
    }

    /// The number of chunks waiting to be read.
    pub fn queue_len(&self) -> usize {
        self.inner.queue.borrow().len()
    }

    /// <https://streams.spec.whatwg.org/#rs-default-controller-desired-size>
    pub fn desired_size(&self) -> Option<f64> {
        self.get_desired_size()
    }

    /// <https://streams.spec.whatwg.org/#rs-default-controller-close>
    pub fn close(&self) -> Fallible<()> {
        // If ! ReadableStreamDefaultControllerCanCloseOrEnqueue(this) is false, throw a TypeError exception.
        if !self.can_close_or_enqueue() {
            warn!("Attempt to close a readable stream that is closing or not readable");
            return Err(Error::Type("Stream cannot be closed.".to_owned()));
        }

        // Perform ! ReadableStreamDefaultControllerClose(this).
        self.request_close();

        Ok(())
    }

    /// <https://streams.spec.whatwg.org/#rs-default-controller-enqueue>
    pub fn enqueue(&self, chunk: T) -> Fallible<()> {
        // If ! ReadableStreamDefaultControllerCanCloseOrEnqueue(this) is false, throw a TypeError exception.
        if !self.can_close_or_enqueue() {
            warn!("Attempt to enqueue into a readable stream that is closing or not readable");
            return Err(Error::Type("Stream cannot be enqueued to.".to_owned()));
        }

        // Perform ? ReadableStreamDefaultControllerEnqueue(this, chunk).
        self.enqueue_chunk(chunk)
    }

    /// <https://streams.spec.whatwg.org/#readable-stream-default-controller-error>
    pub fn error(&self, error: Error) {
        let Some(stream) = self.stream() else {
            return;
        };

        // If stream.[[state]] is not "readable", return.
        if !stream.is_readable() {
            return;
        }

        // Perform ! ResetQueue(controller).
        self.inner.queue.borrow_mut().reset();

        // Perform ! ReadableStreamDefaultControllerClearAlgorithms(controller).
        self.clear_algorithms();

        // Perform ! ReadableStreamError(stream, e).
        stream.error(error);
    }
}
