/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use crate::error::Error;
use crate::promise::Promise;
use crate::queue::QueueWithSizes;
use crate::queuingstrategy::SizeAlgorithm;
use crate::underlyingsink::{AbortAlgorithm, CloseAlgorithm, SinkAlgorithms, WriteAlgorithm};
use crate::writablestream::{WeakWritableStream, WritableStream};

/// A queued write, or the close sentinel which always comes last.
#[derive(Clone)]
pub(crate) enum WriteRecord<T> {
    Chunk(T),
    Close,
}

struct ControllerInner<T: Clone + 'static> {
    /// <https://streams.spec.whatwg.org/#writablestreamdefaultcontroller-abortalgorithm>
    abort: RefCell<Option<AbortAlgorithm>>,

    /// <https://streams.spec.whatwg.org/#writablestreamdefaultcontroller-closealgorithm>
    close: RefCell<Option<CloseAlgorithm>>,

    /// <https://streams.spec.whatwg.org/#writablestreamdefaultcontroller-writealgorithm>
    write: RefCell<Option<WriteAlgorithm<T>>>,

    /// <https://streams.spec.whatwg.org/#writablestreamdefaultcontroller-queue>
    queue: RefCell<QueueWithSizes<WriteRecord<T>>>,

    /// <https://streams.spec.whatwg.org/#writablestreamdefaultcontroller-stream>
    stream: WeakWritableStream<T>,

    /// <https://streams.spec.whatwg.org/#writablestreamdefaultcontroller-started>
    started: Cell<bool>,

    /// <https://streams.spec.whatwg.org/#writablestreamdefaultcontroller-strategyhwm>
    strategy_hwm: f64,

    /// <https://streams.spec.whatwg.org/#writablestreamdefaultcontroller-strategysizealgorithm>
    strategy_size: RefCell<Option<SizeAlgorithm<T>>>,
}

/// <https://streams.spec.whatwg.org/#writablestreamdefaultcontroller>
pub struct WritableStreamDefaultController<T: Clone + 'static> {
    inner: Rc<ControllerInner<T>>,
}

impl<T: Clone + 'static> Clone for WritableStreamDefaultController<T> {
    fn clone(&self) -> WritableStreamDefaultController<T> {
        WritableStreamDefaultController {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Clone + 'static> fmt::Debug for WritableStreamDefaultController<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WritableStreamDefaultController")
            .field("queue_size", &self.inner.queue.borrow().total_size())
            .field("started", &self.inner.started.get())
            .finish()
    }
}

impl<T: Clone + 'static> WritableStreamDefaultController<T> {
    pub(crate) fn new(
        stream: WeakWritableStream<T>,
        strategy_hwm: f64,
        strategy_size: SizeAlgorithm<T>,
    ) -> WritableStreamDefaultController<T> {
        WritableStreamDefaultController {
            inner: Rc::new(ControllerInner {
                abort: RefCell::new(None),
                close: RefCell::new(None),
                write: RefCell::new(None),
                queue: Default::default(),
                stream,
                started: Default::default(),
                strategy_hwm,
                strategy_size: RefCell::new(Some(strategy_size)),
            }),
        }
    }

    fn stream(&self) -> Option<WritableStream<T>> {
        self.inner.stream.upgrade()
    }

    pub(crate) fn started(&self) -> bool {
        self.inner.started.get()
    }

    /// <https://streams.spec.whatwg.org/#writable-stream-default-controller-clear-algorithms>
    fn clear_algorithms(&self) {
        // Set controller.[[writeAlgorithm]] to undefined.
        self.inner.write.borrow_mut().take();

        // Set controller.[[closeAlgorithm]] to undefined.
        self.inner.close.borrow_mut().take();

        // Set controller.[[abortAlgorithm]] to undefined.
        self.inner.abort.borrow_mut().take();

        // Set controller.[[strategySizeAlgorithm]] to undefined.
        self.inner.strategy_size.borrow_mut().take();
    }

    /// <https://streams.spec.whatwg.org/#set-up-writable-stream-default-controller>
    pub(crate) fn set_up(&self, algorithms: SinkAlgorithms<T>) {
        let Some(stream) = self.stream() else {
            return;
        };
        let SinkAlgorithms {
            start,
            write,
            close,
            abort,
        } = algorithms;

        // Perform ! ResetQueue(controller).
        self.inner.queue.borrow_mut().reset();

        // Set controller.[[started]] to false.
        self.inner.started.set(false);

        // Set controller.[[writeAlgorithm]] to writeAlgorithm.
        *self.inner.write.borrow_mut() = Some(write);

        // Set controller.[[closeAlgorithm]] to closeAlgorithm.
        *self.inner.close.borrow_mut() = Some(close);

        // Set controller.[[abortAlgorithm]] to abortAlgorithm.
        *self.inner.abort.borrow_mut() = Some(abort);

        // Let backpressure be ! WritableStreamDefaultControllerGetBackpressure(controller).
        let backpressure = self.get_backpressure();

        // Perform ! WritableStreamUpdateBackpressure(stream, backpressure).
        stream.update_backpressure(backpressure);

        // Let startResult be the result of performing startAlgorithm. (This may throw an exception.)
        // Let startPromise be a promise resolved with startResult.
        let start_promise = Promise::from_future(start(self));

        // Upon fulfillment of startPromise,
        let fulfilled = self.clone();
        // Upon rejection of startPromise with reason r,
        let rejected = self.clone();
        start_promise.append_native_handler(
            move |()| {
                let Some(stream) = fulfilled.stream() else {
                    return;
                };

                // Assert: stream.[[state]] is "writable" or "erroring".
                assert!(stream.is_erroring() || stream.is_writable());

                // Set controller.[[started]] to true.
                fulfilled.inner.started.set(true);

                // Perform ! WritableStreamDefaultControllerAdvanceQueueIfNeeded(controller).
                fulfilled.advance_queue_if_needed();
            },
            move |error| {
                let Some(stream) = rejected.stream() else {
                    return;
                };

                // Assert: stream.[[state]] is "writable" or "erroring".
                assert!(stream.is_erroring() || stream.is_writable());

                // Set controller.[[started]] to true.
                rejected.inner.started.set(true);

                // Perform ! WritableStreamDealWithRejection(stream, r).
                stream.deal_with_rejection(error);
            },
        );
    }

    /// <https://streams.spec.whatwg.org/#writable-stream-default-controller-close>
    pub(crate) fn close(&self) {
        // Perform ! EnqueueValueWithSize(controller, close sentinel, 0).
        // A zero size is always accepted.
        let result = self
            .inner
            .queue
            .borrow_mut()
            .enqueue_value_with_size(WriteRecord::Close, 0.);
        debug_assert!(result.is_ok());

        // Perform ! WritableStreamDefaultControllerAdvanceQueueIfNeeded(controller).
        self.advance_queue_if_needed();
    }

    /// <https://streams.spec.whatwg.org/#ws-default-controller-private-abort>
    pub(crate) fn abort_steps(&self, reason: Error) -> Promise<()> {
        // Let result be the result of performing this.[[abortAlgorithm]], passing reason.
        let abort_algorithm = self.inner.abort.borrow().clone();
        let result = match abort_algorithm {
            Some(abort_algorithm) => Promise::from_future(abort_algorithm(reason)),
            None => Promise::new_resolved(()),
        };

        // Perform ! WritableStreamDefaultControllerClearAlgorithms(this).
        self.clear_algorithms();

        // Return result.
        result
    }

    /// <https://streams.spec.whatwg.org/#ws-default-controller-private-error>
    pub(crate) fn perform_error_steps(&self) {
        // Perform ! ResetQueue(this).
        self.inner.queue.borrow_mut().reset();
    }

    /// <https://streams.spec.whatwg.org/#writable-stream-default-controller-advance-queue-if-needed>
    fn advance_queue_if_needed(&self) {
        // Let stream be controller.[[stream]].
        let Some(stream) = self.stream() else {
            return;
        };

        // If controller.[[started]] is false, return.
        if !self.inner.started.get() {
            return;
        }

        // If stream.[[inFlightWriteRequest]] is not undefined, return.
        if stream.has_in_flight_write_request() {
            return;
        }

        // Let state be stream.[[state]].

        // Assert: state is not "closed" or "errored".
        assert!(!(stream.is_errored() || stream.is_closed()));

        // If state is "erroring",
        if stream.is_erroring() {
            // Perform ! WritableStreamFinishErroring(stream).
            stream.finish_erroring();

            // Return.
            return;
        }

        // Let value be ! PeekQueueValue(controller).
        let value = self.inner.queue.borrow().peek_queue_value().cloned();
        match value {
            // If controller.[[queue]] is empty, return.
            None => {},
            // If value is the close sentinel, perform ! WritableStreamDefaultControllerProcessClose(controller).
            Some(WriteRecord::Close) => self.process_close(),
            // Otherwise, perform ! WritableStreamDefaultControllerProcessWrite(controller, value).
            Some(WriteRecord::Chunk(chunk)) => self.process_write(chunk),
        }
    }

    /// <https://streams.spec.whatwg.org/#writable-stream-default-controller-error-if-needed>
    pub(crate) fn error_if_needed(&self, error: Error) {
        let Some(stream) = self.stream() else {
            return;
        };

        // If controller.[[stream]].[[state]] is "writable",
        if stream.is_writable() {
            // Perform ! WritableStreamDefaultControllerError(controller, error).
            self.error_stream(error);
        }
    }

    /// <https://streams.spec.whatwg.org/#writable-stream-default-controller-process-close>
    fn process_close(&self) {
        // Let stream be controller.[[stream]].
        let Some(stream) = self.stream() else {
            return;
        };

        // Perform ! WritableStreamMarkCloseRequestInFlight(stream).
        stream.mark_close_request_in_flight();

        // Perform ! DequeueValue(controller).
        {
            let mut queue = self.inner.queue.borrow_mut();
            queue.dequeue_value();

            // Assert: controller.[[queue]] is empty.
            assert!(queue.is_empty());
        }

        // Let sinkClosePromise be the result of performing controller.[[closeAlgorithm]].
        let close_algorithm = self.inner.close.borrow().clone();
        let sink_close_promise = match close_algorithm {
            Some(close_algorithm) => Promise::from_future(close_algorithm()),
            None => Promise::new_resolved(()),
        };

        // Perform ! WritableStreamDefaultControllerClearAlgorithms(controller).
        self.clear_algorithms();

        // Upon fulfillment of sinkClosePromise,
        let fulfilled = stream.clone();
        // Upon rejection of sinkClosePromise with reason reason,
        let rejected = stream;
        sink_close_promise.append_native_handler(
            move |()| {
                // Perform ! WritableStreamFinishInFlightClose(stream).
                fulfilled.finish_in_flight_close();
            },
            move |reason| {
                // Perform ! WritableStreamFinishInFlightCloseWithError(stream, reason).
                rejected.finish_in_flight_close_with_error(reason);
            },
        );
    }

    /// <https://streams.spec.whatwg.org/#writable-stream-default-controller-process-write>
    fn process_write(&self, chunk: T) {
        // Let stream be controller.[[stream]].
        let Some(stream) = self.stream() else {
            return;
        };

        // Perform ! WritableStreamMarkFirstWriteRequestInFlight(stream).
        stream.mark_first_write_request_in_flight();

        // Let sinkWritePromise be the result of performing controller.[[writeAlgorithm]], passing in chunk.
        let write_algorithm = self.inner.write.borrow().clone();
        let sink_write_promise = match write_algorithm {
            Some(write_algorithm) => Promise::from_future(write_algorithm(chunk, self)),
            None => Promise::new_resolved(()),
        };

        // Upon fulfillment of sinkWritePromise,
        let fulfilled = self.clone();
        // Upon rejection of sinkWritePromise with reason,
        let rejected = self.clone();
        sink_write_promise.append_native_handler(
            move |()| {
                let Some(stream) = fulfilled.stream() else {
                    return;
                };

                // Perform ! WritableStreamFinishInFlightWrite(stream).
                stream.finish_in_flight_write();

                // Let state be stream.[[state]].
                // Assert: state is "writable" or "erroring".
                assert!(stream.is_erroring() || stream.is_writable());

                // Perform ! DequeueValue(controller).
                fulfilled.inner.queue.borrow_mut().dequeue_value();

                // If ! WritableStreamCloseQueuedOrInFlight(stream) is false and state is "writable",
                if !stream.close_queued_or_in_flight() && stream.is_writable() {
                    // Let backpressure be ! WritableStreamDefaultControllerGetBackpressure(controller).
                    let backpressure = fulfilled.get_backpressure();

                    // Perform ! WritableStreamUpdateBackpressure(stream, backpressure).
                    stream.update_backpressure(backpressure);
                }

                // Perform ! WritableStreamDefaultControllerAdvanceQueueIfNeeded(controller).
                fulfilled.advance_queue_if_needed();
            },
            move |reason| {
                let Some(stream) = rejected.stream() else {
                    return;
                };

                // If stream.[[state]] is "writable",
                if stream.is_writable() {
                    // perform ! WritableStreamDefaultControllerClearAlgorithms(controller).
                    rejected.clear_algorithms();
                }

                // Perform ! WritableStreamFinishInFlightWriteWithError(stream, reason).
                stream.finish_in_flight_write_with_error(reason);
            },
        );
    }

    /// <https://streams.spec.whatwg.org/#writable-stream-default-controller-get-chunk-size>
    pub(crate) fn get_chunk_size(&self, chunk: &T) -> f64 {
        // If controller.[[strategySizeAlgorithm]] is undefined,
        let strategy_size = self.inner.strategy_size.borrow().clone();
        let Some(strategy_size) = strategy_size else {
            // Assert: controller.[[stream]].[[state]] is not "writable".
            if let Some(stream) = self.stream() {
                assert!(!stream.is_writable());
            }

            // Return 1.
            return 1.0;
        };

        // Let returnValue be the result of performing controller.[[strategySizeAlgorithm]],
        // passing in chunk, and interpreting the result as a completion record.
        match strategy_size(chunk) {
            // Return returnValue.[[Value]].
            Ok(size) => size,
            // If returnValue is an abrupt completion,
            Err(error) => {
                // Perform ! WritableStreamDefaultControllerErrorIfNeeded(controller, returnValue.[[Value]]).
                self.error_if_needed(error);

                // Return 1.
                1.0
            },
        }
    }

    /// <https://streams.spec.whatwg.org/#writable-stream-default-controller-get-desired-size>
    pub(crate) fn get_desired_size(&self) -> f64 {
        // Return controller.[[strategyHWM]] − controller.[[queueTotalSize]].
        let queue = self.inner.queue.borrow();
        self.inner.strategy_hwm - queue.total_size()
    }

    /// <https://streams.spec.whatwg.org/#writable-stream-default-controller-get-backpressure>
    fn get_backpressure(&self) -> bool {
        // Let desiredSize be ! WritableStreamDefaultControllerGetDesiredSize(controller).
        let desired_size = self.get_desired_size();

        // Return true if desiredSize ≤ 0, or false otherwise.
        desired_size <= 0.0
    }

    /// <https://streams.spec.whatwg.org/#writable-stream-default-controller-write>
    pub(crate) fn write(&self, chunk: T, chunk_size: f64) {
        // Let enqueueResult be EnqueueValueWithSize(controller, chunk, chunkSize).
        let enqueue_result = self
            .inner
            .queue
            .borrow_mut()
            .enqueue_value_with_size(WriteRecord::Chunk(chunk), chunk_size);

        // If enqueueResult is an abrupt completion,
        if let Err(error) = enqueue_result {
            // Perform ! WritableStreamDefaultControllerErrorIfNeeded(controller, enqueueResult.[[Value]]).
            self.error_if_needed(error);

            // Return.
            return;
        }

        // Let stream be controller.[[stream]].
        let Some(stream) = self.stream() else {
            return;
        };

        // If ! WritableStreamCloseQueuedOrInFlight(stream) is false and stream.[[state]] is "writable",
        if !stream.close_queued_or_in_flight() && stream.is_writable() {
            // Let backpressure be ! WritableStreamDefaultControllerGetBackpressure(controller).
            let backpressure = self.get_backpressure();

            // Perform ! WritableStreamUpdateBackpressure(stream, backpressure).
            stream.update_backpressure(backpressure);
        }

        // Perform ! WritableStreamDefaultControllerAdvanceQueueIfNeeded(controller).
        self.advance_queue_if_needed();
    }

    /// <https://streams.spec.whatwg.org/#writable-stream-default-controller-error>
    fn error_stream(&self, error: Error) {
        // Let stream be controller.[[stream]].
        let Some(stream) = self.stream() else {
            return;
        };

        // Assert: stream.[[state]] is "writable".
        assert!(stream.is_writable());

        // Perform ! WritableStreamDefaultControllerClearAlgorithms(controller).
        self.clear_algorithms();

        // Perform ! WritableStreamStartErroring(stream, error).
        stream.start_erroring(error);
    }

    /// <https://streams.spec.whatwg.org/#ws-default-controller-error>
    pub fn error(&self, error: Error) {
        let Some(stream) = self.stream() else {
            return;
        };

        // Let state be this.[[stream]].[[state]].
        // If state is not "writable", return.
        if !stream.is_writable() {
            return;
        }

        // Perform ! WritableStreamDefaultControllerError(this, e).
        self.error_stream(error);
    }
}
