/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use futures::FutureExt;

use crate::error::{Error, Fallible};
use crate::promise::Promise;
use crate::readablestream::{ReadableStream, WeakReadableStream};
use crate::transformstream::Transformer;
use crate::underlyingsource::{HostFuture, settled};
use crate::writablestream::{WeakWritableStream, WritableStream};

/// <https://streams.spec.whatwg.org/#transformstreamdefaultcontroller-transformalgorithm>
type TransformAlgorithm<I, O> = Rc<dyn Fn(I, &TransformStreamDefaultController<I, O>) -> HostFuture>;

/// <https://streams.spec.whatwg.org/#transformstreamdefaultcontroller-flushalgorithm>
type FlushAlgorithm<I, O> = Rc<dyn Fn(&TransformStreamDefaultController<I, O>) -> HostFuture>;

/// <https://streams.spec.whatwg.org/#transformstreamdefaultcontroller-cancelalgorithm>
type TransformCancelAlgorithm = Rc<dyn Fn(Error) -> HostFuture>;

struct ControllerInner<I: Clone + 'static, O: Clone + 'static> {
    /// <https://streams.spec.whatwg.org/#transformstreamdefaultcontroller-transformalgorithm>
    transform: RefCell<Option<TransformAlgorithm<I, O>>>,

    /// <https://streams.spec.whatwg.org/#transformstreamdefaultcontroller-flushalgorithm>
    flush: RefCell<Option<FlushAlgorithm<I, O>>>,

    /// <https://streams.spec.whatwg.org/#transformstreamdefaultcontroller-cancelalgorithm>
    cancel: RefCell<Option<TransformCancelAlgorithm>>,

    /// <https://streams.spec.whatwg.org/#transformstreamdefaultcontroller-finishpromise>
    finish_promise: RefCell<Option<Promise<()>>>,

    /// <https://streams.spec.whatwg.org/#transformstream-backpressure>
    backpressure: Cell<Option<bool>>,

    /// <https://streams.spec.whatwg.org/#transformstream-backpressurechangepromise>
    backpressure_change_promise: RefCell<Option<Promise<()>>>,

    /// <https://streams.spec.whatwg.org/#transformstream-readable>
    readable: RefCell<Option<WeakReadableStream<O>>>,

    /// <https://streams.spec.whatwg.org/#transformstream-writable>
    writable: RefCell<Option<WeakWritableStream<I>>>,
}

/// <https://streams.spec.whatwg.org/#transformstreamdefaultcontroller>
///
/// Also carries the backpressure state of its transform stream, so the
/// algorithms of both sides only need a handle to the controller.
pub struct TransformStreamDefaultController<I: Clone + 'static, O: Clone + 'static> {
    inner: Rc<ControllerInner<I, O>>,
}

impl<I: Clone + 'static, O: Clone + 'static> Clone for TransformStreamDefaultController<I, O> {
    fn clone(&self) -> TransformStreamDefaultController<I, O> {
        TransformStreamDefaultController {
            inner: self.inner.clone(),
        }
    }
}

impl<I: Clone + 'static, O: Clone + 'static> fmt::Debug for TransformStreamDefaultController<I, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransformStreamDefaultController")
            .field("backpressure", &self.inner.backpressure.get())
            .field("finishing", &self.inner.finish_promise.borrow().is_some())
            .finish()
    }
}

impl<I: Clone + 'static, O: Clone + 'static> TransformStreamDefaultController<I, O> {
    /// <https://streams.spec.whatwg.org/#set-up-transform-stream-default-controller-from-transformer>
    pub(crate) fn from_transformer(
        transformer: Rc<dyn Transformer<I, O>>,
    ) -> TransformStreamDefaultController<I, O> {
        let transform_transformer = transformer.clone();
        let flush_transformer = transformer.clone();
        let transform: TransformAlgorithm<I, O> = Rc::new(move |chunk, controller| {
            transform_transformer.transform(chunk, controller)
        });
        let flush: FlushAlgorithm<I, O> =
            Rc::new(move |controller| flush_transformer.flush(controller));
        let cancel: TransformCancelAlgorithm = Rc::new(move |reason| transformer.cancel(reason));

        TransformStreamDefaultController {
            inner: Rc::new(ControllerInner {
                transform: RefCell::new(Some(transform)),
                flush: RefCell::new(Some(flush)),
                cancel: RefCell::new(Some(cancel)),
                finish_promise: RefCell::new(None),
                backpressure: Cell::new(None),
                backpressure_change_promise: RefCell::new(None),
                readable: RefCell::new(None),
                writable: RefCell::new(None),
            }),
        }
    }

    /// <https://streams.spec.whatwg.org/#set-up-transform-stream-default-controller>
    /// Both sides are built before the controller is wired to them.
    pub(crate) fn attach(&self, readable: &ReadableStream<O>, writable: &WritableStream<I>) {
        *self.inner.readable.borrow_mut() = Some(readable.downgrade());
        *self.inner.writable.borrow_mut() = Some(writable.downgrade());
    }

    fn readable(&self) -> Option<ReadableStream<O>> {
        self.inner.readable.borrow().as_ref().and_then(WeakReadableStream::upgrade)
    }

    fn writable(&self) -> Option<WritableStream<I>> {
        self.inner.writable.borrow().as_ref().and_then(WeakWritableStream::upgrade)
    }

    /// <https://streams.spec.whatwg.org/#transform-stream-set-backpressure>
    pub(crate) fn set_backpressure(&self, backpressure: bool) {
        // Assert: stream.[[backpressure]] is not backpressure.
        assert_ne!(self.inner.backpressure.get(), Some(backpressure));

        // If stream.[[backpressureChangePromise]] is not undefined,
        // resolve stream.[[backpressureChangePromise]] with undefined.
        // Set stream.[[backpressureChangePromise]] to a new promise.
        let previous = self
            .inner
            .backpressure_change_promise
            .replace(Some(Promise::new()));
        if let Some(promise) = previous {
            promise.resolve(());
        }

        // Set stream.[[backpressure]] to backpressure.
        self.inner.backpressure.set(Some(backpressure));
    }

    /// <https://streams.spec.whatwg.org/#transform-stream-unblock-write>
    fn unblock_write(&self) {
        // If stream.[[backpressure]] is true, perform ! TransformStreamSetBackpressure(stream, false).
        if self.inner.backpressure.get() == Some(true) {
            self.set_backpressure(false);
        }
    }

    /// <https://streams.spec.whatwg.org/#transform-stream-default-controller-clear-algorithms>
    fn clear_algorithms(&self) {
        // Set controller.[[transformAlgorithm]] to undefined.
        self.inner.transform.borrow_mut().take();

        // Set controller.[[flushAlgorithm]] to undefined.
        self.inner.flush.borrow_mut().take();

        // Set controller.[[cancelAlgorithm]] to undefined.
        self.inner.cancel.borrow_mut().take();
    }

    /// <https://streams.spec.whatwg.org/#transform-stream-error>
    fn error_stream(&self, error: Error) {
        // Perform ! ReadableStreamDefaultControllerError(stream.[[readable]].[[controller]], e).
        if let Some(readable) = self.readable() {
            readable.controller().error(error.clone());
        }

        // Perform ! TransformStreamErrorWritableAndUnblockWrite(stream, e).
        self.error_writable_and_unblock_write(error);
    }

    /// <https://streams.spec.whatwg.org/#transform-stream-error-writable-and-unblock-write>
    fn error_writable_and_unblock_write(&self, error: Error) {
        // Perform ! TransformStreamDefaultControllerClearAlgorithms(stream.[[controller]]).
        self.clear_algorithms();

        // Perform ! WritableStreamDefaultControllerErrorIfNeeded(stream.[[writable]].[[controller]], e).
        if let Some(writable) = self.writable() {
            writable.controller().error_if_needed(error);
        }

        // Perform ! TransformStreamUnblockWrite(stream).
        self.unblock_write();
    }

    /// <https://streams.spec.whatwg.org/#transform-stream-default-controller-perform-transform>
    fn perform_transform(&self, chunk: I) -> HostFuture {
        // Let transformPromise be the result of performing controller.[[transformAlgorithm]], passing chunk.
        let transform = self.inner.transform.borrow().clone();
        let transform_result = match transform {
            Some(transform) => transform(chunk, self),
            None => settled(Ok(())),
        };

        // Return the result of reacting to transformPromise with the following rejection steps given the argument r:
        let controller = self.clone();
        async move {
            if let Err(error) = transform_result.await {
                // Perform ! TransformStreamError(controller.[[stream]], r).
                controller.error_stream(error.clone());

                // Throw r.
                return Err(error);
            }
            Ok(())
        }
        .boxed_local()
    }

    /// <https://streams.spec.whatwg.org/#transform-stream-default-sink-write-algorithm>
    pub(crate) fn sink_write(&self, chunk: I) -> HostFuture {
        // If stream.[[backpressure]] is true,
        if self.inner.backpressure.get() == Some(true) {
            // Let backpressureChangePromise be stream.[[backpressureChangePromise]].
            // Assert: backpressureChangePromise is not undefined.
            let Some(backpressure_change_promise) =
                self.inner.backpressure_change_promise.borrow().clone()
            else {
                unreachable!("Backpressure is set without a change promise.");
            };

            // Return the result of reacting to backpressureChangePromise with the following fulfillment steps:
            let controller = self.clone();
            return async move {
                backpressure_change_promise.await?;

                // Let writable be stream.[[writable]].
                // Let state be writable.[[state]].
                if let Some(writable) = controller.writable() {
                    // If state is "erroring", throw writable.[[storedError]].
                    if writable.is_erroring() {
                        return Err(writable.stored_error().unwrap_or(Error::Undefined));
                    }

                    // Assert: state is "writable".
                    assert!(writable.is_writable());
                }

                // Return ! TransformStreamDefaultControllerPerformTransform(controller, chunk).
                controller.perform_transform(chunk).await
            }
            .boxed_local();
        }

        // Return ! TransformStreamDefaultControllerPerformTransform(controller, chunk).
        self.perform_transform(chunk)
    }

    /// <https://streams.spec.whatwg.org/#transform-stream-default-sink-abort-algorithm>
    pub(crate) fn sink_abort(&self, reason: Error) -> Promise<()> {
        // If controller.[[finishPromise]] is not undefined, return controller.[[finishPromise]].
        if let Some(finish_promise) = self.inner.finish_promise.borrow().clone() {
            return finish_promise;
        }

        // Let readable be stream.[[readable]].
        // Let controller.[[finishPromise]] be a new promise.
        let finish_promise = Promise::new();
        *self.inner.finish_promise.borrow_mut() = Some(finish_promise.clone());

        // Let cancelPromise be the result of performing controller.[[cancelAlgorithm]], passing reason.
        let cancel = self.inner.cancel.borrow().clone();
        let cancel_promise = match cancel {
            Some(cancel) => Promise::from_future(cancel(reason.clone())),
            None => Promise::new_resolved(()),
        };

        // Perform ! TransformStreamDefaultControllerClearAlgorithms(controller).
        self.clear_algorithms();

        // React to cancelPromise:
        let fulfilled = self.clone();
        let fulfilled_finish = finish_promise.clone();
        let rejected = self.clone();
        let rejected_finish = finish_promise.clone();
        cancel_promise.append_native_handler(
            move |()| {
                // If cancelPromise was fulfilled, then:
                let Some(readable) = fulfilled.readable() else {
                    fulfilled_finish.resolve(());
                    return;
                };

                // If readable.[[state]] is "errored", reject controller.[[finishPromise]] with readable.[[storedError]].
                if readable.is_errored() {
                    fulfilled_finish.reject(readable.stored_error().unwrap_or(Error::Undefined));
                } else {
                    // Otherwise:
                    // Perform ! ReadableStreamDefaultControllerError(readable.[[controller]], reason).
                    readable.controller().error(reason);

                    // Resolve controller.[[finishPromise]] with undefined.
                    fulfilled_finish.resolve(());
                }
            },
            move |error| {
                // If cancelPromise was rejected with reason r, then:
                // Perform ! ReadableStreamDefaultControllerError(readable.[[controller]], r).
                if let Some(readable) = rejected.readable() {
                    readable.controller().error(error.clone());
                }

                // Reject controller.[[finishPromise]] with r.
                rejected_finish.reject(error);
            },
        );

        // Return controller.[[finishPromise]].
        finish_promise
    }

    /// <https://streams.spec.whatwg.org/#transform-stream-default-sink-close-algorithm>
    pub(crate) fn sink_close(&self) -> Promise<()> {
        // If controller.[[finishPromise]] is not undefined, return controller.[[finishPromise]].
        if let Some(finish_promise) = self.inner.finish_promise.borrow().clone() {
            return finish_promise;
        }

        // Let readable be stream.[[readable]].
        // Let controller.[[finishPromise]] be a new promise.
        let finish_promise = Promise::new();
        *self.inner.finish_promise.borrow_mut() = Some(finish_promise.clone());

        // Let flushPromise be the result of performing controller.[[flushAlgorithm]].
        let flush = self.inner.flush.borrow().clone();
        let flush_promise = match flush {
            Some(flush) => Promise::from_future(flush(self)),
            None => Promise::new_resolved(()),
        };

        // Perform ! TransformStreamDefaultControllerClearAlgorithms(controller).
        self.clear_algorithms();

        // React to flushPromise:
        let fulfilled = self.clone();
        let fulfilled_finish = finish_promise.clone();
        let rejected = self.clone();
        let rejected_finish = finish_promise.clone();
        flush_promise.append_native_handler(
            move |()| {
                // If flushPromise was fulfilled, then:
                let Some(readable) = fulfilled.readable() else {
                    fulfilled_finish.resolve(());
                    return;
                };

                // If readable.[[state]] is "errored", reject controller.[[finishPromise]] with readable.[[storedError]].
                if readable.is_errored() {
                    fulfilled_finish.reject(readable.stored_error().unwrap_or(Error::Undefined));
                } else {
                    // Otherwise:
                    // Perform ! ReadableStreamDefaultControllerClose(readable.[[controller]]).
                    readable.controller().request_close();

                    // Resolve controller.[[finishPromise]] with undefined.
                    fulfilled_finish.resolve(());
                }
            },
            move |error| {
                // If flushPromise was rejected with reason r, then:
                // Perform ! ReadableStreamDefaultControllerError(readable.[[controller]], r).
                if let Some(readable) = rejected.readable() {
                    readable.controller().error(error.clone());
                }

                // Reject controller.[[finishPromise]] with r.
                rejected_finish.reject(error);
            },
        );

        // Return controller.[[finishPromise]].
        finish_promise
    }

    /// <https://streams.spec.whatwg.org/#transform-stream-default-source-pull>
    pub(crate) fn source_pull(&self) -> Promise<()> {
        // Assert: stream.[[backpressure]] is true.
        assert_eq!(self.inner.backpressure.get(), Some(true));

        // Assert: stream.[[backpressureChangePromise]] is not undefined.
        assert!(self.inner.backpressure_change_promise.borrow().is_some());

        // Perform ! TransformStreamSetBackpressure(stream, false).
        self.set_backpressure(false);

        // Return stream.[[backpressureChangePromise]].
        let Some(promise) = self.inner.backpressure_change_promise.borrow().clone() else {
            unreachable!("Setting backpressure always creates a change promise.");
        };
        promise
    }

    /// <https://streams.spec.whatwg.org/#transform-stream-default-source-cancel>
    pub(crate) fn source_cancel(&self, reason: Error) -> Promise<()> {
        // If controller.[[finishPromise]] is not undefined, return controller.[[finishPromise]].
        if let Some(finish_promise) = self.inner.finish_promise.borrow().clone() {
            return finish_promise;
        }

        // Let writable be stream.[[writable]].
        // Let controller.[[finishPromise]] be a new promise.
        let finish_promise = Promise::new();
        *self.inner.finish_promise.borrow_mut() = Some(finish_promise.clone());

        // Let cancelPromise be the result of performing controller.[[cancelAlgorithm]], passing reason.
        let cancel = self.inner.cancel.borrow().clone();
        let cancel_promise = match cancel {
            Some(cancel) => Promise::from_future(cancel(reason.clone())),
            None => Promise::new_resolved(()),
        };

        // Perform ! TransformStreamDefaultControllerClearAlgorithms(controller).
        self.clear_algorithms();

        // React to cancelPromise:
        let fulfilled = self.clone();
        let fulfilled_finish = finish_promise.clone();
        let rejected = self.clone();
        let rejected_finish = finish_promise.clone();
        cancel_promise.append_native_handler(
            move |()| {
                // If cancelPromise was fulfilled, then:
                let writable = fulfilled.writable();

                // If writable.[[state]] is "errored", reject controller.[[finishPromise]] with writable.[[storedError]].
                if let Some(writable) = writable.as_ref().filter(|writable| writable.is_errored()) {
                    fulfilled_finish.reject(writable.stored_error().unwrap_or(Error::Undefined));
                    return;
                }

                // Otherwise:
                // Perform ! WritableStreamDefaultControllerErrorIfNeeded(writable.[[controller]], reason).
                if let Some(writable) = writable {
                    writable.controller().error_if_needed(reason);
                }

                // Perform ! TransformStreamUnblockWrite(stream).
                fulfilled.unblock_write();

                // Resolve controller.[[finishPromise]] with undefined.
                fulfilled_finish.resolve(());
            },
            move |error| {
                // If cancelPromise was rejected with reason r, then:
                // Perform ! WritableStreamDefaultControllerErrorIfNeeded(writable.[[controller]], r).
                if let Some(writable) = rejected.writable() {
                    writable.controller().error_if_needed(error.clone());
                }

                // Perform ! TransformStreamUnblockWrite(stream).
                rejected.unblock_write();

                // Reject controller.[[finishPromise]] with r.
                rejected_finish.reject(error);
            },
        );

        // Return controller.[[finishPromise]].
        finish_promise
    }

    /// <https://streams.spec.whatwg.org/#ts-default-controller-desired-size>
    pub fn desired_size(&self) -> Option<f64> {
        // Let readableController be this.[[stream]].[[readable]].[[controller]].
        // Return ! ReadableStreamDefaultControllerGetDesiredSize(readableController).
        self.readable()?.controller().get_desired_size()
    }

    /// <https://streams.spec.whatwg.org/#transform-stream-default-controller-enqueue>
    pub fn enqueue(&self, chunk: O) -> Fallible<()> {
        // Let stream be controller.[[stream]].
        // Let readableController be stream.[[readable]].[[controller]].
        let Some(readable) = self.readable() else {
            return Err(Error::Type("Readable side is gone".to_string()));
        };
        let readable_controller = readable.controller();

        // If ! ReadableStreamDefaultControllerCanCloseOrEnqueue(readableController) is false,
        // throw a TypeError exception.
        if !readable_controller.can_close_or_enqueue() {
            warn!("Attempt to enqueue into the readable side of a transform stream that is closing or not readable");
            return Err(Error::Type("Readable side cannot be enqueued to.".to_string()));
        }

        // Let enqueueResult be ReadableStreamDefaultControllerEnqueue(readableController, chunk).
        // If enqueueResult is an abrupt completion,
        if let Err(error) = readable_controller.enqueue_chunk(chunk) {
            // Perform ! TransformStreamErrorWritableAndUnblockWrite(stream, enqueueResult.[[Value]]).
            self.error_writable_and_unblock_write(error);

            // Throw stream.[[readable]].[[storedError]].
            return Err(readable.stored_error().unwrap_or(Error::Undefined));
        }

        // Let backpressure be ! ReadableStreamDefaultControllerHasBackpressure(readableController).
        let backpressure = readable_controller.has_backpressure();

        // If backpressure is not stream.[[backpressure]],
        if Some(backpressure) != self.inner.backpressure.get() {
            // Assert: backpressure is true.
            assert!(backpressure);

            // Perform ! TransformStreamSetBackpressure(stream, true).
            self.set_backpressure(true);
        }

        Ok(())
    }

    /// <https://streams.spec.whatwg.org/#ts-default-controller-error>
    pub fn error(&self, reason: Error) {
        // Perform ! TransformStreamDefaultControllerError(this, e).
        self.error_stream(reason);
    }

    /// <https://streams.spec.whatwg.org/#transform-stream-default-controller-terminate>
    pub fn terminate(&self) {
        // Let readableController be stream.[[readable]].[[controller]].
        // Perform ! ReadableStreamDefaultControllerClose(readableController).
        if let Some(readable) = self.readable() {
            readable.controller().request_close();
        }

        // Let error be a TypeError exception indicating that the stream has been terminated.
        let error = Error::Type("Transform stream has been terminated".to_string());

        // Perform ! TransformStreamErrorWritableAndUnblockWrite(stream, error).
        self.error_writable_and_unblock_write(error);
    }
}
