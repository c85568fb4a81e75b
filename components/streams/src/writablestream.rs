/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::mem;
use std::rc::{Rc, Weak};

use crate::error::{Error, Fallible};
use crate::promise::Promise;
use crate::queuingstrategy::{
    QueuingStrategy, SizeAlgorithm, extract_high_water_mark, extract_size_algorithm,
};
use crate::underlyingsink::{SinkAlgorithms, UnderlyingSink};
use crate::writablestreamdefaultcontroller::WritableStreamDefaultController;
use crate::writablestreamdefaultwriter::{WritableStreamDefaultWriter, WriterInner};

/// <https://streams.spec.whatwg.org/#pending-abort-request>
struct PendingAbortRequest {
    /// <https://streams.spec.whatwg.org/#pending-abort-request-promise>
    promise: Promise<()>,

    /// <https://streams.spec.whatwg.org/#pending-abort-request-reason>
    reason: Error,

    /// <https://streams.spec.whatwg.org/#pending-abort-request-was-already-erroring>
    was_already_erroring: bool,
}

/// <https://streams.spec.whatwg.org/#writablestream-state>
///
/// `Closing` is never stored: it is how [`WritableStream::state`] reports a
/// writable stream with a close queued or in flight.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum WritableStreamState {
    #[default]
    Writable,
    Closing,
    Closed,
    Erroring,
    Errored,
}

pub(crate) struct WritableStreamInner<T: Clone + 'static> {
    /// <https://streams.spec.whatwg.org/#writablestream-backpressure>
    backpressure: Cell<bool>,

    /// <https://streams.spec.whatwg.org/#writablestream-closerequest>
    close_request: RefCell<Option<Promise<()>>>,

    /// <https://streams.spec.whatwg.org/#writablestream-controller>
    controller: WritableStreamDefaultController<T>,

    /// <https://streams.spec.whatwg.org/#writablestream-inflightwriterequest>
    in_flight_write_request: RefCell<Option<Promise<()>>>,

    /// <https://streams.spec.whatwg.org/#writablestream-inflightcloserequest>
    in_flight_close_request: RefCell<Option<Promise<()>>>,

    /// <https://streams.spec.whatwg.org/#writablestream-pendingabortrequest>
    pending_abort_request: RefCell<Option<PendingAbortRequest>>,

    /// <https://streams.spec.whatwg.org/#writablestream-state>
    state: Cell<WritableStreamState>,

    /// <https://streams.spec.whatwg.org/#writablestream-storederror>
    stored_error: RefCell<Option<Error>>,

    /// <https://streams.spec.whatwg.org/#writablestream-writer>
    writer: RefCell<Option<Weak<WriterInner<T>>>>,

    /// <https://streams.spec.whatwg.org/#writablestream-writerequests>
    write_requests: RefCell<VecDeque<Promise<()>>>,
}

/// <https://streams.spec.whatwg.org/#ws-class>
pub struct WritableStream<T: Clone + 'static> {
    inner: Rc<WritableStreamInner<T>>,
}

impl<T: Clone + 'static> Clone for WritableStream<T> {
    fn clone(&self) -> WritableStream<T> {
        WritableStream {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Clone + 'static> fmt::Debug for WritableStream<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WritableStream")
            .field("state", &self.state())
            .field("locked", &self.is_locked())
            .field("backpressure", &self.get_backpressure())
            .finish()
    }
}

/// A handle that does not keep a writable stream alive.
pub(crate) struct WeakWritableStream<T: Clone + 'static> {
    inner: Weak<WritableStreamInner<T>>,
}

impl<T: Clone + 'static> Clone for WeakWritableStream<T> {
    fn clone(&self) -> WeakWritableStream<T> {
        WeakWritableStream {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Clone + 'static> WeakWritableStream<T> {
    pub(crate) fn upgrade(&self) -> Option<WritableStream<T>> {
        self.inner.upgrade().map(|inner| WritableStream { inner })
    }
}

impl<T: Clone + 'static> WritableStream<T> {
    /// <https://streams.spec.whatwg.org/#ws-constructor>
    pub fn new(
        underlying_sink: impl UnderlyingSink<T> + 'static,
        strategy: QueuingStrategy<T>,
    ) -> Fallible<WritableStream<T>> {
        let underlying_sink: Rc<dyn UnderlyingSink<T>> = Rc::new(underlying_sink);

        // If underlyingSinkDict["type"] exists, throw a RangeError exception.
        if underlying_sink.type_().is_some() {
            return Err(Error::Range("type is set".to_string()));
        }

        // Let sizeAlgorithm be ! ExtractSizeAlgorithm(strategy).
        let size_algorithm = extract_size_algorithm(&strategy);

        // Let highWaterMark be ? ExtractHighWaterMark(strategy, 1).
        let high_water_mark = extract_high_water_mark(&strategy, 1.0)?;

        // Perform ? SetUpWritableStreamDefaultControllerFromUnderlyingSink
        Ok(WritableStream::set_up(
            SinkAlgorithms::from_underlying_sink(underlying_sink),
            high_water_mark,
            size_algorithm,
        ))
    }

    /// <https://streams.spec.whatwg.org/#create-writable-stream>
    pub(crate) fn set_up(
        algorithms: SinkAlgorithms<T>,
        high_water_mark: f64,
        size_algorithm: SizeAlgorithm<T>,
    ) -> WritableStream<T> {
        // Assert: ! IsNonNegativeNumber(highWaterMark) is true.
        assert!(high_water_mark >= 0.0);

        // Perform ! InitializeWritableStream(stream).
        let inner = Rc::new_cyclic(|stream| WritableStreamInner {
            backpressure: Default::default(),
            close_request: Default::default(),
            controller: WritableStreamDefaultController::new(
                WeakWritableStream {
                    inner: stream.clone(),
                },
                high_water_mark,
                size_algorithm,
            ),
            in_flight_write_request: Default::default(),
            in_flight_close_request: Default::default(),
            pending_abort_request: Default::default(),
            state: Default::default(),
            stored_error: Default::default(),
            writer: Default::default(),
            write_requests: Default::default(),
        });
        let stream = WritableStream { inner };

        // Perform ? SetUpWritableStreamDefaultController
        stream.inner.controller.set_up(algorithms);
        stream
    }

    pub(crate) fn downgrade(&self) -> WeakWritableStream<T> {
        WeakWritableStream {
            inner: Rc::downgrade(&self.inner),
        }
    }

    pub fn controller(&self) -> &WritableStreamDefaultController<T> {
        &self.inner.controller
    }

    /// The current state, reporting `Closing` for a writable stream whose
    /// close is queued or in flight.
    pub fn state(&self) -> WritableStreamState {
        let state = self.inner.state.get();
        if state == WritableStreamState::Writable && self.close_queued_or_in_flight() {
            return WritableStreamState::Closing;
        }
        state
    }

    pub fn is_writable(&self) -> bool {
        matches!(self.inner.state.get(), WritableStreamState::Writable)
    }

    pub fn is_erroring(&self) -> bool {
        matches!(self.inner.state.get(), WritableStreamState::Erroring)
    }

    pub fn is_errored(&self) -> bool {
        matches!(self.inner.state.get(), WritableStreamState::Errored)
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.inner.state.get(), WritableStreamState::Closed)
    }

    /// <https://streams.spec.whatwg.org/#writablestream-storederror>
    pub fn stored_error(&self) -> Option<Error> {
        self.inner.stored_error.borrow().clone()
    }

    fn get_stored_error(&self) -> Error {
        self.stored_error().unwrap_or(Error::Undefined)
    }

    pub fn ptr_eq(&self, other: &WritableStream<T>) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn has_in_flight_write_request(&self) -> bool {
        self.inner.in_flight_write_request.borrow().is_some()
    }

    /// <https://streams.spec.whatwg.org/#writable-stream-has-operation-marked-in-flight>
    pub(crate) fn has_operations_marked_inflight(&self) -> bool {
        let in_flight_write_requested = self.inner.in_flight_write_request.borrow().is_some();
        let in_flight_close_requested = self.inner.in_flight_close_request.borrow().is_some();

        in_flight_write_requested || in_flight_close_requested
    }

    /// <https://streams.spec.whatwg.org/#writable-stream-finish-erroring>
    pub(crate) fn finish_erroring(&self) {
        // Assert: stream.[[state]] is "erroring".
        assert!(self.is_erroring());

        // Assert: ! WritableStreamHasOperationMarkedInFlight(stream) is false.
        assert!(!self.has_operations_marked_inflight());

        // Set stream.[[state]] to "errored".
        self.inner.state.set(WritableStreamState::Errored);
        debug!("Writable stream errored");

        // Perform ! stream.[[controller]].[[ErrorSteps]]().
        let controller = &self.inner.controller;
        controller.perform_error_steps();

        // Let storedError be stream.[[storedError]].
        let stored_error = self.get_stored_error();

        // For each writeRequest of stream.[[writeRequests]]:
        let write_requests = mem::take(&mut *self.inner.write_requests.borrow_mut());
        for request in write_requests {
            // Reject writeRequest with storedError.
            request.reject(stored_error.clone());
        }

        // Set stream.[[writeRequests]] to an empty list.
        // Done above with `take`.

        // If stream.[[pendingAbortRequest]] is undefined,
        // Let abortRequest be stream.[[pendingAbortRequest]].
        // Set stream.[[pendingAbortRequest]] to undefined.
        let pending_abort_request = self.inner.pending_abort_request.borrow_mut().take();
        let Some(pending_abort_request) = pending_abort_request else {
            // Perform ! WritableStreamRejectCloseAndClosedPromiseIfNeeded(stream).
            self.reject_close_and_closed_promise_if_needed();

            // Return.
            return;
        };

        // If abortRequest’s was already erroring is true,
        if pending_abort_request.was_already_erroring {
            // Reject abortRequest’s promise with storedError.
            pending_abort_request.promise.reject(stored_error);

            // Perform ! WritableStreamRejectCloseAndClosedPromiseIfNeeded(stream).
            self.reject_close_and_closed_promise_if_needed();

            // Return.
            return;
        }

        // Let promise be ! stream.[[controller]].[[AbortSteps]](abortRequest’s reason).
        let promise = controller.abort_steps(pending_abort_request.reason);

        // Upon fulfillment of promise,
        let fulfilled_stream = self.clone();
        let fulfilled_request = pending_abort_request.promise.clone();
        // Upon rejection of promise with reason r,
        let rejected_stream = self.clone();
        let rejected_request = pending_abort_request.promise;
        promise.append_native_handler(
            move |()| {
                // Resolve abortRequest’s promise with undefined.
                fulfilled_request.resolve(());

                // Perform ! WritableStreamRejectCloseAndClosedPromiseIfNeeded(stream).
                fulfilled_stream.reject_close_and_closed_promise_if_needed();
            },
            move |reason| {
                // Reject abortRequest’s promise with reason.
                rejected_request.reject(reason);

                // Perform ! WritableStreamRejectCloseAndClosedPromiseIfNeeded(stream).
                rejected_stream.reject_close_and_closed_promise_if_needed();
            },
        );
    }

    /// <https://streams.spec.whatwg.org/#writable-stream-reject-close-and-closed-promise-if-needed>
    fn reject_close_and_closed_promise_if_needed(&self) {
        // Assert: stream.[[state]] is "errored".
        assert!(self.is_errored());

        let stored_error = self.get_stored_error();

        // If stream.[[closeRequest]] is not undefined
        let close_request = self.inner.close_request.borrow_mut().take();
        if let Some(close_request) = close_request {
            // Assert: stream.[[inFlightCloseRequest]] is undefined.
            assert!(self.inner.in_flight_close_request.borrow().is_none());

            // Reject stream.[[closeRequest]] with stream.[[storedError]].
            close_request.reject(stored_error.clone());

            // Set stream.[[closeRequest]] to undefined.
            // Done with `take` above.
        }

        // Let writer be stream.[[writer]].
        // If writer is not undefined,
        if let Some(writer) = self.writer() {
            // Reject writer.[[closedPromise]] with stream.[[storedError]].
            writer.reject_closed_promise_with_stored_error(stored_error);

            // Set writer.[[closedPromise]].[[PromiseIsHandled]] to true.
            writer.set_close_promise_is_handled();
        }
    }

    /// <https://streams.spec.whatwg.org/#writable-stream-close-queued-or-in-flight>
    pub(crate) fn close_queued_or_in_flight(&self) -> bool {
        let close_requested = self.inner.close_request.borrow().is_some();
        let in_flight_close_requested = self.inner.in_flight_close_request.borrow().is_some();

        close_requested || in_flight_close_requested
    }

    /// <https://streams.spec.whatwg.org/#writable-stream-finish-in-flight-write>
    pub(crate) fn finish_in_flight_write(&self) {
        let Some(in_flight_write_request) = self.inner.in_flight_write_request.borrow_mut().take()
        else {
            // Assert: stream.[[inFlightWriteRequest]] is not undefined.
            unreachable!("Stream should have a write request");
        };

        // Resolve stream.[[inFlightWriteRequest]] with undefined.
        in_flight_write_request.resolve(());

        // Set stream.[[inFlightWriteRequest]] to undefined.
        // Done above with `take`.
    }

    /// <https://streams.spec.whatwg.org/#writable-stream-start-erroring>
    pub(crate) fn start_erroring(&self, error: Error) {
        // Assert: stream.[[storedError]] is undefined.
        assert!(self.inner.stored_error.borrow().is_none());

        // Assert: stream.[[state]] is "writable".
        assert!(self.is_writable());

        // Let controller be stream.[[controller]].
        let controller = &self.inner.controller;

        // Set stream.[[state]] to "erroring".
        self.inner.state.set(WritableStreamState::Erroring);
        debug!("Writable stream erroring: {}", error);

        // Set stream.[[storedError]] to reason.
        *self.inner.stored_error.borrow_mut() = Some(error.clone());

        // Let writer be stream.[[writer]].
        if let Some(writer) = self.writer() {
            // If writer is not undefined, perform ! WritableStreamDefaultWriterEnsureReadyPromiseRejected
            writer.ensure_ready_promise_rejected(error);
        }

        // If ! WritableStreamHasOperationMarkedInFlight(stream) is false and controller.[[started]] is true
        if !self.has_operations_marked_inflight() && controller.started() {
            // perform ! WritableStreamFinishErroring
            self.finish_erroring();
        }
    }

    /// <https://streams.spec.whatwg.org/#writable-stream-deal-with-rejection>
    pub(crate) fn deal_with_rejection(&self, error: Error) {
        // Let state be stream.[[state]].

        // If state is "writable",
        if self.is_writable() {
            // Perform ! WritableStreamStartErroring(stream, error).
            self.start_erroring(error);

            // Return.
            return;
        }

        // Assert: state is "erroring".
        assert!(self.is_erroring());

        // Perform ! WritableStreamFinishErroring(stream).
        self.finish_erroring();
    }

    /// <https://streams.spec.whatwg.org/#writable-stream-mark-first-write-request-in-flight>
    pub(crate) fn mark_first_write_request_in_flight(&self) {
        let mut in_flight_write_request = self.inner.in_flight_write_request.borrow_mut();
        let mut write_requests = self.inner.write_requests.borrow_mut();

        // Assert: stream.[[inFlightWriteRequest]] is undefined.
        assert!(in_flight_write_request.is_none());

        // Let writeRequest be stream.[[writeRequests]][0].
        // Remove writeRequest from stream.[[writeRequests]].
        let Some(write_request) = write_requests.pop_front() else {
            // Assert: stream.[[writeRequests]] is not empty.
            unreachable!("Stream should have a pending write request");
        };

        // Set stream.[[inFlightWriteRequest]] to writeRequest.
        *in_flight_write_request = Some(write_request);
    }

    /// <https://streams.spec.whatwg.org/#writable-stream-mark-close-request-in-flight>
    pub(crate) fn mark_close_request_in_flight(&self) {
        let mut in_flight_close_request = self.inner.in_flight_close_request.borrow_mut();
        let mut close_request = self.inner.close_request.borrow_mut();

        // Assert: stream.[[inFlightCloseRequest]] is undefined.
        assert!(in_flight_close_request.is_none());

        // Let closeRequest be stream.[[closeRequest]].
        // Set stream.[[closeRequest]] to undefined.
        let Some(close_request) = close_request.take() else {
            // Assert: stream.[[closeRequest]] is not undefined.
            unreachable!("Stream should have a close request");
        };

        // Set stream.[[inFlightCloseRequest]] to closeRequest.
        *in_flight_close_request = Some(close_request);
    }

    /// <https://streams.spec.whatwg.org/#writable-stream-finish-in-flight-close>
    pub(crate) fn finish_in_flight_close(&self) {
        let Some(in_flight_close_request) = self.inner.in_flight_close_request.borrow_mut().take()
        else {
            // Assert: stream.[[inFlightCloseRequest]] is not undefined.
            unreachable!("in_flight_close_request must be Some");
        };

        // Resolve stream.[[inFlightCloseRequest]] with undefined.
        in_flight_close_request.resolve(());

        // Set stream.[[inFlightCloseRequest]] to undefined.
        // Done with take above.

        // Assert: stream.[[state]] is "writable" or "erroring".
        assert!(self.is_writable() || self.is_erroring());

        // If state is "erroring",
        if self.is_erroring() {
            // Set stream.[[storedError]] to undefined.
            self.inner.stored_error.borrow_mut().take();

            // If stream.[[pendingAbortRequest]] is not undefined,
            let pending_abort_request = self.inner.pending_abort_request.borrow_mut().take();
            if let Some(pending_abort_request) = pending_abort_request {
                // Resolve stream.[[pendingAbortRequest]]'s promise with undefined.
                pending_abort_request.promise.resolve(());

                // Set stream.[[pendingAbortRequest]] to undefined.
                // Done above with `take`.
            }
        }

        // Set stream.[[state]] to "closed".
        self.inner.state.set(WritableStreamState::Closed);
        debug!("Writable stream closed");

        // Let writer be stream.[[writer]].
        if let Some(writer) = self.writer() {
            // If writer is not undefined,
            // resolve writer.[[closedPromise]] with undefined.
            writer.resolve_closed_promise_with_undefined();
        }

        // Assert: stream.[[pendingAbortRequest]] is undefined.
        assert!(self.inner.pending_abort_request.borrow().is_none());

        // Assert: stream.[[storedError]] is undefined.
        assert!(self.inner.stored_error.borrow().is_none());
    }

    /// <https://streams.spec.whatwg.org/#writable-stream-finish-in-flight-close-with-error>
    pub(crate) fn finish_in_flight_close_with_error(&self, error: Error) {
        let Some(in_flight_close_request) = self.inner.in_flight_close_request.borrow_mut().take()
        else {
            // Assert: stream.[[inFlightCloseRequest]] is not undefined.
            unreachable!("Inflight close request must be defined.");
        };

        // Reject stream.[[inFlightCloseRequest]] with error.
        in_flight_close_request.reject(error.clone());

        // Set stream.[[inFlightCloseRequest]] to undefined.
        // Done above with `take`.

        // Assert: stream.[[state]] is "writable" or "erroring".
        assert!(self.is_erroring() || self.is_writable());

        // If stream.[[pendingAbortRequest]] is not undefined,
        let pending_abort_request = self.inner.pending_abort_request.borrow_mut().take();
        if let Some(pending_abort_request) = pending_abort_request {
            // Reject stream.[[pendingAbortRequest]]'s promise with error.
            pending_abort_request.promise.reject(error.clone());

            // Set stream.[[pendingAbortRequest]] to undefined.
            // Done above with `take`.
        }

        // Perform ! WritableStreamDealWithRejection(stream, error).
        self.deal_with_rejection(error);
    }

    /// <https://streams.spec.whatwg.org/#writable-stream-finish-in-flight-write-with-error>
    pub(crate) fn finish_in_flight_write_with_error(&self, error: Error) {
        let Some(in_flight_write_request) = self.inner.in_flight_write_request.borrow_mut().take()
        else {
            // Assert: stream.[[inFlightWriteRequest]] is not undefined.
            unreachable!("Inflight write request must be defined.");
        };

        // Reject stream.[[inFlightWriteRequest]] with error.
        in_flight_write_request.reject(error.clone());

        // Set stream.[[inFlightWriteRequest]] to undefined.
        // Done above with `take`.

        // Assert: stream.[[state]] is "writable" or "erroring".
        assert!(self.is_erroring() || self.is_writable());

        // Perform ! WritableStreamDealWithRejection(stream, error).
        self.deal_with_rejection(error);
    }

    pub(crate) fn writer(&self) -> Option<WritableStreamDefaultWriter<T>> {
        self.inner
            .writer
            .borrow()
            .as_ref()
            .and_then(Weak::upgrade)
            .map(WritableStreamDefaultWriter::from_inner)
    }

    pub(crate) fn set_writer(&self, writer: Option<&WritableStreamDefaultWriter<T>>) {
        *self.inner.writer.borrow_mut() = writer.map(WritableStreamDefaultWriter::downgrade);
    }

    pub(crate) fn set_backpressure(&self, backpressure: bool) {
        self.inner.backpressure.set(backpressure);
    }

    pub(crate) fn get_backpressure(&self) -> bool {
        self.inner.backpressure.get()
    }

    /// <https://streams.spec.whatwg.org/#is-writable-stream-locked>
    pub fn is_locked(&self) -> bool {
        // If stream.[[writer]] is undefined, return false.
        // Return true.
        self.inner.writer.borrow().is_some()
    }

    /// <https://streams.spec.whatwg.org/#ws-locked>
    pub fn locked(&self) -> bool {
        self.is_locked()
    }

    /// <https://streams.spec.whatwg.org/#writable-stream-add-write-request>
    pub(crate) fn add_write_request(&self) -> Promise<()> {
        // Assert: ! IsWritableStreamLocked(stream) is true.
        assert!(self.is_locked());

        // Assert: stream.[[state]] is "writable".
        assert!(self.is_writable());

        // Let promise be a new promise.
        let promise = Promise::new();

        // Append promise to stream.[[writeRequests]].
        self.inner.write_requests.borrow_mut().push_back(promise.clone());

        // Return promise.
        promise
    }

    /// <https://streams.spec.whatwg.org/#writable-stream-abort>
    pub(crate) fn abort_stream(&self, provided_reason: Error) -> Promise<()> {
        // If stream.[[state]] is "closed" or "errored",
        if self.is_closed() || self.is_errored() {
            // return a promise resolved with undefined.
            return Promise::new_resolved(());
        }

        // If stream.[[pendingAbortRequest]] is not undefined,
        if let Some(pending_abort_request) = self.inner.pending_abort_request.borrow().as_ref() {
            // return stream.[[pendingAbortRequest]]'s promise.
            return pending_abort_request.promise.clone();
        }

        // Assert: state is "writable" or "erroring".
        assert!(self.is_writable() || self.is_erroring());

        // Let wasAlreadyErroring be false.
        // If state is "erroring",
        let was_already_erroring = self.is_erroring();
        let reason = if was_already_erroring {
            // Set wasAlreadyErroring to true.
            // Set reason to undefined.
            Error::Undefined
        } else {
            // Use the provided reason.
            provided_reason
        };

        // Let promise be a new promise.
        let promise = Promise::new();

        // Set stream.[[pendingAbortRequest]] to a new pending abort request
        // whose promise is promise,
        // reason is reason,
        // and was already erroring is wasAlreadyErroring.
        *self.inner.pending_abort_request.borrow_mut() = Some(PendingAbortRequest {
            promise: promise.clone(),
            reason: reason.clone(),
            was_already_erroring,
        });

        // If wasAlreadyErroring is false,
        if !was_already_erroring {
            // perform ! WritableStreamStartErroring(stream, reason)
            self.start_erroring(reason);
        }

        // Return promise.
        promise
    }

    /// <https://streams.spec.whatwg.org/#writable-stream-close>
    pub(crate) fn close_stream(&self) -> Promise<()> {
        // Let state be stream.[[state]].
        // If state is "closed" or "errored",
        if self.is_closed() || self.is_errored() {
            // return a promise rejected with a TypeError exception.
            return Promise::new_rejected(Error::Type("Stream is closed or errored.".to_string()));
        }

        // Assert: state is "writable" or "erroring".
        assert!(self.is_writable() || self.is_erroring());

        // Assert: ! WritableStreamCloseQueuedOrInFlight(stream) is false.
        assert!(!self.close_queued_or_in_flight());

        // Let promise be a new promise.
        let promise = Promise::new();

        // Set stream.[[closeRequest]] to promise.
        *self.inner.close_request.borrow_mut() = Some(promise.clone());

        // Let writer be stream.[[writer]].
        // If writer is not undefined,
        if let Some(writer) = self.writer() {
            // and stream.[[backpressure]] is true,
            // and state is "writable",
            if self.get_backpressure() && self.is_writable() {
                // resolve writer.[[readyPromise]] with undefined.
                writer.resolve_ready_promise_with_undefined();
            }
        }

        // Perform ! WritableStreamDefaultControllerClose(stream.[[controller]]).
        self.inner.controller.close();

        // Return promise.
        promise
    }

    /// <https://streams.spec.whatwg.org/#writable-stream-default-writer-get-desired-size>
    /// Note: implement as a stream method, as opposed to a writer one, for convenience.
    pub(crate) fn get_desired_size(&self) -> Option<f64> {
        // Let stream be writer.[[stream]].
        // Stream is `self`.
        // Let state be stream.[[state]].
        // If state is "errored" or "erroring", return null.
        if self.is_errored() || self.is_erroring() {
            return None;
        }

        // If state is "closed", return 0.
        if self.is_closed() {
            return Some(0.);
        }

        Some(self.inner.controller.get_desired_size())
    }

    /// <https://streams.spec.whatwg.org/#acquire-writable-stream-default-writer>
    pub(crate) fn aquire_default_writer(&self) -> Fallible<WritableStreamDefaultWriter<T>> {
        // Let writer be a new WritableStreamDefaultWriter object.
        // Perform ? SetUpWritableStreamDefaultWriter(writer, stream).
        // Return writer.
        WritableStreamDefaultWriter::new(self)
    }

    /// <https://streams.spec.whatwg.org/#writable-stream-update-backpressure>
    pub(crate) fn update_backpressure(&self, backpressure: bool) {
        // Assert: stream.[[state]] is "writable".
        assert!(self.is_writable());

        // Assert: ! WritableStreamCloseQueuedOrInFlight(stream) is false.
        assert!(!self.close_queued_or_in_flight());

        // Let writer be stream.[[writer]].
        if let Some(writer) = self.writer() {
            // If writer is not undefined
            // and backpressure is not stream.[[backpressure]],
            if backpressure != self.get_backpressure() {
                if backpressure {
                    // If backpressure is true, set writer.[[readyPromise]] to a new promise.
                    writer.set_ready_promise(Promise::new());
                } else {
                    // Otherwise,
                    // Assert: backpressure is false.
                    // Resolve writer.[[readyPromise]] with undefined.
                    writer.resolve_ready_promise_with_undefined();
                }
            }
        }

        // Set stream.[[backpressure]] to backpressure.
        self.set_backpressure(backpressure);
    }

    /// <https://streams.spec.whatwg.org/#ws-abort>
    pub fn abort(&self, reason: Error) -> Promise<()> {
        // If ! IsWritableStreamLocked(this) is true,
        if self.is_locked() {
            // return a promise rejected with a TypeError exception.
            return Promise::new_rejected(Error::Type("Stream is locked.".to_string()));
        }

        // Return ! WritableStreamAbort(this, reason).
        self.abort_stream(reason)
    }

    /// <https://streams.spec.whatwg.org/#ws-close>
    pub fn close(&self) -> Promise<()> {
        // If ! IsWritableStreamLocked(this) is true,
        if self.is_locked() {
            // return a promise rejected with a TypeError exception.
            return Promise::new_rejected(Error::Type("Stream is locked.".to_string()));
        }

        // If ! WritableStreamCloseQueuedOrInFlight(this) is true
        if self.close_queued_or_in_flight() {
            // return a promise rejected with a TypeError exception.
            return Promise::new_rejected(Error::Type(
                "Stream has closed queued or in-flight".to_string(),
            ));
        }

        // Return ! WritableStreamClose(this).
        self.close_stream()
    }

    /// <https://streams.spec.whatwg.org/#ws-get-writer>
    pub fn get_writer(&self) -> Fallible<WritableStreamDefaultWriter<T>> {
        // Return ? AcquireWritableStreamDefaultWriter(this).
        self.aquire_default_writer()
    }
}

/// <https://streams.spec.whatwg.org/#create-writable-stream>
pub(crate) fn create_writable_stream<T: Clone + 'static>(
    algorithms: SinkAlgorithms<T>,
    high_water_mark: f64,
    size_algorithm: SizeAlgorithm<T>,
) -> WritableStream<T> {
    WritableStream::set_up(algorithms, high_water_mark, size_algorithm)
}
