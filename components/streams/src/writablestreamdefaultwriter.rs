/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::error::{Error, Fallible};
use crate::promise::Promise;
use crate::writablestream::WritableStream;

pub(crate) struct WriterInner<T: Clone + 'static> {
    /// <https://streams.spec.whatwg.org/#writablestreamdefaultwriter-readypromise>
    ready_promise: RefCell<Promise<()>>,

    /// <https://streams.spec.whatwg.org/#writablestreamdefaultwriter-closedpromise>
    closed_promise: RefCell<Promise<()>>,

    /// <https://streams.spec.whatwg.org/#writablestreamdefaultwriter-stream>
    stream: RefCell<Option<WritableStream<T>>>,
}

/// <https://streams.spec.whatwg.org/#writablestreamdefaultwriter>
pub struct WritableStreamDefaultWriter<T: Clone + 'static> {
    inner: Rc<WriterInner<T>>,
}

impl<T: Clone + 'static> Clone for WritableStreamDefaultWriter<T> {
    fn clone(&self) -> WritableStreamDefaultWriter<T> {
        WritableStreamDefaultWriter {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Clone + 'static> fmt::Debug for WritableStreamDefaultWriter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WritableStreamDefaultWriter")
            .field("released", &self.inner.stream.borrow().is_none())
            .finish()
    }
}

impl<T: Clone + 'static> WritableStreamDefaultWriter<T> {
    /// <https://streams.spec.whatwg.org/#default-writer-constructor>
    pub fn new(stream: &WritableStream<T>) -> Fallible<WritableStreamDefaultWriter<T>> {
        let writer = WritableStreamDefaultWriter {
            inner: Rc::new(WriterInner {
                ready_promise: RefCell::new(Promise::new()),
                closed_promise: RefCell::new(Promise::new()),
                stream: RefCell::new(None),
            }),
        };

        // Perform ? SetUpWritableStreamDefaultWriter(this, stream).
        writer.setup(stream)?;
        Ok(writer)
    }

    pub(crate) fn from_inner(inner: Rc<WriterInner<T>>) -> WritableStreamDefaultWriter<T> {
        WritableStreamDefaultWriter { inner }
    }

    pub(crate) fn downgrade(&self) -> Weak<WriterInner<T>> {
        Rc::downgrade(&self.inner)
    }

    fn stream(&self) -> Option<WritableStream<T>> {
        self.inner.stream.borrow().clone()
    }

    /// <https://streams.spec.whatwg.org/#set-up-writable-stream-default-writer>
    /// Both promises start out pending, the states below settle them.
    fn setup(&self, stream: &WritableStream<T>) -> Fallible<()> {
        // If ! IsWritableStreamLocked(stream) is true, throw a TypeError exception.
        if stream.is_locked() {
            return Err(Error::Type("Stream is locked".to_string()));
        }

        // Set writer.[[stream]] to stream.
        *self.inner.stream.borrow_mut() = Some(stream.clone());

        // Set stream.[[writer]] to writer.
        stream.set_writer(Some(self));

        // Let state be stream.[[state]].

        // If state is "writable",
        if stream.is_writable() {
            // If ! WritableStreamCloseQueuedOrInFlight(stream) is false
            // and stream.[[backpressure]] is true,
            if !stream.close_queued_or_in_flight() && stream.get_backpressure() {
                // set writer.[[readyPromise]] to a new promise.
                // Done in `new`.
            } else {
                // Otherwise, set writer.[[readyPromise]] to a promise resolved with undefined.
                self.inner.ready_promise.borrow().resolve(());
            }

            // Set writer.[[closedPromise]] to a new promise.
            // Done in `new`.
            return Ok(());
        }

        let stored_error = stream.stored_error().unwrap_or(Error::Undefined);

        // Otherwise, if state is "erroring",
        if stream.is_erroring() {
            // Set writer.[[readyPromise]] to a promise rejected with stream.[[storedError]].
            // Set writer.[[readyPromise]].[[PromiseIsHandled]] to true.
            let ready_promise = self.inner.ready_promise.borrow();
            ready_promise.reject(stored_error);
            ready_promise.set_promise_is_handled();

            // Set writer.[[closedPromise]] to a new promise.
            // Done in `new`.
            return Ok(());
        }

        // Otherwise, if state is "closed",
        if stream.is_closed() {
            // Set writer.[[readyPromise]] to a promise resolved with undefined.
            self.inner.ready_promise.borrow().resolve(());

            // Set writer.[[closedPromise]] to a promise resolved with undefined.
            self.inner.closed_promise.borrow().resolve(());
            return Ok(());
        }

        // Otherwise,
        // Assert: state is "errored".
        assert!(stream.is_errored());

        // Set writer.[[readyPromise]] to a promise rejected with stream.[[storedError]].
        // Set writer.[[readyPromise]].[[PromiseIsHandled]] to true.
        let ready_promise = self.inner.ready_promise.borrow();
        ready_promise.reject(stored_error.clone());
        ready_promise.set_promise_is_handled();

        // Set writer.[[closedPromise]] to a promise rejected with storedError.
        // Set writer.[[closedPromise]].[[PromiseIsHandled]] to true.
        let closed_promise = self.inner.closed_promise.borrow();
        closed_promise.reject(stored_error);
        closed_promise.set_promise_is_handled();

        Ok(())
    }

    pub(crate) fn reject_closed_promise_with_stored_error(&self, error: Error) {
        self.inner.closed_promise.borrow().reject(error);
    }

    pub(crate) fn set_close_promise_is_handled(&self) {
        self.inner.closed_promise.borrow().set_promise_is_handled();
    }

    pub(crate) fn set_ready_promise(&self, promise: Promise<()>) {
        *self.inner.ready_promise.borrow_mut() = promise;
    }

    pub(crate) fn resolve_ready_promise_with_undefined(&self) {
        self.inner.ready_promise.borrow().resolve(());
    }

    pub(crate) fn resolve_closed_promise_with_undefined(&self) {
        self.inner.closed_promise.borrow().resolve(());
    }

    /// <https://streams.spec.whatwg.org/#writable-stream-default-writer-ensure-ready-promise-rejected>
    pub(crate) fn ensure_ready_promise_rejected(&self, error: Error) {
        let mut ready_promise = self.inner.ready_promise.borrow_mut();

        // If writer.[[readyPromise]].[[PromiseState]] is "pending", reject writer.[[readyPromise]] with error.
        if ready_promise.is_pending() {
            ready_promise.reject(error);
        } else {
            // Otherwise, set writer.[[readyPromise]] to a promise rejected with error.
            *ready_promise = Promise::new_rejected(error);
        }

        // Set writer.[[readyPromise]].[[PromiseIsHandled]] to true.
        ready_promise.set_promise_is_handled();
    }

    /// <https://streams.spec.whatwg.org/#writable-stream-default-writer-ensure-closed-promise-rejected>
    pub(crate) fn ensure_closed_promise_rejected(&self, error: Error) {
        let mut closed_promise = self.inner.closed_promise.borrow_mut();

        // If writer.[[closedPromise]].[[PromiseState]] is "pending", reject writer.[[closedPromise]] with error.
        if closed_promise.is_pending() {
            closed_promise.reject(error);
        } else {
            // Otherwise, set writer.[[closedPromise]] to a promise rejected with error.
            *closed_promise = Promise::new_rejected(error);
        }

        // Set writer.[[closedPromise]].[[PromiseIsHandled]] to true.
        closed_promise.set_promise_is_handled();
    }

    /// <https://streams.spec.whatwg.org/#writable-stream-default-writer-abort>
    fn abort_stream(&self, reason: Error) -> Promise<()> {
        // Let stream be writer.[[stream]].
        let Some(stream) = self.stream() else {
            // Assert: stream is not undefined.
            unreachable!("Stream should be set.");
        };

        // Return ! WritableStreamAbort(stream, reason).
        stream.abort_stream(reason)
    }

    /// <https://streams.spec.whatwg.org/#writable-stream-default-writer-close>
    fn close_stream(&self) -> Promise<()> {
        // Let stream be writer.[[stream]].
        let Some(stream) = self.stream() else {
            // Assert: stream is not undefined.
            unreachable!("Stream should be set.");
        };

        // Return ! WritableStreamClose(stream).
        stream.close_stream()
    }

    /// <https://streams.spec.whatwg.org/#writable-stream-default-writer-close-with-error-propagation>
    pub(crate) fn close_with_error_propagation(&self) -> Promise<()> {
        // Let stream be writer.[[stream]].
        let Some(stream) = self.stream() else {
            // Assert: stream is not undefined.
            unreachable!("Stream should be set.");
        };

        // If ! WritableStreamCloseQueuedOrInFlight(stream) is true
        // or state is "closed",
        if stream.close_queued_or_in_flight() || stream.is_closed() {
            // return a promise resolved with undefined.
            return Promise::new_resolved(());
        }

        // If state is "errored",
        if stream.is_errored() {
            // return a promise rejected with stream.[[storedError]].
            return Promise::new_rejected(stream.stored_error().unwrap_or(Error::Undefined));
        }

        // Assert: state is "writable" or "erroring".
        assert!(stream.is_writable() || stream.is_erroring());

        // Return ! WritableStreamDefaultWriterClose(writer).
        self.close_stream()
    }

    /// <https://streams.spec.whatwg.org/#writable-stream-default-writer-write>
    pub(crate) fn write_chunk(&self, chunk: T) -> Promise<()> {
        // Let stream be writer.[[stream]].
        let Some(stream) = self.stream() else {
            // Assert: stream is not undefined.
            unreachable!("Stream should be set.");
        };

        // Let controller be stream.[[controller]].
        let controller = stream.controller().clone();

        // Let chunkSize be ! WritableStreamDefaultControllerGetChunkSize(controller, chunk).
        let chunk_size = controller.get_chunk_size(&chunk);

        // If stream is not equal to writer.[[stream]],
        // return a promise rejected with a TypeError exception.
        // The size algorithm may have released this writer.
        let same_stream = self
            .stream()
            .is_some_and(|current| current.ptr_eq(&stream));
        if !same_stream {
            return Promise::new_rejected(Error::Type(
                "Stream was released while measuring the chunk".to_string(),
            ));
        }

        // Let state be stream.[[state]].
        // If state is "errored",
        if stream.is_errored() {
            // return a promise rejected with stream.[[storedError]].
            return Promise::new_rejected(stream.stored_error().unwrap_or(Error::Undefined));
        }

        // If ! WritableStreamCloseQueuedOrInFlight(stream) is true
        // or state is "closed",
        if stream.close_queued_or_in_flight() || stream.is_closed() {
            // return a promise rejected with a TypeError exception indicating
            // that the stream is closing or closed.
            return Promise::new_rejected(Error::Type(
                "Stream has been closed, or has close queued or in-flight".to_string(),
            ));
        }

        // If state is "erroring",
        if stream.is_erroring() {
            // return a promise rejected with stream.[[storedError]].
            return Promise::new_rejected(stream.stored_error().unwrap_or(Error::Undefined));
        }

        // Assert: state is "writable".
        assert!(stream.is_writable());

        // Let promise be ! WritableStreamAddWriteRequest(stream).
        let promise = stream.add_write_request();

        // Perform ! WritableStreamDefaultControllerWrite(controller, chunk, chunkSize).
        controller.write(chunk, chunk_size);

        // Return promise.
        promise
    }

    /// <https://streams.spec.whatwg.org/#writable-stream-default-writer-release>
    pub(crate) fn release(&self) {
        // Let stream be this.[[stream]].
        let Some(stream) = self.stream() else {
            // Assert: stream is not undefined.
            unreachable!("Stream should be set.");
        };

        // Assert: stream.[[writer]] is writer.
        assert!(stream.writer().is_some_and(|writer| Rc::ptr_eq(&writer.inner, &self.inner)));

        // Let releasedError be a new TypeError.
        let released_error = Error::Type("Writer has been released".to_string());

        // Perform ! WritableStreamDefaultWriterEnsureReadyPromiseRejected(writer, releasedError).
        self.ensure_ready_promise_rejected(released_error.clone());

        // Perform ! WritableStreamDefaultWriterEnsureClosedPromiseRejected(writer, releasedError).
        self.ensure_closed_promise_rejected(released_error);

        // Set stream.[[writer]] to undefined.
        stream.set_writer(None);

        // Set this.[[stream]] to undefined.
        *self.inner.stream.borrow_mut() = None;
    }

    /// <https://streams.spec.whatwg.org/#default-writer-closed>
    pub fn closed(&self) -> Promise<()> {
        // Return this.[[closedPromise]].
        self.inner.closed_promise.borrow().clone()
    }

    /// <https://streams.spec.whatwg.org/#default-writer-desired-size>
    pub fn desired_size(&self) -> Fallible<Option<f64>> {
        // If this.[[stream]] is undefined, throw a TypeError exception.
        let Some(stream) = self.stream() else {
            return Err(Error::Type("Stream is undefined".to_string()));
        };

        // Return ! WritableStreamDefaultWriterGetDesiredSize(this).
        Ok(stream.get_desired_size())
    }

    /// <https://streams.spec.whatwg.org/#default-writer-ready>
    pub fn ready(&self) -> Promise<()> {
        // Return this.[[readyPromise]].
        self.inner.ready_promise.borrow().clone()
    }

    /// <https://streams.spec.whatwg.org/#default-writer-abort>
    pub fn abort(&self, reason: Error) -> Promise<()> {
        // If this.[[stream]] is undefined,
        if self.stream().is_none() {
            // return a promise rejected with a TypeError exception.
            return Promise::new_rejected(Error::Type("Stream is undefined".to_string()));
        }

        // Return ! WritableStreamDefaultWriterAbort(this, reason).
        self.abort_stream(reason)
    }

    /// <https://streams.spec.whatwg.org/#default-writer-close>
    pub fn close(&self) -> Promise<()> {
        // Let stream be this.[[stream]].
        let Some(stream) = self.stream() else {
            // If stream is undefined,
            // return a promise rejected with a TypeError exception.
            return Promise::new_rejected(Error::Type("Stream is undefined".to_string()));
        };

        // If ! WritableStreamCloseQueuedOrInFlight(stream) is true
        if stream.close_queued_or_in_flight() {
            // return a promise rejected with a TypeError exception.
            return Promise::new_rejected(Error::Type(
                "Stream has closed queued or in-flight".to_string(),
            ));
        }

        // Return ! WritableStreamDefaultWriterClose(this).
        self.close_stream()
    }

    /// <https://streams.spec.whatwg.org/#default-writer-release-lock>
    pub fn release_lock(&self) {
        // Let stream be this.[[stream]].
        let Some(stream) = self.stream() else {
            // If stream is undefined, return.
            return;
        };

        // Assert: stream.[[writer]] is not undefined.
        assert!(stream.writer().is_some());

        // Perform ! WritableStreamDefaultWriterRelease(this).
        self.release();
    }

    /// <https://streams.spec.whatwg.org/#default-writer-write>
    pub fn write(&self, chunk: T) -> Promise<()> {
        // If this.[[stream]] is undefined,
        if self.stream().is_none() {
            // return a promise rejected with a TypeError exception.
            return Promise::new_rejected(Error::Type("Stream is undefined".to_string()));
        }

        // Return ! WritableStreamDefaultWriterWrite(this, chunk).
        self.write_chunk(chunk)
    }
}
