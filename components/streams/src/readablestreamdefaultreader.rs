/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::defaultteeunderlyingsource::DefaultTeeReadRequest;
use crate::error::{Error, Fallible};
use crate::promise::Promise;
use crate::readablestream::{ReadableStream, ReadableStreamState};

/// The outcome of a read: a chunk, or the end of the stream.
#[derive(Clone, Debug, PartialEq)]
pub enum ReadResult<T> {
    Chunk(T),
    Done,
}

impl<T> ReadResult<T> {
    pub fn is_done(&self) -> bool {
        matches!(self, ReadResult::Done)
    }

    pub fn into_chunk(self) -> Option<T> {
        match self {
            ReadResult::Chunk(chunk) => Some(chunk),
            ReadResult::Done => None,
        }
    }
}

/// <https://streams.spec.whatwg.org/#read-request>
pub(crate) enum ReadRequest<T: Clone + 'static> {
    /// <https://streams.spec.whatwg.org/#default-reader-read>
    Read(Promise<ReadResult<T>>),
    /// <https://streams.spec.whatwg.org/#ref-for-read-request%E2%91%A2>
    DefaultTee {
        tee_read_request: Rc<DefaultTeeReadRequest<T>>,
    },
}

impl<T: Clone + 'static> ReadRequest<T> {
    /// <https://streams.spec.whatwg.org/#read-request-chunk-steps>
    pub(crate) fn chunk_steps(&self, chunk: T) {
        match self {
            ReadRequest::Read(promise) => {
                // Resolve promise with «[ "value" → chunk, "done" → false ]».
                promise.resolve(ReadResult::Chunk(chunk));
            },
            ReadRequest::DefaultTee { tee_read_request } => {
                tee_read_request.enqueue_chunk_steps(chunk);
            },
        }
    }

    /// <https://streams.spec.whatwg.org/#read-request-close-steps>
    pub(crate) fn close_steps(&self) {
        match self {
            ReadRequest::Read(promise) => {
                // Resolve promise with «[ "value" → undefined, "done" → true ]».
                promise.resolve(ReadResult::Done);
            },
            ReadRequest::DefaultTee { tee_read_request } => {
                tee_read_request.close_steps();
            },
        }
    }

    /// <https://streams.spec.whatwg.org/#read-request-error-steps>
    pub(crate) fn error_steps(&self, error: Error) {
        match self {
            ReadRequest::Read(promise) => {
                // Reject promise with e.
                promise.reject(error);
            },
            ReadRequest::DefaultTee { tee_read_request } => {
                tee_read_request.error_steps();
            },
        }
    }
}

pub(crate) struct ReaderInner<T: Clone + 'static> {
    /// <https://streams.spec.whatwg.org/#readablestreamgenericreader-stream>
    stream: RefCell<Option<ReadableStream<T>>>,

    /// <https://streams.spec.whatwg.org/#readablestreamdefaultreader-readrequests>
    read_requests: RefCell<VecDeque<ReadRequest<T>>>,

    /// <https://streams.spec.whatwg.org/#readablestreamgenericreader-closedpromise>
    closed_promise: RefCell<Promise<()>>,
}

/// <https://streams.spec.whatwg.org/#readablestreamdefaultreader>
pub struct ReadableStreamDefaultReader<T: Clone + 'static> {
    inner: Rc<ReaderInner<T>>,
}

impl<T: Clone + 'static> Clone for ReadableStreamDefaultReader<T> {
    fn clone(&self) -> ReadableStreamDefaultReader<T> {
        ReadableStreamDefaultReader {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Clone + 'static> fmt::Debug for ReadableStreamDefaultReader<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadableStreamDefaultReader")
            .field("released", &self.inner.stream.borrow().is_none())
            .field("read_requests", &self.get_num_read_requests())
            .finish()
    }
}

impl<T: Clone + 'static> ReadableStreamDefaultReader<T> {
    /// <https://streams.spec.whatwg.org/#set-up-readable-stream-default-reader>
    pub fn new(stream: &ReadableStream<T>) -> Fallible<ReadableStreamDefaultReader<T>> {
        // If ! IsReadableStreamLocked(stream) is true, throw a TypeError exception.
        if stream.is_locked() {
            return Err(Error::Type("stream is locked".to_owned()));
        }

        let reader = ReadableStreamDefaultReader {
            inner: Rc::new(ReaderInner {
                stream: RefCell::new(None),
                read_requests: RefCell::new(VecDeque::new()),
                closed_promise: RefCell::new(Promise::new()),
            }),
        };

        // Perform ! ReadableStreamReaderGenericInitialize(reader, stream).
        reader.generic_initialize(stream);

        Ok(reader)
    }

    pub(crate) fn from_inner(inner: Rc<ReaderInner<T>>) -> ReadableStreamDefaultReader<T> {
        ReadableStreamDefaultReader { inner }
    }

    pub(crate) fn downgrade(&self) -> Weak<ReaderInner<T>> {
        Rc::downgrade(&self.inner)
    }

    pub(crate) fn ptr_eq(&self, other: &ReadableStreamDefaultReader<T>) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    fn stream(&self) -> Option<ReadableStream<T>> {
        self.inner.stream.borrow().clone()
    }

    /// <https://streams.spec.whatwg.org/#readable-stream-reader-generic-initialize>
    fn generic_initialize(&self, stream: &ReadableStream<T>) {
        // Set reader.[[stream]] to stream.
        *self.inner.stream.borrow_mut() = Some(stream.clone());

        // Set stream.[[reader]] to reader.
        stream.set_reader(Some(self));

        let closed_promise = match stream.state() {
            // If stream.[[state]] is "readable",
            // set reader.[[closedPromise]] to a new promise.
            ReadableStreamState::Readable => Promise::new(),
            // Otherwise, if stream.[[state]] is "closed",
            // set reader.[[closedPromise]] to a promise resolved with undefined.
            ReadableStreamState::Closed => Promise::new_resolved(()),
            // Otherwise, set reader.[[closedPromise]] to a promise rejected with stream.[[storedError]].
            ReadableStreamState::Errored => {
                let promise = Promise::new_rejected(stream.stored_error().unwrap_or(Error::Undefined));
                // Set reader.[[closedPromise]].[[PromiseIsHandled]] to true.
                promise.set_promise_is_handled();
                promise
            },
        };
        *self.inner.closed_promise.borrow_mut() = closed_promise;
    }

    pub(crate) fn add_read_request(&self, read_request: ReadRequest<T>) {
        self.inner.read_requests.borrow_mut().push_back(read_request);
    }

    pub(crate) fn get_num_read_requests(&self) -> usize {
        self.inner.read_requests.borrow().len()
    }

    pub(crate) fn remove_read_request(&self) -> ReadRequest<T> {
        self.inner
            .read_requests
            .borrow_mut()
            .pop_front()
            .expect("Reader must have read request when remove is called into.")
    }

    /// Resolve the closed promise and perform the close steps of every pending read request.
    pub(crate) fn close(&self) {
        self.inner.closed_promise.borrow().resolve(());
        let read_requests = std::mem::take(&mut *self.inner.read_requests.borrow_mut());
        for request in read_requests {
            request.close_steps();
        }
    }

    /// Reject the closed promise and every pending read request with `error`.
    pub(crate) fn error(&self, error: Error) {
        let closed_promise = self.inner.closed_promise.borrow().clone();
        closed_promise.reject(error.clone());
        // Set reader.[[closedPromise]].[[PromiseIsHandled]] to true.
        closed_promise.set_promise_is_handled();

        // Perform ! ReadableStreamDefaultReaderErrorReadRequests(reader, e).
        self.error_read_requests(error);
    }

    /// <https://streams.spec.whatwg.org/#abstract-opdef-readablestreamdefaultreadererrorreadrequests>
    fn error_read_requests(&self, error: Error) {
        // Let readRequests be reader.[[readRequests]].
        // Set reader.[[readRequests]] to a new empty list.
        let read_requests = std::mem::take(&mut *self.inner.read_requests.borrow_mut());

        // For each readRequest of readRequests, perform readRequest’s error steps, given e.
        for request in read_requests {
            request.error_steps(error.clone());
        }
    }

    /// <https://streams.spec.whatwg.org/#readable-stream-default-reader-read>
    pub(crate) fn read_with_request(&self, read_request: ReadRequest<T>) {
        // Let stream be reader.[[stream]].
        // Assert: stream is not undefined.
        let Some(stream) = self.stream() else {
            unreachable!("Reading from a released reader.");
        };

        // Set stream.[[disturbed]] to true.
        stream.set_disturbed();

        match stream.state() {
            // If stream.[[state]] is "closed", perform readRequest’s close steps.
            ReadableStreamState::Closed => read_request.close_steps(),
            // Otherwise, if stream.[[state]] is "errored",
            // perform readRequest’s error steps given stream.[[storedError]].
            ReadableStreamState::Errored => {
                read_request.error_steps(stream.stored_error().unwrap_or(Error::Undefined))
            },
            // Otherwise, perform ! stream.[[controller]].[[PullSteps]](readRequest).
            ReadableStreamState::Readable => stream.controller().perform_pull_steps(read_request),
        }
    }

    /// <https://streams.spec.whatwg.org/#default-reader-read>
    pub fn read(&self) -> Promise<ReadResult<T>> {
        // If this.[[stream]] is undefined, return a promise rejected with a TypeError exception.
        if self.stream().is_none() {
            return Promise::new_rejected(Error::Type("Reader has been released".to_owned()));
        }

        // Let promise be a new promise.
        let promise = Promise::new();

        // Perform ! ReadableStreamDefaultReaderRead(this, readRequest).
        self.read_with_request(ReadRequest::Read(promise.clone()));

        promise
    }

    /// <https://streams.spec.whatwg.org/#default-reader-release-lock>
    pub fn release_lock(&self) {
        // If this.[[stream]] is undefined, return.
        if self.stream().is_none() {
            return;
        }

        // Perform ! ReadableStreamDefaultReaderRelease(this).
        self.release();
    }

    /// <https://streams.spec.whatwg.org/#abstract-opdef-readablestreamdefaultreaderrelease>
    pub(crate) fn release(&self) {
        // Perform ! ReadableStreamReaderGenericRelease(reader).
        self.generic_release();

        // Let e be a new TypeError exception.
        // Perform ! ReadableStreamDefaultReaderErrorReadRequests(reader, e).
        self.error_read_requests(Error::Type("Reader has been released".to_owned()));
    }

    /// <https://streams.spec.whatwg.org/#readable-stream-reader-generic-release>
    fn generic_release(&self) {
        // Let stream be reader.[[stream]].
        // Assert: stream is not undefined.
        let Some(stream) = self.stream() else {
            unreachable!("Releasing a reader that is already released.");
        };

        // Assert: stream.[[reader]] is reader.
        assert!(stream.has_reader(self));

        let error = Error::Type("Reader has been released".to_owned());
        if stream.is_readable() {
            // If stream.[[state]] is "readable", reject reader.[[closedPromise]] with a TypeError exception.
            self.inner.closed_promise.borrow().reject(error);
        } else {
            // Otherwise, set reader.[[closedPromise]] to a promise rejected with a TypeError exception.
            *self.inner.closed_promise.borrow_mut() = Promise::new_rejected(error);
        }

        // Set reader.[[closedPromise]].[[PromiseIsHandled]] to true.
        self.inner.closed_promise.borrow().set_promise_is_handled();

        // Set stream.[[reader]] to undefined.
        stream.set_reader(None);

        // Set reader.[[stream]] to undefined.
        *self.inner.stream.borrow_mut() = None;
    }

    /// <https://streams.spec.whatwg.org/#generic-reader-closed>
    pub fn closed(&self) -> Promise<()> {
        self.inner.closed_promise.borrow().clone()
    }

    /// <https://streams.spec.whatwg.org/#generic-reader-cancel>
    pub fn cancel(&self, reason: Error) -> Promise<()> {
        // If this.[[stream]] is undefined,
        // return a promise rejected with a TypeError exception.
        let Some(stream) = self.stream() else {
            return Promise::new_rejected(Error::Type("Reader has been released".to_owned()));
        };

        // Return ! ReadableStreamReaderGenericCancel(this, reason).
        stream.cancel_stream(reason)
    }
}
