/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use crate::defaultteeunderlyingsource::readable_stream_default_tee;
use crate::error::{Error, Fallible};
use crate::pipeto::{StreamPipeOptions, readable_stream_pipe_to};
use crate::promise::Promise;
use crate::queuingstrategy::{
    QueuingStrategy, SizeAlgorithm, extract_high_water_mark, extract_size_algorithm,
};
use crate::readablestreamdefaultcontroller::ReadableStreamDefaultController;
use crate::readablestreamdefaultreader::{
    ReadRequest, ReadResult, ReadableStreamDefaultReader, ReaderInner,
};
use crate::transformstream::GenericTransformStream;
use crate::underlyingsource::{IteratorSource, SourceAlgorithms, UnderlyingSource};
use crate::writablestream::WritableStream;

/// <https://streams.spec.whatwg.org/#readablestream-state>
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadableStreamState {
    Readable,
    Closed,
    Errored,
}

/// <https://streams.spec.whatwg.org/#enumdef-readablestreamreadermode>
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadableStreamReaderMode {
    Byob,
}

/// <https://streams.spec.whatwg.org/#dictdef-readablestreamgetreaderoptions>
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReadableStreamGetReaderOptions {
    pub mode: Option<ReadableStreamReaderMode>,
}

pub(crate) struct ReadableStreamInner<T: Clone + 'static> {
    /// <https://streams.spec.whatwg.org/#readablestream-state>
    state: Cell<ReadableStreamState>,

    /// <https://streams.spec.whatwg.org/#readablestream-storederror>
    stored_error: RefCell<Option<Error>>,

    /// <https://streams.spec.whatwg.org/#readablestream-disturbed>
    disturbed: Cell<bool>,

    /// <https://streams.spec.whatwg.org/#readablestream-reader>
    ///
    /// The reader keeps the stream alive, not the other way around. A reader
    /// dropped without releasing its lock leaves the stream locked.
    reader: RefCell<Option<Weak<ReaderInner<T>>>>,

    /// <https://streams.spec.whatwg.org/#readablestream-controller>
    controller: ReadableStreamDefaultController<T>,
}

/// <https://streams.spec.whatwg.org/#readablestream>
pub struct ReadableStream<T: Clone + 'static> {
    inner: Rc<ReadableStreamInner<T>>,
}

impl<T: Clone + 'static> Clone for ReadableStream<T> {
    fn clone(&self) -> ReadableStream<T> {
        ReadableStream {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Clone + 'static> fmt::Debug for ReadableStream<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadableStream")
            .field("state", &self.inner.state.get())
            .field("locked", &self.is_locked())
            .finish()
    }
}

/// A handle that does not keep a readable stream alive.
pub(crate) struct WeakReadableStream<T: Clone + 'static> {
    inner: Weak<ReadableStreamInner<T>>,
}

impl<T: Clone + 'static> Clone for WeakReadableStream<T> {
    fn clone(&self) -> WeakReadableStream<T> {
        WeakReadableStream {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Clone + 'static> WeakReadableStream<T> {
    pub(crate) fn new(inner: Weak<ReadableStreamInner<T>>) -> WeakReadableStream<T> {
        WeakReadableStream { inner }
    }

    pub(crate) fn upgrade(&self) -> Option<ReadableStream<T>> {
        self.inner.upgrade().map(|inner| ReadableStream { inner })
    }
}

impl<T: Clone + 'static> ReadableStream<T> {
    /// <https://streams.spec.whatwg.org/#rs-constructor>
    pub fn new(
        underlying_source: impl UnderlyingSource<T> + 'static,
        strategy: QueuingStrategy<T>,
    ) -> Fallible<ReadableStream<T>> {
        let underlying_source: Rc<dyn UnderlyingSource<T>> = Rc::new(underlying_source);

        // If underlyingSourceDict["type"] is "bytes", byte streams are not supported here.
        if let Some(type_) = underlying_source.type_() {
            return Err(Error::Range(format!(
                "Unsupported underlying source type: {}",
                type_
            )));
        }

        // Let sizeAlgorithm be ! ExtractSizeAlgorithm(strategy).
        let size_algorithm = extract_size_algorithm(&strategy);

        // Let highWaterMark be ? ExtractHighWaterMark(strategy, 1).
        let high_water_mark = extract_high_water_mark(&strategy, 1.0)?;

        // Perform ? SetUpReadableStreamDefaultControllerFromUnderlyingSource
        Ok(ReadableStream::set_up(
            SourceAlgorithms::from_underlying_source(underlying_source),
            high_water_mark,
            size_algorithm,
        ))
    }

    /// A stream draining `iter`, one item per pull, closed when the iterator is exhausted.
    pub fn from_iter<I>(iter: I) -> ReadableStream<T>
    where
        I: IntoIterator<Item = T>,
        I::IntoIter: 'static,
    {
        let source: Rc<dyn UnderlyingSource<T>> = Rc::new(IteratorSource::new(iter.into_iter()));
        ReadableStream::set_up(
            SourceAlgorithms::from_underlying_source(source),
            0.0,
            extract_size_algorithm(&QueuingStrategy::default()),
        )
    }

    /// <https://streams.spec.whatwg.org/#set-up-readable-stream-default-controller>
    ///
    /// Builds the stream and its controller together, then runs the start algorithm.
    pub(crate) fn set_up(
        algorithms: SourceAlgorithms<T>,
        high_water_mark: f64,
        size_algorithm: SizeAlgorithm<T>,
    ) -> ReadableStream<T> {
        let inner = Rc::new_cyclic(|stream| ReadableStreamInner {
            state: Cell::new(ReadableStreamState::Readable),
            stored_error: RefCell::new(None),
            disturbed: Cell::new(false),
            reader: RefCell::new(None),
            controller: ReadableStreamDefaultController::new(
                WeakReadableStream::new(stream.clone()),
                high_water_mark,
                size_algorithm,
            ),
        });
        let stream = ReadableStream { inner };
        stream.inner.controller.set_up(algorithms);
        stream
    }

    pub(crate) fn downgrade(&self) -> WeakReadableStream<T> {
        WeakReadableStream::new(Rc::downgrade(&self.inner))
    }

    pub fn controller(&self) -> &ReadableStreamDefaultController<T> {
        &self.inner.controller
    }

    pub fn state(&self) -> ReadableStreamState {
        self.inner.state.get()
    }

    pub fn is_readable(&self) -> bool {
        self.inner.state.get() == ReadableStreamState::Readable
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.get() == ReadableStreamState::Closed
    }

    pub fn is_errored(&self) -> bool {
        self.inner.state.get() == ReadableStreamState::Errored
    }

    pub fn is_disturbed(&self) -> bool {
        self.inner.disturbed.get()
    }

    pub(crate) fn set_disturbed(&self) {
        self.inner.disturbed.set(true);
    }

    /// The reason this stream errored with, if it did.
    pub fn stored_error(&self) -> Option<Error> {
        self.inner.stored_error.borrow().clone()
    }

    /// <https://streams.spec.whatwg.org/#is-readable-stream-locked>
    pub fn is_locked(&self) -> bool {
        self.inner.reader.borrow().is_some()
    }

    /// <https://streams.spec.whatwg.org/#rs-locked>
    pub fn locked(&self) -> bool {
        self.is_locked()
    }

    pub fn ptr_eq(&self, other: &ReadableStream<T>) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    fn reader(&self) -> Option<ReadableStreamDefaultReader<T>> {
        self.inner
            .reader
            .borrow()
            .as_ref()
            .and_then(Weak::upgrade)
            .map(ReadableStreamDefaultReader::from_inner)
    }

    pub(crate) fn set_reader(&self, reader: Option<&ReadableStreamDefaultReader<T>>) {
        *self.inner.reader.borrow_mut() = reader.map(ReadableStreamDefaultReader::downgrade);
    }

    /// Whether `reader` is the one holding this stream's lock.
    pub(crate) fn has_reader(&self, reader: &ReadableStreamDefaultReader<T>) -> bool {
        self.reader()
            .is_some_and(|current| current.ptr_eq(reader))
    }

    /// <https://streams.spec.whatwg.org/#readable-stream-add-read-request>
    pub(crate) fn add_read_request(&self, read_request: ReadRequest<T>) {
        // Assert: stream.[[state]] is "readable".
        assert!(self.is_readable());

        let Some(reader) = self.reader() else {
            unreachable!("Attempt to add a read request without having first acquired a reader.");
        };

        // Append readRequest to stream.[[reader]].[[readRequests]].
        reader.add_read_request(read_request);
    }

    /// <https://streams.spec.whatwg.org/#readable-stream-get-num-read-requests>
    pub(crate) fn get_num_read_requests(&self) -> usize {
        self.reader()
            .map_or(0, |reader| reader.get_num_read_requests())
    }

    /// <https://streams.spec.whatwg.org/#readable-stream-has-default-reader>
    pub(crate) fn has_default_reader(&self) -> bool {
        self.reader().is_some()
    }

    /// <https://streams.spec.whatwg.org/#readable-stream-fulfill-read-request>
    pub(crate) fn fulfill_read_request(&self, chunk: T, done: bool) {
        // Assert: ! ReadableStreamHasDefaultReader(stream) is true.
        let Some(reader) = self.reader() else {
            unreachable!("Attempt to fulfill a read request without a reader.");
        };

        // Let readRequest be reader.[[readRequests]][0].
        // Remove readRequest from reader.[[readRequests]].
        let request = reader.remove_read_request();

        if done {
            // If done is true, perform readRequest’s close steps.
            request.close_steps();
        } else {
            // Otherwise, perform readRequest’s chunk steps, given chunk.
            request.chunk_steps(chunk);
        }
    }

    /// <https://streams.spec.whatwg.org/#readable-stream-close>
    pub(crate) fn close(&self) {
        // Assert: stream.[[state]] is "readable".
        assert!(self.is_readable());

        // Set stream.[[state]] to "closed".
        self.inner.state.set(ReadableStreamState::Closed);
        debug!("Readable stream closed");

        // Let reader be stream.[[reader]].
        // If reader is undefined, return.
        let Some(reader) = self.reader() else {
            return;
        };

        // Resolve reader.[[closedPromise]] with undefined.
        // If reader implements ReadableStreamDefaultReader,
        // perform the close steps of every pending read request.
        reader.close();
    }

    /// <https://streams.spec.whatwg.org/#readable-stream-error>
    pub(crate) fn error(&self, error: Error) {
        // Assert: stream.[[state]] is "readable".
        assert!(self.is_readable());

        // Set stream.[[state]] to "errored".
        self.inner.state.set(ReadableStreamState::Errored);
        debug!("Readable stream errored: {}", error);

        // Set stream.[[storedError]] to e.
        *self.inner.stored_error.borrow_mut() = Some(error.clone());

        // Let reader be stream.[[reader]].
        // If reader is undefined, return.
        let Some(reader) = self.reader() else {
            return;
        };

        // Reject reader.[[closedPromise]] with e.
        // Perform ! ReadableStreamDefaultReaderErrorReadRequests(reader, e).
        reader.error(error);
    }

    /// <https://streams.spec.whatwg.org/#readable-stream-cancel>
    pub(crate) fn cancel_stream(&self, reason: Error) -> Promise<()> {
        // Set stream.[[disturbed]] to true.
        self.inner.disturbed.set(true);

        match self.state() {
            // If stream.[[state]] is "closed", return a promise resolved with undefined.
            ReadableStreamState::Closed => return Promise::new_resolved(()),
            // If stream.[[state]] is "errored", return a promise rejected with stream.[[storedError]].
            ReadableStreamState::Errored => {
                let error = self.stored_error().unwrap_or(Error::Undefined);
                return Promise::new_rejected(error);
            },
            ReadableStreamState::Readable => {},
        }

        // Perform ! ReadableStreamClose(stream).
        self.close();

        // Let sourceCancelPromise be ! stream.[[controller]].[[CancelSteps]](reason).
        let source_cancel_promise = self.inner.controller.perform_cancel_steps(reason);

        // Return the result of reacting to sourceCancelPromise
        // with a fulfillment step that returns undefined.
        let result = Promise::new();
        let fulfill = result.clone();
        let reject = result.clone();
        source_cancel_promise.append_native_handler(
            move |()| fulfill.resolve(()),
            move |error| reject.reject(error),
        );
        result
    }

    /// <https://streams.spec.whatwg.org/#rs-cancel>
    pub fn cancel(&self, reason: Error) -> Promise<()> {
        // If ! IsReadableStreamLocked(this) is true,
        // return a promise rejected with a TypeError exception.
        if self.is_locked() {
            return Promise::new_rejected(Error::Type("stream is locked".to_owned()));
        }

        // Return ! ReadableStreamCancel(this, reason).
        self.cancel_stream(reason)
    }

    /// <https://streams.spec.whatwg.org/#rs-get-reader>
    pub fn get_reader(&self) -> Fallible<ReadableStreamDefaultReader<T>> {
        self.get_reader_with_options(ReadableStreamGetReaderOptions::default())
    }

    /// <https://streams.spec.whatwg.org/#rs-get-reader>
    pub fn get_reader_with_options(
        &self,
        options: ReadableStreamGetReaderOptions,
    ) -> Fallible<ReadableStreamDefaultReader<T>> {
        // If options["mode"] does not exist, return ? AcquireReadableStreamDefaultReader(this).
        match options.mode {
            None => self.acquire_default_reader(),
            // Byob readers require a byte stream controller.
            Some(ReadableStreamReaderMode::Byob) => Err(Error::Type(
                "Cannot get a BYOB reader for a stream without a byte controller.".to_owned(),
            )),
        }
    }

    /// <https://streams.spec.whatwg.org/#acquire-readable-stream-reader>
    pub(crate) fn acquire_default_reader(&self) -> Fallible<ReadableStreamDefaultReader<T>> {
        ReadableStreamDefaultReader::new(self)
    }

    /// <https://streams.spec.whatwg.org/#rs-tee>
    pub fn tee(&self) -> Fallible<(ReadableStream<T>, ReadableStream<T>)> {
        // Return ? ReadableStreamTee(this, false).
        readable_stream_default_tee(self)
    }

    /// <https://streams.spec.whatwg.org/#rs-pipe-to>
    pub fn pipe_to(&self, destination: &WritableStream<T>, options: StreamPipeOptions) -> Promise<()> {
        // If ! IsReadableStreamLocked(this) is true,
        // return a promise rejected with a TypeError exception.
        if self.is_locked() {
            return Promise::new_rejected(Error::Type("Source stream is locked".to_owned()));
        }

        // If ! IsWritableStreamLocked(destination) is true,
        // return a promise rejected with a TypeError exception.
        if destination.is_locked() {
            return Promise::new_rejected(Error::Type("Destination stream is locked".to_owned()));
        }

        // Return ! ReadableStreamPipeTo(this, destination, preventClose, preventAbort, preventCancel).
        readable_stream_pipe_to(self, destination, options)
    }

    /// <https://streams.spec.whatwg.org/#rs-pipe-through>
    pub fn pipe_through<O, S>(&self, transform: &S, options: StreamPipeOptions) -> Fallible<ReadableStream<O>>
    where
        O: Clone + 'static,
        S: GenericTransformStream<T, O>,
    {
        // If ! IsReadableStreamLocked(this) is true, throw a TypeError exception.
        if self.is_locked() {
            return Err(Error::Type("Source stream is locked".to_owned()));
        }

        // If ! IsWritableStreamLocked(transform["writable"]) is true, throw a TypeError exception.
        let writable = transform.writable();
        if writable.is_locked() {
            return Err(Error::Type("Destination stream is locked".to_owned()));
        }

        // Let promise be ! ReadableStreamPipeTo(this, transform["writable"], ...).
        let promise = readable_stream_pipe_to(self, &writable, options);

        // Set promise.[[PromiseIsHandled]] to true.
        promise.set_promise_is_handled();

        // Return transform["readable"].
        Ok(transform.readable())
    }

    /// Read every remaining chunk until the stream closes, through a new reader.
    pub async fn read_all(&self) -> Fallible<Vec<T>> {
        let reader = self.get_reader()?;
        let mut chunks = vec![];
        loop {
            match reader.read().await {
                Ok(ReadResult::Chunk(chunk)) => chunks.push(chunk),
                Ok(ReadResult::Done) => break,
                Err(error) => {
                    reader.release_lock();
                    return Err(error);
                },
            }
        }
        reader.release_lock();
        Ok(chunks)
    }
}

/// <https://streams.spec.whatwg.org/#create-readable-stream>
pub(crate) fn create_readable_stream<T: Clone + 'static>(
    algorithms: SourceAlgorithms<T>,
    high_water_mark: f64,
    size_algorithm: SizeAlgorithm<T>,
) -> ReadableStream<T> {
    // Assert: ! IsNonNegativeNumber(highWaterMark) is true.
    assert!(high_water_mark >= 0.0);
    ReadableStream::set_up(algorithms, high_water_mark, size_algorithm)
}
