/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use futures::future::{Either, Select, select};

use crate::error::Error;
use crate::microtask::spawn_local;
use crate::promise::Promise;
use crate::readablestream::ReadableStream;
use crate::readablestreamdefaultreader::{ReadResult, ReadableStreamDefaultReader};
use crate::writablestream::WritableStream;
use crate::writablestreamdefaultwriter::WritableStreamDefaultWriter;

/// <https://streams.spec.whatwg.org/#dictdef-streampipeoptions>
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StreamPipeOptions {
    pub prevent_abort: bool,
    pub prevent_cancel: bool,
    pub prevent_close: bool,
}

/// What to do with the other stream when a pipe shuts down.
#[derive(Debug)]
enum ShutdownAction {
    /// <https://streams.spec.whatwg.org/#writable-stream-abort>
    AbortDestination(Error),
    /// <https://streams.spec.whatwg.org/#readable-stream-cancel>
    CancelSource(Error),
    /// <https://streams.spec.whatwg.org/#writable-stream-default-writer-close-with-error-propagation>
    CloseDestination,
}

/// Why a pipe shuts down: an optional action, and the error it ends with.
#[derive(Debug)]
struct Shutdown {
    action: Option<ShutdownAction>,
    error: Option<Error>,
}

struct PipeTo<T: Clone + 'static> {
    source: ReadableStream<T>,
    destination: WritableStream<T>,
    reader: ReadableStreamDefaultReader<T>,
    writer: WritableStreamDefaultWriter<T>,
    options: StreamPipeOptions,
    /// The last write issued. Writes settle in order, so waiting for this one
    /// waits for all of them.
    current_write: Option<Promise<()>>,
    result: Promise<()>,
}

/// <https://streams.spec.whatwg.org/#readable-stream-pipe-to>
pub(crate) fn readable_stream_pipe_to<T: Clone + 'static>(
    source: &ReadableStream<T>,
    destination: &WritableStream<T>,
    options: StreamPipeOptions,
) -> Promise<()> {
    // Assert: ! IsReadableStreamLocked(source) is false.
    assert!(!source.is_locked());

    // Assert: ! IsWritableStreamLocked(dest) is false.
    assert!(!destination.is_locked());

    // Let reader be ! AcquireReadableStreamDefaultReader(source).
    let reader = match source.acquire_default_reader() {
        Ok(reader) => reader,
        Err(error) => return Promise::new_rejected(error),
    };

    // Let writer be ! AcquireWritableStreamDefaultWriter(dest).
    let writer = match destination.aquire_default_writer() {
        Ok(writer) => writer,
        Err(error) => {
            reader.release();
            return Promise::new_rejected(error);
        },
    };

    // Set source.[[disturbed]] to true.
    source.set_disturbed();

    // Let promise be a new promise.
    let promise = Promise::new();

    // In parallel, using reader and writer, read all chunks from source and write them to dest.
    let pipe = PipeTo {
        source: source.clone(),
        destination: destination.clone(),
        reader,
        writer,
        options,
        current_write: None,
        result: promise.clone(),
    };
    spawn_local(pipe.run());

    // Return promise.
    promise
}

impl<T: Clone + 'static> PipeTo<T> {
    async fn run(mut self) {
        debug!("Starting a pipe");
        loop {
            if let Some(shutdown) = self.check_conditions() {
                self.shutdown(shutdown).await;
                return;
            }

            // Shutdown must stop activity: if shuttingDown becomes true, the user agent must not
            // initiate further reads from reader, and must only perform writes of already-read chunks.
            // Backpressure must be enforced: while WritableStreamDefaultWriterGetDesiredSize(writer)
            // is ≤ 0 or is null, the user agent must not read from reader.
            let ready = self.writer.ready();
            if ready.is_rejected() {
                // The destination is erroring, wait for it to become errored.
                let _ = self.watch().await;
                continue;
            }
            if ready.is_pending() {
                let _ = select(ready, self.watch()).await;
                continue;
            }

            let read = self.reader.read();
            match select(read, self.writer.closed()).await {
                Either::Left((Ok(ReadResult::Chunk(chunk)), _)) => {
                    let write = self.writer.write_chunk(chunk);
                    write.set_promise_is_handled();
                    self.current_write = Some(write);
                },
                // Closing and errors are noticed by the next round of checks.
                Either::Left((Ok(ReadResult::Done), _)) |
                Either::Left((Err(_), _)) |
                Either::Right(_) => {},
            }
        }
    }

    /// Settles when either stream reaches a terminal state.
    fn watch(&self) -> Select<Promise<()>, Promise<()>> {
        select(self.reader.closed(), self.writer.closed())
    }

    fn check_conditions(&self) -> Option<Shutdown> {
        // Errors must be propagated forward: if source.[[state]] is or becomes "errored", then
        if self.source.is_errored() {
            let stored_error = self.source.stored_error().unwrap_or(Error::Undefined);
            // If preventAbort is false, shutdown with an action of
            // ! WritableStreamAbort(dest, source.[[storedError]]) and with source.[[storedError]].
            // Otherwise, shutdown with source.[[storedError]].
            let action = (!self.options.prevent_abort)
                .then(|| ShutdownAction::AbortDestination(stored_error.clone()));
            return Some(Shutdown {
                action,
                error: Some(stored_error),
            });
        }

        // Errors must be propagated backward: if dest.[[state]] is or becomes "errored", then
        if self.destination.is_errored() {
            let stored_error = self.destination.stored_error().unwrap_or(Error::Undefined);
            // If preventCancel is false, shutdown with an action of
            // ! ReadableStreamCancel(source, dest.[[storedError]]) and with dest.[[storedError]].
            // Otherwise, shutdown with dest.[[storedError]].
            let action = (!self.options.prevent_cancel)
                .then(|| ShutdownAction::CancelSource(stored_error.clone()));
            return Some(Shutdown {
                action,
                error: Some(stored_error),
            });
        }

        // Closing must be propagated forward: if source.[[state]] is or becomes "closed", then
        if self.source.is_closed() {
            // If preventClose is false, shutdown with an action of
            // ! WritableStreamDefaultWriterCloseWithErrorPropagation(writer).
            // Otherwise, shutdown.
            let action = (!self.options.prevent_close).then_some(ShutdownAction::CloseDestination);
            return Some(Shutdown {
                action,
                error: None,
            });
        }

        // Closing must be propagated backward: if ! WritableStreamCloseQueuedOrInFlight(dest) is true
        // or dest.[[state]] is "closed", then
        if self.destination.close_queued_or_in_flight() || self.destination.is_closed() {
            // Let destClosed be a new TypeError.
            let dest_closed = Error::Type("Destination stream is closed".to_string());
            // If preventCancel is false, shutdown with an action of
            // ! ReadableStreamCancel(source, destClosed) and with destClosed.
            // Otherwise, shutdown with destClosed.
            let action = (!self.options.prevent_cancel)
                .then(|| ShutdownAction::CancelSource(dest_closed.clone()));
            return Some(Shutdown {
                action,
                error: Some(dest_closed),
            });
        }

        None
    }

    /// <https://streams.spec.whatwg.org/#rs-pipeTo-shutdown-with-action>
    /// <https://streams.spec.whatwg.org/#rs-pipeTo-shutdown>
    async fn shutdown(self, shutdown: Shutdown) {
        debug!("Shutting down a pipe: {:?}", shutdown);
        let Shutdown {
            action,
            error: original_error,
        } = shutdown;

        // If dest.[[state]] is "writable" and ! WritableStreamCloseQueuedOrInFlight(dest) is false,
        if self.destination.is_writable() && !self.destination.close_queued_or_in_flight() {
            // If any chunks have been read but not yet written, write them to dest.
            // Wait until every chunk that has been read has been written
            // (i.e. the corresponding promises have settled).
            if let Some(write) = self.current_write.clone() {
                let _ = write.await;
            }
        }

        // Let p be the result of performing action.
        let result = match action {
            Some(ShutdownAction::AbortDestination(reason)) => {
                self.destination.abort_stream(reason).await
            },
            Some(ShutdownAction::CancelSource(reason)) => self.source.cancel_stream(reason).await,
            Some(ShutdownAction::CloseDestination) => {
                self.writer.close_with_error_propagation().await
            },
            None => Ok(()),
        };

        // Upon fulfillment of p, finalize, passing along originalError if it was given.
        // Upon rejection of p with reason newError, finalize with newError.
        let error = match result {
            Ok(()) => original_error,
            Err(new_error) => Some(new_error),
        };
        self.finalize(error);
    }

    /// <https://streams.spec.whatwg.org/#rs-pipeTo-finalize>
    fn finalize(self, error: Option<Error>) {
        // Perform ! WritableStreamDefaultWriterRelease(writer).
        self.writer.release();

        // If reader implements ReadableStreamBYOBReader, perform ! ReadableStreamBYOBReaderRelease(reader).
        // Otherwise, perform ! ReadableStreamDefaultReaderRelease(reader).
        self.reader.release();

        match error {
            // If error was given, reject promise with error.
            Some(error) => {
                debug!("Pipe finished with an error: {}", error);
                self.result.reject(error);
            },
            // Otherwise, resolve promise with undefined.
            None => {
                debug!("Pipe finished");
                self.result.resolve(());
            },
        }
    }
}
