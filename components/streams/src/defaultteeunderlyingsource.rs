/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use futures::FutureExt;

use crate::error::{Error, Fallible};
use crate::microtask::enqueue_microtask;
use crate::promise::Promise;
use crate::queuingstrategy::{QueuingStrategy, extract_size_algorithm};
use crate::readablestream::{ReadableStream, WeakReadableStream, create_readable_stream};
use crate::readablestreamdefaultreader::{ReadRequest, ReadableStreamDefaultReader};
use crate::underlyingsource::{HostFuture, SourceAlgorithms, settled};

#[derive(Clone, Copy, Debug, PartialEq)]
enum TeeCancelAlgorithm {
    Cancel1Algorithm,
    Cancel2Algorithm,
}

/// The state shared by the two branches of a default tee.
///
/// Branches are held weakly: a branch owns the algorithms that own this.
pub(crate) struct DefaultTeeUnderlyingSource<T: Clone + 'static> {
    reader: ReadableStreamDefaultReader<T>,
    stream: ReadableStream<T>,
    branch_1: RefCell<Option<WeakReadableStream<T>>>,
    branch_2: RefCell<Option<WeakReadableStream<T>>>,
    reading: Cell<bool>,
    read_again: Cell<bool>,
    canceled_1: Cell<bool>,
    canceled_2: Cell<bool>,
    reason_1: RefCell<Option<Error>>,
    reason_2: RefCell<Option<Error>>,
    cancel_promise: Promise<()>,
}

impl<T: Clone + 'static> DefaultTeeUnderlyingSource<T> {
    fn branch_1(&self) -> Option<ReadableStream<T>> {
        self.branch_1.borrow().as_ref().and_then(WeakReadableStream::upgrade)
    }

    fn branch_2(&self) -> Option<ReadableStream<T>> {
        self.branch_2.borrow().as_ref().and_then(WeakReadableStream::upgrade)
    }

    /// <https://streams.spec.whatwg.org/#abstract-opdef-readablestreamdefaulttee>
    /// Let pullAlgorithm be the following steps:
    fn pull_algorithm(self: &Rc<Self>) -> HostFuture {
        // If reading is true,
        if self.reading.get() {
            // Set readAgain to true.
            self.read_again.set(true);

            // Return a promise resolved with undefined.
            return settled(Ok(()));
        }

        // Set reading to true.
        self.reading.set(true);

        // Let readRequest be a read request with the following items:
        let read_request = ReadRequest::DefaultTee {
            tee_read_request: Rc::new(DefaultTeeReadRequest {
                source: self.clone(),
            }),
        };

        // Perform ! ReadableStreamDefaultReaderRead(reader, readRequest).
        self.reader.read_with_request(read_request);

        // Return a promise resolved with undefined.
        settled(Ok(()))
    }

    /// <https://streams.spec.whatwg.org/#abstract-opdef-readablestreamdefaulttee>
    /// Let cancel1Algorithm and cancel2Algorithm be the following steps, taking a reason argument:
    fn cancel_algorithm(&self, reason: Error, which: TeeCancelAlgorithm) -> Promise<()> {
        let other_canceled = match which {
            TeeCancelAlgorithm::Cancel1Algorithm => {
                // Set canceled1 to true.
                self.canceled_1.set(true);

                // Set reason1 to reason.
                *self.reason_1.borrow_mut() = Some(reason);

                self.canceled_2.get()
            },
            TeeCancelAlgorithm::Cancel2Algorithm => {
                // Set canceled2 to true.
                self.canceled_2.set(true);

                // Set reason2 to reason.
                *self.reason_2.borrow_mut() = Some(reason);

                self.canceled_1.get()
            },
        };
        debug!("Tee branch canceled ({:?})", which);

        // If the other branch was canceled too,
        if other_canceled {
            // Let compositeReason be ! CreateArrayFromList(« reason1, reason2 »).
            let composite_reason = Error::Composite(vec![
                self.reason_1.borrow().clone().unwrap_or(Error::Undefined),
                self.reason_2.borrow().clone().unwrap_or(Error::Undefined),
            ]);

            // Let cancelResult be ! ReadableStreamCancel(stream, compositeReason).
            let cancel_result = self.stream.cancel_stream(composite_reason);

            // Resolve cancelPromise with cancelResult.
            let fulfilled = self.cancel_promise.clone();
            let rejected = self.cancel_promise.clone();
            cancel_result.append_native_handler(
                move |()| fulfilled.resolve(()),
                move |error| rejected.reject(error),
            );
        }

        // Return cancelPromise.
        self.cancel_promise.clone()
    }
}

/// <https://streams.spec.whatwg.org/#ref-for-read-request%E2%91%A2>
pub(crate) struct DefaultTeeReadRequest<T: Clone + 'static> {
    source: Rc<DefaultTeeUnderlyingSource<T>>,
}

impl<T: Clone + 'static> DefaultTeeReadRequest<T> {
    /// Enqueue a microtask to perform the chunk steps
    /// <https://streams.spec.whatwg.org/#ref-for-read-request-chunk-steps%E2%91%A2>
    pub(crate) fn enqueue_chunk_steps(&self, chunk: T) {
        // Queue a microtask to perform the following steps:
        let source = self.source.clone();
        enqueue_microtask(move || DefaultTeeReadRequest::chunk_steps(&source, chunk));
    }

    /// <https://streams.spec.whatwg.org/#ref-for-read-request-chunk-steps%E2%91%A2>
    fn chunk_steps(source: &Rc<DefaultTeeUnderlyingSource<T>>, chunk: T) {
        // Set readAgain to false.
        source.read_again.set(false);

        // Let chunk1 and chunk2 be chunk.
        let chunk1 = chunk.clone();
        let chunk2 = chunk;

        // If canceled1 is false, perform ! ReadableStreamDefaultControllerEnqueue(branch1.[[controller]], chunk1).
        if !source.canceled_1.get() {
            if let Some(branch_1) = source.branch_1() {
                if let Err(error) = branch_1.controller().enqueue_chunk(chunk1) {
                    debug!("Failed to enqueue a chunk into the first tee branch: {}", error);
                }
            }
        }

        // If canceled2 is false, perform ! ReadableStreamDefaultControllerEnqueue(branch2.[[controller]], chunk2).
        if !source.canceled_2.get() {
            if let Some(branch_2) = source.branch_2() {
                if let Err(error) = branch_2.controller().enqueue_chunk(chunk2) {
                    debug!("Failed to enqueue a chunk into the second tee branch: {}", error);
                }
            }
        }

        // Set reading to false.
        source.reading.set(false);

        // If readAgain is true, perform pullAlgorithm.
        // The pull steps run synchronously, the returned future is already settled.
        if source.read_again.get() {
            drop(source.pull_algorithm());
        }
    }

    /// <https://streams.spec.whatwg.org/#read-request-close-steps>
    pub(crate) fn close_steps(&self) {
        let source = &self.source;

        // Set reading to false.
        source.reading.set(false);

        // If canceled1 is false, perform ! ReadableStreamDefaultControllerClose(branch1.[[controller]]).
        if !source.canceled_1.get() {
            if let Some(branch_1) = source.branch_1() {
                branch_1.controller().request_close();
            }
        }

        // If canceled2 is false, perform ! ReadableStreamDefaultControllerClose(branch2.[[controller]]).
        if !source.canceled_2.get() {
            if let Some(branch_2) = source.branch_2() {
                branch_2.controller().request_close();
            }
        }

        // If canceled1 is false or canceled2 is false, resolve cancelPromise with undefined.
        if !source.canceled_1.get() || !source.canceled_2.get() {
            source.cancel_promise.resolve(());
        }
    }

    /// <https://streams.spec.whatwg.org/#read-request-error-steps>
    pub(crate) fn error_steps(&self) {
        // Set reading to false.
        self.source.reading.set(false);
    }
}

/// <https://streams.spec.whatwg.org/#abstract-opdef-readablestreamdefaulttee>
pub(crate) fn readable_stream_default_tee<T: Clone + 'static>(
    stream: &ReadableStream<T>,
) -> Fallible<(ReadableStream<T>, ReadableStream<T>)> {
    // Let reader be ? AcquireReadableStreamDefaultReader(stream).
    let reader = stream.acquire_default_reader()?;

    // Let reading be false.
    // Let readAgain be false.
    // Let canceled1 be false.
    // Let canceled2 be false.
    // Let reason1 be undefined.
    // Let reason2 be undefined.
    // Let cancelPromise be a new promise.
    let source = Rc::new(DefaultTeeUnderlyingSource {
        reader: reader.clone(),
        stream: stream.clone(),
        branch_1: RefCell::new(None),
        branch_2: RefCell::new(None),
        reading: Cell::new(false),
        read_again: Cell::new(false),
        canceled_1: Cell::new(false),
        canceled_2: Cell::new(false),
        reason_1: RefCell::new(None),
        reason_2: RefCell::new(None),
        cancel_promise: Promise::new(),
    });

    // Let startAlgorithm be an algorithm that returns undefined.
    // Set branch1 to ! CreateReadableStream(startAlgorithm, pullAlgorithm, cancel1Algorithm).
    let branch_1 = create_branch(&source, TeeCancelAlgorithm::Cancel1Algorithm);

    // Set branch2 to ! CreateReadableStream(startAlgorithm, pullAlgorithm, cancel2Algorithm).
    let branch_2 = create_branch(&source, TeeCancelAlgorithm::Cancel2Algorithm);

    *source.branch_1.borrow_mut() = Some(branch_1.downgrade());
    *source.branch_2.borrow_mut() = Some(branch_2.downgrade());

    // Upon rejection of reader.[[closedPromise]] with reason r,
    // The reader owns its closed promise, so the handler must not own the source.
    let closed_source: Weak<DefaultTeeUnderlyingSource<T>> = Rc::downgrade(&source);
    reader.closed().append_native_handler(
        |()| {},
        move |error| {
            let Some(closed_source) = closed_source.upgrade() else {
                return;
            };

            // Perform ! ReadableStreamDefaultControllerError(branch1.[[controller]], r).
            if let Some(branch_1) = closed_source.branch_1() {
                branch_1.controller().error(error.clone());
            }

            // Perform ! ReadableStreamDefaultControllerError(branch2.[[controller]], r).
            if let Some(branch_2) = closed_source.branch_2() {
                branch_2.controller().error(error);
            }

            // If canceled1 is false or canceled2 is false, resolve cancelPromise with undefined.
            if !closed_source.canceled_1.get() || !closed_source.canceled_2.get() {
                closed_source.cancel_promise.resolve(());
            }
        },
    );

    // Return « branch1, branch2 ».
    Ok((branch_1, branch_2))
}

fn create_branch<T: Clone + 'static>(
    source: &Rc<DefaultTeeUnderlyingSource<T>>,
    which: TeeCancelAlgorithm,
) -> ReadableStream<T> {
    let pull_source = source.clone();
    let cancel_source = source.clone();
    let algorithms = SourceAlgorithms::new(
        move |_| pull_source.pull_algorithm(),
        move |reason| cancel_source.cancel_algorithm(reason, which).boxed_local(),
    );
    create_readable_stream(
        algorithms,
        1.0,
        extract_size_algorithm(&QueuingStrategy::default()),
    )
}
