/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::fmt;
use std::rc::Rc;

use futures::FutureExt;

use crate::error::{Error, Fallible};
use crate::microtask::spawn_local;
use crate::promise::Promise;
use crate::queuingstrategy::{
    QueuingStrategy, SizeAlgorithm, extract_high_water_mark, extract_size_algorithm,
};
use crate::readablestream::{ReadableStream, create_readable_stream};
use crate::transformstreamdefaultcontroller::TransformStreamDefaultController;
use crate::underlyingsink::SinkAlgorithms;
use crate::underlyingsource::{HostFuture, SourceAlgorithms, settled};
use crate::writablestream::{WritableStream, create_writable_stream};

/// <https://streams.spec.whatwg.org/#generictransformstream>
///
/// Anything exposing a writable input side and a readable output side, which
/// is what `pipe_through` needs.
pub trait GenericTransformStream<I: Clone + 'static, O: Clone + 'static> {
    /// <https://streams.spec.whatwg.org/#dom-generictransformstream-readable>
    fn readable(&self) -> ReadableStream<O>;

    /// <https://streams.spec.whatwg.org/#dom-generictransformstream-writable>
    fn writable(&self) -> WritableStream<I>;
}

/// <https://streams.spec.whatwg.org/#transformer-api>
pub trait Transformer<I: Clone + 'static, O: Clone + 'static> {
    /// <https://streams.spec.whatwg.org/#dom-transformer-start>
    fn start(&self, _controller: &TransformStreamDefaultController<I, O>) -> HostFuture {
        settled(Ok(()))
    }

    /// <https://streams.spec.whatwg.org/#dom-transformer-transform>
    fn transform(&self, chunk: I, controller: &TransformStreamDefaultController<I, O>) -> HostFuture;

    /// <https://streams.spec.whatwg.org/#dom-transformer-flush>
    fn flush(&self, _controller: &TransformStreamDefaultController<I, O>) -> HostFuture {
        settled(Ok(()))
    }

    /// <https://streams.spec.whatwg.org/#dom-transformer-cancel>
    fn cancel(&self, _reason: Error) -> HostFuture {
        settled(Ok(()))
    }

    /// <https://streams.spec.whatwg.org/#dom-transformer-readabletype>
    fn readable_type(&self) -> Option<String> {
        None
    }

    /// <https://streams.spec.whatwg.org/#dom-transformer-writabletype>
    fn writable_type(&self) -> Option<String> {
        None
    }
}

/// Relays every chunk unchanged, what a transformer without a transform
/// method does.
#[derive(Clone, Copy, Debug, Default)]
pub struct IdentityTransformer;

impl<T: Clone + 'static> Transformer<T, T> for IdentityTransformer {
    fn transform(&self, chunk: T, controller: &TransformStreamDefaultController<T, T>) -> HostFuture {
        // Perform ? TransformStreamDefaultControllerEnqueue(controller, chunk).
        settled(controller.enqueue(chunk))
    }
}

/// <https://streams.spec.whatwg.org/#ts-class>
pub struct TransformStream<I: Clone + 'static, O: Clone + 'static> {
    /// <https://streams.spec.whatwg.org/#transformstream-controller>
    controller: TransformStreamDefaultController<I, O>,

    /// <https://streams.spec.whatwg.org/#transformstream-readable>
    readable: ReadableStream<O>,

    /// <https://streams.spec.whatwg.org/#transformstream-writable>
    writable: WritableStream<I>,
}

impl<I: Clone + 'static, O: Clone + 'static> Clone for TransformStream<I, O> {
    fn clone(&self) -> TransformStream<I, O> {
        TransformStream {
            controller: self.controller.clone(),
            readable: self.readable.clone(),
            writable: self.writable.clone(),
        }
    }
}

impl<I: Clone + 'static, O: Clone + 'static> fmt::Debug for TransformStream<I, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransformStream")
            .field("readable", &self.readable)
            .field("writable", &self.writable)
            .finish()
    }
}

impl<T: Clone + 'static> Default for TransformStream<T, T> {
    /// An identity transform stream with the default strategies.
    fn default() -> TransformStream<T, T> {
        match TransformStream::new(
            IdentityTransformer,
            QueuingStrategy::default(),
            QueuingStrategy::default(),
        ) {
            Ok(stream) => stream,
            Err(_) => unreachable!("The default strategies are always valid."),
        }
    }
}

impl<I: Clone + 'static, O: Clone + 'static> TransformStream<I, O> {
    /// <https://streams.spec.whatwg.org/#ts-constructor>
    pub fn new(
        transformer: impl Transformer<I, O> + 'static,
        writable_strategy: QueuingStrategy<I>,
        readable_strategy: QueuingStrategy<O>,
    ) -> Fallible<TransformStream<I, O>> {
        let transformer: Rc<dyn Transformer<I, O>> = Rc::new(transformer);

        // If transformerDict["readableType"] exists, throw a RangeError exception.
        if transformer.readable_type().is_some() {
            return Err(Error::Range("readableType is set".to_string()));
        }

        // If transformerDict["writableType"] exists, throw a RangeError exception.
        if transformer.writable_type().is_some() {
            return Err(Error::Range("writableType is set".to_string()));
        }

        // Let readableHighWaterMark be ? ExtractHighWaterMark(readableStrategy, 0).
        let readable_high_water_mark = extract_high_water_mark(&readable_strategy, 0.0)?;

        // Let readableSizeAlgorithm be ! ExtractSizeAlgorithm(readableStrategy).
        let readable_size_algorithm = extract_size_algorithm(&readable_strategy);

        // Let writableHighWaterMark be ? ExtractHighWaterMark(writableStrategy, 1).
        let writable_high_water_mark = extract_high_water_mark(&writable_strategy, 1.0)?;

        // Let writableSizeAlgorithm be ! ExtractSizeAlgorithm(writableStrategy).
        let writable_size_algorithm = extract_size_algorithm(&writable_strategy);

        // Let controller be a new TransformStreamDefaultController.
        // Perform ! SetUpTransformStreamDefaultControllerFromTransformer(this, transformer, transformerDict).
        let controller = TransformStreamDefaultController::from_transformer(transformer.clone());

        // Let startPromise be a new promise.
        let start_promise = Promise::new();

        // Perform ! InitializeTransformStream(this, startPromise, writableHighWaterMark,
        // writableSizeAlgorithm, readableHighWaterMark, readableSizeAlgorithm).
        let stream = TransformStream::initialize(
            controller,
            &start_promise,
            writable_high_water_mark,
            writable_size_algorithm,
            readable_high_water_mark,
            readable_size_algorithm,
        );

        // If transformerDict["start"] exists, then resolve startPromise with the result of
        // invoking transformerDict["start"] with argument list « this.[[controller]] ».
        // Otherwise, resolve startPromise with undefined.
        let start_result = transformer.start(&stream.controller);
        spawn_local(async move {
            match start_result.await {
                Ok(()) => start_promise.resolve(()),
                Err(error) => start_promise.reject(error),
            }
        });

        Ok(stream)
    }

    /// <https://streams.spec.whatwg.org/#initialize-transform-stream>
    fn initialize(
        controller: TransformStreamDefaultController<I, O>,
        start_promise: &Promise<()>,
        writable_high_water_mark: f64,
        writable_size_algorithm: SizeAlgorithm<I>,
        readable_high_water_mark: f64,
        readable_size_algorithm: SizeAlgorithm<O>,
    ) -> TransformStream<I, O> {
        // Let startAlgorithm be an algorithm that returns startPromise.
        let writable_start = start_promise.clone();
        let readable_start = start_promise.clone();

        let write_controller = controller.clone();
        let close_controller = controller.clone();
        let abort_controller = controller.clone();

        // Set stream.[[writable]] to ! CreateWritableStream(startAlgorithm, writeAlgorithm,
        // closeAlgorithm, abortAlgorithm, writableHighWaterMark, writableSizeAlgorithm).
        let writable = create_writable_stream(
            SinkAlgorithms {
                start: Box::new(move |_| writable_start.boxed_local()),
                // Let writeAlgorithm be the following steps, taking a chunk argument:
                // Return ! TransformStreamDefaultSinkWriteAlgorithm(stream, chunk).
                write: Rc::new(move |chunk, _| write_controller.sink_write(chunk)),
                // Let closeAlgorithm be the following steps:
                // Return ! TransformStreamDefaultSinkCloseAlgorithm(stream).
                close: Rc::new(move || close_controller.sink_close().boxed_local()),
                // Let abortAlgorithm be the following steps, taking a reason argument:
                // Return ! TransformStreamDefaultSinkAbortAlgorithm(stream, reason).
                abort: Rc::new(move |reason| abort_controller.sink_abort(reason).boxed_local()),
            },
            writable_high_water_mark,
            writable_size_algorithm,
        );

        let pull_controller = controller.clone();
        let cancel_controller = controller.clone();

        // Set stream.[[readable]] to ! CreateReadableStream(startAlgorithm, pullAlgorithm,
        // cancelAlgorithm, readableHighWaterMark, readableSizeAlgorithm).
        let readable = create_readable_stream(
            SourceAlgorithms {
                start: Box::new(move |_| readable_start.boxed_local()),
                // Let pullAlgorithm be the following steps:
                // Return ! TransformStreamDefaultSourcePullAlgorithm(stream).
                pull: Rc::new(move |_| pull_controller.source_pull().boxed_local()),
                // Let cancelAlgorithm be the following steps, taking a reason argument:
                // Return ! TransformStreamDefaultSourceCancelAlgorithm(stream, reason).
                cancel: Rc::new(move |reason| cancel_controller.source_cancel(reason).boxed_local()),
            },
            readable_high_water_mark,
            readable_size_algorithm,
        );

        // Set stream.[[controller]] to controller.
        controller.attach(&readable, &writable);

        // Set stream.[[backpressure]] and stream.[[backpressureChangePromise]] to undefined.
        // Perform ! TransformStreamSetBackpressure(stream, true).
        controller.set_backpressure(true);

        TransformStream {
            controller,
            readable,
            writable,
        }
    }

    pub fn controller(&self) -> &TransformStreamDefaultController<I, O> {
        &self.controller
    }

    /// <https://streams.spec.whatwg.org/#ts-readable>
    pub fn readable(&self) -> ReadableStream<O> {
        // Return this.[[readable]].
        self.readable.clone()
    }

    /// <https://streams.spec.whatwg.org/#ts-writable>
    pub fn writable(&self) -> WritableStream<I> {
        // Return this.[[writable]].
        self.writable.clone()
    }
}

impl<I: Clone + 'static, O: Clone + 'static> GenericTransformStream<I, O> for TransformStream<I, O> {
    fn readable(&self) -> ReadableStream<O> {
        TransformStream::readable(self)
    }

    fn writable(&self) -> WritableStream<I> {
        TransformStream::writable(self)
    }
}
