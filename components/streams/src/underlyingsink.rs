/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::rc::Rc;

use crate::error::Error;
use crate::underlyingsource::{HostFuture, settled};
use crate::writablestreamdefaultcontroller::WritableStreamDefaultController;

/// <https://streams.spec.whatwg.org/#underlying-sink-api>
///
/// Every hook is optional: by default the sink accepts every chunk and does
/// nothing on close or abort.
pub trait UnderlyingSink<T: Clone + 'static> {
    /// <https://streams.spec.whatwg.org/#dom-underlyingsink-start>
    fn start(&self, _controller: &WritableStreamDefaultController<T>) -> HostFuture {
        settled(Ok(()))
    }

    /// <https://streams.spec.whatwg.org/#dom-underlyingsink-write>
    fn write(&self, _chunk: T, _controller: &WritableStreamDefaultController<T>) -> HostFuture {
        settled(Ok(()))
    }

    /// <https://streams.spec.whatwg.org/#dom-underlyingsink-close>
    fn close(&self) -> HostFuture {
        settled(Ok(()))
    }

    /// <https://streams.spec.whatwg.org/#dom-underlyingsink-abort>
    fn abort(&self, _reason: Error) -> HostFuture {
        settled(Ok(()))
    }

    /// <https://streams.spec.whatwg.org/#dom-underlyingsink-type>
    ///
    /// Reserved. Any value makes the constructor fail.
    fn type_(&self) -> Option<String> {
        None
    }
}

pub(crate) type SinkStartAlgorithm<T> =
    Box<dyn FnOnce(&WritableStreamDefaultController<T>) -> HostFuture>;

/// <https://streams.spec.whatwg.org/#writablestreamdefaultcontroller-writealgorithm>
pub(crate) type WriteAlgorithm<T> = Rc<dyn Fn(T, &WritableStreamDefaultController<T>) -> HostFuture>;

/// <https://streams.spec.whatwg.org/#writablestreamdefaultcontroller-closealgorithm>
pub(crate) type CloseAlgorithm = Rc<dyn Fn() -> HostFuture>;

/// <https://streams.spec.whatwg.org/#writablestreamdefaultcontroller-abortalgorithm>
pub(crate) type AbortAlgorithm = Rc<dyn Fn(Error) -> HostFuture>;

/// The algorithms a writable stream controller is set up with.
pub(crate) struct SinkAlgorithms<T: Clone + 'static> {
    pub(crate) start: SinkStartAlgorithm<T>,
    pub(crate) write: WriteAlgorithm<T>,
    pub(crate) close: CloseAlgorithm,
    pub(crate) abort: AbortAlgorithm,
}

impl<T: Clone + 'static> SinkAlgorithms<T> {
    /// <https://streams.spec.whatwg.org/#set-up-writable-stream-default-controller-from-underlying-sink>
    pub(crate) fn from_underlying_sink(sink: Rc<dyn UnderlyingSink<T>>) -> SinkAlgorithms<T> {
        let start_sink = sink.clone();
        let write_sink = sink.clone();
        let close_sink = sink.clone();
        SinkAlgorithms {
            start: Box::new(move |controller| start_sink.start(controller)),
            write: Rc::new(move |chunk, controller| write_sink.write(chunk, controller)),
            close: Rc::new(move || close_sink.close()),
            abort: Rc::new(move |reason| sink.abort(reason)),
        }
    }
}
