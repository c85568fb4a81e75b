/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::rc::Rc;

use futures::FutureExt;
use futures::future::{self, LocalBoxFuture};

use crate::error::{Error, Fallible};
use crate::readablestreamdefaultcontroller::ReadableStreamDefaultController;

/// The result of a host supplied algorithm (start, pull, cancel, write...).
/// It is polled once when the algorithm is invoked, and resumed as a local
/// task until it completes.
pub type HostFuture = LocalBoxFuture<'static, Fallible<()>>;

/// A host algorithm that completed synchronously.
pub fn settled(result: Fallible<()>) -> HostFuture {
    future::ready(result).boxed_local()
}

/// <https://streams.spec.whatwg.org/#underlying-source-api>
///
/// Every hook is optional. The default start and pull succeed right away, and
/// the default cancel does nothing.
pub trait UnderlyingSource<T: Clone + 'static> {
    /// <https://streams.spec.whatwg.org/#dom-underlyingsource-start>
    fn start(&self, _controller: &ReadableStreamDefaultController<T>) -> HostFuture {
        settled(Ok(()))
    }

    /// <https://streams.spec.whatwg.org/#dom-underlyingsource-pull>
    fn pull(&self, _controller: &ReadableStreamDefaultController<T>) -> HostFuture {
        settled(Ok(()))
    }

    /// <https://streams.spec.whatwg.org/#dom-underlyingsource-cancel>
    fn cancel(&self, _reason: Error) -> HostFuture {
        settled(Ok(()))
    }

    /// <https://streams.spec.whatwg.org/#dom-underlyingsource-type>
    ///
    /// Reserved for byte streams, which the default controller does not serve.
    fn type_(&self) -> Option<String> {
        None
    }
}

/// <https://streams.spec.whatwg.org/#readablestreamdefaultcontroller-pullalgorithm>
pub(crate) type PullAlgorithm<T> = Rc<dyn Fn(&ReadableStreamDefaultController<T>) -> HostFuture>;

/// <https://streams.spec.whatwg.org/#readablestreamdefaultcontroller-cancelalgorithm>
pub(crate) type CancelAlgorithm = Rc<dyn Fn(Error) -> HostFuture>;

pub(crate) type StartAlgorithm<T> = Box<dyn FnOnce(&ReadableStreamDefaultController<T>) -> HostFuture>;

/// The algorithms a readable stream controller is set up with. Streams built
/// from a host [`UnderlyingSource`] forward every algorithm to it; internal
/// streams (tee branches, transform outputs) supply closures directly.
pub(crate) struct SourceAlgorithms<T: Clone + 'static> {
    pub(crate) start: StartAlgorithm<T>,
    pub(crate) pull: PullAlgorithm<T>,
    pub(crate) cancel: CancelAlgorithm,
}

impl<T: Clone + 'static> SourceAlgorithms<T> {
    /// <https://streams.spec.whatwg.org/#set-up-readable-stream-default-controller-from-underlying-source>
    pub(crate) fn from_underlying_source(source: Rc<dyn UnderlyingSource<T>>) -> SourceAlgorithms<T> {
        let start_source = source.clone();
        let pull_source = source.clone();
        SourceAlgorithms {
            start: Box::new(move |controller| start_source.start(controller)),
            pull: Rc::new(move |controller| pull_source.pull(controller)),
            cancel: Rc::new(move |reason| source.cancel(reason)),
        }
    }

    /// Algorithms that do nothing beyond the given pull and cancel steps.
    pub(crate) fn new(
        pull: impl Fn(&ReadableStreamDefaultController<T>) -> HostFuture + 'static,
        cancel: impl Fn(Error) -> HostFuture + 'static,
    ) -> SourceAlgorithms<T> {
        SourceAlgorithms {
            start: Box::new(|_| settled(Ok(()))),
            pull: Rc::new(pull),
            cancel: Rc::new(cancel),
        }
    }
}

/// An underlying source draining an iterator, one item per pull.
pub(crate) struct IteratorSource<I> {
    iter: std::cell::RefCell<I>,
}

impl<I> IteratorSource<I> {
    pub(crate) fn new(iter: I) -> IteratorSource<I> {
        IteratorSource {
            iter: std::cell::RefCell::new(iter),
        }
    }
}

impl<T, I> UnderlyingSource<T> for IteratorSource<I>
where
    T: Clone + 'static,
    I: Iterator<Item = T>,
{
    fn pull(&self, controller: &ReadableStreamDefaultController<T>) -> HostFuture {
        let next = self.iter.borrow_mut().next();
        let result = match next {
            Some(chunk) => controller.enqueue(chunk),
            None => controller.close(),
        };
        settled(result)
    }
}
