/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::rc::Rc;

use futures::executor::block_on;
use streams::microtask::checkpoint;
use streams::readablestreamdefaultcontroller::ReadableStreamDefaultController;
use streams::{
    Error, HostFuture, QueuingStrategy, ReadResult, ReadableStream, UnderlyingSource, settled,
};

use crate::support::{CountingSource, IdleSource, init_logger};

/// Enqueues one chunk from start. `alive` lives exactly as long as the source.
struct SingleChunkSource {
    _alive: Rc<()>,
}

impl UnderlyingSource<&'static str> for SingleChunkSource {
    fn start(&self, controller: &ReadableStreamDefaultController<&'static str>) -> HostFuture {
        settled(controller.enqueue("a"))
    }
}

#[test]
fn test_both_branches_see_every_chunk() {
    init_logger();
    let stream = ReadableStream::from_iter(vec!["a", "b", "c"]);
    let (branch_1, branch_2) = stream.tee().unwrap();
    assert!(stream.is_locked());
    assert!(matches!(stream.tee(), Err(Error::Type(_))));

    assert_eq!(block_on(branch_1.read_all()), Ok(vec!["a", "b", "c"]));
    assert_eq!(block_on(branch_2.read_all()), Ok(vec!["a", "b", "c"]));
    assert!(branch_1.is_closed());
    assert!(branch_2.is_closed());
}

#[test]
fn test_source_is_only_canceled_with_both_branches() {
    init_logger();
    let source = CountingSource::unbounded();
    let cancel_reason = source.cancel_reason.clone();
    let stream = ReadableStream::new(source, QueuingStrategy::default()).unwrap();
    let (branch_1, branch_2) = stream.tee().unwrap();

    let first_cancel = branch_1.cancel(Error::reason("first"));
    checkpoint();
    assert!(first_cancel.is_pending());
    assert!(cancel_reason.borrow().is_none());

    // The other branch keeps reading.
    let reader = branch_2.get_reader().unwrap();
    assert_eq!(block_on(reader.read()), Ok(ReadResult::Chunk(1)));
    reader.release_lock();

    assert_eq!(block_on(branch_2.cancel(Error::reason("second"))), Ok(()));
    assert_eq!(block_on(first_cancel), Ok(()));
    assert_eq!(
        *cancel_reason.borrow(),
        Some(Error::Composite(vec![
            Error::reason("first"),
            Error::reason("second")
        ]))
    );
    assert!(stream.is_closed());
}

#[test]
fn test_source_error_reaches_both_branches() {
    init_logger();
    let stream = ReadableStream::<i32>::new(IdleSource::new(), QueuingStrategy::default()).unwrap();
    let (branch_1, branch_2) = stream.tee().unwrap();
    let reader_1 = branch_1.get_reader().unwrap();
    let pending = reader_1.read();
    checkpoint();

    stream.controller().error(Error::reason("boom"));
    assert_eq!(block_on(pending), Err(Error::reason("boom")));
    assert_eq!(branch_2.stored_error(), Some(Error::reason("boom")));
    assert!(branch_1.is_errored());
    assert!(branch_2.is_errored());
}

#[test]
fn test_source_close_reaches_both_branches() {
    init_logger();
    let stream = ReadableStream::<i32>::new(IdleSource::new(), QueuingStrategy::default()).unwrap();
    let (branch_1, branch_2) = stream.tee().unwrap();
    checkpoint();

    stream.controller().close().unwrap();
    assert_eq!(block_on(branch_1.read_all()), Ok(vec![]));
    assert_eq!(block_on(branch_2.read_all()), Ok(vec![]));
}

#[test]
fn test_dropping_every_handle_frees_the_source() {
    init_logger();
    let alive = Rc::new(());
    let source = SingleChunkSource {
        _alive: alive.clone(),
    };
    let stream = ReadableStream::new(source, QueuingStrategy::default()).unwrap();
    let (branch_1, branch_2) = stream.tee().unwrap();
    checkpoint();
    assert_eq!(branch_1.controller().queue_len(), 1);
    assert_eq!(branch_2.controller().queue_len(), 1);
    assert_eq!(Rc::strong_count(&alive), 2);

    drop((stream, branch_1, branch_2));
    checkpoint();
    assert_eq!(Rc::strong_count(&alive), 1);
}
