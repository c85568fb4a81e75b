/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use futures::FutureExt;
use futures::channel::oneshot;
use futures::executor::block_on;
use streams::microtask::checkpoint;
use streams::readablestreamdefaultcontroller::ReadableStreamDefaultController;
use streams::{
    Error, HostFuture, QueuingStrategy, ReadResult, ReadableStream, ReadableStreamGetReaderOptions,
    ReadableStreamReaderMode, ReadableStreamState, UnderlyingSource, settled,
};

use crate::support::{CountingSource, IdleSource, init_logger};

/// Enqueues its chunks from start, then closes.
struct PrefilledSource(Vec<&'static str>);

impl UnderlyingSource<String> for PrefilledSource {
    fn start(&self, controller: &ReadableStreamDefaultController<String>) -> HostFuture {
        for chunk in &self.0 {
            if let Err(error) = controller.enqueue(chunk.to_string()) {
                return settled(Err(error));
            }
        }
        settled(controller.close())
    }
}

/// Counts its pulls. The first pull only completes once the gate is opened,
/// and no pull ever enqueues anything.
struct GatedPullSource {
    pulls: Rc<Cell<usize>>,
    gate: RefCell<Option<oneshot::Receiver<()>>>,
}

impl UnderlyingSource<i32> for GatedPullSource {
    fn pull(&self, _controller: &ReadableStreamDefaultController<i32>) -> HostFuture {
        self.pulls.set(self.pulls.get() + 1);
        match self.gate.borrow_mut().take() {
            Some(gate) => async move {
                let _ = gate.await;
                Ok(())
            }
            .boxed_local(),
            None => settled(Ok(())),
        }
    }
}

struct TypedSource;

impl UnderlyingSource<u8> for TypedSource {
    fn type_(&self) -> Option<String> {
        Some("bytes".to_owned())
    }
}

#[test]
fn test_read_all_from_iterator() {
    init_logger();
    let stream = ReadableStream::from_iter(vec![1, 2, 3]);
    assert_eq!(block_on(stream.read_all()), Ok(vec![1, 2, 3]));
    assert!(stream.is_closed());
    assert!(!stream.is_locked());
}

#[test]
fn test_chunks_enqueued_during_start_are_read_in_order() {
    init_logger();
    let stream = ReadableStream::new(
        PrefilledSource(vec!["a", "b"]),
        QueuingStrategy::default(),
    )
    .unwrap();
    let reader = stream.get_reader().unwrap();

    assert_eq!(block_on(reader.read()), Ok(ReadResult::Chunk("a".to_owned())));
    assert_eq!(block_on(reader.read()), Ok(ReadResult::Chunk("b".to_owned())));
    assert_eq!(block_on(reader.read()), Ok(ReadResult::Done));
    assert_eq!(block_on(reader.closed()), Ok(()));
    assert_eq!(stream.state(), ReadableStreamState::Closed);
}

#[test]
fn test_pull_fills_the_queue_up_to_the_high_water_mark() {
    init_logger();
    let source = CountingSource::unbounded();
    let pulls = source.pulls.clone();
    let stream =
        ReadableStream::new(source, QueuingStrategy::with_high_water_mark(2.)).unwrap();

    checkpoint();
    assert_eq!(pulls.get(), 2);
    assert_eq!(stream.controller().queue_len(), 2);
    assert_eq!(stream.controller().desired_size(), Some(0.));

    // Reading one chunk makes room for one more.
    let reader = stream.get_reader().unwrap();
    assert_eq!(block_on(reader.read()), Ok(ReadResult::Chunk(1)));
    checkpoint();
    assert_eq!(pulls.get(), 3);
    assert_eq!(stream.controller().queue_len(), 2);
}

#[test]
fn test_desired_size_goes_negative_without_reads() {
    init_logger();
    let stream = ReadableStream::<String>::new(
        PrefilledSource(vec!["a", "b", "c"]),
        QueuingStrategy::with_high_water_mark(2.),
    )
    .unwrap();
    // Closing is only requested, the queue still holds every chunk.
    assert!(stream.is_readable());
    assert_eq!(stream.controller().queue_len(), 3);
    assert_eq!(stream.controller().desired_size(), Some(-1.));
}

#[test]
fn test_enqueue_hands_the_chunk_to_a_pending_read() {
    init_logger();
    let stream = ReadableStream::<i32>::new(IdleSource::new(), QueuingStrategy::default()).unwrap();
    let reader = stream.get_reader().unwrap();
    let pending = reader.read();
    checkpoint();
    assert!(pending.is_pending());

    assert_eq!(stream.controller().enqueue(7), Ok(()));
    assert_eq!(stream.controller().queue_len(), 0);
    assert_eq!(block_on(pending), Ok(ReadResult::Chunk(7)));
    assert_eq!(stream.controller().queue_len(), 0);
}

#[test]
fn test_overlapping_pull_requests_are_coalesced() {
    init_logger();
    let pulls = Rc::new(Cell::new(0));
    let (open_gate, gate) = oneshot::channel();
    let source = GatedPullSource {
        pulls: pulls.clone(),
        gate: RefCell::new(Some(gate)),
    };
    let stream = ReadableStream::new(source, QueuingStrategy::with_high_water_mark(0.)).unwrap();
    checkpoint();
    assert_eq!(pulls.get(), 0);

    let reader = stream.get_reader().unwrap();
    let reads: Vec<_> = (0..3).map(|_| reader.read()).collect();
    checkpoint();
    assert_eq!(pulls.get(), 1);

    // Only one more pull follows the outstanding one, however many reads asked.
    open_gate.send(()).unwrap();
    checkpoint();
    assert_eq!(pulls.get(), 2);
    checkpoint();
    assert_eq!(pulls.get(), 2);
    assert!(reads.iter().all(|read| read.is_pending()));
}

#[test]
fn test_requested_close_waits_for_the_queue_to_drain() {
    init_logger();
    let stream = ReadableStream::new(
        PrefilledSource(vec!["a", "b", "c"]),
        QueuingStrategy::default(),
    )
    .unwrap();
    let reader = stream.get_reader().unwrap();
    assert!(stream.is_readable());

    assert_eq!(block_on(reader.read()), Ok(ReadResult::Chunk("a".to_owned())));
    assert!(stream.is_readable());
    assert_eq!(block_on(reader.read()), Ok(ReadResult::Chunk("b".to_owned())));
    assert!(stream.is_readable());
    assert_eq!(block_on(reader.read()), Ok(ReadResult::Chunk("c".to_owned())));
    assert!(stream.is_closed());
}

#[test]
fn test_error_rejects_pending_and_later_reads() {
    init_logger();
    let stream = ReadableStream::<i32>::new(IdleSource::new(), QueuingStrategy::default()).unwrap();
    let reader = stream.get_reader().unwrap();
    let pending = reader.read();
    checkpoint();
    assert!(pending.is_pending());

    stream.controller().error(Error::reason("boom"));
    assert_eq!(block_on(pending), Err(Error::reason("boom")));
    assert_eq!(block_on(reader.read()), Err(Error::reason("boom")));
    assert_eq!(block_on(reader.closed()), Err(Error::reason("boom")));
    assert_eq!(stream.stored_error(), Some(Error::reason("boom")));
    assert_eq!(stream.controller().desired_size(), None);
}

#[test]
fn test_enqueue_after_close_is_a_type_error() {
    init_logger();
    let stream = ReadableStream::<i32>::new(IdleSource::new(), QueuingStrategy::default()).unwrap();
    stream.controller().close().unwrap();
    assert!(stream.is_closed());
    assert!(matches!(stream.controller().enqueue(1), Err(Error::Type(_))));
    assert!(matches!(stream.controller().close(), Err(Error::Type(_))));
}

#[test]
fn test_failing_size_algorithm_errors_the_stream() {
    init_logger();
    let strategy = QueuingStrategy::default().with_size(|_: &i32| Err(Error::reason("no size")));
    let stream = ReadableStream::new(IdleSource::new(), strategy).unwrap();
    assert_eq!(stream.controller().enqueue(1), Err(Error::reason("no size")));
    assert!(stream.is_errored());
}

#[test]
fn test_invalid_chunk_size_is_a_range_error() {
    init_logger();
    let strategy = QueuingStrategy::default().with_size(|_: &i32| Ok(-1.));
    let stream = ReadableStream::new(IdleSource::new(), strategy).unwrap();
    assert!(matches!(stream.controller().enqueue(1), Err(Error::Range(_))));
    assert!(stream.is_errored());
}

#[test]
fn test_only_one_reader_at_a_time() {
    init_logger();
    let stream = ReadableStream::<i32>::new(IdleSource::new(), QueuingStrategy::default()).unwrap();
    let reader = stream.get_reader().unwrap();
    assert!(stream.locked());
    assert!(matches!(stream.get_reader(), Err(Error::Type(_))));

    reader.release_lock();
    assert!(!stream.locked());
    assert!(stream.get_reader().is_ok());
}

#[test]
fn test_release_lock_rejects_pending_reads() {
    init_logger();
    let stream = ReadableStream::<i32>::new(IdleSource::new(), QueuingStrategy::default()).unwrap();
    let reader = stream.get_reader().unwrap();
    let pending = reader.read();
    checkpoint();

    reader.release_lock();
    assert!(matches!(block_on(pending), Err(Error::Type(_))));
    assert!(matches!(block_on(reader.closed()), Err(Error::Type(_))));
    assert!(matches!(block_on(reader.read()), Err(Error::Type(_))));

    // Releasing twice does nothing.
    reader.release_lock();
}

#[test]
fn test_release_lock_after_close_rejects_closed() {
    init_logger();
    let stream = ReadableStream::from_iter(vec![1]);
    let reader = stream.get_reader().unwrap();
    assert_eq!(block_on(reader.read()), Ok(ReadResult::Chunk(1)));
    assert_eq!(block_on(reader.read()), Ok(ReadResult::Done));
    assert_eq!(block_on(reader.closed()), Ok(()));

    reader.release_lock();
    assert!(!stream.is_locked());
    assert!(matches!(block_on(reader.closed()), Err(Error::Type(_))));
}

#[test]
fn test_cancel_on_a_closed_stream_skips_the_source() {
    init_logger();
    let source = IdleSource::new();
    let cancel_reason = source.cancel_reason.clone();
    let stream = ReadableStream::<i32>::new(source, QueuingStrategy::default()).unwrap();
    stream.controller().close().unwrap();

    assert_eq!(block_on(stream.cancel(Error::reason("late"))), Ok(()));
    assert!(cancel_reason.borrow().is_none());
    assert!(stream.is_closed());
}

#[test]
fn test_cancel_on_an_errored_stream_rejects_with_the_stored_error() {
    init_logger();
    let source = IdleSource::new();
    let cancel_reason = source.cancel_reason.clone();
    let stream = ReadableStream::<i32>::new(source, QueuingStrategy::default()).unwrap();
    stream.controller().error(Error::reason("boom"));

    assert_eq!(
        block_on(stream.cancel(Error::reason("late"))),
        Err(Error::reason("boom"))
    );
    assert!(cancel_reason.borrow().is_none());
    assert!(stream.is_errored());
}

#[test]
fn test_cancel_closes_the_stream_and_reaches_the_source() {
    init_logger();
    let source = IdleSource::new();
    let cancel_reason = source.cancel_reason.clone();
    let stream = ReadableStream::<i32>::new(source, QueuingStrategy::default()).unwrap();

    let reader = stream.get_reader().unwrap();
    assert!(matches!(
        block_on(stream.cancel(Error::reason("locked"))),
        Err(Error::Type(_))
    ));

    let pending = reader.read();
    assert_eq!(block_on(reader.cancel(Error::reason("done"))), Ok(()));
    assert_eq!(block_on(pending), Ok(ReadResult::Done));
    assert_eq!(*cancel_reason.borrow(), Some(Error::reason("done")));
    assert!(stream.is_closed());
    assert!(stream.is_disturbed());
}

#[test]
fn test_cancel_discards_queued_chunks() {
    init_logger();
    let stream = ReadableStream::<String>::new(
        PrefilledSource(vec!["a", "b"]),
        QueuingStrategy::default(),
    )
    .unwrap();
    assert_eq!(block_on(stream.cancel(Error::Undefined)), Ok(()));
    assert_eq!(stream.controller().queue_len(), 0);
    assert_eq!(block_on(stream.read_all()), Ok(vec![]));
}

#[test]
fn test_constructor_rejects_invalid_arguments() {
    init_logger();
    assert!(matches!(
        ReadableStream::new(TypedSource, QueuingStrategy::default()),
        Err(Error::Range(_))
    ));
    assert!(matches!(
        ReadableStream::<i32>::new(IdleSource::new(), QueuingStrategy::with_high_water_mark(-1.)),
        Err(Error::Range(_))
    ));
}

#[test]
fn test_byob_reader_is_not_available() {
    init_logger();
    let stream = ReadableStream::from_iter(vec![1u8]);
    let options = ReadableStreamGetReaderOptions {
        mode: Some(ReadableStreamReaderMode::Byob),
    };
    assert!(matches!(
        stream.get_reader_with_options(options),
        Err(Error::Type(_))
    ));
    assert!(!stream.is_locked());
}
