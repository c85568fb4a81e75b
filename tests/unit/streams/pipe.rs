/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use futures::executor::block_on;
use streams::{Error, QueuingStrategy, ReadableStream, StreamPipeOptions, WritableStream};

use crate::support::{CountingSource, IdleSource, RecordingSink, SinkLog, init_logger};

fn recording_stream(log: &SinkLog) -> WritableStream<i32> {
    WritableStream::new(RecordingSink::new(log), QueuingStrategy::default()).unwrap()
}

#[test]
fn test_pipe_copies_every_chunk_then_closes() {
    init_logger();
    let log = SinkLog::default();
    let destination = recording_stream(&log);
    let source = ReadableStream::from_iter(vec![1, 2, 3]);

    let piped = source.pipe_to(&destination, StreamPipeOptions::default());
    assert!(source.is_locked());
    assert!(destination.is_locked());

    assert_eq!(block_on(piped), Ok(()));
    assert_eq!(log.entries(), vec!["write:1", "write:2", "write:3", "close"]);
    assert!(source.is_closed());
    assert!(destination.is_closed());
    assert!(!source.is_locked());
    assert!(!destination.is_locked());
}

#[test]
fn test_prevent_close_leaves_the_destination_open() {
    init_logger();
    let log = SinkLog::default();
    let destination = recording_stream(&log);
    let source = ReadableStream::from_iter(vec![1, 2]);

    let options = StreamPipeOptions {
        prevent_close: true,
        ..Default::default()
    };
    assert_eq!(block_on(source.pipe_to(&destination, options)), Ok(()));
    assert!(destination.is_writable());
    assert!(!destination.is_locked());
    assert_eq!(log.entries(), vec!["write:1", "write:2"]);

    // The destination can still be written to.
    let writer = destination.get_writer().unwrap();
    assert_eq!(block_on(writer.write(3)), Ok(()));
}

#[test]
fn test_source_error_aborts_the_destination() {
    init_logger();
    let log = SinkLog::default();
    let destination = recording_stream(&log);
    let source = ReadableStream::<i32>::new(IdleSource::new(), QueuingStrategy::default()).unwrap();

    let piped = source.pipe_to(&destination, StreamPipeOptions::default());
    source.controller().error(Error::reason("boom"));

    assert_eq!(block_on(piped), Err(Error::reason("boom")));
    assert!(destination.is_errored());
    assert_eq!(destination.stored_error(), Some(Error::reason("boom")));
    assert_eq!(log.entries(), vec!["abort:boom"]);
}

#[test]
fn test_prevent_abort_keeps_the_destination_writable() {
    init_logger();
    let log = SinkLog::default();
    let destination = recording_stream(&log);
    let source = ReadableStream::<i32>::new(IdleSource::new(), QueuingStrategy::default()).unwrap();

    let options = StreamPipeOptions {
        prevent_abort: true,
        ..Default::default()
    };
    let piped = source.pipe_to(&destination, options);
    source.controller().error(Error::reason("boom"));

    assert_eq!(block_on(piped), Err(Error::reason("boom")));
    assert!(destination.is_writable());
    assert!(!destination.is_locked());
    assert!(log.entries().is_empty());
}

#[test]
fn test_destination_error_cancels_the_source() {
    init_logger();
    let log = SinkLog::default();
    let destination =
        WritableStream::new(RecordingSink::failing_on(&log, "2"), QueuingStrategy::default())
            .unwrap();
    let source = CountingSource::unbounded();
    let cancel_reason = source.cancel_reason.clone();
    let source = ReadableStream::new(source, QueuingStrategy::default()).unwrap();

    let piped = source.pipe_to(&destination, StreamPipeOptions::default());
    assert_eq!(block_on(piped), Err(Error::reason("sink failure")));
    assert_eq!(*cancel_reason.borrow(), Some(Error::reason("sink failure")));
    assert!(source.is_closed());
    assert!(destination.is_errored());
    assert_eq!(log.entries(), vec!["write:1", "write:2"]);
}

#[test]
fn test_closed_destination_cancels_the_source() {
    init_logger();
    let log = SinkLog::default();
    let destination = recording_stream(&log);
    assert_eq!(block_on(destination.close()), Ok(()));

    let source = IdleSource::new();
    let cancel_reason = source.cancel_reason.clone();
    let source = ReadableStream::<i32>::new(source, QueuingStrategy::default()).unwrap();

    let piped = source.pipe_to(&destination, StreamPipeOptions::default());
    assert!(matches!(block_on(piped), Err(Error::Type(_))));
    assert!(matches!(*cancel_reason.borrow(), Some(Error::Type(_))));
    assert!(source.is_closed());
}

#[test]
fn test_locked_streams_cannot_be_piped() {
    init_logger();
    let log = SinkLog::default();
    let destination = recording_stream(&log);
    let source = ReadableStream::from_iter(vec![1]);

    let reader = source.get_reader().unwrap();
    assert!(matches!(
        block_on(source.pipe_to(&destination, StreamPipeOptions::default())),
        Err(Error::Type(_))
    ));
    reader.release_lock();

    let writer = destination.get_writer().unwrap();
    assert!(matches!(
        block_on(source.pipe_to(&destination, StreamPipeOptions::default())),
        Err(Error::Type(_))
    ));
    writer.release_lock();

    assert_eq!(
        block_on(source.pipe_to(&destination, StreamPipeOptions::default())),
        Ok(())
    );
    assert_eq!(log.entries(), vec!["write:1", "close"]);
}
