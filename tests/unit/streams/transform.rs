/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::cell::RefCell;

use futures::executor::block_on;
use streams::{
    Error, HostFuture, QueuingStrategy, ReadResult, ReadableStream, StreamPipeOptions,
    TransformStream, TransformStreamDefaultController, Transformer, settled,
};

use crate::support::init_logger;

struct Uppercase;

impl Transformer<String, String> for Uppercase {
    fn transform(
        &self,
        chunk: String,
        controller: &TransformStreamDefaultController<String, String>,
    ) -> HostFuture {
        settled(controller.enqueue(chunk.to_uppercase()))
    }
}

/// Emits everything it was given as one chunk on flush.
#[derive(Default)]
struct Concatenate {
    buffer: RefCell<String>,
}

impl Transformer<String, String> for Concatenate {
    fn transform(
        &self,
        chunk: String,
        _controller: &TransformStreamDefaultController<String, String>,
    ) -> HostFuture {
        self.buffer.borrow_mut().push_str(&chunk);
        settled(Ok(()))
    }

    fn flush(&self, controller: &TransformStreamDefaultController<String, String>) -> HostFuture {
        let buffer = self.buffer.take();
        settled(controller.enqueue(buffer))
    }
}

/// Relays chunks until it sees "stop", then terminates.
struct StopWord;

impl Transformer<String, String> for StopWord {
    fn transform(
        &self,
        chunk: String,
        controller: &TransformStreamDefaultController<String, String>,
    ) -> HostFuture {
        if chunk == "stop" {
            controller.terminate();
            return settled(Ok(()));
        }
        settled(controller.enqueue(chunk))
    }
}

/// Fails on every chunk.
struct Broken;

impl Transformer<String, String> for Broken {
    fn transform(
        &self,
        _chunk: String,
        _controller: &TransformStreamDefaultController<String, String>,
    ) -> HostFuture {
        settled(Err(Error::reason("cannot transform")))
    }
}

struct TypedTransformer;

impl Transformer<String, String> for TypedTransformer {
    fn transform(
        &self,
        _chunk: String,
        _controller: &TransformStreamDefaultController<String, String>,
    ) -> HostFuture {
        settled(Ok(()))
    }

    fn readable_type(&self) -> Option<String> {
        Some("bytes".to_owned())
    }
}

fn transform_stream(transformer: impl Transformer<String, String> + 'static) -> TransformStream<String, String> {
    TransformStream::new(
        transformer,
        QueuingStrategy::default(),
        QueuingStrategy::default(),
    )
    .unwrap()
}

#[test]
fn test_written_chunks_come_out_transformed() {
    init_logger();
    let stream = transform_stream(Uppercase);
    let writer = stream.writable().get_writer().unwrap();
    let reader = stream.readable().get_reader().unwrap();

    // The readable side starts with backpressure, so the write waits for a read.
    let write = writer.write("abc".to_owned());
    let read = reader.read();
    assert_eq!(block_on(read), Ok(ReadResult::Chunk("ABC".to_owned())));
    assert_eq!(block_on(write), Ok(()));

    assert_eq!(block_on(writer.close()), Ok(()));
    assert_eq!(block_on(reader.read()), Ok(ReadResult::Done));
}

#[test]
fn test_flush_enqueues_before_the_readable_side_closes() {
    init_logger();
    let stream = transform_stream(Concatenate::default());
    let writer = stream.writable().get_writer().unwrap();
    let reader = stream.readable().get_reader().unwrap();

    let read = reader.read();
    let first = writer.write("a".to_owned());
    let second = writer.write("b".to_owned());
    let close = writer.close();

    assert_eq!(block_on(read), Ok(ReadResult::Chunk("ab".to_owned())));
    assert_eq!(block_on(first), Ok(()));
    assert_eq!(block_on(second), Ok(()));
    assert_eq!(block_on(close), Ok(()));
    assert_eq!(block_on(reader.read()), Ok(ReadResult::Done));
}

#[test]
fn test_identity_transform_through_pipe() {
    init_logger();
    let identity = TransformStream::<i32, i32>::default();
    let readable = ReadableStream::from_iter(vec![1, 2, 3])
        .pipe_through(&identity, StreamPipeOptions::default())
        .unwrap();
    assert_eq!(block_on(readable.read_all()), Ok(vec![1, 2, 3]));
    assert!(identity.writable().is_closed());
}

#[test]
fn test_terminate_closes_readable_and_errors_writable() {
    init_logger();
    let stream = transform_stream(StopWord);
    let writer = stream.writable().get_writer().unwrap();
    let reader = stream.readable().get_reader().unwrap();

    let read = reader.read();
    let write = writer.write("stop".to_owned());
    assert_eq!(block_on(read), Ok(ReadResult::Done));
    assert_eq!(block_on(write), Ok(()));
    assert!(matches!(block_on(writer.closed()), Err(Error::Type(_))));
    assert!(stream.readable().is_closed());
    assert!(stream.writable().is_errored());
}

#[test]
fn test_transform_failure_errors_both_sides() {
    init_logger();
    let stream = transform_stream(Broken);
    let writer = stream.writable().get_writer().unwrap();
    let reader = stream.readable().get_reader().unwrap();

    let read = reader.read();
    let write = writer.write("x".to_owned());
    assert_eq!(block_on(write), Err(Error::reason("cannot transform")));
    assert_eq!(block_on(read), Err(Error::reason("cannot transform")));
    assert!(stream.readable().is_errored());
    assert!(stream.writable().is_errored());
}

#[test]
fn test_controller_error_errors_both_sides() {
    init_logger();
    let stream = transform_stream(Uppercase);
    let reader = stream.readable().get_reader().unwrap();
    stream.controller().error(Error::reason("boom"));

    assert_eq!(block_on(reader.read()), Err(Error::reason("boom")));
    assert_eq!(stream.writable().stored_error(), Some(Error::reason("boom")));
    assert!(stream.writable().is_errored());
}

#[test]
fn test_canceling_the_readable_side_errors_the_writable_side() {
    init_logger();
    let stream = transform_stream(Uppercase);
    let writer = stream.writable().get_writer().unwrap();

    assert_eq!(block_on(stream.readable().cancel(Error::reason("bye"))), Ok(()));
    assert_eq!(block_on(writer.closed()), Err(Error::reason("bye")));
    assert!(stream.writable().is_errored());
}

#[test]
fn test_reserved_types_are_range_errors() {
    init_logger();
    assert!(matches!(
        TransformStream::new(
            TypedTransformer,
            QueuingStrategy::default(),
            QueuingStrategy::default()
        ),
        Err(Error::Range(_))
    ));
}
