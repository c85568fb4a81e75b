/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use futures::executor::block_on;
use streams::microtask::checkpoint;
use streams::{Error, QueuingStrategy, UnderlyingSink, WritableStream, WritableStreamState};

use crate::support::{RecordingSink, SinkLog, init_logger};

struct TypedSink;

impl UnderlyingSink<String> for TypedSink {
    fn type_(&self) -> Option<String> {
        Some("bytes".to_owned())
    }
}

fn recording_stream(log: &SinkLog) -> WritableStream<String> {
    WritableStream::new(RecordingSink::new(log), QueuingStrategy::default()).unwrap()
}

#[test]
fn test_writes_reach_the_sink_in_order_before_close() {
    init_logger();
    let log = SinkLog::default();
    let stream = recording_stream(&log);
    let writer = stream.get_writer().unwrap();

    let first = writer.write("a".to_owned());
    let second = writer.write("b".to_owned());
    let close = writer.close();
    assert_eq!(stream.state(), WritableStreamState::Closing);

    assert_eq!(block_on(first), Ok(()));
    assert_eq!(block_on(second), Ok(()));
    assert_eq!(block_on(close), Ok(()));
    assert_eq!(block_on(writer.closed()), Ok(()));
    assert!(stream.is_closed());
    assert_eq!(log.entries(), vec!["write:a", "write:b", "close"]);
}

#[test]
fn test_writing_after_close_is_a_type_error() {
    init_logger();
    let log = SinkLog::default();
    let stream = recording_stream(&log);
    let writer = stream.get_writer().unwrap();

    let close = writer.close();
    assert!(matches!(block_on(writer.write("late".to_owned())), Err(Error::Type(_))));
    assert!(matches!(block_on(writer.close()), Err(Error::Type(_))));
    assert_eq!(block_on(close), Ok(()));
    assert_eq!(log.entries(), vec!["close"]);
}

#[test]
fn test_backpressure_follows_the_high_water_mark() {
    init_logger();
    let log = SinkLog::default();
    let (sink, gate) = RecordingSink::gated(&log);
    let stream = WritableStream::new(sink, QueuingStrategy::default()).unwrap();
    let writer = stream.get_writer().unwrap();
    assert_eq!(writer.desired_size(), Ok(Some(1.)));
    assert_eq!(block_on(writer.ready()), Ok(()));

    let write = writer.write("a".to_owned());
    checkpoint();
    assert_eq!(log.entries(), vec!["write:a"]);
    assert_eq!(writer.desired_size(), Ok(Some(0.)));
    assert!(writer.ready().is_pending());

    gate.send(()).unwrap();
    assert_eq!(block_on(write), Ok(()));
    assert_eq!(writer.desired_size(), Ok(Some(1.)));
    assert_eq!(block_on(writer.ready()), Ok(()));
}

#[test]
fn test_abort_rejects_later_writes_with_the_reason() {
    init_logger();
    let log = SinkLog::default();
    let stream = recording_stream(&log);
    let writer = stream.get_writer().unwrap();
    assert_eq!(block_on(writer.write("a".to_owned())), Ok(()));

    assert_eq!(block_on(writer.abort(Error::reason("stop"))), Ok(()));
    assert!(stream.is_errored());
    assert_eq!(stream.stored_error(), Some(Error::reason("stop")));
    assert_eq!(block_on(writer.closed()), Err(Error::reason("stop")));
    assert_eq!(block_on(writer.ready()), Err(Error::reason("stop")));
    assert_eq!(
        block_on(writer.write("b".to_owned())),
        Err(Error::reason("stop"))
    );
    assert_eq!(writer.desired_size(), Ok(None));
    assert_eq!(log.entries(), vec!["write:a", "abort:stop"]);
}

#[test]
fn test_abort_waits_for_the_write_in_flight() {
    init_logger();
    let log = SinkLog::default();
    let (sink, gate) = RecordingSink::gated(&log);
    let stream = WritableStream::new(sink, QueuingStrategy::default()).unwrap();
    let writer = stream.get_writer().unwrap();

    let write = writer.write("a".to_owned());
    checkpoint();
    let abort = writer.abort(Error::reason("stop"));
    assert!(stream.is_erroring());
    assert_eq!(
        block_on(writer.write("b".to_owned())),
        Err(Error::reason("stop"))
    );

    gate.send(()).unwrap();
    assert_eq!(block_on(write), Ok(()));
    assert_eq!(block_on(abort), Ok(()));
    assert!(stream.is_errored());
    assert_eq!(log.entries(), vec!["write:a", "abort:stop"]);
}

#[test]
fn test_sink_failure_errors_the_stream() {
    init_logger();
    let log = SinkLog::default();
    let stream =
        WritableStream::new(RecordingSink::failing_on(&log, "bad"), QueuingStrategy::default())
            .unwrap();
    let writer = stream.get_writer().unwrap();

    assert_eq!(
        block_on(writer.write("bad".to_owned())),
        Err(Error::reason("sink failure"))
    );
    assert!(stream.is_errored());
    assert_eq!(block_on(writer.closed()), Err(Error::reason("sink failure")));
    assert_eq!(
        block_on(writer.write("good".to_owned())),
        Err(Error::reason("sink failure"))
    );
    assert!(matches!(block_on(writer.close()), Err(Error::Type(_))));
    assert_eq!(log.entries(), vec!["write:bad"]);
}

#[test]
fn test_controller_error_errors_the_stream() {
    init_logger();
    let log = SinkLog::default();
    let stream = recording_stream(&log);
    let writer = stream.get_writer().unwrap();
    checkpoint();

    stream.controller().error(Error::reason("broken"));
    assert!(stream.is_errored());
    assert_eq!(block_on(writer.closed()), Err(Error::reason("broken")));

    // A second error is ignored.
    stream.controller().error(Error::reason("again"));
    assert_eq!(stream.stored_error(), Some(Error::reason("broken")));
}

#[test]
fn test_only_one_writer_at_a_time() {
    init_logger();
    let log = SinkLog::default();
    let stream = recording_stream(&log);
    let writer = stream.get_writer().unwrap();
    assert!(stream.locked());
    assert!(matches!(stream.get_writer(), Err(Error::Type(_))));
    assert!(matches!(block_on(stream.close()), Err(Error::Type(_))));
    assert!(matches!(
        block_on(stream.abort(Error::Undefined)),
        Err(Error::Type(_))
    ));

    writer.release_lock();
    assert!(!stream.locked());
    assert!(matches!(block_on(writer.closed()), Err(Error::Type(_))));
    assert!(matches!(block_on(writer.write("a".to_owned())), Err(Error::Type(_))));
    assert!(matches!(writer.desired_size(), Err(Error::Type(_))));

    assert_eq!(block_on(stream.close()), Ok(()));
    assert!(stream.is_closed());
}

#[test]
fn test_constructor_rejects_invalid_arguments() {
    init_logger();
    assert!(matches!(
        WritableStream::new(TypedSink, QueuingStrategy::default()),
        Err(Error::Range(_))
    ));
    let log = SinkLog::default();
    assert!(matches!(
        WritableStream::<String>::new(
            RecordingSink::new(&log),
            QueuingStrategy::with_high_water_mark(f64::NAN)
        ),
        Err(Error::Range(_))
    ));
}
