/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

#![deny(unsafe_code)]

//! Readable, writable and transform streams, following the
//! [WHATWG Streams standard](https://streams.spec.whatwg.org/).
//!
//! Everything here is single-threaded: streams are reference counted, and
//! their algorithms run as microtasks and local tasks on the current thread's
//! [`microtask`] queue. Awaiting a [`Promise`] from any executor drives that
//! queue, so `futures::executor::block_on(reader.read())` is enough to make
//! progress.

#[macro_use]
extern crate log;

mod defaultteeunderlyingsource;
pub mod error;
pub mod microtask;
pub mod pipeto;
pub mod promise;
pub mod queue;
pub mod queuingstrategy;
pub mod readablestream;
pub mod readablestreamdefaultcontroller;
pub mod readablestreamdefaultreader;
pub mod textdecoderstream;
pub mod textencoderstream;
pub mod transformstream;
pub mod transformstreamdefaultcontroller;
pub mod underlyingsink;
pub mod underlyingsource;
pub mod writablestream;
pub mod writablestreamdefaultcontroller;
pub mod writablestreamdefaultwriter;

pub use crate::error::{Error, ErrorResult, Fallible};
pub use crate::pipeto::StreamPipeOptions;
pub use crate::promise::Promise;
pub use crate::queuingstrategy::{ByteLengthQueuingStrategy, CountQueuingStrategy, QueuingStrategy};
pub use crate::readablestream::{
    ReadableStream, ReadableStreamGetReaderOptions, ReadableStreamReaderMode, ReadableStreamState,
};
pub use crate::readablestreamdefaultcontroller::ReadableStreamDefaultController;
pub use crate::readablestreamdefaultreader::{ReadResult, ReadableStreamDefaultReader};
pub use crate::textdecoderstream::{TextDecoderOptions, TextDecoderStream};
pub use crate::textencoderstream::TextEncoderStream;
pub use crate::transformstream::{
    GenericTransformStream, IdentityTransformer, TransformStream, Transformer,
};
pub use crate::transformstreamdefaultcontroller::TransformStreamDefaultController;
pub use crate::underlyingsink::UnderlyingSink;
pub use crate::underlyingsource::{HostFuture, UnderlyingSource, settled};
pub use crate::writablestream::{WritableStream, WritableStreamState};
pub use crate::writablestreamdefaultcontroller::WritableStreamDefaultController;
pub use crate::writablestreamdefaultwriter::WritableStreamDefaultWriter;
