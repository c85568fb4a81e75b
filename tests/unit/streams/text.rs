/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use futures::executor::block_on;
use streams::{
    Error, ReadableStream, StreamPipeOptions, TextDecoderOptions, TextDecoderStream,
    TextEncoderStream,
};

use crate::support::init_logger;

fn encode(chunks: Vec<Vec<u16>>) -> Vec<u8> {
    let encoder = TextEncoderStream::new().unwrap();
    let output = ReadableStream::from_iter(chunks)
        .pipe_through(&encoder, StreamPipeOptions::default())
        .unwrap();
    block_on(output.read_all()).unwrap().concat()
}

fn decode(decoder: &TextDecoderStream, chunks: Vec<Vec<u8>>) -> Result<String, Error> {
    let output = ReadableStream::from_iter(chunks)
        .pipe_through(decoder, StreamPipeOptions::default())
        .unwrap();
    block_on(output.read_all()).map(|chunks| chunks.concat())
}

#[test]
fn test_surrogate_pair_split_across_chunks() {
    init_logger();
    let units: Vec<u16> = "a𝌆b".encode_utf16().collect();
    assert_eq!(units.len(), 4);

    let split = encode(vec![units[..2].to_vec(), units[2..].to_vec()]);
    let whole = encode(vec![units.clone()]);
    assert_eq!(split, "a𝌆b".as_bytes());
    assert_eq!(split, whole);
}

#[test]
fn test_trailing_leading_surrogate_is_flushed_as_replacement() {
    init_logger();
    let bytes = encode(vec![vec![u16::from(b'x'), 0xD834]]);
    assert_eq!(bytes, "x\u{FFFD}".as_bytes());
}

#[test]
fn test_multi_byte_sequence_split_byte_by_byte() {
    init_logger();
    let text = "héllo, wörld €𝌆";
    let decoder = TextDecoderStream::new("utf-8", TextDecoderOptions::default()).unwrap();
    let chunks = text.as_bytes().iter().map(|byte| vec![*byte]).collect();
    assert_eq!(decode(&decoder, chunks), Ok(text.to_owned()));
}

#[test]
fn test_legacy_encoding() {
    init_logger();
    let decoder = TextDecoderStream::new("latin1", TextDecoderOptions::default()).unwrap();
    assert_eq!(decoder.encoding(), "windows-1252");
    assert_eq!(decode(&decoder, vec![vec![0x63, 0x61, 0x66, 0xE9]]), Ok("café".to_owned()));
}

#[test]
fn test_fatal_decoder_errors_the_stream() {
    init_logger();
    let options = TextDecoderOptions {
        fatal: true,
        ignore_bom: false,
    };
    let decoder = TextDecoderStream::new("utf-8", options).unwrap();
    assert!(decoder.fatal());
    assert!(matches!(
        decode(&decoder, vec![vec![b'o', b'k'], vec![0xFF]]),
        Err(Error::Encoding(_))
    ));
    assert!(decoder.readable().is_errored());
}

#[test]
fn test_accessors() {
    init_logger();
    let options = TextDecoderOptions {
        fatal: false,
        ignore_bom: true,
    };
    let decoder = TextDecoderStream::new(" UTF8 ", options).unwrap();
    assert_eq!(decoder.encoding(), "utf-8");
    assert!(!decoder.fatal());
    assert!(decoder.ignore_bom());

    let encoder = TextEncoderStream::new().unwrap();
    assert_eq!(encoder.encoding(), "utf-8");
}

#[test]
fn test_unsupported_labels_are_range_errors() {
    init_logger();
    for label in ["klingon", "iso-2022-kr"] {
        assert!(matches!(
            TextDecoderStream::new(label, TextDecoderOptions::default()),
            Err(Error::Range(_))
        ));
    }
}
