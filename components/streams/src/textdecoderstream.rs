/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::cell::RefCell;
use std::fmt;

use encoding_rs::{CoderResult, Decoder, DecoderResult, Encoding};

use crate::error::{Error, Fallible};
use crate::queuingstrategy::QueuingStrategy;
use crate::readablestream::ReadableStream;
use crate::transformstream::{GenericTransformStream, TransformStream, Transformer};
use crate::transformstreamdefaultcontroller::TransformStreamDefaultController;
use crate::underlyingsource::{HostFuture, settled};
use crate::writablestream::WritableStream;

/// <https://encoding.spec.whatwg.org/#textdecoderoptions>
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TextDecoderOptions {
    pub fatal: bool,
    pub ignore_bom: bool,
}

/// The streaming half of <https://encoding.spec.whatwg.org/#textdecodercommon>.
struct DecoderTransformer {
    decoder: RefCell<Decoder>,
    fatal: bool,
}

impl DecoderTransformer {
    fn new(encoding: &'static Encoding, options: TextDecoderOptions) -> DecoderTransformer {
        let decoder = if options.ignore_bom {
            encoding.new_decoder_without_bom_handling()
        } else {
            encoding.new_decoder_with_bom_removal()
        };
        DecoderTransformer {
            decoder: RefCell::new(decoder),
            fatal: options.fatal,
        }
    }

    /// Decodes `input`, keeping any incomplete sequence for the next call
    /// unless `last` is set.
    fn decode(&self, input: &[u8], last: bool) -> Fallible<String> {
        let mut decoder = self.decoder.borrow_mut();
        let mut output = String::new();
        let mut remaining = input;

        loop {
            let capacity = if self.fatal {
                decoder.max_utf8_buffer_length_without_replacement(remaining.len())
            } else {
                decoder.max_utf8_buffer_length(remaining.len())
            };
            let Some(capacity) = capacity else {
                return Err(Error::Range("Input is too large to decode".to_string()));
            };
            output.reserve(capacity);

            let (output_full, read) = if self.fatal {
                match decoder.decode_to_string_without_replacement(remaining, &mut output, last) {
                    (DecoderResult::InputEmpty, read) => (false, read),
                    (DecoderResult::OutputFull, read) => (true, read),
                    (DecoderResult::Malformed(..), _) => {
                        return Err(Error::Encoding("The encoded data was not valid".to_string()));
                    },
                }
            } else {
                let (result, read, _) = decoder.decode_to_string(remaining, &mut output, last);
                (result == CoderResult::OutputFull, read)
            };

            if !output_full {
                return Ok(output);
            }
            remaining = &remaining[read..];
        }
    }
}

impl Transformer<Vec<u8>, String> for DecoderTransformer {
    /// <https://encoding.spec.whatwg.org/#decode-and-enqueue-a-chunk>
    fn transform(
        &self,
        chunk: Vec<u8>,
        controller: &TransformStreamDefaultController<Vec<u8>, String>,
    ) -> HostFuture {
        settled(self.decode(&chunk, false).and_then(|output| {
            // If outputChunk is non-empty, then enqueue outputChunk in decoder’s transform.
            if output.is_empty() {
                return Ok(());
            }
            controller.enqueue(output)
        }))
    }

    /// <https://encoding.spec.whatwg.org/#flush-and-enqueue>
    fn flush(&self, controller: &TransformStreamDefaultController<Vec<u8>, String>) -> HostFuture {
        settled(self.decode(&[], true).and_then(|output| {
            if output.is_empty() {
                return Ok(());
            }
            controller.enqueue(output)
        }))
    }
}

/// <https://encoding.spec.whatwg.org/#textdecoderstream>
#[derive(Clone)]
pub struct TextDecoderStream {
    encoding: &'static Encoding,
    fatal: bool,
    ignore_bom: bool,
    transform: TransformStream<Vec<u8>, String>,
}

impl fmt::Debug for TextDecoderStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TextDecoderStream")
            .field("encoding", &self.encoding.name())
            .field("fatal", &self.fatal)
            .field("ignore_bom", &self.ignore_bom)
            .finish()
    }
}

impl TextDecoderStream {
    /// <https://encoding.spec.whatwg.org/#dom-textdecoderstream>
    pub fn new(label: &str, options: TextDecoderOptions) -> Fallible<TextDecoderStream> {
        // Let encoding be the result of getting an encoding from label.
        // If encoding is failure or replacement, then throw a RangeError.
        let encoding = match Encoding::for_label(label.as_bytes()) {
            Some(encoding) if encoding != encoding_rs::REPLACEMENT => encoding,
            _ => {
                return Err(Error::Range(format!(
                    "The given encoding '{}' is not supported.",
                    label.trim()
                )));
            },
        };

        let transformer = DecoderTransformer::new(encoding, options);
        let transform = TransformStream::new(
            transformer,
            QueuingStrategy::default(),
            QueuingStrategy::default(),
        )?;

        Ok(TextDecoderStream {
            encoding,
            fatal: options.fatal,
            ignore_bom: options.ignore_bom,
            transform,
        })
    }

    /// <https://encoding.spec.whatwg.org/#dom-textdecoder-encoding>
    pub fn encoding(&self) -> String {
        self.encoding.name().to_ascii_lowercase()
    }

    /// <https://encoding.spec.whatwg.org/#dom-textdecoder-fatal>
    pub fn fatal(&self) -> bool {
        self.fatal
    }

    /// <https://encoding.spec.whatwg.org/#dom-textdecoder-ignorebom>
    pub fn ignore_bom(&self) -> bool {
        self.ignore_bom
    }

    /// <https://streams.spec.whatwg.org/#dom-generictransformstream-readable>
    pub fn readable(&self) -> ReadableStream<String> {
        self.transform.readable()
    }

    /// <https://streams.spec.whatwg.org/#dom-generictransformstream-writable>
    pub fn writable(&self) -> WritableStream<Vec<u8>> {
        self.transform.writable()
    }
}

impl GenericTransformStream<Vec<u8>, String> for TextDecoderStream {
    fn readable(&self) -> ReadableStream<String> {
        TextDecoderStream::readable(self)
    }

    fn writable(&self) -> WritableStream<Vec<u8>> {
        TextDecoderStream::writable(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decoder(label: &str, fatal: bool) -> DecoderTransformer {
        let encoding = Encoding::for_label(label.as_bytes()).unwrap();
        DecoderTransformer::new(
            encoding,
            TextDecoderOptions {
                fatal,
                ignore_bom: false,
            },
        )
    }

    #[test]
    fn test_sequence_split_across_calls_is_reassembled() {
        let transformer = decoder("utf-8", false);
        let bytes = "€".as_bytes();
        let mut text = String::new();
        for byte in bytes {
            text.push_str(&transformer.decode(&[*byte], false).unwrap());
        }
        text.push_str(&transformer.decode(&[], true).unwrap());
        assert_eq!(text, "€");
    }

    #[test]
    fn test_truncated_sequence_is_replaced_on_flush() {
        let transformer = decoder("utf-8", false);
        assert_eq!(transformer.decode(&[0xE2, 0x82], false).unwrap(), "");
        assert_eq!(transformer.decode(&[], true).unwrap(), "\u{FFFD}");
    }

    #[test]
    fn test_fatal_decoder_rejects_malformed_input() {
        let transformer = decoder("utf-8", true);
        assert!(matches!(
            transformer.decode(&[0xFF], false),
            Err(Error::Encoding(_))
        ));
    }

    #[test]
    fn test_bom_is_removed_unless_ignored() {
        let transformer = decoder("utf-8", false);
        assert_eq!(transformer.decode(&[0xEF, 0xBB, 0xBF, b'a'], true).unwrap(), "a");

        let transformer = DecoderTransformer::new(
            encoding_rs::UTF_8,
            TextDecoderOptions {
                fatal: false,
                ignore_bom: true,
            },
        );
        assert_eq!(
            transformer.decode(&[0xEF, 0xBB, 0xBF, b'a'], true).unwrap(),
            "\u{FEFF}a"
        );
    }
}
