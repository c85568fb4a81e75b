/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::cell::Cell;
use std::fmt;

use encoding_rs::UTF_8;

use crate::error::Fallible;
use crate::queuingstrategy::QueuingStrategy;
use crate::readablestream::ReadableStream;
use crate::transformstream::{GenericTransformStream, TransformStream, Transformer};
use crate::transformstreamdefaultcontroller::TransformStreamDefaultController;
use crate::underlyingsource::{HostFuture, settled};
use crate::writablestream::WritableStream;

/// The UTF-8 encoding of U+FFFD REPLACEMENT CHARACTER.
const REPLACEMENT_BYTES: [u8; 3] = [0xEF, 0xBF, 0xBD];

fn is_leading_surrogate(unit: u16) -> bool {
    (0xD800..=0xDBFF).contains(&unit)
}

/// Holds the encoder's <https://encoding.spec.whatwg.org/#textencoderstream-pending-high-surrogate>.
#[derive(Default)]
struct EncoderTransformer {
    pending_high_surrogate: Cell<Option<u16>>,
}

impl EncoderTransformer {
    /// Encodes `chunk` as UTF-8, holding back a trailing leading surrogate
    /// until the next chunk shows whether it starts a pair.
    fn encode(&self, chunk: &[u16]) -> Vec<u8> {
        let mut units = Vec::with_capacity(chunk.len() + 1);
        units.extend(self.pending_high_surrogate.take());
        units.extend_from_slice(chunk);

        if units.last().copied().is_some_and(is_leading_surrogate) {
            self.pending_high_surrogate.set(units.pop());
        }

        // Lone surrogates become U+FFFD.
        let text = String::from_utf16_lossy(&units);
        let (bytes, _, _) = UTF_8.encode(&text);
        bytes.into_owned()
    }
}

impl Transformer<Vec<u16>, Vec<u8>> for EncoderTransformer {
    /// <https://encoding.spec.whatwg.org/#encode-and-enqueue-a-chunk>
    fn transform(
        &self,
        chunk: Vec<u16>,
        controller: &TransformStreamDefaultController<Vec<u16>, Vec<u8>>,
    ) -> HostFuture {
        let output = self.encode(&chunk);

        // If output is not empty, enqueue it in encoder’s transform.
        if output.is_empty() {
            return settled(Ok(()));
        }
        settled(controller.enqueue(output))
    }

    /// <https://encoding.spec.whatwg.org/#encode-and-flush>
    fn flush(&self, controller: &TransformStreamDefaultController<Vec<u16>, Vec<u8>>) -> HostFuture {
        // If encoder’s leading surrogate is non-null, enqueue « 0xEF, 0xBF, 0xBD » in
        // encoder’s transform.
        if self.pending_high_surrogate.take().is_some() {
            return settled(controller.enqueue(REPLACEMENT_BYTES.to_vec()));
        }
        settled(Ok(()))
    }
}

/// <https://encoding.spec.whatwg.org/#textencoderstream>
///
/// Chunks are UTF-16 code units so that a surrogate pair may be split
/// between two writes.
#[derive(Clone)]
pub struct TextEncoderStream {
    transform: TransformStream<Vec<u16>, Vec<u8>>,
}

impl fmt::Debug for TextEncoderStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TextEncoderStream").finish_non_exhaustive()
    }
}

impl TextEncoderStream {
    /// <https://encoding.spec.whatwg.org/#dom-textencoderstream>
    pub fn new() -> Fallible<TextEncoderStream> {
        let transform = TransformStream::new(
            EncoderTransformer::default(),
            QueuingStrategy::default(),
            QueuingStrategy::default(),
        )?;
        Ok(TextEncoderStream { transform })
    }

    /// <https://encoding.spec.whatwg.org/#dom-textencoder-encoding>
    pub fn encoding(&self) -> String {
        UTF_8.name().to_ascii_lowercase()
    }

    /// <https://streams.spec.whatwg.org/#dom-generictransformstream-readable>
    pub fn readable(&self) -> ReadableStream<Vec<u8>> {
        self.transform.readable()
    }

    /// <https://streams.spec.whatwg.org/#dom-generictransformstream-writable>
    pub fn writable(&self) -> WritableStream<Vec<u16>> {
        self.transform.writable()
    }
}

impl GenericTransformStream<Vec<u16>, Vec<u8>> for TextEncoderStream {
    fn readable(&self) -> ReadableStream<Vec<u8>> {
        TextEncoderStream::readable(self)
    }

    fn writable(&self) -> WritableStream<Vec<u16>> {
        TextEncoderStream::writable(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_surrogate_pair_encodes_like_unsplit_text() {
        let units: Vec<u16> = "𝌆".encode_utf16().collect();
        assert_eq!(units.len(), 2);

        let transformer = EncoderTransformer::default();
        let mut bytes = transformer.encode(&units[..1]);
        assert!(bytes.is_empty());
        bytes.extend(transformer.encode(&units[1..]));
        assert_eq!(bytes, "𝌆".as_bytes());
        assert!(transformer.pending_high_surrogate.get().is_none());
    }

    #[test]
    fn test_unpaired_leading_surrogate_is_replaced() {
        let transformer = EncoderTransformer::default();
        assert!(transformer.encode(&[0xD834]).is_empty());
        assert_eq!(transformer.encode(&[u16::from(b'a')]), "\u{FFFD}a".as_bytes());
    }

    #[test]
    fn test_lone_trailing_surrogate_is_replaced() {
        let transformer = EncoderTransformer::default();
        assert_eq!(transformer.encode(&[0xDF06]), REPLACEMENT_BYTES.to_vec());
    }
}
