/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Errors surfaced by the stream machinery, either thrown synchronously at the
//! API boundary or stored as the sticky reason of an errored stream.

use std::fmt;

/// An error value. Stream reasons are plain errors, so a stored error can
/// reject any number of pending requests.
#[derive(Clone, Debug, PartialEq)]
pub enum Error {
    /// TypeError: the call violates a lock or usage rule.
    Type(String),
    /// RangeError: invalid high water mark, chunk size or reserved option.
    Range(String),
    /// A fatal text decoding failure.
    Encoding(String),
    /// A reason supplied by a caller or an underlying source, sink or transformer.
    Reason(String),
    /// The reasons of both branches of a tee, in branch order.
    Composite(Vec<Error>),
    /// The absence of a reason.
    Undefined,
}

/// The return type for operations that may fail.
pub type Fallible<T> = Result<T, Error>;

/// The return type for operations that may fail without producing a value.
pub type ErrorResult = Fallible<()>;

impl Error {
    /// Shorthand for a caller supplied reason.
    pub fn reason(message: impl Into<String>) -> Error {
        Error::Reason(message.into())
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Type(message) => write!(f, "TypeError: {}", message),
            Error::Range(message) => write!(f, "RangeError: {}", message),
            Error::Encoding(message) => write!(f, "EncodingError: {}", message),
            Error::Reason(message) => f.write_str(message),
            Error::Composite(reasons) => {
                f.write_str("[")?;
                for (index, reason) in reasons.iter().enumerate() {
                    if index > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", reason)?;
                }
                f.write_str("]")
            },
            Error::Undefined => f.write_str("undefined"),
        }
    }
}

impl std::error::Error for Error {}
