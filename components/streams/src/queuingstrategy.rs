/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::fmt;
use std::rc::Rc;

use crate::error::{Error, Fallible};

/// Measures a chunk. A failing size algorithm errors the stream it measures for.
pub type SizeAlgorithm<T> = Rc<dyn Fn(&T) -> Fallible<f64>>;

/// <https://streams.spec.whatwg.org/#dictdef-queuingstrategy>
pub struct QueuingStrategy<T> {
    pub high_water_mark: Option<f64>,
    pub size: Option<SizeAlgorithm<T>>,
}

impl<T> Default for QueuingStrategy<T> {
    fn default() -> QueuingStrategy<T> {
        QueuingStrategy {
            high_water_mark: None,
            size: None,
        }
    }
}

impl<T> Clone for QueuingStrategy<T> {
    fn clone(&self) -> QueuingStrategy<T> {
        QueuingStrategy {
            high_water_mark: self.high_water_mark,
            size: self.size.clone(),
        }
    }
}

impl<T> fmt::Debug for QueuingStrategy<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueuingStrategy")
            .field("high_water_mark", &self.high_water_mark)
            .field("size", &self.size.as_ref().map(|_| "<size algorithm>"))
            .finish()
    }
}

impl<T> QueuingStrategy<T> {
    pub fn with_high_water_mark(high_water_mark: f64) -> QueuingStrategy<T> {
        QueuingStrategy {
            high_water_mark: Some(high_water_mark),
            size: None,
        }
    }

    pub fn with_size(mut self, size: impl Fn(&T) -> Fallible<f64> + 'static) -> QueuingStrategy<T> {
        self.size = Some(Rc::new(size));
        self
    }
}

/// <https://streams.spec.whatwg.org/#countqueuingstrategy>
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CountQueuingStrategy {
    high_water_mark: f64,
}

impl CountQueuingStrategy {
    /// <https://streams.spec.whatwg.org/#cqs-constructor>
    pub fn new(high_water_mark: f64) -> CountQueuingStrategy {
        CountQueuingStrategy { high_water_mark }
    }

    /// <https://streams.spec.whatwg.org/#cqs-high-water-mark>
    pub fn high_water_mark(&self) -> f64 {
        self.high_water_mark
    }

    pub fn into_strategy<T: 'static>(self) -> QueuingStrategy<T> {
        QueuingStrategy {
            high_water_mark: Some(self.high_water_mark),
            size: Some(Rc::new(count_queuing_strategy_size::<T>)),
        }
    }
}

/// <https://streams.spec.whatwg.org/#count-queuing-strategy-size-function>
pub fn count_queuing_strategy_size<T>(_chunk: &T) -> Fallible<f64> {
    Ok(1.)
}

/// <https://streams.spec.whatwg.org/#blqs-class>
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ByteLengthQueuingStrategy {
    high_water_mark: f64,
}

impl ByteLengthQueuingStrategy {
    pub fn new(high_water_mark: f64) -> ByteLengthQueuingStrategy {
        ByteLengthQueuingStrategy { high_water_mark }
    }

    pub fn high_water_mark(&self) -> f64 {
        self.high_water_mark
    }

    pub fn into_strategy<T: AsRef<[u8]> + 'static>(self) -> QueuingStrategy<T> {
        QueuingStrategy {
            high_water_mark: Some(self.high_water_mark),
            size: Some(Rc::new(byte_length_queuing_strategy_size::<T>)),
        }
    }
}

/// <https://streams.spec.whatwg.org/#byte-length-queuing-strategy-size-function>
pub fn byte_length_queuing_strategy_size<T: AsRef<[u8]>>(chunk: &T) -> Fallible<f64> {
    Ok(chunk.as_ref().len() as f64)
}

/// Extract the high water mark from a QueuingStrategy.
/// If the high water mark is not set, return the default value.
///
/// <https://streams.spec.whatwg.org/#validate-and-normalize-high-water-mark>
pub fn extract_high_water_mark<T>(
    strategy: &QueuingStrategy<T>,
    default_hwm: f64,
) -> Fallible<f64> {
    let Some(high_water_mark) = strategy.high_water_mark else {
        return Ok(default_hwm);
    };

    if high_water_mark.is_nan() || high_water_mark < 0.0 {
        return Err(Error::Range(
            "High water mark must be a non-negative number.".to_string(),
        ));
    }

    Ok(high_water_mark)
}

/// Extract the size algorithm from a QueuingStrategy.
/// If the size algorithm is not set, return a fallback function which always returns 1.
///
/// <https://streams.spec.whatwg.org/#make-size-algorithm-from-size-function>
pub fn extract_size_algorithm<T: 'static>(strategy: &QueuingStrategy<T>) -> SizeAlgorithm<T> {
    match strategy.size {
        Some(ref size) => size.clone(),
        None => Rc::new(count_queuing_strategy_size::<T>),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_high_water_mark() {
        let strategy = QueuingStrategy::<u8>::default();
        assert_eq!(extract_high_water_mark(&strategy, 1.), Ok(1.));
        assert_eq!(extract_high_water_mark(&strategy, 0.), Ok(0.));
    }

    #[test]
    fn test_invalid_high_water_mark() {
        for high_water_mark in [-1., f64::NAN] {
            let strategy = QueuingStrategy::<u8>::with_high_water_mark(high_water_mark);
            assert!(matches!(
                extract_high_water_mark(&strategy, 1.),
                Err(Error::Range(_))
            ));
        }
        let strategy = QueuingStrategy::<u8>::with_high_water_mark(f64::INFINITY);
        assert_eq!(extract_high_water_mark(&strategy, 1.), Ok(f64::INFINITY));
    }

    #[test]
    fn test_size_algorithms() {
        let default = extract_size_algorithm(&QueuingStrategy::<Vec<u8>>::default());
        assert_eq!(default(&vec![1, 2, 3]), Ok(1.));

        let bytes = extract_size_algorithm(&ByteLengthQueuingStrategy::new(16.).into_strategy());
        assert_eq!(bytes(&vec![1u8, 2, 3]), Ok(3.));

        let count = CountQueuingStrategy::new(4.).into_strategy::<String>();
        assert_eq!(count.high_water_mark, Some(4.));
        assert_eq!(extract_size_algorithm(&count)(&"abc".to_owned()), Ok(1.));
    }
}
