/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::collections::VecDeque;

use crate::error::{Error, Fallible};

/// <https://streams.spec.whatwg.org/#value-with-size>
#[derive(Clone, Debug, PartialEq)]
pub struct ValueWithSize<T> {
    pub value: T,
    pub size: f64,
}

/// <https://streams.spec.whatwg.org/#queue-with-sizes>
#[derive(Debug)]
pub struct QueueWithSizes<T> {
    queue: VecDeque<ValueWithSize<T>>,
    /// <https://streams.spec.whatwg.org/#readablestreamdefaultcontroller-queuetotalsize>
    total_size: f64,
}

impl<T> Default for QueueWithSizes<T> {
    fn default() -> QueueWithSizes<T> {
        QueueWithSizes {
            queue: VecDeque::new(),
            total_size: 0.,
        }
    }
}

impl<T> QueueWithSizes<T> {
    /// <https://streams.spec.whatwg.org/#dequeue-value>
    pub fn dequeue_value(&mut self) -> T {
        let value_with_size = self
            .queue
            .pop_front()
            .expect("Buffer cannot be empty when dequeue value is called into.");
        self.total_size -= value_with_size.size;
        // Rounding errors may leave a tiny negative total.
        if self.total_size < 0. {
            self.total_size = 0.;
        }
        value_with_size.value
    }

    /// <https://streams.spec.whatwg.org/#enqueue-value-with-size>
    pub fn enqueue_value_with_size(&mut self, value: T, size: f64) -> Fallible<()> {
        // If ! IsNonNegativeNumber(size) is false, throw a RangeError exception.
        if size.is_nan() || size < 0. {
            return Err(Error::Range("Size must be a non-negative number.".to_owned()));
        }
        // If size is +∞, throw a RangeError exception.
        if size.is_infinite() {
            return Err(Error::Range("Size must be finite.".to_owned()));
        }

        self.total_size += size;
        self.queue.push_back(ValueWithSize { value, size });

        Ok(())
    }

    /// <https://streams.spec.whatwg.org/#peek-queue-value>
    pub fn peek_queue_value(&self) -> Option<&T> {
        self.queue.front().map(|value_with_size| &value_with_size.value)
    }

    /// <https://streams.spec.whatwg.org/#reset-queue>
    pub fn reset(&mut self) {
        self.queue.clear();
        self.total_size = Default::default();
    }

    pub fn total_size(&self) -> f64 {
        self.total_size
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }
}
