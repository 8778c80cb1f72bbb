// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Serial allocation for the inner connection.
//!
//! Serials sent to inner clients come from our own counter, never from the
//! host: the host and inner serial spaces are disjoint, and the only
//! guarantee inner clients get is monotonicity.

const RING_CAPACITY: usize = 64;

/// Monotonically increasing serial counter for events sent to inner clients.
#[derive(Debug, Default)]
pub struct SerialCounter {
    last: u32,
}

impl SerialCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&mut self) -> u32 {
        self.last = self.last.wrapping_add(1);
        self.last
    }

    pub fn last(&self) -> u32 {
        self.last
    }
}

/// Bounded FIFO of outstanding configure serials.
///
/// Consuming a serial also discards every serial pushed before it: acking a
/// configure implicitly acks all earlier ones.
#[derive(Debug)]
pub struct SerialRing {
    data: [u32; RING_CAPACITY],
    tail: usize,
    len: usize,
}

impl SerialRing {
    pub fn new() -> Self {
        Self {
            data: [0; RING_CAPACITY],
            tail: 0,
            len: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Pushes a serial. Fails when the ring is full, which means the client
    /// has left 64 configures unacked.
    pub fn push(&mut self, serial: u32) -> Result<(), ()> {
        if self.len == RING_CAPACITY {
            return Err(());
        }
        self.data[(self.tail + self.len) % RING_CAPACITY] = serial;
        self.len += 1;
        Ok(())
    }

    /// Consumes `serial` and everything pushed before it. Fails when the
    /// serial is not outstanding.
    pub fn consume(&mut self, serial: u32) -> Result<(), ()> {
        for i in 0..self.len {
            if self.data[(self.tail + i) % RING_CAPACITY] == serial {
                self.tail = (self.tail + i + 1) % RING_CAPACITY;
                self.len = self.len - i - 1;
                return Ok(());
            }
        }
        Err(())
    }
}

impl Default for SerialRing {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::RING_CAPACITY;
    use super::SerialCounter;
    use super::SerialRing;

    #[test]
    fn counter_is_monotonic() {
        let mut counter = SerialCounter::new();
        let mut prev = counter.next();
        for _ in 0..100 {
            let s = counter.next();
            assert!(s > prev);
            prev = s;
        }
    }

    #[test]
    fn fill_drain() {
        let mut ring = SerialRing::new();
        for i in 0..RING_CAPACITY as u32 {
            ring.push(i).unwrap();
        }
        assert!(ring.push(64).is_err());
        for i in 0..RING_CAPACITY as u32 {
            ring.consume(i).unwrap();
        }
        assert!(ring.consume(0).is_err());
    }

    #[test]
    fn consume_discards_earlier_entries() {
        let mut ring = SerialRing::new();
        for i in 0..8 {
            ring.push(i).unwrap();
        }
        ring.consume(5).unwrap();
        // 0..=5 are gone, 6 and 7 remain.
        assert!(ring.consume(3).is_err());
        ring.consume(6).unwrap();
        ring.consume(7).unwrap();
        assert!(ring.is_empty());
    }

    #[test]
    fn unknown_serial_is_rejected() {
        let mut ring = SerialRing::new();
        ring.push(10).unwrap();
        assert!(ring.consume(11).is_err());
        ring.consume(10).unwrap();
    }

    proptest! {
        #[test]
        fn wraparound_never_loses_entries(ops in proptest::collection::vec(0u32..4, 1..512)) {
            let mut ring = SerialRing::new();
            let mut next = 0u32;
            let mut outstanding = std::collections::VecDeque::new();

            for op in ops {
                if op == 0 && !outstanding.is_empty() {
                    // Ack the oldest outstanding serial.
                    let s = outstanding.pop_front().unwrap();
                    prop_assert!(ring.consume(s).is_ok());
                } else if outstanding.len() < RING_CAPACITY {
                    prop_assert!(ring.push(next).is_ok());
                    outstanding.push_back(next);
                    next += 1;
                }
            }

            for s in outstanding {
                prop_assert!(ring.consume(s).is_ok());
            }
            prop_assert!(ring.is_empty());
        }
    }
}
