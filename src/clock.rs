/*
    pit_core
    https://github.com/dbalsom/pit_core

    Copyright 2024-2025 Daniel Balsom

    Permission is hereby granted, free of charge, to any person obtaining a
    copy of this software and associated documentation files (the “Software”),
    to deal in the Software without restriction, including without limitation
    the rights to use, copy, modify, merge, publish, distribute, sublicense,
    and/or sell copies of the Software, and to permit persons to whom the
    Software is furnished to do so, subject to the following conditions:

    The above copyright notice and this permission notice shall be included in
    all copies or substantial portions of the Software.

    THE SOFTWARE IS PROVIDED “AS IS”, WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
    IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
    FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
    AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
    LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
    FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
    DEALINGS IN THE SOFTWARE.

    --------------------------------------------------------------------------

    clock.rs

    Host virtual clock seam. The VMM supplies monotonic nanoseconds through
    the HostClock trait; devices never read wall time directly.

*/

use std::sync::{
    atomic::{AtomicI64, Ordering},
    Arc,
};

pub const NANOSECONDS_PER_SECOND: u64 = 1_000_000_000;

/// Source of virtual time, in nanoseconds. Implementations must be monotonic
/// while the guest is running; devices may capture returned values as
/// timestamps and assume later reads are never smaller.
pub trait HostClock {
    fn now_ns(&self) -> i64;
}

pub type ClockHandle = Arc<dyn HostClock>;

/// A manually-advanced clock for tests and deterministic replay.
pub struct FakeHostClock {
    now_ns: AtomicI64,
}

impl FakeHostClock {
    pub fn new(start_ns: i64) -> Self {
        Self {
            now_ns: AtomicI64::new(start_ns),
        }
    }

    pub fn set_ns(&self, now_ns: i64) {
        self.now_ns.store(now_ns, Ordering::Release);
    }

    pub fn advance_ns(&self, delta_ns: i64) {
        self.now_ns.fetch_add(delta_ns, Ordering::AcqRel);
    }
}

impl HostClock for FakeHostClock {
    fn now_ns(&self) -> i64 {
        self.now_ns.load(Ordering::Acquire)
    }
}
