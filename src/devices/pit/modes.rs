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

    devices::pit::modes.rs

    The pure time model for the six 8254 operating modes. Counter value,
    output level and next output transition are closed-form functions of the
    programmed count and the number of PIT ticks elapsed since it was
    loaded; no per-tick simulation is involved.

*/

use strum_macros::{Display, EnumIter};

/// A written count of 0 loads the maximum period. The counter value 0x0000
/// read back by the guest encodes this value.
pub const MAX_COUNT: u32 = 0x10000;

#[derive(Copy, Clone, Debug, Display, EnumIter, PartialEq, Eq)]
pub enum ChannelMode {
    InterruptOnTerminalCount,
    HardwareRetriggerableOneShot,
    RateGenerator,
    SquareWaveGenerator,
    SoftwareTriggeredStrobe,
    HardwareTriggeredStrobe,
}

// We implement From<u8> for this enum ourselves rather than deriving
// BitfieldSpecifier as there is more than one bit mapping per Enum variant
// (6 and 7 map to modes 2 & 3 again)
impl From<u8> for ChannelMode {
    fn from(orig: u8) -> Self {
        match orig {
            0x0 => ChannelMode::InterruptOnTerminalCount,
            0x1 => ChannelMode::HardwareRetriggerableOneShot,
            0x2 => ChannelMode::RateGenerator,
            0x3 => ChannelMode::SquareWaveGenerator,
            0x4 => ChannelMode::SoftwareTriggeredStrobe,
            0x5 => ChannelMode::HardwareTriggeredStrobe,
            0x6 => ChannelMode::RateGenerator,
            0x7 => ChannelMode::SquareWaveGenerator,
            _ => panic!("From<u8> for ChannelMode: Invalid u8 value"),
        }
    }
}

impl ChannelMode {
    /// Canonical mode number, as reported in status bits 3-1.
    pub fn number(self) -> u8 {
        match self {
            ChannelMode::InterruptOnTerminalCount => 0,
            ChannelMode::HardwareRetriggerableOneShot => 1,
            ChannelMode::RateGenerator => 2,
            ChannelMode::SquareWaveGenerator => 3,
            ChannelMode::SoftwareTriggeredStrobe => 4,
            ChannelMode::HardwareTriggeredStrobe => 5,
        }
    }

    /// The 16-bit counter value a guest reads after `d` elapsed ticks.
    ///
    /// `count` is the programmed initial count, 1..=65536.
    pub fn count_after(self, count: u32, d: u64) -> u16 {
        match self {
            ChannelMode::InterruptOnTerminalCount
            | ChannelMode::HardwareRetriggerableOneShot
            | ChannelMode::SoftwareTriggeredStrobe
            | ChannelMode::HardwareTriggeredStrobe => {
                // Counts straight down and wraps through 0xFFFF.
                ((count as i64).wrapping_sub(d as i64) & 0xFFFF) as u16
            }
            ChannelMode::RateGenerator => {
                // Reloads every `count` ticks. At the reload instant the
                // counter reads `count`, never 0.
                (count as u64 - d % count as u64) as u16
            }
            ChannelMode::SquareWaveGenerator => {
                // Counts down by two per tick. Coarse for odd counts.
                (count as u64 - (2 * d) % count as u64) as u16
            }
        }
    }

    /// Output line level after `d` elapsed ticks.
    pub fn out_after(self, count: u32, d: u64) -> bool {
        let count = count as u64;
        match self {
            ChannelMode::InterruptOnTerminalCount => d >= count,
            ChannelMode::HardwareRetriggerableOneShot => d < count,
            ChannelMode::RateGenerator => d % count == 0 && d != 0,
            ChannelMode::SquareWaveGenerator => d % count < (count + 1) >> 1,
            ChannelMode::SoftwareTriggeredStrobe | ChannelMode::HardwareTriggeredStrobe => {
                d == count
            }
        }
    }

    /// Tick index of the next output transition at or after `d`, or None if
    /// the line never changes again.
    pub fn transition_after(self, count: u32, d: u64) -> Option<u64> {
        let count = count as u64;
        match self {
            ChannelMode::InterruptOnTerminalCount | ChannelMode::HardwareRetriggerableOneShot => {
                if d < count {
                    Some(count)
                }
                else {
                    None
                }
            }
            ChannelMode::RateGenerator => {
                let base = (d / count) * count;
                if d - base == 0 && d != 0 {
                    Some(base + count)
                }
                else {
                    Some(base + count + 1)
                }
            }
            ChannelMode::SquareWaveGenerator => {
                let base = (d / count) * count;
                let half = (count + 1) >> 1;
                if d - base < half {
                    Some(base + half)
                }
                else {
                    Some(base + count)
                }
            }
            ChannelMode::SoftwareTriggeredStrobe | ChannelMode::HardwareTriggeredStrobe => {
                if d < count {
                    Some(count)
                }
                else if d == count {
                    Some(count + 1)
                }
                else {
                    None
                }
            }
        }
    }
}
