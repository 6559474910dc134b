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

    devices::pit::snapshot.rs

    Save/restore for the PIT. The snapshot carries the full guest-visible
    state of all three channels plus, in version 2, the channel 0 timer
    deadline. Version 1 images predate the stored transition time and
    deadline; loading one rebuilds both with a fresh scheduler pass.

*/

use core::fmt::Display;
use std::error::Error;

use serde_derive::{Deserialize, Serialize};

use super::{Channel, ChannelMode, ProgrammableIntervalTimer, RwMode, RwState, MAX_COUNT, PIT_CHANNELS};
use crate::{bus::BusInterface, timer::DeviceTimer};

pub const PIT_SNAPSHOT_V1: u32 = 1;
pub const PIT_SNAPSHOT_V2: u32 = 2;

#[derive(Debug, PartialEq)]
pub enum SnapshotError {
    UnsupportedVersion(u32),
    BadChannelCount(usize),
    FieldOutOfRange(&'static str),
}
impl Error for SnapshotError {}
impl Display for SnapshotError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            SnapshotError::UnsupportedVersion(v) => {
                write!(f, "Unsupported PIT snapshot version: {}", v)
            }
            SnapshotError::BadChannelCount(n) => {
                write!(f, "PIT snapshot holds {} channels, expected 3.", n)
            }
            SnapshotError::FieldOutOfRange(field) => {
                write!(f, "PIT snapshot field out of range: {}", field)
            }
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChannelSnapshot {
    pub count: u32,
    pub latched_count: u16,
    pub count_latched: u8,
    pub status_latched: u8,
    pub status: u8,
    pub read_state: u8,
    pub write_state: u8,
    pub write_latch: u8,
    pub rw_mode: u8,
    pub mode: u8,
    pub bcd: u8,
    pub gate: u8,
    pub count_load_time: i64,
    // Absent in version 1 images.
    #[serde(default)]
    pub next_transition_time: Option<i64>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PitSnapshot {
    pub version: u32,
    pub channels: Vec<ChannelSnapshot>,
    // Channel 0's armed deadline; absent in version 1 images.
    #[serde(default)]
    pub timer_deadline: Option<i64>,
}

impl Channel {
    fn to_snapshot(&self) -> ChannelSnapshot {
        ChannelSnapshot {
            count: self.count,
            latched_count: self.latched_count,
            count_latched: self.count_latched.to_bits(),
            status_latched: self.status_latched as u8,
            status: self.status,
            read_state: self.read_state.to_bits(),
            write_state: self.write_state.to_bits(),
            write_latch: self.write_latch,
            rw_mode: self.rw_mode.to_bits(),
            mode: self.mode.number(),
            bcd: self.bcd as u8,
            gate: self.gate as u8,
            count_load_time: self.count_load_time,
            next_transition_time: self.next_transition_time,
        }
    }

    fn from_snapshot(c: usize, s: &ChannelSnapshot) -> Result<Channel, SnapshotError> {
        if s.count < 1 || s.count > MAX_COUNT {
            return Err(SnapshotError::FieldOutOfRange("count"));
        }
        if s.mode > 5 {
            return Err(SnapshotError::FieldOutOfRange("mode"));
        }
        Ok(Channel {
            c,
            count: s.count,
            count_load_time: s.count_load_time,
            mode: ChannelMode::from(s.mode),
            bcd: s.bcd != 0,
            gate: s.gate != 0,
            rw_mode: RwMode::from_bits(s.rw_mode)
                .ok_or(SnapshotError::FieldOutOfRange("rw_mode"))?,
            read_state: RwState::from_bits(s.read_state)
                .ok_or(SnapshotError::FieldOutOfRange("read_state"))?,
            write_state: RwState::from_bits(s.write_state)
                .ok_or(SnapshotError::FieldOutOfRange("write_state"))?,
            write_latch: s.write_latch,
            latched_count: s.latched_count,
            count_latched: RwMode::from_bits(s.count_latched)
                .ok_or(SnapshotError::FieldOutOfRange("count_latched"))?,
            status_latched: s.status_latched != 0,
            status: s.status,
            next_transition_time: s.next_transition_time,
        })
    }
}

impl ProgrammableIntervalTimer {
    /// Capture the full device state. The embedder supplies the armed
    /// channel 0 deadline from its timer subsystem, if any.
    pub fn save_state(&self, timer_deadline: Option<i64>) -> PitSnapshot {
        PitSnapshot {
            version: PIT_SNAPSHOT_V2,
            channels: self.channels.iter().map(Channel::to_snapshot).collect(),
            timer_deadline,
        }
    }

    /// Restore device state from a snapshot. Either every field validates
    /// and the whole snapshot is applied, or the device is left untouched.
    pub fn load_state(
        &mut self,
        snapshot: &PitSnapshot,
        bus: &mut BusInterface,
    ) -> Result<(), SnapshotError> {
        match snapshot.version {
            PIT_SNAPSHOT_V1 | PIT_SNAPSHOT_V2 => {}
            v => return Err(SnapshotError::UnsupportedVersion(v)),
        }
        if snapshot.channels.len() != PIT_CHANNELS {
            return Err(SnapshotError::BadChannelCount(snapshot.channels.len()));
        }

        let mut channels = Vec::with_capacity(PIT_CHANNELS);
        for (c, s) in snapshot.channels.iter().enumerate() {
            channels.push(Channel::from_snapshot(c, s)?);
        }
        self.channels = channels;

        bus.timers_mut().cancel(DeviceTimer::PitChannel0);
        if snapshot.version == PIT_SNAPSHOT_V2 {
            if let Some(deadline) = snapshot.timer_deadline {
                bus.timers_mut()
                    .schedule_at(deadline, DeviceTimer::PitChannel0);
            }
        }
        else {
            // Version 1 images carry no transition time or deadline.
            // Rebuild both (and the interrupt level) with a scheduler pass.
            log::debug!("PIT: Rebuilding channel 0 schedule from a v1 snapshot");
            let now = bus.now_ns();
            self.update_irq_timer(bus, now);
        }

        Ok(())
    }
}
