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

    devices::pit

    Implements functionality for the Intel 8253/8254 Programmable Interval
    Timer against a virtual clock. Rather than ticking the counting elements,
    each channel records when its count was loaded and derives counter value,
    output level and the next output transition on demand from elapsed
    virtual time. Channel 0 drives a level-sensitive interrupt line through
    a one-shot host timer armed at the predicted transition.

*/

mod modes;
mod snapshot;

pub use modes::{ChannelMode, MAX_COUNT};
pub use snapshot::{ChannelSnapshot, PitSnapshot, SnapshotError, PIT_SNAPSHOT_V1, PIT_SNAPSHOT_V2};

use modular_bitfield::prelude::*;
use serde::Deserialize;

use crate::{
    bus::{BusInterface, IoDevice},
    clock::NANOSECONDS_PER_SECOND,
    timer::DeviceTimer,
    util::muldiv64,
};

pub const PIT_FREQ: u64 = 1_193_182;
pub const PIT_CHANNELS: usize = 3;
pub const PIT_DEFAULT_IOBASE: u16 = 0x40;
pub const PIT_DEFAULT_IRQ: u32 = 0;

const PIT_COMMAND_OFFSET: u16 = 3;

/// Device properties supplied by the machine configuration.
#[derive(Copy, Clone, Debug, Deserialize)]
#[serde(default)]
pub struct PitConfig {
    pub irq: u32,
    pub iobase: u16,
}

impl Default for PitConfig {
    fn default() -> Self {
        Self {
            irq: PIT_DEFAULT_IRQ,
            iobase: PIT_DEFAULT_IOBASE,
        }
    }
}

impl PitConfig {
    /// Parse device properties from the PIT fragment of the machine
    /// configuration.
    pub fn from_toml(fragment: &str) -> anyhow::Result<PitConfig> {
        use anyhow::Context;
        toml::from_str(fragment).context("Invalid PIT configuration")
    }
}

#[derive(Debug, PartialEq, BitfieldSpecifier)]
enum RwModeField {
    LatchCommand,
    Lsb,
    Msb,
    LsbMsb,
}

#[bitfield]
#[allow(dead_code)]
struct ControlByte {
    bcd: bool,
    channel_mode: B3,
    rw_mode: RwModeField,
    channel: B2,
}

// SC=3 re-uses the control word layout as the read-back command.
#[bitfield]
#[allow(dead_code)]
struct ReadBackCommand {
    #[skip]
    __: B1,
    channel_mask: B3,
    latch_status_n: bool,
    latch_count_n: bool,
    sc: B2,
}

/// How a counter crosses the 8-bit bus. `Unprogrammed` is the power-on and
/// post-reset encoding (0); an unprogrammed channel is accessed LSB-first.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RwMode {
    Unprogrammed = 0,
    Lsb = 1,
    Msb = 2,
    LsbMsb = 3,
}

impl RwMode {
    pub fn to_bits(self) -> u8 {
        self as u8
    }

    pub fn from_bits(bits: u8) -> Option<RwMode> {
        match bits {
            0 => Some(RwMode::Unprogrammed),
            1 => Some(RwMode::Lsb),
            2 => Some(RwMode::Msb),
            3 => Some(RwMode::LsbMsb),
            _ => None,
        }
    }
}

/// Position of the read and write byte sequencers. Word0/Word1 are the two
/// halves of a 16-bit transfer in LsbMsb access mode.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RwState {
    Unprogrammed = 0,
    Lsb = 1,
    Msb = 2,
    Word0 = 3,
    Word1 = 4,
}

impl RwState {
    pub fn to_bits(self) -> u8 {
        self as u8
    }

    pub fn from_bits(bits: u8) -> Option<RwState> {
        match bits {
            0 => Some(RwState::Unprogrammed),
            1 => Some(RwState::Lsb),
            2 => Some(RwState::Msb),
            3 => Some(RwState::Word0),
            4 => Some(RwState::Word1),
            _ => None,
        }
    }
}

pub struct Channel {
    c: usize,
    count: u32,
    count_load_time: i64,
    mode: ChannelMode,
    bcd: bool,
    gate: bool,
    rw_mode: RwMode,
    read_state: RwState,
    write_state: RwState,
    write_latch: u8,
    latched_count: u16,
    count_latched: RwMode,
    status_latched: bool,
    status: u8,
    next_transition_time: Option<i64>,
}

impl Channel {
    fn new(c: usize) -> Self {
        Channel {
            c,
            count: MAX_COUNT,
            count_load_time: 0,
            mode: ChannelMode::InterruptOnTerminalCount,
            bcd: false,
            gate: false,
            rw_mode: RwMode::Unprogrammed,
            read_state: RwState::Unprogrammed,
            write_state: RwState::Unprogrammed,
            write_latch: 0,
            latched_count: 0,
            count_latched: RwMode::Unprogrammed,
            status_latched: false,
            status: 0,
            next_transition_time: None,
        }
    }

    /// PIT ticks elapsed since the count was last loaded.
    fn elapsed_ticks(&self, now: i64) -> u64 {
        debug_assert!(now >= self.count_load_time);
        muldiv64(
            (now - self.count_load_time) as u64,
            PIT_FREQ,
            NANOSECONDS_PER_SECOND,
        )
    }

    /// Live 16-bit counter value at `now`.
    pub fn get_count(&self, now: i64) -> u16 {
        self.mode.count_after(self.count, self.elapsed_ticks(now))
    }

    /// Output line level at `now`.
    pub fn get_out(&self, now: i64) -> bool {
        self.mode.out_after(self.count, self.elapsed_ticks(now))
    }

    /// Host time of the next output transition strictly after `now`, or
    /// None if the line never changes again.
    pub fn next_transition(&self, now: i64) -> Option<i64> {
        let d = self.elapsed_ticks(now);
        let ticks = self.mode.transition_after(self.count, d)?;
        let mut next =
            self.count_load_time + muldiv64(ticks, NANOSECONDS_PER_SECOND, PIT_FREQ) as i64;
        if next <= now {
            // Tick-to-nanosecond rounding can land us on or before `now`.
            next = now + 1;
        }
        Some(next)
    }

    /// Begin counting `val` ticks from `now`. A written value of 0 loads
    /// the maximum period of 65536.
    fn load_count(&mut self, val: u16, now: i64) {
        self.count = if val == 0 { MAX_COUNT } else { val as u32 };
        self.count_load_time = now;
    }

    /// Counter latch command. A second latch while one is pending is
    /// silently ignored.
    fn latch_count(&mut self, now: i64) {
        if self.count_latched == RwMode::Unprogrammed {
            self.latched_count = self.get_count(now);
            self.count_latched = self.rw_mode;
        }
    }

    /// Status latch half of the read-back command. Only the first latch
    /// until the status byte is consumed takes effect.
    fn latch_status(&mut self, now: i64) {
        if !self.status_latched {
            // Bit 6 (null count) is not modeled and always reads 0.
            self.status = ((self.get_out(now) as u8) << 7)
                | (self.rw_mode.to_bits() << 4)
                | (self.mode.number() << 1)
                | self.bcd as u8;
            self.status_latched = true;
            log::debug!(
                "PIT: Channel {} status latched: {:02X}",
                self.c,
                self.status
            );
        }
    }
}

pub struct ProgrammableIntervalTimer {
    irq: u32,
    iobase: u16,
    channels: Vec<Channel>,
}
pub type Pit = ProgrammableIntervalTimer;

impl IoDevice for ProgrammableIntervalTimer {
    fn read_u8(&mut self, port: u16, bus: Option<&mut BusInterface>) -> u8 {
        // The PIT always receives a reference to the bus, so it is safe to unwrap.
        let bus = bus.unwrap();

        match port.wrapping_sub(self.iobase) {
            PIT_COMMAND_OFFSET => 0,
            offset @ 0..=2 => self.data_read(offset as usize, bus),
            _ => unreachable!("PIT: Bad port #"),
        }
    }

    fn write_u8(&mut self, port: u16, data: u8, bus: Option<&mut BusInterface>) {
        let bus = bus.unwrap();

        match port.wrapping_sub(self.iobase) {
            PIT_COMMAND_OFFSET => self.control_register_write(data, bus),
            offset @ 0..=2 => self.data_write(offset as usize, data, bus),
            _ => unreachable!("PIT: Bad port #"),
        }
    }

    fn port_list(&self) -> Vec<(String, u16)> {
        vec![
            (String::from("PIT Channel 0 Data Port"), self.iobase),
            (String::from("PIT Channel 1 Data Port"), self.iobase + 1),
            (String::from("PIT Channel 2 Data Port"), self.iobase + 2),
            (
                String::from("PIT Command Register"),
                self.iobase + PIT_COMMAND_OFFSET,
            ),
        ]
    }
}

impl ProgrammableIntervalTimer {
    pub fn new(config: PitConfig) -> Self {
        let mut vec = Vec::<Channel>::new();
        for i in 0..PIT_CHANNELS {
            vec.push(Channel::new(i));
        }
        Self {
            irq: config.irq,
            iobase: config.iobase,
            channels: vec,
        }
    }

    /// Reset the PIT to its power-on state: all channels in square wave
    /// mode counting the maximum period, gates high except channel 2, all
    /// latches and byte sequencers cleared. Re-arms channel 0's timer.
    pub fn reset(&mut self, bus: &mut BusInterface) {
        let now = bus.now_ns();

        for i in 0..PIT_CHANNELS {
            let channel = &mut self.channels[i];
            channel.mode = ChannelMode::SquareWaveGenerator;
            channel.gate = i != 2;
            channel.bcd = false;
            channel.rw_mode = RwMode::Unprogrammed;
            channel.read_state = RwState::Unprogrammed;
            channel.write_state = RwState::Unprogrammed;
            channel.write_latch = 0;
            channel.latched_count = 0;
            channel.count_latched = RwMode::Unprogrammed;
            channel.status_latched = false;
            channel.status = 0;
            channel.next_transition_time = None;
            channel.load_count(0, now);
        }

        self.update_irq_timer(bus, now);
    }

    /// One scheduler pass for channel 0: recompute the output level and the
    /// next transition at `current_time`, assert the interrupt line, and
    /// re-arm or cancel the one-shot timer.
    fn update_irq_timer(&mut self, bus: &mut BusInterface, current_time: i64) {
        let irq = self.irq;
        let channel = &mut self.channels[0];

        let expire = channel.next_transition(current_time);
        let out = channel.get_out(current_time);
        channel.next_transition_time = expire;

        bus.set_irq(irq, out);
        match expire {
            Some(deadline) => bus.timers_mut().schedule_at(deadline, DeviceTimer::PitChannel0),
            None => bus.timers_mut().cancel(DeviceTimer::PitChannel0),
        }
    }

    /// Host timer expiry for channel 0. Runs the scheduler pass at the
    /// predicted transition time rather than the host clock so long-term
    /// phase stays stable under scheduling jitter.
    pub fn handle_timer_event(&mut self, deadline_ns: i64, bus: &mut BusInterface) {
        let current_time = self.channels[0].next_transition_time.unwrap_or(deadline_ns);
        self.update_irq_timer(bus, current_time);
    }

    fn control_register_write(&mut self, byte: u8, bus: &mut BusInterface) {
        let now = bus.now_ns();
        let control = ControlByte::from_bytes([byte]);

        if control.channel() == 3 {
            // Read-back command: latch count and/or status for each
            // selected channel in one write.
            let readback = ReadBackCommand::from_bytes([byte]);
            for c in 0..PIT_CHANNELS {
                if readback.channel_mask() & (1 << c) != 0 {
                    if !readback.latch_count_n() {
                        self.channels[c].latch_count(now);
                    }
                    if !readback.latch_status_n() {
                        self.channels[c].latch_status(now);
                    }
                }
            }
            return;
        }

        let c = control.channel() as usize;

        if let RwModeField::LatchCommand = control.rw_mode() {
            // All 0's access mode is the Latch Count Value command, not an
            // access mode itself.
            self.channels[c].latch_count(now);
            return;
        }

        let (rw_mode, first_state) = match control.rw_mode() {
            RwModeField::Lsb => (RwMode::Lsb, RwState::Lsb),
            RwModeField::Msb => (RwMode::Msb, RwState::Msb),
            RwModeField::LsbMsb => (RwMode::LsbMsb, RwState::Word0),
            _ => unreachable!("Invalid rw_mode"),
        };

        let channel = &mut self.channels[c];
        channel.rw_mode = rw_mode;
        channel.read_state = first_state;
        channel.write_state = first_state;
        channel.mode = ChannelMode::from(control.channel_mode());
        channel.bcd = control.bcd();

        log::trace!(
            "PIT: Channel {} selected, channel_mode {}, rw mode {:?}, bcd: {:?}",
            c,
            channel.mode,
            channel.rw_mode,
            channel.bcd
        );

        // The interrupt schedule is untouched until a new count is loaded.
    }

    /// Handle a write to one of the PIT's data ports. A complete write
    /// (re)loads the channel's count; the first half of a 16-bit write is
    /// held in the write latch and does not disturb counting.
    fn data_write(&mut self, c: usize, data: u8, bus: &mut BusInterface) {
        match self.channels[c].write_state {
            // An unprogrammed channel takes LSB-only writes.
            RwState::Unprogrammed | RwState::Lsb => self.load_count(c, data as u16, bus),
            RwState::Msb => self.load_count(c, (data as u16) << 8, bus),
            RwState::Word0 => {
                self.channels[c].write_latch = data;
                self.channels[c].write_state = RwState::Word1;
            }
            RwState::Word1 => {
                let lsb = self.channels[c].write_latch as u16;
                self.channels[c].write_state = RwState::Word0;
                self.load_count(c, lsb | ((data as u16) << 8), bus);
            }
        }
    }

    /// Handle a read from one of the PIT's data ports. A pending status
    /// latch is consumed first, then a pending count latch, then the live
    /// counter through the read sequencer.
    fn data_read(&mut self, c: usize, bus: &mut BusInterface) -> u8 {
        let now = bus.now_ns();
        let channel = &mut self.channels[c];

        if channel.status_latched {
            channel.status_latched = false;
            return channel.status;
        }

        match channel.count_latched {
            RwMode::Lsb => {
                channel.count_latched = RwMode::Unprogrammed;
                (channel.latched_count & 0xFF) as u8
            }
            RwMode::Msb => {
                channel.count_latched = RwMode::Unprogrammed;
                (channel.latched_count >> 8) as u8
            }
            RwMode::LsbMsb => {
                // First half of a latched word read; the MSB stays latched.
                channel.count_latched = RwMode::Msb;
                (channel.latched_count & 0xFF) as u8
            }
            RwMode::Unprogrammed => {
                let count = channel.get_count(now);
                match channel.read_state {
                    RwState::Unprogrammed | RwState::Lsb => (count & 0xFF) as u8,
                    RwState::Msb => (count >> 8) as u8,
                    RwState::Word0 => {
                        channel.read_state = RwState::Word1;
                        (count & 0xFF) as u8
                    }
                    RwState::Word1 => {
                        channel.read_state = RwState::Word0;
                        (count >> 8) as u8
                    }
                }
            }
        }
    }

    fn load_count(&mut self, c: usize, val: u16, bus: &mut BusInterface) {
        let now = bus.now_ns();
        self.channels[c].load_count(val, now);

        log::trace!(
            "PIT: Channel {} count loaded: {}",
            c,
            self.channels[c].count
        );

        if c == 0 {
            self.update_irq_timer(bus, now);
        }
    }

    /// Drive a channel's gate input. A rising edge restarts counting in the
    /// hardware-triggered and periodic modes.
    pub fn set_gate(&mut self, c: usize, level: bool, bus: &mut BusInterface) {
        if c >= PIT_CHANNELS {
            return;
        }

        let now = bus.now_ns();
        let rising = !self.channels[c].gate && level;

        match self.channels[c].mode {
            ChannelMode::InterruptOnTerminalCount | ChannelMode::SoftwareTriggeredStrobe => {
                // Gate level is recorded but counting is not paused.
            }
            ChannelMode::HardwareRetriggerableOneShot
            | ChannelMode::RateGenerator
            | ChannelMode::SquareWaveGenerator
            | ChannelMode::HardwareTriggeredStrobe => {
                if rising {
                    self.channels[c].count_load_time = now;
                    log::trace!("PIT: Channel {} restarted by gate trigger", c);
                    if c == 0 {
                        self.update_irq_timer(bus, now);
                    }
                }
            }
        }

        self.channels[c].gate = level;
    }

    pub fn gate(&self, c: usize) -> bool {
        self.channels[c].gate
    }

    /// The channel's programmed initial count, 1..=65536.
    pub fn initial_count(&self, c: usize) -> u32 {
        self.channels[c].count
    }

    pub fn mode(&self, c: usize) -> ChannelMode {
        self.channels[c].mode
    }

    /// Output line level of a channel at `now`. Channels 1 and 2 are
    /// observable here even though they drive no interrupt.
    pub fn output(&self, c: usize, now: i64) -> bool {
        self.channels[c].get_out(now)
    }

    /// HPET legacy routing has taken over the interrupt line; park the
    /// channel 0 timer. Guest-visible channel state is untouched.
    pub fn hpet_disable(&mut self, bus: &mut BusInterface) {
        log::debug!("PIT: Channel 0 timer disabled for HPET hand-off");
        bus.timers_mut().cancel(DeviceTimer::PitChannel0);
    }

    /// HPET legacy routing has released the interrupt line; put channel 0
    /// back into its power-on square wave and re-arm the timer.
    pub fn hpet_enable(&mut self, bus: &mut BusInterface) {
        log::debug!("PIT: Channel 0 timer re-enabled after HPET hand-off");
        let now = bus.now_ns();

        let channel = &mut self.channels[0];
        channel.mode = ChannelMode::SquareWaveGenerator;
        channel.gate = true;
        channel.load_count(0, now);

        self.update_irq_timer(bus, now);
    }
}
