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

    bus.rs

    The device bus. Owns the attached devices, the virtual clock handle,
    the timer queue and the interrupt controller seam, and routes guest
    port I/O to the mapped device.

    Devices are wrapped in Options so they can be 'disassociated' from the
    bus during dispatch, allowing us to call them with the bus as an
    argument without RefCells.

*/

use std::collections::HashMap;

use crate::{
    clock::ClockHandle,
    devices::pit::{Pit, PitSnapshot, SnapshotError},
    irq::InterruptController,
    timer::{DeviceTimer, TimerQueue},
};

/// Value returned for reads of unmapped or disabled ports.
pub const NO_IO_BYTE: u8 = 0xFF;

pub trait IoDevice {
    fn read_u8(&mut self, port: u16, bus: Option<&mut BusInterface>) -> u8;
    fn write_u8(&mut self, port: u16, data: u8, bus: Option<&mut BusInterface>);
    fn port_list(&self) -> Vec<(String, u16)>;
}

pub enum IoDeviceType {
    Pit,
}

pub struct BusInterface {
    clock: ClockHandle,
    timers: TimerQueue<DeviceTimer>,
    intc: Option<Box<dyn InterruptController>>,
    pit: Option<Pit>,
    io_map: HashMap<u16, IoDeviceType>,
}

impl BusInterface {
    pub fn new(clock: ClockHandle) -> Self {
        Self {
            clock,
            timers: TimerQueue::new(),
            intc: None,
            pit: None,
            io_map: HashMap::new(),
        }
    }

    pub fn set_interrupt_controller(&mut self, intc: Box<dyn InterruptController>) {
        self.intc = Some(intc);
    }

    /// Attach the PIT, map its ports and apply its power-on reset.
    pub fn attach_pit(&mut self, mut pit: Pit) {
        for (_name, port) in pit.port_list() {
            self.io_map.insert(port, IoDeviceType::Pit);
        }
        pit.reset(self);
        self.pit = Some(pit);
    }

    pub fn now_ns(&self) -> i64 {
        self.clock.now_ns()
    }

    pub fn timers(&self) -> &TimerQueue<DeviceTimer> {
        &self.timers
    }

    pub fn timers_mut(&mut self) -> &mut TimerQueue<DeviceTimer> {
        &mut self.timers
    }

    /// Drive an interrupt line of the attached controller. Level-sensitive;
    /// it is the controller's job to deduplicate repeated assertions.
    pub fn set_irq(&mut self, line: u32, level: bool) {
        if let Some(intc) = &mut self.intc {
            intc.set_irq(line, level);
        }
    }

    // Device accessors
    pub fn pit(&self) -> &Option<Pit> {
        &self.pit
    }

    pub fn pit_mut(&mut self) -> &mut Option<Pit> {
        &mut self.pit
    }

    /// Read an 8-bit value from an IO port.
    pub fn io_read_u8(&mut self, port: u16) -> u8 {
        match self.io_map.get(&port) {
            Some(IoDeviceType::Pit) => {
                if let Some(mut pit) = self.pit.take() {
                    let byte = pit.read_u8(port, Some(self));
                    self.pit = Some(pit);
                    byte
                }
                else {
                    NO_IO_BYTE
                }
            }
            None => {
                // Unhandled IO address read
                NO_IO_BYTE
            }
        }
    }

    /// Write an 8-bit value to an IO port.
    pub fn io_write_u8(&mut self, port: u16, data: u8) {
        match self.io_map.get(&port) {
            Some(IoDeviceType::Pit) => {
                if let Some(mut pit) = self.pit.take() {
                    pit.write_u8(port, data, Some(self));
                    self.pit = Some(pit);
                }
            }
            None => {
                // Unhandled IO address write
            }
        }
    }

    /// Fire every timer whose deadline has passed. Each expiry runs the
    /// owning device's handler, which may re-arm its timer; catch-up over a
    /// large clock jump fires once per missed deadline.
    pub fn run_timers(&mut self) {
        let now = self.clock.now_ns();
        while let Some(event) = self.timers.pop_due(now) {
            match event.payload {
                DeviceTimer::PitChannel0 => {
                    if let Some(mut pit) = self.pit.take() {
                        pit.handle_timer_event(event.deadline_ns, self);
                        self.pit = Some(pit);
                    }
                }
            }
        }
    }

    pub fn pit_set_gate(&mut self, channel: usize, level: bool) {
        if let Some(mut pit) = self.pit.take() {
            pit.set_gate(channel, level, self);
            self.pit = Some(pit);
        }
    }

    pub fn pit_reset(&mut self) {
        if let Some(mut pit) = self.pit.take() {
            pit.reset(self);
            self.pit = Some(pit);
        }
    }

    /// Output line level of a PIT channel at the current virtual time.
    pub fn pit_output(&self, channel: usize) -> bool {
        let now = self.clock.now_ns();
        self.pit
            .as_ref()
            .map(|pit| pit.output(channel, now))
            .unwrap_or(false)
    }

    /// HPET legacy routing hook: park the PIT's channel 0 timer.
    pub fn hpet_pit_disable(&mut self) {
        if let Some(mut pit) = self.pit.take() {
            pit.hpet_disable(self);
            self.pit = Some(pit);
        }
    }

    /// HPET legacy routing hook: hand channel 0 back to the PIT.
    pub fn hpet_pit_enable(&mut self) {
        if let Some(mut pit) = self.pit.take() {
            pit.hpet_enable(self);
            self.pit = Some(pit);
        }
    }

    pub fn pit_save(&self) -> Option<PitSnapshot> {
        self.pit
            .as_ref()
            .map(|pit| pit.save_state(self.timers.deadline(DeviceTimer::PitChannel0)))
    }

    pub fn pit_restore(&mut self, snapshot: &PitSnapshot) -> Result<(), SnapshotError> {
        let mut result = Ok(());
        if let Some(mut pit) = self.pit.take() {
            result = pit.load_state(snapshot, self);
            self.pit = Some(pit);
        }
        result
    }
}
