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

    tests::pit.rs

    End-to-end scenarios: guest port programming, gate triggers, latched
    reads, read-back, HPET hand-off and interrupt delivery through the bus,
    the test clock and the timer queue.

*/

use std::{cell::RefCell, rc::Rc, sync::Arc};

use pit_core::{
    bus::BusInterface,
    clock::{FakeHostClock, HostClock, NANOSECONDS_PER_SECOND},
    devices::pit::{ChannelMode, Pit, PitConfig, PIT_FREQ},
    irq::InterruptController,
    timer::DeviceTimer,
    util::muldiv64,
};

/// Records every level assertion the PIT makes on its interrupt line.
struct IrqRecorder {
    events: Rc<RefCell<Vec<(u32, bool)>>>,
}

impl InterruptController for IrqRecorder {
    fn set_irq(&mut self, line: u32, level: bool) {
        self.events.borrow_mut().push((line, level));
    }
}

type IrqLog = Rc<RefCell<Vec<(u32, bool)>>>;

fn setup() -> (Arc<FakeHostClock>, BusInterface, IrqLog) {
    let clock = Arc::new(FakeHostClock::new(0));
    let mut bus = BusInterface::new(clock.clone());

    let events: IrqLog = Rc::new(RefCell::new(Vec::new()));
    bus.set_interrupt_controller(Box::new(IrqRecorder {
        events: events.clone(),
    }));
    bus.attach_pit(Pit::new(PitConfig::default()));

    (clock, bus, events)
}

fn ticks_to_ns(ticks: u64) -> i64 {
    muldiv64(ticks, NANOSECONDS_PER_SECOND, PIT_FREQ) as i64
}

fn ns_to_ticks(ns: i64) -> u64 {
    muldiv64(ns as u64, PIT_FREQ, NANOSECONDS_PER_SECOND)
}

/// Count low-to-high edges on line 0, as an edge-detecting controller
/// would. The PIT re-asserts the current level on every scheduler pass, so
/// raw assertions overcount.
fn rises(events: &IrqLog, from: usize) -> usize {
    let events = events.borrow();
    let mut level = events[..from]
        .iter()
        .rev()
        .find(|&&(line, _)| line == 0)
        .map(|&(_, level)| level)
        .unwrap_or(false);

    let mut rises = 0;
    for &(line, new_level) in &events[from..] {
        if line == 0 {
            if new_level && !level {
                rises += 1;
            }
            level = new_level;
        }
    }
    rises
}

fn write_count_word(bus: &mut BusInterface, port: u16, count: u16) {
    bus.io_write_u8(port, (count & 0xFF) as u8);
    bus.io_write_u8(port, (count >> 8) as u8);
}

#[test]
fn mode2_square_wave_setup_raises_irq_once_per_period() {
    let (clock, mut bus, events) = setup();

    // Channel 0, LSB/MSB, mode 2, binary; count 0 loads 65536.
    bus.io_write_u8(0x43, 0x34);
    write_count_word(&mut bus, 0x40, 0);

    // At the load instant the rate generator output is low.
    assert!(!bus.pit_output(0));
    let mark = events.borrow().len();

    // One full period, with one tick of slack for host-time rounding.
    clock.set_ns(ticks_to_ns(65537) + 1);
    bus.run_timers();

    assert_eq!(rises(&events, mark), 1);
    assert_eq!(events.borrow().last().copied(), Some((0, true)));

    // Nothing more fires until the next period boundary.
    clock.advance_ns(1_000_000);
    bus.run_timers();
    assert_eq!(rises(&events, mark), 1);
}

#[test]
fn mode2_periodic_irq_catch_up() {
    let (clock, mut bus, events) = setup();

    bus.io_write_u8(0x43, 0x34);
    write_count_word(&mut bus, 0x40, 1000);
    let mark = events.borrow().len();

    // Jump past five periods in one step; the timer queue replays each
    // missed deadline in order.
    clock.set_ns(ticks_to_ns(5000) + 2_000);
    bus.run_timers();

    assert_eq!(rises(&events, mark), 5);
}

#[test]
fn latched_read_returns_snapshot_at_latch_time() {
    let (clock, mut bus, _events) = setup();

    bus.io_write_u8(0x43, 0x34);
    write_count_word(&mut bus, 0x40, 1000);

    // Latch partway into the first period.
    clock.advance_ns(300_000);
    bus.io_write_u8(0x43, 0x00);
    let expected = 1000 - ns_to_ticks(300_000) as u16;

    // The counter keeps running; the latch does not.
    clock.advance_ns(200_000);
    let lo = bus.io_read_u8(0x40) as u16;
    let hi = bus.io_read_u8(0x40) as u16;
    assert_eq!((hi << 8) | lo, expected);

    // With the latch consumed, reads follow the live counter again.
    let live = 1000 - (ns_to_ticks(500_000) % 1000) as u16;
    let lo = bus.io_read_u8(0x40) as u16;
    let hi = bus.io_read_u8(0x40) as u16;
    assert_eq!((hi << 8) | lo, live);
}

#[test]
fn read_back_status_reports_out_rw_and_mode() {
    let (_clock, mut bus, _events) = setup();

    // Channel 0: LSB/MSB, mode 3. The count is not reloaded, so the
    // square wave from reset is still in its high half.
    bus.io_write_u8(0x43, 0x36);

    // Read-back: latch status only, channel 0 only.
    bus.io_write_u8(0x43, 0xE2);

    // OUT=1, rw_mode=3, mode=3, binary.
    assert_eq!(bus.io_read_u8(0x40), 0xB6);
}

#[test]
fn status_latch_is_consumed_once() {
    let (_clock, mut bus, _events) = setup();

    bus.io_write_u8(0x43, 0x36);
    bus.io_write_u8(0x43, 0xE2);
    // A second status latch while one is pending is ignored.
    bus.io_write_u8(0x43, 0xE2);

    assert_eq!(bus.io_read_u8(0x40), 0xB6);
    // The latch is spent; this read is the live counter LSB, not status.
    let lo = bus.io_read_u8(0x40);
    assert_eq!(lo, 0x00); // count 65536 at its load instant reads 0x0000
}

#[test]
fn gate_rising_edge_restarts_one_shot() {
    let (clock, mut bus, _events) = setup();

    bus.pit_set_gate(0, false);
    bus.io_write_u8(0x43, 0x32); // channel 0, LSB/MSB, mode 1
    write_count_word(&mut bus, 0x40, 500);

    // One-shot output idles high until the shot completes.
    assert!(bus.pit_output(0));

    clock.advance_ns(10_000);
    bus.pit_set_gate(0, true);

    // The trigger restarted counting: the shot now ends 500 ticks from
    // the trigger, not from the original load.
    assert_eq!(
        bus.timers().deadline(DeviceTimer::PitChannel0),
        Some(10_000 + ticks_to_ns(500))
    );
}

#[test]
fn reset_restores_power_on_state() {
    let (clock, mut bus, _events) = setup();

    // Scramble all three channels.
    bus.io_write_u8(0x43, 0x30); // channel 0, mode 0
    bus.io_write_u8(0x40, 0x10); // half of a word write
    bus.io_write_u8(0x43, 0x54); // channel 1, LSB only, mode 2
    bus.io_write_u8(0x41, 0x20);
    bus.io_write_u8(0x43, 0x80); // latch channel 2
    bus.io_write_u8(0x43, 0xE2); // latch channel 0 status

    clock.advance_ns(5_000);
    bus.pit_reset();

    let snapshot = bus.pit_save().unwrap();
    for (i, channel) in snapshot.channels.iter().enumerate() {
        assert_eq!(channel.mode, 3);
        assert_eq!(channel.gate != 0, i != 2);
        assert_eq!(channel.count, 65536);
        assert_eq!(channel.count_load_time, 5_000);
        assert_eq!(channel.rw_mode, 0);
        assert_eq!(channel.read_state, 0);
        assert_eq!(channel.write_state, 0);
        assert_eq!(channel.count_latched, 0);
        assert_eq!(channel.status_latched, 0);
    }
}

#[test]
fn hpet_handoff_parks_and_restores_channel0() {
    let (clock, mut bus, events) = setup();

    bus.io_write_u8(0x43, 0x34);
    write_count_word(&mut bus, 0x40, 1000);

    bus.hpet_pit_disable();
    assert!(!bus.timers().is_scheduled(DeviceTimer::PitChannel0));

    // With the timer parked, no interrupt activity at all.
    let mark = events.borrow().len();
    clock.advance_ns(100_000_000);
    bus.run_timers();
    assert_eq!(events.borrow().len(), mark);

    bus.hpet_pit_enable();
    {
        let pit = bus.pit().as_ref().unwrap();
        assert_eq!(pit.mode(0), ChannelMode::SquareWaveGenerator);
        assert_eq!(pit.initial_count(0), 65536);
        assert!(pit.gate(0));
    }

    // Mode 3 output is high at the reload, and the timer is armed at the
    // predicted half-period edge.
    assert_eq!(events.borrow().last().copied(), Some((0, true)));
    assert_eq!(
        bus.timers().deadline(DeviceTimer::PitChannel0),
        Some(clock.now_ns() + ticks_to_ns(32768))
    );
}

#[test]
fn irq_line_follows_square_wave_edges() {
    let (clock, mut bus, events) = setup();

    bus.io_write_u8(0x43, 0x36); // channel 0, LSB/MSB, mode 3
    write_count_word(&mut bus, 0x40, 1000);
    let mark = events.borrow().len();

    // Half a period in: the output falls.
    clock.set_ns(ticks_to_ns(500) + 1);
    bus.run_timers();
    assert_eq!(events.borrow().last().copied(), Some((0, false)));

    // Full period: the output rises again.
    clock.set_ns(ticks_to_ns(1000) + 1);
    bus.run_timers();
    assert_eq!(events.borrow().last().copied(), Some((0, true)));
    assert_eq!(rises(&events, mark), 1);
}
