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

    timer.rs

    One-shot host timers owned by devices on the bus. Each device timer has
    at most one armed deadline; arming again replaces the previous deadline.

*/

/// Identifies the owner of an armed deadline. Only PIT channel 0 owns a
/// timer today; channels 1 and 2 are pure state.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DeviceTimer {
    PitChannel0,
}

#[derive(Copy, Clone, Debug)]
pub struct TimerEvent<P> {
    pub deadline_ns: i64,
    pub payload: P,
}

/// A small cooperative timer queue. The embedder drains it from its main
/// loop; nothing fires asynchronously.
pub struct TimerQueue<P> {
    events: Vec<TimerEvent<P>>,
}

impl<P: Copy + PartialEq> TimerQueue<P> {
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    /// Arm the one-shot timer for `payload` at `deadline_ns`, replacing any
    /// deadline already armed for the same payload.
    pub fn schedule_at(&mut self, deadline_ns: i64, payload: P) {
        self.cancel(payload);
        self.events.push(TimerEvent {
            deadline_ns,
            payload,
        });
    }

    pub fn cancel(&mut self, payload: P) {
        self.events.retain(|e| e.payload != payload);
    }

    pub fn is_scheduled(&self, payload: P) -> bool {
        self.events.iter().any(|e| e.payload == payload)
    }

    pub fn deadline(&self, payload: P) -> Option<i64> {
        self.events
            .iter()
            .find(|e| e.payload == payload)
            .map(|e| e.deadline_ns)
    }

    /// Earliest armed deadline across all payloads, if any.
    pub fn next_deadline(&self) -> Option<i64> {
        self.events.iter().map(|e| e.deadline_ns).min()
    }

    /// Remove and return the earliest event with `deadline_ns <= now_ns`.
    pub fn pop_due(&mut self, now_ns: i64) -> Option<TimerEvent<P>> {
        let idx = self
            .events
            .iter()
            .enumerate()
            .filter(|(_, e)| e.deadline_ns <= now_ns)
            .min_by_key(|(_, e)| e.deadline_ns)
            .map(|(i, _)| i)?;
        Some(self.events.swap_remove(idx))
    }
}

impl<P: Copy + PartialEq> Default for TimerQueue<P> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedule_replaces_pending_deadline() {
        let mut queue = TimerQueue::new();
        queue.schedule_at(100, DeviceTimer::PitChannel0);
        queue.schedule_at(200, DeviceTimer::PitChannel0);

        assert_eq!(queue.deadline(DeviceTimer::PitChannel0), Some(200));
        assert!(queue.pop_due(150).is_none());

        let event = queue.pop_due(200).unwrap();
        assert_eq!(event.deadline_ns, 200);
        assert!(!queue.is_scheduled(DeviceTimer::PitChannel0));
    }

    #[test]
    fn cancel_removes_deadline() {
        let mut queue = TimerQueue::new();
        queue.schedule_at(100, DeviceTimer::PitChannel0);
        queue.cancel(DeviceTimer::PitChannel0);

        assert!(!queue.is_scheduled(DeviceTimer::PitChannel0));
        assert!(queue.pop_due(i64::MAX).is_none());
        assert_eq!(queue.next_deadline(), None);
    }

    #[test]
    fn pop_due_returns_earliest_first() {
        let mut queue = TimerQueue::new();
        queue.schedule_at(300, 1u8);
        queue.schedule_at(100, 2u8);
        queue.schedule_at(200, 3u8);

        assert_eq!(queue.next_deadline(), Some(100));
        assert_eq!(queue.pop_due(1000).unwrap().payload, 2);
        assert_eq!(queue.pop_due(1000).unwrap().payload, 3);
        assert_eq!(queue.pop_due(1000).unwrap().payload, 1);
        assert!(queue.pop_due(1000).is_none());
    }
}
