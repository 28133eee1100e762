//! The Trickle interval state machine.
//!
//! Two instances run side by side, one per parametrization, dispatched by
//! index. Each timer owns a single pending deadline; overwriting it is how a
//! reset displaces the previously scheduled callback. The engine drives both
//! through [`crate::engine::Engine::poll`] with an explicit tick stamp, so a
//! host (or a test harness) that fell behind simply catches up on its next
//! call — lateness is compensated at scheduling time, never accumulated.

use crate::config::TimerParams;

/// Which callback a pending deadline will fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerPhase {
    /// The randomised transmit point inside `[I/2, I)`.
    Transmit,
    /// The end of the current interval, where `I` doubles.
    IntervalEnd,
}

#[derive(Debug, Clone, Copy)]
struct Pending {
    at: u64,
    phase: TimerPhase,
}

#[derive(Debug, Clone)]
pub struct TrickleTimer {
    pub params: TimerParams,
    /// Current doubling exponent, `0..=params.doublings`.
    pub i_current: u8,
    /// Absolute tick stamps bounding the current interval.
    pub t_start: u64,
    pub t_end: u64,
    /// When the periodic pass last ran for this timer.
    pub t_last_trigger: u64,
    /// Consistency counter `c`.
    pub c: u8,
    pub inconsistency: bool,
    pending: Option<Pending>,
}

impl TrickleTimer {
    pub fn new(params: TimerParams) -> Self {
        Self {
            params,
            i_current: 0,
            t_start: 0,
            t_end: 0,
            t_last_trigger: 0,
            c: 0,
            inconsistency: false,
            pending: None,
        }
    }

    /// Start the timer for the first time.
    pub fn start(&mut self, now: u64, rand: u32) {
        self.t_last_trigger = now;
        self.reset(now, rand);
    }

    /// Trickle reset: back to the minimum interval, transmit point drawn from
    /// `[i_min/2, i_min)`. Displaces any pending callback.
    pub fn reset(&mut self, now: u64, rand: u32) {
        self.i_current = 0;
        self.t_start = now;
        self.t_end = now + self.params.i_min;
        self.c = 0;
        self.schedule_transmit(now, rand);
    }

    /// Interval rollover: double up to the cap, then draw the next transmit
    /// point. If the draw already lies behind `now` (the host was late), the
    /// callback fires on the next poll.
    pub fn double_interval(&mut self, now: u64, rand: u32) {
        if self.i_current < self.params.doublings {
            self.i_current += 1;
        }
        self.t_start = self.t_end;
        self.t_end = self.t_start + (self.params.i_min << self.i_current);
        self.schedule_transmit(now, rand);
    }

    /// Arm the interval-end callback, clamped to fire immediately when the
    /// interval boundary has already passed.
    pub fn schedule_interval_end(&mut self, now: u64) {
        self.pending = Some(Pending { at: self.t_end.max(now), phase: TimerPhase::IntervalEnd });
    }

    fn schedule_transmit(&mut self, now: u64, rand: u32) {
        let interval = self.params.i_min << self.i_current;
        let half = interval / 2;
        let span = (interval - half).max(1);
        let point = self.t_start + half + rand as u64 % span;
        self.pending = Some(Pending { at: point.max(now), phase: TimerPhase::Transmit });
    }

    /// Tick stamp of the armed callback, if any.
    pub fn next_deadline(&self) -> Option<u64> {
        self.pending.map(|p| p.at)
    }

    /// Consume the armed callback when due.
    pub fn take_due(&mut self, now: u64) -> Option<TimerPhase> {
        match self.pending {
            Some(p) if p.at <= now => {
                self.pending = None;
                Some(p.phase)
            }
            _ => None,
        }
    }

    pub fn i_max_ticks(&self) -> u64 {
        self.params.i_max_ticks()
    }

    pub fn t_active_ticks(&self) -> u64 {
        self.params.t_active_ticks()
    }

    pub fn t_dwell_ticks(&self) -> u64 {
        self.params.t_dwell_ticks()
    }

    pub fn suppression_enabled(&self) -> bool {
        self.params.suppression_enabled()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn timer() -> TrickleTimer {
        TrickleTimer::new(TimerParams { i_min: 100, doublings: 4, k: 2, t_active: 3, t_dwell: 5 })
    }

    #[test]
    fn test_reset_schedules_in_first_half_open_window() {
        let mut t = timer();
        // rand = 0 → earliest possible point, i_min/2 past t_start
        t.start(1000, 0);
        assert_eq!(t.i_current, 0);
        assert_eq!(t.t_start, 1000);
        assert_eq!(t.t_end, 1100);
        assert_eq!(t.next_deadline(), Some(1050));

        // rand = 49 → latest point, strictly before t_end
        t.reset(1000, 49);
        assert_eq!(t.next_deadline(), Some(1099));

        // rand wraps modulo the span
        t.reset(1000, 50);
        assert_eq!(t.next_deadline(), Some(1050));
    }

    #[test]
    fn test_take_due_only_fires_once() {
        let mut t = timer();
        t.start(0, 0);
        assert_eq!(t.take_due(49), None);
        assert_eq!(t.take_due(50), Some(TimerPhase::Transmit));
        assert_eq!(t.take_due(50), None);
        assert_eq!(t.next_deadline(), None);
    }

    #[test]
    fn test_double_caps_at_max() {
        let mut t = timer();
        t.start(0, 0);
        let mut now = t.t_end;
        for expected in [1u8, 2, 3, 4, 4, 4] {
            t.double_interval(now, 0);
            assert_eq!(t.i_current, expected);
            assert_eq!(t.t_end - t.t_start, 100u64 << expected);
            now = t.t_end;
        }
    }

    #[test]
    fn test_double_transmit_point_in_second_half() {
        let mut t = timer();
        t.start(0, 0);
        t.double_interval(100, 7);
        // I = 200, half = 100, point = t_start + 100 + 7 % 100
        assert_eq!(t.t_start, 100);
        assert_eq!(t.t_end, 300);
        assert_eq!(t.next_deadline(), Some(207));
    }

    #[test]
    fn test_late_host_fires_immediately() {
        let mut t = timer();
        t.start(0, 0);
        // Host wakes up long past the interval end: the drawn point (150) is
        // already behind, so the callback clamps to now.
        t.double_interval(500, 0);
        assert_eq!(t.next_deadline(), Some(500));
        assert_eq!(t.take_due(500), Some(TimerPhase::Transmit));
    }

    #[test]
    fn test_interval_end_clamps_to_now() {
        let mut t = timer();
        t.start(0, 0);
        t.schedule_interval_end(250);
        assert_eq!(t.next_deadline(), Some(250));
        let mut t = timer();
        t.start(0, 0);
        t.schedule_interval_end(20);
        assert_eq!(t.next_deadline(), Some(100));
    }

    #[test]
    fn test_reset_displaces_pending_callback() {
        let mut t = timer();
        t.start(0, 0);
        t.schedule_interval_end(60);
        assert_eq!(t.next_deadline(), Some(100));
        t.reset(70, 0);
        // the old interval-end callback is gone, replaced by a fresh transmit
        assert_eq!(t.next_deadline(), Some(120));
        assert_eq!(t.take_due(120), Some(TimerPhase::Transmit));
    }
}
