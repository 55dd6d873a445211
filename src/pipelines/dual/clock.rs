// SPDX-License-Identifier: GPL-3.0-only

//! Shared presentation clock for the video and audio tracks
//!
//! `elapsed = now - start - accumulated_pause`. While paused the clock reads
//! `None`, so callers drop the sample instead of stamping it with a time that
//! would later be overtaken.

use parking_lot::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct ClockState {
    start: Option<Instant>,
    paused_total: Duration,
    pause_started: Option<Instant>,
}

/// Monotonic pipeline clock
///
/// Every method has an `_at` twin taking an explicit `Instant` so tests can
/// replay a timeline without sleeping.
#[derive(Debug, Default)]
pub struct PipelineClock {
    state: Mutex<ClockState>,
}

impl PipelineClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&self) {
        self.start_at(Instant::now());
    }

    /// Start (or restart) the timeline at `now`
    pub fn start_at(&self, now: Instant) {
        let mut state = self.state.lock();
        *state = ClockState {
            start: Some(now),
            ..ClockState::default()
        };
    }

    pub fn pause(&self) -> bool {
        self.pause_at(Instant::now())
    }

    /// Returns false if the clock was not running
    pub fn pause_at(&self, now: Instant) -> bool {
        let mut state = self.state.lock();
        if state.start.is_none() || state.pause_started.is_some() {
            return false;
        }
        state.pause_started = Some(now);
        true
    }

    pub fn resume(&self) -> bool {
        self.resume_at(Instant::now())
    }

    /// Returns false if the clock was not paused
    pub fn resume_at(&self, now: Instant) -> bool {
        let mut state = self.state.lock();
        match state.pause_started.take() {
            Some(paused_at) => {
                state.paused_total += now.saturating_duration_since(paused_at);
                true
            }
            None => false,
        }
    }

    pub fn elapsed(&self) -> Option<Duration> {
        self.elapsed_at(Instant::now())
    }

    /// Current presentation time, `None` before start or while paused
    pub fn elapsed_at(&self, now: Instant) -> Option<Duration> {
        let state = self.state.lock();
        let start = state.start?;
        if state.pause_started.is_some() {
            return None;
        }
        now.saturating_duration_since(start)
            .checked_sub(state.paused_total)
    }

    /// Presentation time in microseconds, the unit written to the container
    pub fn elapsed_us(&self) -> Option<i64> {
        self.elapsed().map(|d| d.as_micros() as i64)
    }

    pub fn elapsed_us_at(&self, now: Instant) -> Option<i64> {
        self.elapsed_at(now).map(|d| d.as_micros() as i64)
    }

    pub fn is_running(&self) -> bool {
        let state = self.state.lock();
        state.start.is_some() && state.pause_started.is_none()
    }

    pub fn is_paused(&self) -> bool {
        self.state.lock().pause_started.is_some()
    }

    pub fn total_paused(&self) -> Duration {
        self.state.lock().paused_total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn test_not_started_reads_none() {
        let clock = PipelineClock::new();
        assert_eq!(clock.elapsed(), None);
        assert!(!clock.pause());
    }

    #[test]
    fn test_pause_is_invisible() {
        let t0 = Instant::now();
        let clock = PipelineClock::new();
        clock.start_at(t0);

        assert_eq!(clock.elapsed_at(t0 + secs(8)), Some(secs(8)));
        assert!(clock.pause_at(t0 + secs(8)));
        assert_eq!(clock.elapsed_at(t0 + secs(9)), None);
        assert!(clock.resume_at(t0 + secs(10)));

        assert_eq!(clock.elapsed_at(t0 + secs(10)), Some(secs(8)));
        assert_eq!(clock.elapsed_at(t0 + secs(15)), Some(secs(13)));
        assert_eq!(clock.total_paused(), secs(2));
    }

    #[test]
    fn test_double_pause_and_resume_are_ignored() {
        let t0 = Instant::now();
        let clock = PipelineClock::new();
        clock.start_at(t0);
        assert!(clock.pause_at(t0 + secs(1)));
        assert!(!clock.pause_at(t0 + secs(2)));
        assert!(clock.resume_at(t0 + secs(3)));
        assert!(!clock.resume_at(t0 + secs(4)));
        assert_eq!(clock.elapsed_at(t0 + secs(5)), Some(secs(3)));
    }

    #[test]
    fn test_monotonic_across_rapid_cycles() {
        let t0 = Instant::now();
        let clock = PipelineClock::new();
        clock.start_at(t0);

        let mut last = Duration::ZERO;
        let mut now = t0;
        for i in 0..50u64 {
            now += Duration::from_millis(7 + i % 5);
            if let Some(e) = clock.elapsed_at(now) {
                assert!(e >= last);
                last = e;
            }
            if i % 3 == 0 {
                clock.pause_at(now);
                now += Duration::from_millis(3);
                clock.resume_at(now);
            }
        }
    }
}
