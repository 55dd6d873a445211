// SPDX-License-Identifier: GPL-3.0-only

//! Fallback snapshot scheduling
//!
//! Pure decision logic; the orchestrator owns the timers and the snapshot
//! session. There is at most one attempt in flight and at most one timer
//! outstanding per activation, because the next tick is only ever
//! scheduled from activation or from attempt completion.

use std::time::Duration;
use tracing::debug;

/// What to do with a tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickDecision {
    /// Open the secondary and capture one frame
    BeginAttempt,
    /// An attempt is running; folded into the next scheduled one
    Deferred,
    /// Scheduler inactive or tick from an earlier activation
    Stale,
}

/// A tick to schedule after `delay`, tagged with its activation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledTick {
    pub epoch: u64,
    pub delay: Duration,
}

#[derive(Debug)]
pub struct FallbackSnapshotScheduler {
    interval: Duration,
    initial_delay: Duration,
    active: bool,
    epoch: u64,
    in_flight: bool,
    pending: bool,
}

impl FallbackSnapshotScheduler {
    pub fn new(interval: Duration, initial_delay: Duration) -> Self {
        Self {
            interval,
            initial_delay,
            active: false,
            epoch: 0,
            in_flight: false,
            pending: false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight
    }

    pub fn has_pending(&self) -> bool {
        self.pending
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Start issuing attempts; returns the first tick, or `None` if
    /// already active
    pub fn activate(&mut self) -> Option<ScheduledTick> {
        if self.active {
            return None;
        }
        self.active = true;
        self.epoch += 1;
        self.pending = false;
        debug!(
            epoch = self.epoch,
            delay_ms = self.initial_delay.as_millis() as u64,
            "Snapshot scheduler active"
        );
        Some(ScheduledTick {
            epoch: self.epoch,
            delay: self.initial_delay,
        })
    }

    /// Stop issuing attempts; outstanding ticks become stale
    pub fn deactivate(&mut self) {
        if self.active {
            debug!(epoch = self.epoch, "Snapshot scheduler inactive");
        }
        self.active = false;
        self.epoch += 1;
        self.pending = false;
    }

    pub fn on_tick(&mut self, epoch: u64) -> TickDecision {
        if !self.active || epoch != self.epoch {
            return TickDecision::Stale;
        }
        self.request()
    }

    /// Ask for a refresh outside the regular schedule
    pub fn request(&mut self) -> TickDecision {
        if !self.active {
            return TickDecision::Stale;
        }
        if self.in_flight {
            self.pending = true;
            return TickDecision::Deferred;
        }
        self.in_flight = true;
        TickDecision::BeginAttempt
    }

    /// The running attempt ended (success, failure or disconnect)
    ///
    /// Returns the single next tick, measured from now.
    pub fn on_attempt_finished(&mut self) -> Option<ScheduledTick> {
        if !self.in_flight {
            return None;
        }
        self.in_flight = false;
        if self.pending {
            debug!("Deferred snapshot request merged into next attempt");
            self.pending = false;
        }
        self.active.then_some(ScheduledTick {
            epoch: self.epoch,
            delay: self.interval,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scheduler() -> FallbackSnapshotScheduler {
        FallbackSnapshotScheduler::new(Duration::from_millis(3000), Duration::from_millis(2000))
    }

    #[test]
    fn test_activation_schedules_initial_tick() {
        let mut s = scheduler();
        let tick = s.activate().unwrap();
        assert_eq!(tick.delay, Duration::from_millis(2000));
        assert!(s.activate().is_none());
        assert_eq!(s.on_tick(tick.epoch), TickDecision::BeginAttempt);
        assert!(s.in_flight());
    }

    #[test]
    fn test_tick_while_in_flight_is_deferred() {
        let mut s = scheduler();
        let tick = s.activate().unwrap();
        assert_eq!(s.on_tick(tick.epoch), TickDecision::BeginAttempt);
        assert_eq!(s.on_tick(tick.epoch), TickDecision::Deferred);
        assert_eq!(s.request(), TickDecision::Deferred);
        assert!(s.has_pending());

        // Completion yields exactly one next tick
        let next = s.on_attempt_finished().unwrap();
        assert_eq!(next.delay, Duration::from_millis(3000));
        assert!(!s.has_pending());
        assert!(s.on_attempt_finished().is_none());
    }

    #[test]
    fn test_deactivate_makes_ticks_stale() {
        let mut s = scheduler();
        let tick = s.activate().unwrap();
        assert_eq!(s.on_tick(tick.epoch), TickDecision::BeginAttempt);
        s.deactivate();
        assert_eq!(s.on_tick(tick.epoch), TickDecision::Stale);
        // The running attempt still finishes but schedules nothing
        assert!(s.on_attempt_finished().is_none());

        let again = s.activate().unwrap();
        assert_ne!(again.epoch, tick.epoch);
        assert_eq!(s.on_tick(tick.epoch), TickDecision::Stale);
        assert_eq!(s.on_tick(again.epoch), TickDecision::BeginAttempt);
    }
}
