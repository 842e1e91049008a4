//! Breathing controller implementation.
//!
//! The controller is a state machine over a virtual clock. It does not use
//! internal threads - the caller drives it with `advance_to()`, either in
//! real time (see [`super::runner::run_session`]) or instantly for previews.
//!
//! ## State Transitions
//!
//! ```text
//! Idle -> GetReady -> Breathing(inhale -> hold -> exhale -> wait -> ...) -> Idle
//! ```
//!
//! Once the time limit is reached the run keeps breathing with the ending
//! flag set and stops when the next exhale finishes.
//!
//! ## Usage
//!
//! ```ignore
//! let mut controller = BreathingController::new(4)?;
//! controller.start(4, Some(60))?;
//! // In a loop:
//! let events = controller.advance_to(now_ms);
//! ```

use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::phase::Phase;
use super::scheduler::{Scheduler, TimerId};
use crate::display::{format_clock, phase_label};
use crate::error::ValidationError;
use crate::events::{Event, StopReason};

/// Pause between `start()` and the first inhale.
pub const GET_READY_MS: u64 = 1000;
/// Period of the countdown and total tickers.
pub const TICK_MS: u64 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerState {
    Idle,
    GetReady,
    Breathing,
}

/// Timers owned by the controller, in same-instant firing order. The
/// countdown runs before a phase boundary so it reads N down to 1; the total
/// tick runs after it so a limit reached on a boundary does not end the
/// phase being entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TimerKind {
    PhaseCountdown,
    PhaseAdvance,
    TotalTick,
    GetReady,
}

#[derive(Debug, Clone, Default)]
struct Timers {
    get_ready: Option<TimerId>,
    advance: Option<TimerId>,
    countdown: Option<TimerId>,
    total: Option<TimerId>,
}

/// Drives the four-phase breathing cycle.
#[derive(Debug, Clone)]
pub struct BreathingController {
    phase_duration_secs: u64,
    time_limit_secs: Option<u64>,
    state: TimerState,
    phase: Option<Phase>,
    phase_remaining_secs: u64,
    total_elapsed_secs: u64,
    ending_sequence: bool,
    cycles_completed: u64,
    scheduler: Scheduler<TimerKind>,
    timers: Timers,
}

impl BreathingController {
    /// Create an idle controller with the given phase duration.
    pub fn new(phase_duration_secs: u64) -> Result<Self, ValidationError> {
        validate_duration(phase_duration_secs)?;
        Ok(Self {
            phase_duration_secs,
            time_limit_secs: None,
            state: TimerState::Idle,
            phase: None,
            phase_remaining_secs: phase_duration_secs,
            total_elapsed_secs: 0,
            ending_sequence: false,
            cycles_completed: 0,
            scheduler: Scheduler::new(),
            timers: Timers::default(),
        })
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn state(&self) -> TimerState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state != TimerState::Idle
    }

    pub fn phase(&self) -> Option<Phase> {
        self.phase
    }

    /// Index into the cycle, `-1` before the first inhale.
    pub fn phase_index(&self) -> i8 {
        self.phase.map(|p| p.index() as i8).unwrap_or(-1)
    }

    pub fn phase_duration_secs(&self) -> u64 {
        self.phase_duration_secs
    }

    pub fn time_limit_secs(&self) -> Option<u64> {
        self.time_limit_secs
    }

    pub fn phase_remaining_secs(&self) -> u64 {
        self.phase_remaining_secs
    }

    pub fn total_elapsed_secs(&self) -> u64 {
        self.total_elapsed_secs
    }

    pub fn is_ending_sequence(&self) -> bool {
        self.ending_sequence
    }

    pub fn cycles_completed(&self) -> u64 {
        self.cycles_completed
    }

    /// Controller clock in milliseconds.
    pub fn now_ms(&self) -> u64 {
        self.scheduler.now_ms()
    }

    /// When the next timer fires, if any is armed.
    pub fn next_due(&self) -> Option<u64> {
        self.scheduler.next_due()
    }

    pub fn pending_timers(&self) -> usize {
        self.scheduler.pending()
    }

    /// Build a full state snapshot event.
    pub fn snapshot(&self) -> Event {
        Event::StateSnapshot {
            state: self.state,
            phase: self.phase,
            phase_name: phase_label(self.phase).to_string(),
            phase_remaining_secs: self.phase_remaining_secs,
            total_elapsed_secs: self.total_elapsed_secs,
            total_display: format_clock(self.total_elapsed_secs),
            phase_duration_secs: self.phase_duration_secs,
            time_limit_secs: self.time_limit_secs,
            ending_sequence: self.ending_sequence,
        }
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Change the phase duration. Allowed mid-run; the phase in progress
    /// keeps its boundary and the new value applies from the next phase.
    pub fn set_phase_duration(&mut self, secs: u64) -> Result<(), ValidationError> {
        validate_duration(secs)?;
        self.phase_duration_secs = secs;
        if self.state == TimerState::Idle {
            self.phase_remaining_secs = secs;
        }
        tracing::debug!(phase_duration_secs = secs, "phase duration updated");
        Ok(())
    }

    pub fn set_time_limit(&mut self, limit_secs: Option<u64>) -> Result<(), ValidationError> {
        validate_limit(limit_secs)?;
        self.time_limit_secs = limit_secs;
        Ok(())
    }

    /// Begin a run. The first inhale starts after [`GET_READY_MS`].
    pub fn start(
        &mut self,
        phase_duration_secs: u64,
        time_limit_secs: Option<u64>,
    ) -> Result<Vec<Event>, ValidationError> {
        if self.is_running() {
            return Err(ValidationError::InvalidState("exercise already running".into()));
        }
        validate_duration(phase_duration_secs)?;
        validate_limit(time_limit_secs)?;

        self.phase_duration_secs = phase_duration_secs;
        self.time_limit_secs = time_limit_secs;
        self.total_elapsed_secs = 0;
        self.phase = None;
        self.phase_remaining_secs = phase_duration_secs;
        self.ending_sequence = false;
        self.cycles_completed = 0;
        self.state = TimerState::GetReady;
        self.timers.get_ready = Some(self.scheduler.set_timeout(GET_READY_MS, TimerKind::GetReady));

        tracing::info!(
            phase_duration_secs,
            time_limit_secs = ?time_limit_secs,
            "starting exercise"
        );
        Ok(vec![Event::ExerciseStarted {
            phase_duration_secs,
            time_limit_secs,
            at: Utc::now(),
        }])
    }

    /// Fire every timer due at or before `now_ms`, in order, and return the
    /// resulting events.
    pub fn advance_to(&mut self, now_ms: u64) -> Vec<Event> {
        let mut events = Vec::new();
        while let Some((id, kind)) = self.scheduler.pop_due(now_ms) {
            match kind {
                TimerKind::GetReady => {
                    self.timers.get_ready = None;
                    self.begin_cycle(&mut events);
                }
                TimerKind::PhaseAdvance => {
                    if self.timers.advance == Some(id) {
                        self.timers.advance = None;
                    }
                    events.extend(self.advance_phase());
                }
                TimerKind::PhaseCountdown => events.extend(self.tick_phase_countdown()),
                TimerKind::TotalTick => events.extend(self.tick_total()),
            }
        }
        self.scheduler.settle(now_ms);
        events
    }

    /// Leave the current phase now and arm the next boundary.
    ///
    /// Stops instead when the ending sequence is active and the phase being
    /// left is an exhale. During get-ready this cuts the delay short and
    /// starts the cycle.
    pub fn advance_phase(&mut self) -> Vec<Event> {
        match self.state {
            TimerState::Idle => Vec::new(),
            TimerState::GetReady => {
                if let Some(pending) = self.timers.get_ready.take() {
                    self.scheduler.cancel(pending);
                }
                let mut events = Vec::new();
                self.begin_cycle(&mut events);
                events
            }
            TimerState::Breathing => self.step_phase(),
        }
    }

    /// Count the phase display down toward 1. Never changes phase.
    pub fn tick_phase_countdown(&mut self) -> Option<Event> {
        let phase = self.phase?;
        if self.phase_remaining_secs <= 1 {
            return None;
        }
        self.phase_remaining_secs -= 1;
        Some(Event::PhaseCountdown {
            phase,
            remaining_secs: self.phase_remaining_secs,
            elapsed_ms: self.now_ms(),
        })
    }

    /// Count one second of total time and check the limit.
    pub fn tick_total(&mut self) -> Vec<Event> {
        if self.state == TimerState::Idle {
            return Vec::new();
        }
        self.total_elapsed_secs += 1;
        let mut events = vec![Event::TotalTick {
            total_elapsed_secs: self.total_elapsed_secs,
            display: format_clock(self.total_elapsed_secs),
            elapsed_ms: self.now_ms(),
        }];

        if let Some(limit) = self.time_limit_secs {
            if self.total_elapsed_secs >= limit && !self.ending_sequence {
                tracing::info!(
                    total_elapsed_secs = self.total_elapsed_secs,
                    "time limit reached, finishing after the next exhale"
                );
                self.ending_sequence = true;
                events.push(Event::EndingSequenceStarted {
                    total_elapsed_secs: self.total_elapsed_secs,
                    current_phase: self.phase,
                    elapsed_ms: self.now_ms(),
                });
            }
        }
        events
    }

    /// Cancel every timer and reset the run.
    pub fn stop(&mut self) -> Vec<Event> {
        self.stop_with(StopReason::Manual)
    }

    // ── Internal ─────────────────────────────────────────────────────

    fn begin_cycle(&mut self, events: &mut Vec<Event>) {
        events.extend(self.step_phase());
        self.timers.countdown =
            Some(self.scheduler.set_interval(TICK_MS, TimerKind::PhaseCountdown));
        self.timers.total = Some(self.scheduler.set_interval(TICK_MS, TimerKind::TotalTick));
    }

    fn step_phase(&mut self) -> Vec<Event> {
        if self.ending_sequence && self.phase == Some(Phase::Exhale) {
            return self.stop_with(StopReason::LimitReached);
        }
        if self.phase == Some(Phase::Wait) {
            self.cycles_completed += 1;
        }

        let next = self.phase.map(Phase::next).unwrap_or(Phase::Inhale);
        self.phase = Some(next);
        self.state = TimerState::Breathing;
        self.phase_remaining_secs = self.phase_duration_secs;

        if let Some(previous) = self.timers.advance.take() {
            self.scheduler.cancel(previous);
        }
        self.timers.advance = Some(self.scheduler.set_timeout(
            self.phase_duration_secs.saturating_mul(1000),
            TimerKind::PhaseAdvance,
        ));

        tracing::debug!(phase = %next, cycle = self.cycles_completed + 1, "phase changed");
        vec![Event::PhaseChanged {
            phase: next,
            cycle: self.cycles_completed + 1,
            duration_secs: self.phase_duration_secs,
            ending_sequence: self.ending_sequence,
            elapsed_ms: self.now_ms(),
        }]
    }

    fn stop_with(&mut self, reason: StopReason) -> Vec<Event> {
        let cancelled = self.scheduler.cancel_all();
        self.timers = Timers::default();

        let event = Event::ExerciseStopped {
            reason,
            total_elapsed_secs: self.total_elapsed_secs,
            cycles_completed: self.cycles_completed,
            elapsed_ms: self.now_ms(),
            at: Utc::now(),
        };
        tracing::info!(
            ?reason,
            total_elapsed_secs = self.total_elapsed_secs,
            cancelled,
            "stopping exercise"
        );

        self.state = TimerState::Idle;
        self.phase = None;
        self.time_limit_secs = None;
        self.ending_sequence = false;
        self.total_elapsed_secs = 0;
        self.cycles_completed = 0;
        self.phase_remaining_secs = self.phase_duration_secs;
        vec![event]
    }
}

fn validate_duration(secs: u64) -> Result<(), ValidationError> {
    if secs == 0 {
        return Err(ValidationError::invalid("phase_duration", "must be at least 1 second"));
    }
    Ok(())
}

fn validate_limit(limit_secs: Option<u64>) -> Result<(), ValidationError> {
    if limit_secs == Some(0) {
        return Err(ValidationError::invalid(
            "time_limit",
            "must be positive; omit it for no limit",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn phase_changes(events: &[Event]) -> Vec<(Phase, u64)> {
        events
            .iter()
            .filter_map(|e| match e {
                Event::PhaseChanged {
                    phase, elapsed_ms, ..
                } => Some((*phase, *elapsed_ms)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn rejects_zero_duration() {
        assert!(BreathingController::new(0).is_err());
        let mut c = BreathingController::new(4).unwrap();
        assert!(c.start(0, None).is_err());
        assert!(c.start(4, Some(0)).is_err());
        assert_eq!(c.state(), TimerState::Idle);
    }

    #[test]
    fn get_ready_then_inhale() {
        let mut c = BreathingController::new(4).unwrap();
        c.start(4, None).unwrap();
        assert_eq!(c.state(), TimerState::GetReady);
        assert_eq!(c.phase_index(), -1);

        assert!(c.advance_to(999).is_empty());
        let events = c.advance_to(1000);
        assert_eq!(phase_changes(&events), vec![(Phase::Inhale, 1000)]);
        assert_eq!(c.state(), TimerState::Breathing);
        assert_eq!(c.phase_remaining_secs(), 4);
        assert_eq!(c.pending_timers(), 3);
    }

    #[test]
    fn first_advance_at_five_seconds() {
        let mut c = BreathingController::new(4).unwrap();
        c.start(4, None).unwrap();
        let events = c.advance_to(5000);
        assert_eq!(
            phase_changes(&events),
            vec![(Phase::Inhale, 1000), (Phase::Hold, 5000)]
        );
        assert_eq!(c.total_elapsed_secs(), 4);
    }

    #[test]
    fn countdown_reads_down_to_one_per_phase() {
        let mut c = BreathingController::new(4).unwrap();
        c.start(4, None).unwrap();
        c.advance_to(1000);
        let mut seen = Vec::new();
        for t in (2000..=5000).step_by(1000) {
            c.advance_to(t);
            seen.push(c.phase_remaining_secs());
        }
        // 2s, 3s, 4s into inhale, then the hold boundary resets it.
        assert_eq!(seen, vec![3, 2, 1, 4]);
    }

    #[test]
    fn countdown_never_drops_below_one() {
        let mut c = BreathingController::new(1).unwrap();
        c.start(1, None).unwrap();
        c.advance_to(10_000);
        assert_eq!(c.phase_remaining_secs(), 1);
    }

    #[test]
    fn limit_sets_ending_sequence_without_stopping() {
        let mut c = BreathingController::new(4).unwrap();
        c.start(4, Some(50)).unwrap();
        c.advance_to(50_000);
        assert!(!c.is_ending_sequence());
        let events = c.advance_to(51_000);
        assert!(c.is_ending_sequence());
        assert!(c.is_running());
        assert!(events
            .iter()
            .any(|e| matches!(e, Event::EndingSequenceStarted { total_elapsed_secs: 50, .. })));
    }

    #[test]
    fn stops_after_the_next_exhale() {
        let mut c = BreathingController::new(4).unwrap();
        c.start(4, Some(50)).unwrap();
        let events = c.advance_to(60_999);
        assert!(c.is_running());
        assert_eq!(c.phase(), Some(Phase::Exhale));
        assert!(!events.iter().any(Event::is_stop));

        let events = c.advance_to(61_000);
        let stop = events.iter().find(|e| e.is_stop()).cloned();
        match stop {
            Some(Event::ExerciseStopped {
                reason,
                total_elapsed_secs,
                cycles_completed,
                elapsed_ms,
                ..
            }) => {
                assert_eq!(reason, StopReason::LimitReached);
                assert_eq!(total_elapsed_secs, 59);
                assert_eq!(cycles_completed, 3);
                assert_eq!(elapsed_ms, 61_000);
            }
            other => panic!("Expected ExerciseStopped, got {other:?}"),
        }
        assert_eq!(c.state(), TimerState::Idle);
        assert_eq!(c.pending_timers(), 0);
    }

    #[test]
    fn limit_on_exhale_boundary_waits_for_next_exhale() {
        let mut c = BreathingController::new(4).unwrap();
        c.start(4, Some(60)).unwrap();
        let events = c.advance_to(61_000);
        assert!(!events.iter().any(Event::is_stop));
        assert!(c.is_ending_sequence());
        assert_eq!(c.phase(), Some(Phase::Wait));

        let events = c.advance_to(76_999);
        assert!(!events.iter().any(Event::is_stop));
        assert_eq!(c.phase(), Some(Phase::Exhale));

        let events = c.advance_to(77_000);
        match events.last() {
            Some(Event::ExerciseStopped {
                reason,
                total_elapsed_secs,
                cycles_completed,
                elapsed_ms,
                ..
            }) => {
                assert_eq!(*reason, StopReason::LimitReached);
                assert_eq!(*total_elapsed_secs, 75);
                assert_eq!(*cycles_completed, 4);
                assert_eq!(*elapsed_ms, 77_000);
            }
            other => panic!("Expected ExerciseStopped, got {other:?}"),
        }
        assert!(!c.is_running());
    }

    #[test]
    fn stop_cancels_everything() {
        let mut c = BreathingController::new(4).unwrap();
        c.start(4, Some(120)).unwrap();
        c.advance_to(3000);
        let events = c.stop();
        assert_eq!(events.len(), 1);
        assert_eq!(c.pending_timers(), 0);
        assert_eq!(c.next_due(), None);
        assert!(c.advance_to(1_000_000).is_empty());
        assert_eq!(c.phase_index(), -1);
        assert_eq!(c.total_elapsed_secs(), 0);
        assert_eq!(c.time_limit_secs(), None);
    }

    #[test]
    fn start_then_immediate_stop_emits_nothing_more() {
        let mut c = BreathingController::new(4).unwrap();
        c.start(4, None).unwrap();
        c.stop();
        assert!(c.advance_to(60_000).is_empty());
    }

    #[test]
    fn cannot_start_twice() {
        let mut c = BreathingController::new(4).unwrap();
        c.start(4, None).unwrap();
        assert!(matches!(
            c.start(4, None),
            Err(ValidationError::InvalidState(_))
        ));
    }

    #[test]
    fn duration_change_applies_from_next_phase() {
        let mut c = BreathingController::new(4).unwrap();
        c.start(4, None).unwrap();
        c.advance_to(2000);
        c.set_phase_duration(2).unwrap();
        // The inhale in progress still ends at 5s.
        let events = c.advance_to(5000);
        assert_eq!(phase_changes(&events), vec![(Phase::Hold, 5000)]);
        let events = c.advance_to(7000);
        assert_eq!(phase_changes(&events), vec![(Phase::Exhale, 7000)]);
    }

    #[test]
    fn manual_advance_replaces_pending_boundary() {
        let mut c = BreathingController::new(4).unwrap();
        c.start(4, None).unwrap();
        c.advance_to(2000);
        c.advance_phase();
        assert_eq!(c.phase(), Some(Phase::Hold));
        assert_eq!(c.pending_timers(), 3);
        let events = c.advance_to(5000);
        assert!(phase_changes(&events).is_empty());
        let events = c.advance_to(6000);
        assert_eq!(phase_changes(&events), vec![(Phase::Exhale, 6000)]);
    }

    #[test]
    fn manual_advance_during_get_ready_starts_the_cycle() {
        let mut c = BreathingController::new(4).unwrap();
        c.start(4, None).unwrap();
        c.advance_to(400);
        let events = c.advance_phase();
        assert_eq!(phase_changes(&events), vec![(Phase::Inhale, 400)]);
        assert_eq!(c.state(), TimerState::Breathing);
        assert_eq!(c.pending_timers(), 3);

        // The cancelled get-ready delay must not advance again at 1s.
        assert!(phase_changes(&c.advance_to(1000)).is_empty());
        assert_eq!(c.phase(), Some(Phase::Inhale));
        let events = c.advance_to(4400);
        assert_eq!(phase_changes(&events), vec![(Phase::Hold, 4400)]);
        assert_eq!(c.total_elapsed_secs(), 4);
    }

    #[test]
    fn snapshot_reports_get_ready() {
        let c = BreathingController::new(4).unwrap();
        match c.snapshot() {
            Event::StateSnapshot {
                state,
                phase_name,
                total_display,
                phase_remaining_secs,
                ..
            } => {
                assert_eq!(state, TimerState::Idle);
                assert_eq!(phase_name, "Get Ready");
                assert_eq!(total_display, "00:00");
                assert_eq!(phase_remaining_secs, 4);
            }
            _ => panic!("Expected StateSnapshot"),
        }
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn advance_fires_once_per_duration(duration in 1u64..30, phases in 1usize..12) {
                let mut c = BreathingController::new(duration).unwrap();
                c.start(duration, None).unwrap();
                c.advance_to(GET_READY_MS);
                for step in 1..=phases {
                    let boundary = GET_READY_MS + duration * 1000 * step as u64;
                    let before = c.phase_index();
                    let early = c.advance_to(boundary - 1);
                    prop_assert!(phase_changes(&early).is_empty());
                    let events = c.advance_to(boundary);
                    prop_assert_eq!(phase_changes(&events).len(), 1);
                    prop_assert_eq!(c.phase_index(), (before + 1) % 4);
                }
            }

            #[test]
            fn ending_sequence_sticks_until_stop(limit in 1u64..40, duration in 1u64..6) {
                let mut c = BreathingController::new(duration).unwrap();
                c.start(duration, Some(limit)).unwrap();
                let mut reached = false;
                let mut t = GET_READY_MS;
                while c.is_running() {
                    t += TICK_MS;
                    c.advance_to(t);
                    if !c.is_running() {
                        break;
                    }
                    if c.total_elapsed_secs() >= limit {
                        reached = true;
                    }
                    prop_assert_eq!(c.is_ending_sequence(), reached);
                }
                prop_assert_eq!(c.pending_timers(), 0);
            }
        }
    }
}
