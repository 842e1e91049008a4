use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::timer::{Phase, TimerState};

/// Why an exercise run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The time limit was reached and the closing exhale finished.
    LimitReached,
    /// Stopped by the user.
    Manual,
}

/// Every state change in the system produces an Event.
/// Front ends render them; the cache worker reports its lifecycle with them.
///
/// Timer events carry `elapsed_ms`, the controller's clock at the moment the
/// change happened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    ExerciseStarted {
        phase_duration_secs: u64,
        time_limit_secs: Option<u64>,
        at: DateTime<Utc>,
    },
    PhaseChanged {
        phase: Phase,
        /// 1-based cycle number.
        cycle: u64,
        duration_secs: u64,
        ending_sequence: bool,
        elapsed_ms: u64,
    },
    PhaseCountdown {
        phase: Phase,
        remaining_secs: u64,
        elapsed_ms: u64,
    },
    TotalTick {
        total_elapsed_secs: u64,
        /// `MM:SS`
        display: String,
        elapsed_ms: u64,
    },
    /// Time limit reached; the run ends after the next exhale.
    EndingSequenceStarted {
        total_elapsed_secs: u64,
        current_phase: Option<Phase>,
        elapsed_ms: u64,
    },
    /// All timers cancelled and state reset.
    ExerciseStopped {
        reason: StopReason,
        total_elapsed_secs: u64,
        cycles_completed: u64,
        elapsed_ms: u64,
        at: DateTime<Utc>,
    },
    StateSnapshot {
        state: TimerState,
        phase: Option<Phase>,
        phase_name: String,
        phase_remaining_secs: u64,
        total_elapsed_secs: u64,
        total_display: String,
        phase_duration_secs: u64,
        time_limit_secs: Option<u64>,
        ending_sequence: bool,
    },
    CacheInstalled {
        generation: String,
        assets: usize,
        at: DateTime<Utc>,
    },
    CacheActivated {
        generation: String,
        deleted: Vec<String>,
        clients_claimed: usize,
        at: DateTime<Utc>,
    },
}

impl Event {
    pub fn is_stop(&self) -> bool {
        matches!(self, Event::ExerciseStopped { .. })
    }
}
