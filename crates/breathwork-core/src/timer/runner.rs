//! Drivers for [`BreathingController`].
//!
//! `run_session` follows the tokio clock; `simulate` jumps straight from one
//! due timer to the next.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::engine::BreathingController;
use crate::events::{Event, StopReason};

/// Outcome of a finished run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub reason: StopReason,
    pub total_elapsed_secs: u64,
    pub cycles_completed: u64,
}

impl SessionSummary {
    fn from_event(event: &Event) -> Option<Self> {
        match event {
            Event::ExerciseStopped {
                reason,
                total_elapsed_secs,
                cycles_completed,
                ..
            } => Some(Self {
                reason: *reason,
                total_elapsed_secs: *total_elapsed_secs,
                cycles_completed: *cycles_completed,
            }),
            _ => None,
        }
    }
}

/// Drive a started controller in real time until it stops by itself or
/// `cancel` fires. Cancellation stops the controller before returning.
///
/// Returns `None` if the controller had nothing scheduled.
pub async fn run_session<F>(
    controller: &mut BreathingController,
    cancel: CancellationToken,
    mut on_event: F,
) -> Option<SessionSummary>
where
    F: FnMut(&Event),
{
    let origin = tokio::time::Instant::now();
    let base_ms = controller.now_ms();
    let mut summary = None;

    while let Some(due) = controller.next_due() {
        let deadline = origin + Duration::from_millis(due.saturating_sub(base_ms));
        let events = tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!("session cancelled");
                controller.stop()
            }
            _ = tokio::time::sleep_until(deadline) => controller.advance_to(due),
        };
        for event in &events {
            if let Some(s) = SessionSummary::from_event(event) {
                summary = Some(s);
            }
            on_event(event);
        }
        if !controller.is_running() {
            break;
        }
    }
    summary
}

/// Run a started controller on its own clock up to `horizon_ms` and return
/// every event in order. A run still active at the horizon is stopped.
pub fn simulate(controller: &mut BreathingController, horizon_ms: u64) -> Vec<Event> {
    let mut events = Vec::new();
    while let Some(due) = controller.next_due() {
        if due > horizon_ms {
            break;
        }
        events.extend(controller.advance_to(due));
    }
    if controller.is_running() {
        controller.advance_to(horizon_ms);
        events.extend(controller.stop());
    }
    events
}
