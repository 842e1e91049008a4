//! Formatting helpers for timer displays.

use crate::timer::Phase;

/// Shown in place of a phase name before the first inhale.
pub const GET_READY: &str = "Get Ready";

/// Formats seconds as `MM:SS`. Minutes are not capped at 59.
pub fn format_clock(total_secs: u64) -> String {
    format!("{:02}:{:02}", total_secs / 60, total_secs % 60)
}

/// Phase name, or the get-ready sentinel outside a cycle.
pub fn phase_label(phase: Option<Phase>) -> &'static str {
    phase.map(Phase::as_str).unwrap_or(GET_READY)
}

/// Short human label for a time limit in seconds, e.g. `5 min` or `90 s`.
pub fn limit_label(secs: u64) -> String {
    if secs >= 60 && secs % 60 == 0 {
        format!("{} min", secs / 60)
    } else {
        format!("{secs} s")
    }
}

/// Line describing the selected limit.
pub fn describe_limit(limit_secs: Option<u64>) -> String {
    match limit_secs {
        Some(secs) => format!("Time Limit: {}", limit_label(secs)),
        None => "No time limit selected".to_string(),
    }
}
