use serde::{Deserialize, Serialize};
use std::fmt;

/// One segment of the breathing cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Inhale,
    Hold,
    Exhale,
    Wait,
}

/// The fixed cycle order.
pub const CYCLE: [Phase; 4] = [Phase::Inhale, Phase::Hold, Phase::Exhale, Phase::Wait];

impl Phase {
    /// Position within [`CYCLE`].
    pub fn index(self) -> usize {
        match self {
            Phase::Inhale => 0,
            Phase::Hold => 1,
            Phase::Exhale => 2,
            Phase::Wait => 3,
        }
    }

    pub fn from_index(index: usize) -> Option<Phase> {
        CYCLE.get(index).copied()
    }

    /// The phase that follows this one, wrapping after `Wait`.
    pub fn next(self) -> Phase {
        CYCLE[(self.index() + 1) % CYCLE.len()]
    }

    /// Lowercase name, also used as the key for external animation.
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Inhale => "inhale",
            Phase::Hold => "hold",
            Phase::Exhale => "exhale",
            Phase::Wait => "wait",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
