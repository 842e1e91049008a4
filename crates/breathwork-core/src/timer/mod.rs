mod engine;
mod phase;
mod runner;
mod scheduler;

pub use engine::{BreathingController, TimerKind, TimerState, GET_READY_MS, TICK_MS};
pub use phase::{Phase, CYCLE};
pub use runner::{run_session, simulate, SessionSummary};
pub use scheduler::{Scheduler, TimerId};
