//! # Breathwork Core Library
//!
//! This library provides the core logic for the Breathwork breathing timer.
//! It follows a CLI-first philosophy: every operation is available through
//! the standalone CLI binary, which is a thin layer over this crate.
//!
//! ## Architecture
//!
//! - **Timer**: A breathing controller over an explicit virtual-clock
//!   scheduler, driven by the caller via `advance_to()` or by the tokio runner
//! - **Cache**: Offline asset cache with generation-scoped storage and an
//!   install / activate / cache-first fetch lifecycle
//! - **Storage**: TOML-based configuration and the data directory
//!
//! ## Key Components
//!
//! - [`BreathingController`]: Phase timer state machine
//! - [`AssetWorker`]: Offline asset cache worker
//! - [`Config`]: Application configuration management
//! - [`Event`]: Notifications emitted by both components

pub mod cache;
pub mod display;
pub mod error;
pub mod events;
pub mod storage;
pub mod timer;

pub use cache::{AssetWorker, CacheStorage, FetchOutcome, Network, Request, Response};
pub use error::{CacheError, ConfigError, CoreError, ValidationError};
pub use events::{Event, StopReason};
pub use storage::{CacheConfig, Config};
pub use timer::{BreathingController, Phase, SessionSummary, TimerState};
