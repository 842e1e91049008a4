use std::io::Write;

use clap::{Args, Subcommand};
use tokio_util::sync::CancellationToken;

use breathwork_core::display::{describe_limit, format_clock, limit_label, phase_label};
use breathwork_core::timer::{run_session, simulate, BreathingController};
use breathwork_core::{Config, Event};

#[derive(Args)]
pub struct ExerciseArgs {
    /// Seconds per phase (defaults to exercise.phase_duration)
    #[arg(long, short)]
    duration: Option<u64>,
    /// Stop after the exhale that follows this many seconds
    #[arg(long, short, conflicts_with = "no_limit")]
    limit: Option<u64>,
    /// Ignore any configured time limit
    #[arg(long)]
    no_limit: bool,
}

impl ExerciseArgs {
    fn resolve(&self, config: &Config) -> (u64, Option<u64>) {
        let duration = self.duration.unwrap_or(config.exercise.phase_duration);
        let limit = if self.no_limit {
            None
        } else {
            self.limit.or(config.exercise.time_limit)
        };
        (duration, limit)
    }
}

#[derive(Subcommand)]
pub enum SessionAction {
    /// Run an exercise in real time (Ctrl-C stops)
    Start {
        #[command(flatten)]
        exercise: ExerciseArgs,
        /// Print events as JSON lines instead of a status line
        #[arg(long)]
        json: bool,
    },
    /// Run an exercise instantly and print its event timeline as JSON
    Preview {
        #[command(flatten)]
        exercise: ExerciseArgs,
        /// Stop an unfinished run after this many seconds
        #[arg(long, default_value = "600")]
        horizon: u64,
    },
    /// List the time limit presets
    Presets,
    /// Print the idle state for the configured defaults as JSON
    Status,
}

pub fn run(action: SessionAction) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;

    match action {
        SessionAction::Start { exercise, json } => {
            let (duration, limit) = exercise.resolve(&config);
            let mut controller = BreathingController::new(duration)?;
            let started = controller.start(duration, limit)?;
            if !json {
                println!("{}  |  {}s per phase", describe_limit(limit), duration);
            }

            let mut line = StatusLine::new(duration);
            let mut render = |event: &Event| {
                if json {
                    if let Ok(s) = serde_json::to_string(event) {
                        println!("{s}");
                    }
                } else {
                    line.apply(event);
                }
            };
            started.iter().for_each(&mut render);

            let runtime = tokio::runtime::Runtime::new()?;
            let summary = runtime.block_on(async {
                let cancel = CancellationToken::new();
                let on_interrupt = cancel.clone();
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        on_interrupt.cancel();
                    }
                });
                run_session(&mut controller, cancel, &mut render).await
            });

            if let (Some(summary), false) = (summary, json) {
                println!(
                    "\nDone: {} over {} cycle(s)",
                    format_clock(summary.total_elapsed_secs),
                    summary.cycles_completed
                );
            }
        }
        SessionAction::Preview { exercise, horizon } => {
            let (duration, limit) = exercise.resolve(&config);
            let mut controller = BreathingController::new(duration)?;
            let mut events = controller.start(duration, limit)?;
            events.extend(simulate(&mut controller, horizon.saturating_mul(1000)));
            println!("{}", serde_json::to_string_pretty(&events)?);
        }
        SessionAction::Presets => {
            for secs in &config.exercise.time_limit_presets {
                println!("{secs:>6}  {}", limit_label(*secs));
            }
        }
        SessionAction::Status => {
            let mut controller = BreathingController::new(config.exercise.phase_duration)?;
            controller.set_time_limit(config.exercise.time_limit)?;
            println!("{}", serde_json::to_string_pretty(&controller.snapshot())?);
        }
    }
    Ok(())
}

/// Single terminal line showing phase, countdown and total time.
struct StatusLine {
    phase: &'static str,
    remaining: u64,
    total: String,
    ending: bool,
}

impl StatusLine {
    fn new(duration: u64) -> Self {
        Self {
            phase: phase_label(None),
            remaining: duration,
            total: format_clock(0),
            ending: false,
        }
    }

    fn apply(&mut self, event: &Event) {
        match event {
            Event::PhaseChanged {
                phase,
                duration_secs,
                ..
            } => {
                self.phase = phase_label(Some(*phase));
                self.remaining = *duration_secs;
            }
            Event::PhaseCountdown { remaining_secs, .. } => self.remaining = *remaining_secs,
            Event::TotalTick { display, .. } => self.total = display.clone(),
            Event::EndingSequenceStarted { .. } => self.ending = true,
            Event::ExerciseStopped { .. } => return,
            _ => {}
        }
        let marker = if self.ending { "  (finishing)" } else { "" };
        print!(
            "\r{:<9} {:>3}   {}{}   ",
            self.phase, self.remaining, self.total, marker
        );
        let _ = std::io::stdout().flush();
    }
}
