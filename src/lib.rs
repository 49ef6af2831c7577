//! # cleaner-rs
//!
//! Deferred cleanup of objects after a collector finds them unreachable.
//!
//! A [`Cleaner`] binds a payload to a callback. When the handle becomes
//! unreachable (its last owner drops it, or a [`TrackedHeap`] collection
//! finds its object dead) the callback runs with the payload, exactly once,
//! on a single dedicated cleanup thread. Once the [`CleanerRuntime`] has been
//! torn down, handles that become unreachable are released without running.
//!
//! ## Environment Variables
//!
//! Read by [`CleanerConfig::from_env`] and so by [`CleanerRuntime::global`]:
//!
//! - `CLEANER_RS_WORKER_NAME`: name of the cleanup thread.
//! - `CLEANER_RS_TEARDOWN`: `drain` or `hard-stop`.
//! - `CLEANER_RS_LEAK_CHECK`: warn about live handles at teardown.
use clap::Parser;
use std::{io, process::ExitCode, thread, time::Duration};
use tracing::Level;

pub mod cleaner;
pub mod collector;
pub mod config;
pub mod error;
pub mod heap;
pub mod metrics;
pub mod runtime;
pub mod shareable;
pub mod teardown;
pub mod worker;

pub use cleaner::{Cleaner, CleanerId};
pub use collector::{CollectorHook, UnreachableEvent};
pub use config::{CleanerConfig, TeardownPolicy};
pub use error::{CleanerError, Result};
pub use heap::{ObjectId, TrackedHeap};
pub use metrics::{CleanerStats, StatsSnapshot};
pub use runtime::{create_cleaner, shutdown_global, CleanerRuntime};
pub use shareable::{Confined, Frozen, NativePtr, Shareable};
pub use teardown::{TeardownCoordinator, TeardownReport};
pub use worker::{CleanerWorker, Completion, WorkerState};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Runs deferred cleanup scenarios through process teardown"
)]
pub struct Args {
    #[arg(value_enum)]
    pub scenario: Scenario,
    /// Teardown policy: `drain` or `hard-stop`. Defaults to CLEANER_RS_TEARDOWN.
    #[arg(short, long, value_parser = parse_policy)]
    pub policy: Option<TeardownPolicy>,
    /// Warn about handles still alive at teardown.
    #[arg(long)]
    pub leak_check: bool,
    #[arg(short, long)]
    pub verbose: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Scenario {
    /// A handle over 42 is still owned at exit and released by the final
    /// collection pass. Runs under `drain`, dropped under `hard-stop`.
    Pending,
    /// A handle over 42 is triggered while the cleanup thread is busy, then
    /// the process tears down. Runs under both policies.
    Queued,
    /// A handle is still alive at teardown and is dropped afterwards.
    Leaked,
    /// The cleanup callback panics.
    Fault,
}

fn parse_policy(s: &str) -> std::result::Result<TeardownPolicy, String> {
    s.parse()
}

pub fn run_cli() -> ExitCode {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(if args.verbose {
            Level::DEBUG
        } else {
            Level::WARN
        })
        .with_target(false)
        .with_writer(io::stderr)
        .compact()
        .init();

    let mut config = CleanerConfig::from_env();
    if let Some(policy) = args.policy {
        config = config.with_teardown_policy(policy);
    }
    if args.leak_check {
        config = config.with_leak_checker(true);
    }
    let runtime = CleanerRuntime::new(config);

    match run_scenario(&runtime, args.scenario) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            runtime.shutdown(|| ());
            ExitCode::from(1)
        }
    }
}

fn run_scenario(runtime: &CleanerRuntime, scenario: Scenario) -> Result<()> {
    match scenario {
        Scenario::Pending => {
            let cleaner = runtime.create(42, |x: i32| println!("{}", x))?;
            runtime.shutdown(move || drop(cleaner));
            Ok(())
        }
        Scenario::Queued => {
            // Keep the cleanup thread busy until teardown starts, so the
            // trigger below is still queued when the flag flips.
            let watcher = runtime.clone();
            let busy = runtime.execute(move || {
                while watcher.worker().state() == WorkerState::Running {
                    thread::sleep(Duration::from_millis(1));
                }
            })?;

            let cleaner = runtime.create(42, |x: i32| println!("{}", x))?;
            cleaner.trigger();
            runtime.shutdown(|| ());
            busy.wait()
        }
        Scenario::Leaked => {
            let cleaner = runtime.create(42, |x: i32| println!("{}", x))?;
            runtime.shutdown(|| ());
            drop(cleaner);
            Ok(())
        }
        Scenario::Fault => {
            let cleaner = runtime.create(42, |x: i32| panic!("cleanup of {} failed", x))?;
            cleaner.trigger();
            runtime.run_synchronous_probe()?;
            runtime.shutdown(|| ());
            Ok(())
        }
    }
}
