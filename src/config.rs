//! Runtime configuration.
//!
//! ## Environment Variables
//!
//! - `CLEANER_RS_WORKER_NAME`: Name of the cleanup thread (default: `"Cleaner pool"`)
//! - `CLEANER_RS_TEARDOWN`: Teardown policy, `"drain"` (default) or `"hard-stop"`
//! - `CLEANER_RS_LEAK_CHECK`: Report handles still alive at teardown (`"1"` or `"true"`)
use std::{env, fmt, str::FromStr};

pub const DEFAULT_WORKER_NAME: &str = "Cleaner pool";

/// When scheduling is disabled relative to the host's final collection
/// pass at shutdown.
///
/// Cleanups already queued always run before the cleanup thread exits; the
/// policy only decides the fate of handles that become unreachable during
/// the final pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TeardownPolicy {
    /// The final pass runs first, so what it collects is still cleaned up.
    #[default]
    Drain,
    /// Scheduling is disabled first; handles collected by the final pass are
    /// released without running.
    HardStop,
}

impl FromStr for TeardownPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "drain" => Ok(Self::Drain),
            "hard-stop" | "hard_stop" | "hardstop" => Ok(Self::HardStop),
            other => Err(format!("unknown teardown policy: {other}")),
        }
    }
}

impl fmt::Display for TeardownPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Drain => f.write_str("drain"),
            Self::HardStop => f.write_str("hard-stop"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanerConfig {
    pub worker_name: String,
    pub teardown_policy: TeardownPolicy,
    pub leak_checker: bool,
}

impl Default for CleanerConfig {
    fn default() -> Self {
        Self {
            worker_name: DEFAULT_WORKER_NAME.to_string(),
            teardown_policy: TeardownPolicy::default(),
            leak_checker: false,
        }
    }
}

impl CleanerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(name) = env::var("CLEANER_RS_WORKER_NAME") {
            if !name.is_empty() {
                config.worker_name = name;
            }
        }

        if let Ok(policy) = env::var("CLEANER_RS_TEARDOWN") {
            match policy.parse() {
                Ok(policy) => config.teardown_policy = policy,
                Err(e) => tracing::warn!("ignoring CLEANER_RS_TEARDOWN: {}", e),
            }
        }

        config.leak_checker = env::var("CLEANER_RS_LEAK_CHECK")
            .map(|v| v == "1" || v == "true")
            .unwrap_or(false);

        config
    }

    pub fn with_worker_name(mut self, name: impl Into<String>) -> Self {
        self.worker_name = name.into();
        self
    }

    pub fn with_teardown_policy(mut self, policy: TeardownPolicy) -> Self {
        self.teardown_policy = policy;
        self
    }

    pub fn with_leak_checker(mut self, enabled: bool) -> Self {
        self.leak_checker = enabled;
        self
    }
}
