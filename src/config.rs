use crate::{muted_error, pldbg_warn, weak_error};
use serde::Deserialize;
use std::fs::read_to_string;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const MIN_GLOBAL_BREAKPOINTS: usize = 12;
pub const MAX_GLOBAL_BREAKPOINTS: usize = 500;

/// Runtime configuration shared by targets and proxies of one server instance.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding the shared registry files.
    pub runtime_dir: PathBuf,
    /// Number of connection slots.
    pub max_slots: usize,
    /// Capacity of the global breakpoint table.
    pub global_breakpoints: usize,
    /// Tick of every multiplexed wait, in milliseconds.
    pub poll_interval_ms: u64,
    /// How long a proxy waits for a target before reporting "no event yet".
    pub wait_timeout_secs: u64,
    /// Server process whose death aborts every wait.
    pub supervisor_pid: Option<i32>,
    /// Database component of breakpoint keys.
    pub database_id: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            runtime_dir: std::env::temp_dir().join("pldbg"),
            max_slots: 50,
            global_breakpoints: 20,
            poll_interval_ms: 1000,
            wait_timeout_secs: 30,
            supervisor_pid: None,
            database_id: 1,
        }
    }
}

impl Config {
    const DEFAULT_PATH: &'static str = ".config/pldbg/config.toml";

    /// Parse configuration from a toml document and normalize it.
    pub fn from_toml(data: &str) -> crate::Result<Self> {
        let cfg: Config = toml::de::from_str(data)?;
        Ok(cfg.normalized())
    }

    /// Load configuration from `path` or from the default location in the user home.
    /// Missing or broken files give the default configuration.
    pub fn load(path: Option<&Path>) -> Self {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => match home::home_dir() {
                Some(home) => home.join(Self::DEFAULT_PATH),
                None => return Self::default(),
            },
        };

        let Some(data) = muted_error!(read_to_string(&path), "config file not loaded:") else {
            return Self::default();
        };
        weak_error!(Self::from_toml(&data), "invalid config file:").unwrap_or_default()
    }

    pub fn with_runtime_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.runtime_dir = dir.into();
        self
    }

    fn normalized(mut self) -> Self {
        let clamped = self
            .global_breakpoints
            .clamp(MIN_GLOBAL_BREAKPOINTS, MAX_GLOBAL_BREAKPOINTS);
        if clamped != self.global_breakpoints {
            pldbg_warn!(
                target: "pldbg",
                "global_breakpoints = {} is out of range, {clamped} used",
                self.global_breakpoints
            );
            self.global_breakpoints = clamped;
        }
        if self.max_slots == 0 {
            pldbg_warn!(target: "pldbg", "max_slots must be positive, 1 used");
            self.max_slots = 1;
        }
        if self.poll_interval_ms == 0 {
            self.poll_interval_ms = 1;
        }
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_secs(self.wait_timeout_secs)
    }
}
