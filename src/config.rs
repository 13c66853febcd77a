//! # Master runtime configuration.
//!
//! Provides [`Config`], the centralized settings for the supervision loop.
//! The binary fills this from the command line; embedders build it
//! directly.
//!
//! ## Field semantics
//! - `config_paths`: ordered configuration files handed to every listener;
//!   opaque to the master itself
//! - `listener_program`: the executable forked for each listener
//! - `pidfile`: exclusive-lock pidfile, released on every exit path
//! - `status_fd`: inherited descriptor for outward lifecycle reports
//! - `idle_interval`: upper bound on one blocked loop iteration
//! - `backoff`: restart throttle tuning

use std::os::fd::RawFd;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::MasterError;
use crate::master::BackoffSettings;

/// Global configuration for the master.
#[derive(Clone, Debug)]
pub struct Config {
    /// Ordered list of configuration file paths passed to listeners.
    ///
    /// The master never reads these; it only verifies they exist at
    /// startup and forwards them on each listener's command line.
    pub config_paths: Vec<PathBuf>,

    /// Program forked for each listener child.
    ///
    /// Must honor the listener contract: report status lines on the
    /// descriptor named by `--status-fd`, quiesce on `QUIT`, resume on
    /// `CONT`, and adopt the `--old-workers` roster.
    pub listener_program: PathBuf,

    /// Pidfile location, if any. Acquisition fails startup when the file
    /// names a live process.
    pub pidfile: Option<PathBuf>,

    /// Inherited descriptor for `<kind>,<pid>,<state>` status lines.
    ///
    /// `None` disables outward reporting. Write failures are logged once
    /// and then dropped; they never stop supervision.
    pub status_fd: Option<RawFd>,

    /// Longest the loop will sleep with nothing to do before it rechecks
    /// children anyway.
    pub idle_interval: Duration,

    /// Restart throttle applied after listener crashes.
    pub backoff: BackoffSettings,
}

impl Default for Config {
    /// Defaults:
    /// - `listener_program = "resqued-listener"` (resolved via `PATH`)
    /// - `idle_interval = 30s`
    /// - `backoff = BackoffSettings::default()` (1s base, 64s cap)
    fn default() -> Self {
        Self {
            config_paths: Vec::new(),
            listener_program: PathBuf::from("resqued-listener"),
            pidfile: None,
            status_fd: None,
            idle_interval: Duration::from_secs(30),
            backoff: BackoffSettings::default(),
        }
    }
}

impl Config {
    /// Startup validation: at least one config path, and every path
    /// present on disk. Failing fast here means no children are ever
    /// spawned against a broken invocation.
    pub fn validate(&self) -> Result<(), MasterError> {
        if self.config_paths.is_empty() {
            return Err(MasterError::NoConfigPaths);
        }
        for path in &self.config_paths {
            if !path.exists() {
                return Err(MasterError::ConfigMissing { path: path.clone() });
            }
        }
        Ok(())
    }
}
