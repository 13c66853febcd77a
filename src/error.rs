//! # Error types used by the resqued master.
//!
//! [`MasterError`] covers the failures the supervision loop can surface to
//! its caller. Per-listener trouble (a crashed child, a malformed status
//! line, a failed spawn) is *not* represented here: those are logged,
//! throttled by backoff, and the loop keeps running.
//!
//! The type provides `as_label` for stable log/metric labels.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// # Errors produced by master startup and the supervision loop.
///
/// Startup failures (pidfile contention, missing configuration) are fatal:
/// the master exits non-zero without spawning any children.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum MasterError {
    /// No configuration paths were supplied.
    #[error("no configuration paths given")]
    NoConfigPaths,

    /// A configuration path does not exist.
    #[error("configuration path {path:?} does not exist")]
    ConfigMissing {
        /// The missing path.
        path: PathBuf,
    },

    /// The pidfile names a process that is still alive.
    #[error("pidfile {path:?} is held by live process {pid}")]
    PidfileHeld {
        /// Pidfile location.
        path: PathBuf,
        /// The pid recorded in the file.
        pid: i32,
    },

    /// The pidfile could not be read or written.
    #[error("pidfile {path:?}: {source}")]
    Pidfile {
        /// Pidfile location.
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// OS signal handlers could not be installed.
    #[error("installing signal handlers: {source}")]
    SignalSetup {
        #[source]
        source: io::Error,
    },

    /// An I/O failure the loop cannot recover from.
    #[error("{context}: {source}")]
    Io {
        /// What the master was doing.
        context: &'static str,
        #[source]
        source: io::Error,
    },
}

impl MasterError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            MasterError::NoConfigPaths => "master_no_config_paths",
            MasterError::ConfigMissing { .. } => "master_config_missing",
            MasterError::PidfileHeld { .. } => "master_pidfile_held",
            MasterError::Pidfile { .. } => "master_pidfile_io",
            MasterError::SignalSetup { .. } => "master_signal_setup",
            MasterError::Io { .. } => "master_io",
        }
    }
}
