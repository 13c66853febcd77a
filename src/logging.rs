//! # Logging setup and log-file reopening.
//!
//! Installs a `tracing` subscriber honoring `RUST_LOG` (falling back to
//! `info`) and, when a log file is configured, routes output through a
//! writer that can be reopened in place — `HUP` swaps in a fresh handle so
//! external log rotation works without restarting the master.
//!
//! Also provides the last-chance panic reporter: an unexpected unwind of
//! the supervision loop is logged with its backtrace before the process
//! dies, while the scoped guards (pidfile) still run.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

use crate::error::MasterError;

/// Handle to the active log destination.
///
/// Cloneable; the master keeps one so `HUP` can reopen the file.
#[derive(Clone, Default)]
pub struct LogHandle {
    target: Option<Arc<ReopenableFile>>,
}

struct ReopenableFile {
    path: PathBuf,
    file: Mutex<File>,
}

impl ReopenableFile {
    fn lock(&self) -> MutexGuard<'_, File> {
        self.file.lock().unwrap_or_else(|poison| poison.into_inner())
    }
}

impl LogHandle {
    /// Reopens the log file at its original path, picking up a rotated
    /// file. No-op when logging to standard output.
    pub fn reopen(&self) {
        let Some(target) = &self.target else { return };
        match open_log(&target.path) {
            Ok(fresh) => {
                *target.lock() = fresh;
                tracing::info!(path = ?target.path, "log file reopened");
            }
            Err(e) => {
                tracing::error!(path = ?target.path, error = %e, "reopening log file failed");
            }
        }
    }
}

/// Initializes the global subscriber.
///
/// With `logfile = None` events go to standard output; otherwise to the
/// file (append, ANSI disabled), reopenable via the returned handle.
/// Safe to call more than once; later calls keep the first subscriber.
pub fn init(logfile: Option<&Path>) -> Result<LogHandle, MasterError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match logfile {
        None => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .try_init();
            Ok(LogHandle::default())
        }
        Some(path) => {
            let file = open_log(path).map_err(|source| MasterError::Io {
                context: "opening log file",
                source,
            })?;
            let target = Arc::new(ReopenableFile {
                path: path.to_path_buf(),
                file: Mutex::new(file),
            });
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .with_ansi(false)
                .with_writer(ReopenWriter(Arc::clone(&target)))
                .try_init();
            Ok(LogHandle {
                target: Some(target),
            })
        }
    }
}

/// Logs panics (message + backtrace) through the subscriber before the
/// default hook runs, so an unintended unwind is always diagnosed.
pub fn install_panic_hook() {
    let default = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let backtrace = std::backtrace::Backtrace::force_capture();
        tracing::error!(%info, "unexpected unwind");
        tracing::error!("{backtrace}");
        default(info);
    }));
}

fn open_log(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

#[derive(Clone)]
struct ReopenWriter(Arc<ReopenableFile>);

impl Write for ReopenWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.lock().flush()
    }
}

impl<'a> MakeWriter<'a> for ReopenWriter {
    type Writer = ReopenWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reopen_follows_rotation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("master.log");

        let target = Arc::new(ReopenableFile {
            path: path.clone(),
            file: Mutex::new(open_log(&path).unwrap()),
        });
        let handle = LogHandle {
            target: Some(Arc::clone(&target)),
        };
        let mut writer = ReopenWriter(Arc::clone(&target));

        writer.write_all(b"before\n").unwrap();
        let rotated = dir.path().join("master.log.1");
        std::fs::rename(&path, &rotated).unwrap();

        handle.reopen();
        writer.write_all(b"after\n").unwrap();

        assert_eq!(std::fs::read_to_string(&rotated).unwrap(), "before\n");
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "after\n");
    }

    #[test]
    fn stdout_handle_reopen_is_noop() {
        LogHandle::default().reopen();
    }
}
