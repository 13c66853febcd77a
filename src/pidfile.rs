//! # Scoped pidfile guard.
//!
//! [`Pidfile::acquire`] claims an exclusive pidfile for this process and
//! returns a guard that removes the file on drop — on *every* exit path,
//! including an unexpected unwind of the supervision loop.
//!
//! A pidfile naming a live process fails acquisition; a stale file (dead
//! pid, or unparsable contents) is silently replaced. Removal on drop is
//! conditional on the file still naming this process, so a successor that
//! already took over is never clobbered.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use nix::sys::signal::kill;
use nix::unistd::{getpid, Pid};

use crate::error::MasterError;

/// Guard for an acquired pidfile.
#[derive(Debug)]
pub struct Pidfile {
    path: PathBuf,
    pid: Pid,
}

impl Pidfile {
    /// Claims `path` for the current process.
    ///
    /// Fails with [`MasterError::PidfileHeld`] when the file names a
    /// process that is still alive (probed with `kill(pid, 0)`).
    pub fn acquire(path: &Path) -> Result<Self, MasterError> {
        let ours = getpid();

        match fs::read_to_string(path) {
            Ok(contents) => {
                if let Ok(pid) = contents.trim().parse::<i32>() {
                    let pid = Pid::from_raw(pid);
                    // EPERM still means the pid is live, just not ours to
                    // signal.
                    let alive = matches!(kill(pid, None), Ok(()) | Err(nix::errno::Errno::EPERM));
                    if pid != ours && alive {
                        return Err(MasterError::PidfileHeld {
                            path: path.to_path_buf(),
                            pid: pid.as_raw(),
                        });
                    }
                }
                tracing::warn!(?path, "replacing stale pidfile");
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(source) => {
                return Err(MasterError::Pidfile {
                    path: path.to_path_buf(),
                    source,
                })
            }
        }

        fs::write(path, ours.to_string()).map_err(|source| MasterError::Pidfile {
            path: path.to_path_buf(),
            source,
        })?;

        Ok(Self {
            path: path.to_path_buf(),
            pid: ours,
        })
    }

    /// The path this guard owns.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for Pidfile {
    fn drop(&mut self) {
        // Only remove the file if it still names us.
        match fs::read_to_string(&self.path) {
            Ok(contents) if contents.trim() == self.pid.to_string() => {
                if let Err(e) = fs::remove_file(&self.path) {
                    tracing::warn!(path = ?self.path, error = %e, "removing pidfile failed");
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_writes_and_drop_removes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("master.pid");

        {
            let guard = Pidfile::acquire(&path).unwrap();
            let written = fs::read_to_string(guard.path()).unwrap();
            assert_eq!(written, getpid().to_string());
        }
        assert!(!path.exists());
    }

    #[test]
    fn live_holder_blocks_acquisition() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("master.pid");

        let mut child = std::process::Command::new("sleep").arg("30").spawn().unwrap();
        fs::write(&path, child.id().to_string()).unwrap();

        let result = Pidfile::acquire(&path);
        child.kill().unwrap();
        child.wait().unwrap();

        assert!(matches!(result, Err(MasterError::PidfileHeld { .. })));
    }

    #[test]
    fn stale_pidfile_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("master.pid");

        // A child that has been spawned and fully waited on is a pid that
        // was definitely live and is now definitely dead.
        let child = std::process::Command::new("true").spawn().unwrap();
        let dead_pid = child.id();
        let mut child = child;
        child.wait().unwrap();

        fs::write(&path, dead_pid.to_string()).unwrap();
        let guard = Pidfile::acquire(&path).unwrap();
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            getpid().to_string()
        );
        drop(guard);
    }

    #[test]
    fn garbage_contents_are_treated_as_stale() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("master.pid");
        fs::write(&path, "not-a-pid\n").unwrap();
        assert!(Pidfile::acquire(&path).is_ok());
    }

    #[test]
    fn drop_leaves_foreign_pidfile_alone() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("master.pid");

        let guard = Pidfile::acquire(&path).unwrap();
        // A successor overwrote the file while we were exiting.
        fs::write(&path, "424242").unwrap();
        drop(guard);
        assert!(path.exists());
    }
}
