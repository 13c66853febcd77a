//! # Detaching from the controlling terminal.
//!
//! Classic double fork: the original process stays in the foreground only
//! long enough to learn the master's pid over a ready pipe, then exits 0 —
//! so the invoking shell (or service manager) can tell a successful boot
//! from a startup failure. The intermediate process calls `setsid` and
//! exits; the grandchild becomes the master with stdio pointed at
//! `/dev/null`.
//!
//! The returned descriptor is the write end of the ready pipe; the master
//! reports its pid on it once the supervision loop is actually up (after
//! pidfile acquisition), not merely after the forks.
//!
//! The working directory is deliberately left alone: configuration paths
//! may be relative.

use std::fs::File;
use std::io::{self, Read};
use std::os::fd::{AsRawFd, OwnedFd};
use std::process;

use nix::unistd::{dup2, fork, pipe, setsid, ForkResult};

/// Forks the process into the background.
///
/// Returns, **in the grandchild only**, the write end of the ready pipe.
/// The foreground process blocks until a pid arrives on the pipe (exit 0)
/// or the pipe closes without one (exit 1, the master failed to start).
pub fn daemonize() -> io::Result<OwnedFd> {
    let (ready_rx, ready_tx) = pipe().map_err(io::Error::from)?;

    match unsafe { fork() }.map_err(io::Error::from)? {
        ForkResult::Parent { .. } => {
            drop(ready_tx);
            let mut report = String::new();
            let _ = File::from(ready_rx).read_to_string(&mut report);
            if report.trim().parse::<i32>().is_ok() {
                process::exit(0);
            }
            eprintln!("resqued: master did not start");
            process::exit(1);
        }
        ForkResult::Child => {}
    }
    drop(ready_rx);

    setsid().map_err(io::Error::from)?;

    match unsafe { fork() }.map_err(io::Error::from)? {
        ForkResult::Parent { .. } => process::exit(0),
        ForkResult::Child => {}
    }

    let devnull = File::options().read(true).write(true).open("/dev/null")?;
    for fd in 0..=2 {
        dup2(devnull.as_raw_fd(), fd).map_err(io::Error::from)?;
    }

    Ok(ready_tx)
}
