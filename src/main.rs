//! The `resqued` binary: parse the command line, optionally daemonize,
//! initialize logging, and run the master on a single-threaded runtime.
//!
//! Exit codes: 0 on normal shutdown (and for `--help`/`--version`); 1 on
//! usage errors and startup failures (pidfile contention, missing config).
//!
//! An inherited status-pipe descriptor, if any, is announced by the
//! supervisor through `RESQUED_STATUS_FD`.

mod cli;

use std::os::fd::OwnedFd;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;

use resqued::{
    daemonize, init_logging, install_panic_hook, Config, LogWriter, Master, SignalQueue,
    StatusPipe, Subscribe,
};

use cli::Cli;

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    // Fork away from the terminal before the runtime exists; the
    // foreground process lives on inside daemonize() until the master
    // reports its pid on the returned pipe.
    let ready_pipe: Option<OwnedFd> = if cli.daemonize {
        match daemonize() {
            Ok(fd) => Some(fd),
            Err(e) => {
                eprintln!("resqued: daemonize failed: {e}");
                return ExitCode::FAILURE;
            }
        }
    } else {
        None
    };

    let log = match init_logging(cli.logfile.as_deref()) {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("resqued: {e}");
            return ExitCode::FAILURE;
        }
    };
    install_panic_hook();

    let cfg = Config {
        config_paths: cli.config_paths,
        pidfile: cli.pidfile,
        status_fd: status_fd_from_env(),
        ..Config::default()
    };

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!(error = %e, "building runtime failed");
            return ExitCode::FAILURE;
        }
    };

    runtime.block_on(async move {
        let signals = match SignalQueue::os() {
            Ok(queue) => queue,
            Err(e) => {
                tracing::error!(error = %e, "installing signal handlers failed");
                return ExitCode::FAILURE;
            }
        };

        let mut subscribers: Vec<Arc<dyn Subscribe>> = vec![Arc::new(LogWriter)];
        if let Some(fd) = cfg.status_fd {
            // Safety: the supervisor handed us this descriptor for
            // exclusive use; nothing else in the process touches it.
            match unsafe { StatusPipe::from_raw_fd(fd) } {
                Ok(pipe) => subscribers.push(Arc::new(pipe)),
                Err(e) => {
                    tracing::warn!(fd, error = %e, "status pipe unusable; reports disabled");
                }
            }
        }

        let master = Master::new(cfg, signals, subscribers).with_log_handle(log);
        match master.run(ready_pipe).await {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                tracing::error!(error = %e, label = e.as_label(), "master failed");
                ExitCode::FAILURE
            }
        }
    })
}

fn status_fd_from_env() -> Option<i32> {
    let value = std::env::var("RESQUED_STATUS_FD").ok()?;
    match value.parse() {
        Ok(fd) => Some(fd),
        Err(_) => {
            eprintln!("resqued: ignoring unparsable RESQUED_STATUS_FD={value}");
            None
        }
    }
}
