//! Command-line interface for the `resqued` binary.

use std::path::PathBuf;

use clap::{ArgAction, Parser};

/// Master process supervising background job listeners and their workers.
#[derive(Parser, Debug)]
#[command(
    name = "resqued",
    version,
    disable_version_flag = true,
    about = "Master process supervising a pool of background job workers"
)]
pub struct Cli {
    /// Write the master pid to PATH; released on exit.
    #[arg(short = 'p', long = "pidfile", value_name = "PATH")]
    pub pidfile: Option<PathBuf>,

    /// Redirect log output to PATH instead of standard output.
    #[arg(short = 'l', long = "logfile", value_name = "PATH")]
    pub logfile: Option<PathBuf>,

    /// Detach from the controlling terminal.
    #[arg(short = 'D', long = "daemonize")]
    pub daemonize: bool,

    /// Print version and exit.
    #[arg(short = 'v', long = "version", action = ArgAction::Version)]
    version: Option<bool>,

    /// Configuration files evaluated by each listener, in order.
    #[arg(value_name = "config-file", required = true)]
    pub config_paths: Vec<PathBuf>,
}
