//! rrsh: reverse remote shell.
//!
//! `rrsh server` listens and splices the first connection to the local
//! terminal. `rrsh client` connects back, runs a command on a PTY, and
//! splices that PTY to both the connection and its own terminal.

mod address;
mod cli;
mod client;
mod config;
mod net;
mod server;
mod signals;

use std::io::Write;
use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;

use cli::{Cli, Mode};
use config::Config;
use signals::Signals;

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("rrsh: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    init_logging(cli.verbose || config.verbose);

    match run(cli.mode, &config) {
        Ok(code) => ExitCode::from(u8::try_from(code).unwrap_or(1)),
        Err(e) => {
            eprintln!("rrsh: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(mode: Mode, config: &Config) -> Result<i32> {
    let signals = Signals::install()?;
    match mode {
        Mode::Server { address, keep_open } => {
            server::run(&address, keep_open || config.keep_open, config, &signals)
        }
        Mode::Client { address, command } => client::run(&address, command, config, &signals),
    }
}

/// Diagnostics go to stderr only; stdout carries spliced data.
fn init_logging(verbose: bool) {
    let default_filter = if verbose { "info" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .target(env_logger::Target::Stderr)
        .format(|buf, record| writeln!(buf, "rrsh: {}", record.args()))
        .init();
}
