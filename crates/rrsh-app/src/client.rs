//! Client role: run a command on a PTY and splice it to the server.
//!
//! The PTY master is both forwarded to the socket and echoed to the local
//! terminal; local keystrokes and remote bytes are both fed to the PTY.

use std::net::TcpStream;
use std::os::unix::io::RawFd;

use anyhow::{Context, Result};
use rrsh_mux::Multiplexer;
use rrsh_pty::{terminal_size, ExitStatus, PtyHandle, RawTerminal};

use crate::address::Address;
use crate::config::Config;
use crate::net;
use crate::signals::Signals;

/// Host connected to when the address omits one.
const DEFAULT_HOST: &str = "localhost";

/// Exit status reported for a command that could not be started at all.
const SPAWN_FAILED: ExitStatus = ExitStatus::Exited(127);

/// Connect to `address`, run `command` and return the exit code to use:
/// the command's own status, or `128 + signal` if it was killed.
pub fn run(
    address: &str,
    command: Vec<String>,
    config: &Config,
    signals: &Signals,
) -> Result<i32> {
    let targets = Address::parse(address)?.resolve(DEFAULT_HOST, config.port)?;
    let socket =
        net::connect(&targets).with_context(|| format!("failed to connect to {address:?}"))?;
    let peer = socket.peer_addr()?;
    log::info!("Connected to {peer}");

    let command = if command.is_empty() {
        config.command.clone()
    } else {
        command
    };

    let (result, status) = match PtyHandle::spawn(&command, terminal_size(libc::STDIN_FILENO)) {
        Ok(pty) => {
            let result = splice(&socket, pty.master_fd(), signals);
            // Reap the child whether or not the session succeeded.
            let status = pty.wait().context("failed to wait for the command")?;
            (result, status)
        }
        Err(e) => {
            // Reported the way a shell reports a command it cannot execute.
            log::error!("{e}");
            (Ok(()), SPAWN_FAILED)
        }
    };
    drop(socket);
    log::info!("Disconnected from {peer}");
    log::info!("Command {status}");

    if let Some(code) = signals.exit_code() {
        return Ok(code);
    }
    result?;
    Ok(status.code())
}

fn splice(socket: &TcpStream, master: RawFd, signals: &Signals) -> Result<()> {
    socket.set_nonblocking(true)?;
    let _terminal = RawTerminal::acquire().context("failed to prepare the local terminal")?;

    let mut mux = Multiplexer::new(master);
    mux.splice(master, socket)?;
    mux.splice(socket, master)?;
    mux.splice(master, libc::STDOUT_FILENO)?;
    mux.splice(libc::STDIN_FILENO, master)?;
    mux.interrupt_on(signals.wakeup())?;
    mux.run().context("session failed")
}
