//! Server role: accept a connection and splice it to the local terminal.

use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};

use anyhow::{Context, Result};
use rrsh_mux::{Interest, IntoHandle, Multiplexer, Poller};
use rrsh_pty::RawTerminal;

use crate::address::Address;
use crate::config::Config;
use crate::net;
use crate::signals::Signals;

/// Host bound when the address omits one.
const WILDCARD_HOST: &str = "::";

/// Listen on `address` and serve one connection, or every connection in
/// turn when `keep_open` is set. Returns the process exit code.
pub fn run(address: &str, keep_open: bool, config: &Config, signals: &Signals) -> Result<i32> {
    let address = Address::parse(address)?;
    let target = address.resolve(WILDCARD_HOST, config.port)?[0];
    let listener =
        net::listen(target).with_context(|| format!("failed to listen on {target}"))?;
    listener.set_nonblocking(true)?;
    log::info!("Listening on {}", listener.local_addr()?);

    let mut poller = Poller::new();
    poller.register((&listener).into_handle(), Interest::READ)?;
    poller.register(signals.wakeup().into_handle(), Interest::READ)?;

    loop {
        let Some((socket, peer)) = accept(&listener, &mut poller, signals)? else {
            break;
        };
        log::info!("Connection from {peer}");
        let result = serve(&socket, signals);
        drop(socket);
        log::info!("Disconnected from {peer}");

        if let Some(code) = signals.exit_code() {
            return Ok(code);
        }
        match result {
            Ok(()) => {}
            Err(e) if keep_open => log::warn!("Session with {peer} failed: {e:#}"),
            Err(e) => return Err(e),
        }
        if !keep_open {
            return Ok(0);
        }
    }

    Ok(signals.exit_code().unwrap_or(0))
}

/// Splice one connection to the local terminal until either side is done.
fn serve(socket: &TcpStream, signals: &Signals) -> Result<()> {
    socket.set_nonblocking(true)?;
    let _terminal = RawTerminal::acquire().context("failed to prepare the local terminal")?;

    let mut mux = Multiplexer::new(socket);
    mux.splice(socket, libc::STDOUT_FILENO)?;
    mux.splice(libc::STDIN_FILENO, socket)?;
    mux.interrupt_on(signals.wakeup())?;
    mux.run().context("connection failed")
}

/// Wait for the next connection. `None` means a termination signal arrived.
///
/// `poller` watches the listener and the signal wakeup descriptor.
fn accept(
    listener: &TcpListener,
    poller: &mut Poller,
    signals: &Signals,
) -> Result<Option<(TcpStream, SocketAddr)>> {
    loop {
        match listener.accept() {
            Ok(connection) => return Ok(Some(connection)),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => return Err(e).context("failed to accept a connection"),
        }
        match poller.wait() {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e).context("failed to wait for a connection"),
        }
        if signals.pending().is_some() {
            return Ok(None);
        }
    }
}
