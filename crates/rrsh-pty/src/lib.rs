//! rrsh-pty: child processes on pseudoterminals and local terminal modes.
//!
//! # Architecture
//!
//! - [`PtyHandle`]: Spawns a command on a fresh PTY and exposes the
//!   non-blocking master descriptor; reaps the child into an [`ExitStatus`].
//! - [`RawTerminal`]: Guard that puts the local terminal into raw,
//!   non-blocking mode and restores it on drop.

pub mod pty;
pub mod raw_terminal;

pub use pty::{terminal_size, ExitStatus, PtyError, PtyHandle};
pub use raw_terminal::RawTerminal;
