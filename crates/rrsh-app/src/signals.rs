//! Termination signals.
//!
//! The handlers record which signal arrived and then write a byte to a
//! self-pipe. The read end is never drained, so once a signal has arrived
//! it stays readable and every later wait on it returns at once. Sessions
//! watch it to unwind normally (restoring the terminal) before the process
//! exits with `128 + signal`.

use std::io;
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGTERM};
use signal_hook::flag;
use signal_hook::low_level::pipe;

/// Records the most recent termination signal.
#[derive(Debug)]
pub struct Signals {
    last: Arc<AtomicUsize>,
    wakeup: UnixStream,
}

impl Signals {
    /// Install handlers for `SIGINT`, `SIGTERM` and `SIGHUP`.
    pub fn install() -> io::Result<Self> {
        let last = Arc::new(AtomicUsize::new(0));
        let (wakeup, notify) = UnixStream::pair()?;
        wakeup.set_nonblocking(true)?;
        notify.set_nonblocking(true)?;

        for signal in [SIGINT, SIGTERM, SIGHUP] {
            // Actions run in registration order: the number is stored
            // before the wakeup byte is written.
            flag::register_usize(signal, Arc::clone(&last), signal as usize)?;
            pipe::register(signal, notify.try_clone()?)?;
        }
        Ok(Self { last, wakeup })
    }

    /// The signal received so far, if any.
    pub fn pending(&self) -> Option<i32> {
        match self.last.load(Ordering::SeqCst) {
            0 => None,
            signal => Some(signal as i32),
        }
    }

    /// Exit code for a process ended by the pending signal.
    pub fn exit_code(&self) -> Option<i32> {
        self.pending().map(|signal| 128 + signal)
    }

    /// Descriptor that becomes readable once a signal has arrived.
    pub fn wakeup(&self) -> &UnixStream {
        &self.wakeup
    }
}
