//! Scoped raw mode for the local terminal.
//!
//! [`RawTerminal`] switches the input side into raw mode when it is a
//! terminal and marks both sides non-blocking. Everything it changed is put
//! back when the guard is dropped, including during a panic unwind.

use std::io;
use std::mem::MaybeUninit;
use std::os::unix::io::RawFd;

/// Guard holding the local terminal in raw, non-blocking mode.
///
/// # Example
///
/// ```ignore
/// let _terminal = RawTerminal::acquire()?;
/// // stdin/stdout are raw and non-blocking until `_terminal` drops.
/// ```
pub struct RawTerminal {
    input: RawFd,
    output: RawFd,
    /// Attributes of `input` before raw mode; `None` if it is not a terminal.
    saved_termios: Option<libc::termios>,
    input_flags: libc::c_int,
    output_flags: libc::c_int,
}

impl RawTerminal {
    /// Take over standard input and standard output.
    pub fn acquire() -> io::Result<Self> {
        Self::with_fds(libc::STDIN_FILENO, libc::STDOUT_FILENO)
    }

    /// Take over an arbitrary input/output descriptor pair.
    ///
    /// A non-terminal input (a pipe, a file) skips raw mode but still gets
    /// the non-blocking flag.
    pub fn with_fds(input: RawFd, output: RawFd) -> io::Result<Self> {
        let saved_termios = get_termios(input);
        let input_flags = get_flags(input)?;
        let output_flags = get_flags(output)?;

        // From here on the guard exists, so a failure below still restores
        // whatever was already changed.
        let guard = Self {
            input,
            output,
            saved_termios,
            input_flags,
            output_flags,
        };

        if let Some(original) = guard.saved_termios {
            let mut raw = original;
            // SAFETY: `raw` is a valid termios copied from tcgetattr.
            unsafe { libc::cfmakeraw(&mut raw) };
            // SAFETY: `raw` is a valid termios for the duration of the call.
            if unsafe { libc::tcsetattr(input, libc::TCSAFLUSH, &raw) } != 0 {
                return Err(io::Error::last_os_error());
            }
        } else {
            log::debug!("fd {input} is not a terminal; leaving line discipline alone");
        }

        set_flags(input, input_flags | libc::O_NONBLOCK)?;
        set_flags(output, output_flags | libc::O_NONBLOCK)?;

        Ok(guard)
    }

    /// Whether raw mode was applied to the input.
    pub fn is_raw(&self) -> bool {
        self.saved_termios.is_some()
    }
}

impl Drop for RawTerminal {
    fn drop(&mut self) {
        if let Err(e) = set_flags(self.output, self.output_flags) {
            log::warn!("failed to restore flags on fd {}: {e}", self.output);
        }
        if let Err(e) = set_flags(self.input, self.input_flags) {
            log::warn!("failed to restore flags on fd {}: {e}", self.input);
        }
        if let Some(original) = &self.saved_termios {
            // SAFETY: `original` came from tcgetattr on the same descriptor.
            if unsafe { libc::tcsetattr(self.input, libc::TCSAFLUSH, original) } != 0 {
                log::warn!(
                    "failed to restore terminal attributes: {}",
                    io::Error::last_os_error()
                );
            }
        }
    }
}

fn get_termios(fd: RawFd) -> Option<libc::termios> {
    // SAFETY: isatty only inspects the descriptor.
    if unsafe { libc::isatty(fd) } != 1 {
        return None;
    }
    let mut termios = MaybeUninit::<libc::termios>::uninit();
    // SAFETY: tcgetattr fully initializes `termios` when it returns 0.
    if unsafe { libc::tcgetattr(fd, termios.as_mut_ptr()) } != 0 {
        return None;
    }
    // SAFETY: initialized by the successful tcgetattr above.
    Some(unsafe { termios.assume_init() })
}

fn get_flags(fd: RawFd) -> io::Result<libc::c_int> {
    // SAFETY: F_GETFL takes no argument and only reads descriptor state.
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(flags)
}

fn set_flags(fd: RawFd, flags: libc::c_int) -> io::Result<()> {
    // SAFETY: F_SETFL with an integer flag set.
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
