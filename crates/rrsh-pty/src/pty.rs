use std::ffi::CStr;
use std::fmt;
use std::io;
use std::os::unix::io::RawFd;

use portable_pty::{native_pty_system, Child, ChildKiller, CommandBuilder, MasterPty, PtySize};

/// Errors from PTY operations.
#[derive(Debug)]
pub enum PtyError {
    SpawnFailed(String),
    IoError(io::Error),
}

impl fmt::Display for PtyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PtyError::SpawnFailed(msg) => write!(f, "PTY spawn failed: {msg}"),
            PtyError::IoError(err) => write!(f, "PTY I/O error: {err}"),
        }
    }
}

impl std::error::Error for PtyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PtyError::IoError(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for PtyError {
    fn from(err: io::Error) -> Self {
        PtyError::IoError(err)
    }
}

/// How a child process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// Normal exit with the given status code.
    Exited(i32),
    /// Killed by the given signal number.
    Signaled(i32),
}

impl ExitStatus {
    /// Decode a raw `waitpid` status.
    pub fn from_wait_status(status: libc::c_int) -> Self {
        if libc::WIFSIGNALED(status) {
            ExitStatus::Signaled(libc::WTERMSIG(status))
        } else {
            ExitStatus::Exited(libc::WEXITSTATUS(status))
        }
    }

    /// Shell-style exit code: the status itself, or `128 + signal`.
    pub fn code(self) -> i32 {
        match self {
            ExitStatus::Exited(code) => code,
            ExitStatus::Signaled(signal) => 128 + signal,
        }
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            ExitStatus::Exited(code) => write!(f, "exited with status {code}"),
            ExitStatus::Signaled(signal) => {
                write!(f, "terminated by signal {signal}")?;
                // SAFETY: strsignal returns a pointer to a static or
                // thread-local NUL-terminated string, or NULL.
                let name = unsafe { libc::strsignal(signal) };
                if !name.is_null() {
                    // SAFETY: checked non-null above; valid until the next call.
                    let name = unsafe { CStr::from_ptr(name) };
                    write!(f, " ({})", name.to_string_lossy())?;
                }
                Ok(())
            }
        }
    }
}

/// A child process attached to the slave side of a fresh pseudoterminal.
///
/// The parent keeps only the master side, in non-blocking mode, for use
/// with the multiplexer.
pub struct PtyHandle {
    master: Box<dyn MasterPty + Send>,
    child: Box<dyn Child + Send + Sync>,
    master_fd: RawFd,
    pid: libc::pid_t,
}

impl PtyHandle {
    /// Spawn `command` on a new PTY of the given size.
    ///
    /// An empty command runs the user's login shell. The child inherits the
    /// environment and working directory of the current process.
    pub fn spawn(command: &[String], size: PtySize) -> Result<Self, PtyError> {
        let pty_system = native_pty_system();

        let pair = pty_system
            .openpty(size)
            .map_err(|e| PtyError::SpawnFailed(format!("failed to open PTY: {e}")))?;

        let mut cmd = match command.split_first() {
            Some((program, args)) => {
                let mut cmd = CommandBuilder::new(program);
                cmd.args(args);
                cmd
            }
            None => CommandBuilder::new_default_prog(),
        };
        if let Ok(cwd) = std::env::current_dir() {
            cmd.cwd(cwd);
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| PtyError::SpawnFailed(format!("failed to spawn command: {e}")))?;

        // Only the child may hold the slave, so the master reports EIO once
        // the child and its descendants are gone.
        drop(pair.slave);

        let (pid, master_fd) = match attach(pair.master.as_ref(), child.as_ref()) {
            Ok(attached) => attached,
            Err(e) => {
                abandon(child);
                return Err(e);
            }
        };
        log::debug!("spawned pid {pid} on PTY master fd {master_fd}");

        Ok(Self {
            master: pair.master,
            child,
            master_fd,
            pid,
        })
    }

    /// The non-blocking master descriptor. Valid until [`wait`](Self::wait).
    pub fn master_fd(&self) -> RawFd {
        self.master_fd
    }

    pub fn process_id(&self) -> u32 {
        self.pid as u32
    }

    /// Close the master and block until the child terminates.
    pub fn wait(self) -> Result<ExitStatus, PtyError> {
        let PtyHandle {
            master, child, pid, ..
        } = self;
        drop(master);

        let mut status: libc::c_int = 0;
        loop {
            // SAFETY: `status` is a valid out-pointer for the duration of the call.
            let reaped = unsafe { libc::waitpid(pid, &mut status, 0) };
            if reaped == pid {
                break;
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err.into());
            }
        }
        drop(child);

        let exit = ExitStatus::from_wait_status(status);
        log::debug!("pid {pid} {exit}");
        Ok(exit)
    }
}

/// Child pid and non-blocking master descriptor of a fresh spawn.
fn attach(
    master: &(dyn MasterPty + Send),
    child: &(dyn Child + Send + Sync),
) -> Result<(libc::pid_t, RawFd), PtyError> {
    let pid = child
        .process_id()
        .ok_or_else(|| PtyError::SpawnFailed("child has no process id".to_string()))?
        as libc::pid_t;
    let master_fd = master
        .as_raw_fd()
        .ok_or_else(|| PtyError::SpawnFailed("PTY master has no descriptor".to_string()))?;
    set_nonblocking(master_fd)?;
    Ok((pid, master_fd))
}

/// Kill and reap a child that will never be handed out.
fn abandon(mut child: Box<dyn Child + Send + Sync>) {
    if let Err(e) = child.kill() {
        log::warn!("failed to kill abandoned child: {e}");
    }
    if let Err(e) = child.wait() {
        log::warn!("failed to reap abandoned child: {e}");
    }
}

/// Window size of the terminal on `fd`, or 80x24 if it is not a terminal.
pub fn terminal_size(fd: RawFd) -> PtySize {
    // SAFETY: winsize is plain old data; ioctl fills it on success.
    let mut ws: libc::winsize = unsafe { std::mem::zeroed() };
    // SAFETY: TIOCGWINSZ writes a winsize through the provided pointer.
    let ok = unsafe { libc::ioctl(fd, libc::TIOCGWINSZ, &mut ws) } == 0;
    if ok && ws.ws_row > 0 && ws.ws_col > 0 {
        PtySize {
            rows: ws.ws_row,
            cols: ws.ws_col,
            pixel_width: ws.ws_xpixel,
            pixel_height: ws.ws_ypixel,
        }
    } else {
        PtySize::default()
    }
}

fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    // SAFETY: fcntl on a descriptor we hold open.
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: as above.
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
