use std::fmt;
use std::os::unix::io::{AsRawFd, RawFd};

/// A file descriptor as seen by the multiplexer.
///
/// The multiplexer never owns or closes the descriptor behind a `Handle`;
/// whoever created the underlying object stays responsible for it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(RawFd);

impl Handle {
    /// Wrap a raw descriptor.
    pub const fn from_raw(fd: RawFd) -> Self {
        Self(fd)
    }

    /// The raw descriptor number.
    pub const fn raw(self) -> RawFd {
        self.0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fd {}", self.0)
    }
}

/// Anything that can name a descriptor: a bare descriptor number, or a
/// borrowed object that exposes one.
pub trait IntoHandle {
    fn into_handle(self) -> Handle;
}

impl IntoHandle for Handle {
    fn into_handle(self) -> Handle {
        self
    }
}

impl IntoHandle for RawFd {
    fn into_handle(self) -> Handle {
        Handle(self)
    }
}

impl<T: AsRawFd + ?Sized> IntoHandle for &T {
    fn into_handle(self) -> Handle {
        Handle(self.as_raw_fd())
    }
}
