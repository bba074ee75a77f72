use bitflags::bitflags;

bitflags! {
    /// Readiness a descriptor is registered for, or is reported to have.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct Interest: u8 {
        const READ  = 0b01;
        const WRITE = 0b10;
    }
}

impl Interest {
    /// Event bits to request from `poll(2)`.
    pub(crate) fn to_poll_events(self) -> libc::c_short {
        let mut events = 0;
        if self.contains(Interest::READ) {
            events |= libc::POLLIN;
        }
        if self.contains(Interest::WRITE) {
            events |= libc::POLLOUT;
        }
        events
    }

    /// Readiness reported by `poll(2)`.
    ///
    /// Hang-up and error conditions count as ready in both directions: the
    /// following read or write is what reports the actual state.
    pub(crate) fn from_poll_revents(revents: libc::c_short) -> Self {
        let mut ready = Interest::empty();
        if revents & (libc::POLLIN | libc::POLLHUP | libc::POLLERR) != 0 {
            ready |= Interest::READ;
        }
        if revents & (libc::POLLOUT | libc::POLLHUP | libc::POLLERR) != 0 {
            ready |= Interest::WRITE;
        }
        ready
    }
}
