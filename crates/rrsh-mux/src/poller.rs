use std::collections::HashMap;
use std::io;

use crate::handle::Handle;
use crate::interest::Interest;

/// Registration table over `poll(2)`.
///
/// Keeps one `pollfd` per registered handle, in registration order, so
/// readiness is reported in a stable order across waits.
#[derive(Debug, Default)]
pub struct Poller {
    fds: Vec<libc::pollfd>,
    slots: HashMap<Handle, usize>,
}

impl Poller {
    /// Create an empty poller.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of registered handles.
    pub fn len(&self) -> usize {
        self.fds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fds.is_empty()
    }

    /// Current interest of a handle, or `None` if it is not registered.
    pub fn interest(&self, handle: Handle) -> Option<Interest> {
        self.slots
            .get(&handle)
            .map(|&slot| interest_of(&self.fds[slot]))
    }

    /// Start watching `handle`.
    ///
    /// Fails with `AlreadyExists` if the handle is already registered.
    pub fn register(&mut self, handle: Handle, interest: Interest) -> io::Result<()> {
        if self.slots.contains_key(&handle) {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{handle} is already registered"),
            ));
        }
        self.slots.insert(handle, self.fds.len());
        self.fds.push(libc::pollfd {
            fd: handle.raw(),
            events: interest.to_poll_events(),
            revents: 0,
        });
        Ok(())
    }

    /// Change the interest of a registered handle.
    pub fn modify(&mut self, handle: Handle, interest: Interest) -> io::Result<()> {
        match self.slots.get(&handle) {
            Some(&slot) => {
                self.fds[slot].events = interest.to_poll_events();
                Ok(())
            }
            None => Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{handle} is not registered"),
            )),
        }
    }

    /// Stop watching `handle`. Unknown handles are ignored.
    pub fn unregister(&mut self, handle: Handle) {
        if let Some(slot) = self.slots.remove(&handle) {
            self.fds.remove(slot);
            for index in self.slots.values_mut() {
                if *index > slot {
                    *index -= 1;
                }
            }
        }
    }

    /// Block until at least one registered handle is ready.
    ///
    /// Returns each ready handle together with the directions it is ready
    /// in, restricted to what it was registered for. An interrupted wait is
    /// returned as an `Interrupted` error rather than retried.
    pub fn wait(&mut self) -> io::Result<Vec<(Handle, Interest)>> {
        for pfd in &mut self.fds {
            pfd.revents = 0;
        }

        // SAFETY: `fds` is a live, exclusively borrowed slice of pollfd.
        let ready = unsafe {
            libc::poll(
                self.fds.as_mut_ptr(),
                self.fds.len() as libc::nfds_t,
                -1,
            )
        };
        if ready < 0 {
            return Err(io::Error::last_os_error());
        }

        let mut events = Vec::with_capacity(ready as usize);
        for pfd in &self.fds {
            if pfd.revents == 0 {
                continue;
            }
            let handle = Handle::from_raw(pfd.fd);
            if pfd.revents & libc::POLLNVAL != 0 {
                log::error!("{handle} was closed while registered");
                return Err(io::Error::from_raw_os_error(libc::EBADF));
            }
            let ready = Interest::from_poll_revents(pfd.revents) & interest_of(pfd);
            if !ready.is_empty() {
                events.push((handle, ready));
            }
        }
        Ok(events)
    }
}

fn interest_of(pfd: &libc::pollfd) -> Interest {
    let mut interest = Interest::empty();
    if pfd.events & libc::POLLIN != 0 {
        interest |= Interest::READ;
    }
    if pfd.events & libc::POLLOUT != 0 {
        interest |= Interest::WRITE;
    }
    interest
}
