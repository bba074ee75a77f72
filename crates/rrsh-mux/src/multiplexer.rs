use std::collections::{BTreeSet, HashMap};
use std::io;

use crate::endpoint::{Endpoint, EndpointId};
use crate::handle::{Handle, IntoHandle};
use crate::interest::Interest;
use crate::poller::Poller;
use crate::sys;

/// Maximum number of bytes read from a producer per readiness event.
pub const CHUNK_SIZE: usize = 4096;

/// Forwards bytes along a directed graph of descriptors.
///
/// Every endpoint is created on first mention by [`splice`](Self::splice)
/// and lives until the multiplexer is dropped. Descriptors are borrowed:
/// closing them stays the caller's job, on success and on error alike.
#[derive(Debug)]
pub struct Multiplexer {
    endpoints: Vec<Endpoint>,
    index: HashMap<Handle, EndpointId>,
    master: EndpointId,
    /// Watched for readability only; never read and never part of the graph.
    interrupts: Vec<Handle>,
    poller: Poller,
}

impl Multiplexer {
    /// Create a multiplexer whose lifetime is tied to `master`.
    ///
    /// [`run`](Self::run) returns once `master` has reached end of stream
    /// and no endpoint has buffered output left.
    pub fn new(master: impl IntoHandle) -> Self {
        let handle = master.into_handle();
        let mut index = HashMap::new();
        index.insert(handle, 0);
        Self {
            endpoints: vec![Endpoint::new(handle)],
            index,
            master: 0,
            interrupts: Vec::new(),
            poller: Poller::new(),
        }
    }

    /// Forward everything read from `producer` to `consumer`.
    ///
    /// Declaring the same edge twice has no further effect.
    pub fn splice(
        &mut self,
        producer: impl IntoHandle,
        consumer: impl IntoHandle,
    ) -> io::Result<()> {
        let (producer, consumer) = (producer.into_handle(), consumer.into_handle());
        if let Some(handle) = [producer, consumer]
            .into_iter()
            .find(|handle| self.interrupts.contains(handle))
        {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{handle} only interrupts runs"),
            ));
        }
        let producer = self.endpoint_for(producer);
        let consumer = self.endpoint_for(consumer);
        if self.endpoints[producer].add_sink(consumer) {
            log::trace!(
                "splice {} -> {}",
                self.endpoints[producer].handle,
                self.endpoints[consumer].handle
            );
        }
        self.update_registration(producer)
    }

    /// Make [`run`](Self::run) fail with `Interrupted` once `handle` is readable.
    ///
    /// The descriptor is never read, so whatever made it readable keeps
    /// interrupting later runs too. It cannot also be an endpoint.
    pub fn interrupt_on(&mut self, handle: impl IntoHandle) -> io::Result<()> {
        let handle = handle.into_handle();
        if self.interrupts.contains(&handle) {
            return Ok(());
        }
        if self.index.contains_key(&handle) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{handle} is already spliced"),
            ));
        }
        self.poller.register(handle, Interest::READ)?;
        self.interrupts.push(handle);
        Ok(())
    }

    /// Drive the event loop until quiescence.
    ///
    /// End of stream on a producer (a zero-byte read, or `EIO` from a
    /// pseudoterminal whose other side is gone) only stops forwarding from
    /// it. Any other I/O error aborts the run and is returned as is, as
    /// does readiness of a descriptor given to
    /// [`interrupt_on`](Self::interrupt_on).
    pub fn run(&mut self) -> io::Result<()> {
        let mut chunk = [0u8; CHUNK_SIZE];
        let mut dirty = BTreeSet::new();

        while !self.is_quiescent() {
            for (handle, ready) in self.poller.wait()? {
                if self.interrupts.contains(&handle) {
                    log::debug!("run interrupted by {handle}");
                    return Err(io::Error::new(
                        io::ErrorKind::Interrupted,
                        format!("interrupted by {handle}"),
                    ));
                }
                let Some(&id) = self.index.get(&handle) else {
                    continue;
                };
                if ready.contains(Interest::READ) {
                    self.forward_from(id, &mut chunk, &mut dirty)?;
                }
                if ready.contains(Interest::WRITE) {
                    self.flush_to(id, &mut dirty)?;
                }
            }

            for id in std::mem::take(&mut dirty) {
                self.update_registration(id)?;
            }
        }

        log::debug!("multiplexer quiescent");
        Ok(())
    }

    /// True once the master has stopped producing and nothing is buffered.
    pub fn is_quiescent(&self) -> bool {
        self.endpoints[self.master].sinks.is_empty()
            && self.endpoints.iter().all(|e| e.buffer.is_empty())
    }

    /// Handles currently receiving bytes read from `handle`.
    pub fn sinks(&self, handle: impl IntoHandle) -> Vec<Handle> {
        self.index
            .get(&handle.into_handle())
            .map(|&id| {
                self.endpoints[id]
                    .sinks
                    .iter()
                    .map(|&sink| self.endpoints[sink].handle)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of bytes waiting to be written to `handle`.
    pub fn buffered(&self, handle: impl IntoHandle) -> usize {
        self.index
            .get(&handle.into_handle())
            .map_or(0, |&id| self.endpoints[id].buffer.len())
    }

    /// Number of distinct descriptors in the graph.
    pub fn endpoint_count(&self) -> usize {
        self.endpoints.len()
    }

    fn endpoint_for(&mut self, handle: Handle) -> EndpointId {
        if let Some(&id) = self.index.get(&handle) {
            return id;
        }
        let id = self.endpoints.len();
        self.endpoints.push(Endpoint::new(handle));
        self.index.insert(handle, id);
        id
    }

    fn forward_from(
        &mut self,
        id: EndpointId,
        chunk: &mut [u8; CHUNK_SIZE],
        dirty: &mut BTreeSet<EndpointId>,
    ) -> io::Result<()> {
        let handle = self.endpoints[id].handle;
        if self.endpoints[id].sinks.is_empty() {
            return Ok(());
        }

        let n = match sys::read(handle, chunk) {
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
            Err(e) if e.raw_os_error() == Some(libc::EIO) => 0,
            Err(e) => {
                log::debug!("read from {handle} failed: {e}");
                return Err(e);
            }
        };

        if n == 0 {
            log::debug!("end of stream on {handle}");
            self.endpoints[id].sinks.clear();
            dirty.insert(id);
            return Ok(());
        }

        let sinks = std::mem::take(&mut self.endpoints[id].sinks);
        for &sink in &sinks {
            self.endpoints[sink].buffer.extend_from_slice(&chunk[..n]);
            dirty.insert(sink);
        }
        self.endpoints[id].sinks = sinks;
        Ok(())
    }

    fn flush_to(&mut self, id: EndpointId, dirty: &mut BTreeSet<EndpointId>) -> io::Result<()> {
        let endpoint = &mut self.endpoints[id];
        if endpoint.buffer.is_empty() {
            return Ok(());
        }

        match sys::write(endpoint.handle, &endpoint.buffer) {
            Ok(n) => {
                endpoint.consume(n);
                if endpoint.buffer.is_empty() {
                    dirty.insert(id);
                }
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(()),
            Err(e) => {
                log::debug!("write to {} failed: {e}", endpoint.handle);
                Err(e)
            }
        }
    }

    /// Bring the poller in line with what the endpoint currently wants.
    fn update_registration(&mut self, id: EndpointId) -> io::Result<()> {
        let endpoint = &self.endpoints[id];
        let wanted = endpoint.interest();
        match self.poller.interest(endpoint.handle) {
            None if wanted.is_empty() => {}
            None => {
                log::trace!("register {} for {wanted:?}", endpoint.handle);
                self.poller.register(endpoint.handle, wanted)?;
            }
            Some(_) if wanted.is_empty() => {
                log::trace!("unregister {}", endpoint.handle);
                self.poller.unregister(endpoint.handle);
            }
            Some(current) if current != wanted => {
                log::trace!("modify {} to {wanted:?}", endpoint.handle);
                self.poller.modify(endpoint.handle, wanted)?;
            }
            Some(_) => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::Shutdown;
    use std::os::unix::io::{AsRawFd, RawFd};
    use std::os::unix::net::UnixStream;
    use std::thread;
    use std::time::Duration;

    use portable_pty::{native_pty_system, PtySize};

    /// A socket pair whose first end is non-blocking, ready for the multiplexer.
    fn pair() -> (UnixStream, UnixStream) {
        let (ours, theirs) = UnixStream::pair().unwrap();
        ours.set_nonblocking(true).unwrap();
        (ours, theirs)
    }

    fn collect(mut peer: UnixStream) -> thread::JoinHandle<Vec<u8>> {
        thread::spawn(move || {
            let mut out = Vec::new();
            peer.read_to_end(&mut out).unwrap();
            out
        })
    }

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    /// Registered exactly when there is interest, with exactly that interest.
    fn assert_registered_as_wanted(mux: &Multiplexer) {
        for endpoint in &mux.endpoints {
            let wanted = endpoint.interest();
            let expected = (!wanted.is_empty()).then_some(wanted);
            assert_eq!(
                mux.poller.interest(endpoint.handle),
                expected,
                "registration of {} is stale",
                endpoint.handle
            );
        }
        let interested = mux
            .endpoints
            .iter()
            .filter(|e| !e.interest().is_empty())
            .count();
        assert_eq!(mux.poller.len(), interested + mux.interrupts.len());
    }

    /// Write into a non-blocking socket until it refuses even one byte.
    fn fill(mut stream: &UnixStream) {
        let block = vec![0u8; 65536];
        for len in [block.len(), 1] {
            loop {
                match stream.write(&block[..len]) {
                    Ok(_) => continue,
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                    Err(e) => panic!("fill failed: {e}"),
                }
            }
        }
    }

    #[test]
    fn test_single_consumer_receives_everything_in_order() {
        let (producer, mut producer_peer) = pair();
        let (consumer, consumer_peer) = pair();
        let expected = payload(50_000);

        let data = expected.clone();
        let writer = thread::spawn(move || {
            producer_peer.write_all(&data).unwrap();
        });
        let reader = collect(consumer_peer);

        let mut mux = Multiplexer::new(&producer);
        mux.splice(&producer, &consumer).unwrap();
        mux.run().unwrap();
        writer.join().unwrap();
        assert!(mux.is_quiescent());
        assert_registered_as_wanted(&mux);
        assert!(mux.poller.is_empty());

        drop(mux);
        drop(consumer);
        let received = reader.join().unwrap();
        assert_eq!(received.len(), expected.len());
        assert_eq!(received, expected);
    }

    #[test]
    fn test_fan_out_delivers_identical_copies() {
        let (producer, mut producer_peer) = pair();
        let (left, left_peer) = pair();
        let (right, right_peer) = pair();
        let expected = payload(20_000);

        let data = expected.clone();
        let writer = thread::spawn(move || {
            producer_peer.write_all(&data).unwrap();
        });
        let left_reader = collect(left_peer);
        let right_reader = collect(right_peer);

        let mut mux = Multiplexer::new(&producer);
        mux.splice(&producer, &left).unwrap();
        mux.splice(&producer, &right).unwrap();
        mux.run().unwrap();
        writer.join().unwrap();

        drop(mux);
        drop(left);
        drop(right);
        assert_eq!(left_reader.join().unwrap(), expected);
        assert_eq!(right_reader.join().unwrap(), expected);
    }

    #[test]
    fn test_fan_in_preserves_each_producers_order() {
        let (first, mut first_peer) = pair();
        let (second, mut second_peer) = pair();
        let (sink, sink_peer) = pair();

        // Both payloads fit in one chunk and are queued before the run
        // starts, so the first wait sees both producers readable.
        let first_data: Vec<u8> = (0..3000).map(|i| b'a' + (i % 26) as u8).collect();
        let second_data: Vec<u8> = (0..3000).map(|i| b'0' + (i % 10) as u8).collect();
        first_peer.write_all(&first_data).unwrap();
        second_peer.write_all(&second_data).unwrap();
        drop(first_peer);
        drop(second_peer);
        let reader = collect(sink_peer);

        let mut mux = Multiplexer::new(&first);
        mux.splice(&first, &sink).unwrap();
        mux.splice(&second, &sink).unwrap();
        mux.run().unwrap();

        drop(mux);
        drop(sink);
        let received = reader.join().unwrap();
        assert_eq!(received.len(), first_data.len() + second_data.len());

        let letters: Vec<u8> = received.iter().copied().filter(u8::is_ascii_lowercase).collect();
        let digits: Vec<u8> = received.iter().copied().filter(u8::is_ascii_digit).collect();
        assert_eq!(letters, first_data);
        assert_eq!(digits, second_data);
    }

    #[test]
    fn test_end_of_stream_clears_only_that_endpoint() {
        let (master, master_peer) = pair();
        let (other, _other_peer) = pair();
        let (sink, _sink_peer) = pair();
        drop(master_peer);

        let mut mux = Multiplexer::new(&master);
        mux.splice(&master, &sink).unwrap();
        mux.splice(&other, &sink).unwrap();
        mux.run().expect("end of stream is not an error");

        assert!(mux.sinks(&master).is_empty());
        assert_eq!(mux.sinks(&other), vec![(&sink).into_handle()]);
        assert_registered_as_wanted(&mux);
        assert_eq!(mux.poller.interest((&master).into_handle()), None);
        assert_eq!(mux.poller.interest((&other).into_handle()), Some(Interest::READ));
    }

    #[test]
    fn test_partial_writes_flush_completely() {
        let (producer, mut producer_peer) = pair();
        let (consumer, mut consumer_peer) = pair();
        let expected = payload(1 << 20);

        let data = expected.clone();
        let writer = thread::spawn(move || {
            producer_peer.write_all(&data).unwrap();
        });
        // A slow reader keeps the consumer's socket buffer full, so most
        // writes are accepted only in part.
        let reader = thread::spawn(move || {
            let mut out = Vec::new();
            let mut buf = [0u8; 1000];
            loop {
                match consumer_peer.read(&mut buf).unwrap() {
                    0 => return out,
                    n => out.extend_from_slice(&buf[..n]),
                }
                if out.len() % 100_000 < 1000 {
                    thread::sleep(Duration::from_millis(5));
                }
            }
        });

        let mut mux = Multiplexer::new(&producer);
        mux.splice(&producer, &consumer).unwrap();
        mux.run().unwrap();
        writer.join().unwrap();
        assert_eq!(mux.buffered(&consumer), 0);
        assert_registered_as_wanted(&mux);

        drop(mux);
        drop(consumer);
        let received = reader.join().unwrap();
        assert_eq!(received.len(), expected.len());
        assert!(received == expected, "bytes were reordered, lost or duplicated");
    }

    #[test]
    fn test_cycle_echoes_back_to_producer() {
        let (endpoint, mut peer) = pair();
        let client = thread::spawn(move || {
            peer.write_all(b"ping\n").unwrap();
            peer.shutdown(Shutdown::Write).unwrap();
            let mut out = Vec::new();
            peer.read_to_end(&mut out).unwrap();
            out
        });

        let mut mux = Multiplexer::new(&endpoint);
        mux.splice(&endpoint, &endpoint).unwrap();
        mux.run().unwrap();
        drop(mux);
        drop(endpoint);

        assert_eq!(client.join().unwrap(), b"ping\n");
    }

    #[test]
    fn test_splice_is_idempotent_and_creates_endpoints_once() {
        let (a, _a_peer) = pair();
        let (b, _b_peer) = pair();

        let mut mux = Multiplexer::new(&a);
        mux.splice(&a, &b).unwrap();
        mux.splice(&a, &b).unwrap();
        mux.splice(b.as_raw_fd(), &a).unwrap();

        assert_eq!(mux.endpoint_count(), 2);
        assert_eq!(mux.sinks(&a), vec![(&b).into_handle()]);
        assert_eq!(mux.sinks(&b), vec![(&a).into_handle()]);
        assert_registered_as_wanted(&mux);
    }

    #[test]
    fn test_run_without_edges_returns_immediately() {
        let (a, _peer) = pair();
        let mut mux = Multiplexer::new(&a);
        mux.run().unwrap();
        assert!(mux.is_quiescent());
    }

    #[test]
    fn test_write_error_aborts_run() {
        let (master, mut master_peer) = pair();
        let (sink, sink_peer) = pair();
        master_peer.write_all(b"data").unwrap();
        drop(master_peer);
        drop(sink_peer);

        let mut mux = Multiplexer::new(&master);
        mux.splice(&master, &sink).unwrap();
        let err = mux.run().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[test]
    fn test_pty_hangup_is_end_of_stream() {
        let pty = native_pty_system().openpty(PtySize::default()).unwrap();
        let master = pty.master.as_raw_fd().unwrap();
        // With no slave left open, reading the master fails with EIO.
        drop(pty.slave);
        let (sink, _sink_peer) = pair();

        let mut mux = Multiplexer::new(master);
        mux.splice(master, &sink).unwrap();
        mux.run().expect("EIO from a hung-up PTY is end of stream");

        assert!(mux.sinks(master).is_empty());
        assert!(mux.is_quiescent());
        assert_registered_as_wanted(&mux);
        drop(pty.master);
    }

    #[test]
    fn test_read_would_block_keeps_the_edge() {
        let (producer, _producer_peer) = pair();
        let (sink, _sink_peer) = pair();
        let mut mux = Multiplexer::new(&producer);
        mux.splice(&producer, &sink).unwrap();

        let mut chunk = [0u8; CHUNK_SIZE];
        let mut dirty = BTreeSet::new();
        mux.forward_from(mux.master, &mut chunk, &mut dirty)
            .expect("WouldBlock on read is not an error");

        assert_eq!(mux.sinks(&producer), vec![(&sink).into_handle()]);
        assert_eq!(mux.buffered(&sink), 0);
        assert!(dirty.is_empty());
    }

    #[test]
    fn test_write_would_block_keeps_the_buffer() {
        let (producer, _producer_peer) = pair();
        let (sink, _sink_peer) = pair();
        fill(&sink);
        let mut mux = Multiplexer::new(&producer);
        mux.splice(&producer, &sink).unwrap();

        let id = mux.index[&(&sink).into_handle()];
        mux.endpoints[id].buffer.extend_from_slice(b"pending");
        let mut dirty = BTreeSet::new();
        mux.flush_to(id, &mut dirty)
            .expect("WouldBlock on write is not an error");

        assert_eq!(mux.buffered(&sink), b"pending".len());
        assert!(dirty.is_empty());
    }

    #[test]
    fn test_closed_descriptor_fails_with_ebadf() {
        // Far above any descriptor a test process has open.
        const CLOSED: RawFd = 999_999;
        let (sink, _sink_peer) = pair();

        let mut mux = Multiplexer::new(CLOSED);
        mux.splice(CLOSED, &sink).unwrap();
        let err = mux.run().unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::EBADF));
    }

    #[test]
    fn test_interrupt_descriptor_ends_run() {
        let (master, _master_peer) = pair();
        let (sink, _sink_peer) = pair();
        let (interrupt, mut trigger) = pair();

        let mut mux = Multiplexer::new(&master);
        mux.splice(&master, &sink).unwrap();
        mux.interrupt_on(&interrupt).unwrap();
        mux.interrupt_on(&interrupt).unwrap();
        assert_registered_as_wanted(&mux);

        trigger.write_all(b"!").unwrap();
        let err = mux.run().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Interrupted);
        // Never read, so the next run is interrupted as well.
        assert_eq!(mux.run().unwrap_err().kind(), io::ErrorKind::Interrupted);
    }

    #[test]
    fn test_interrupt_descriptor_is_not_an_endpoint() {
        let (master, _master_peer) = pair();
        let (interrupt, _trigger) = pair();

        let mut mux = Multiplexer::new(&master);
        let err = mux.interrupt_on(&master).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);

        mux.interrupt_on(&interrupt).unwrap();
        let err = mux.splice(&master, &interrupt).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        assert_eq!(mux.endpoint_count(), 1);
    }
}
