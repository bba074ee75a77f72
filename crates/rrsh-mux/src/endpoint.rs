use crate::handle::Handle;
use crate::interest::Interest;

/// Index of an endpoint in its multiplexer's arena.
pub(crate) type EndpointId = usize;

/// One descriptor in the splice graph.
#[derive(Debug)]
pub(crate) struct Endpoint {
    pub(crate) handle: Handle,
    /// Endpoints receiving every byte read from this one, in declaration order.
    pub(crate) sinks: Vec<EndpointId>,
    /// Bytes waiting to be written to this endpoint, oldest first.
    pub(crate) buffer: Vec<u8>,
}

impl Endpoint {
    pub(crate) fn new(handle: Handle) -> Self {
        Self {
            handle,
            sinks: Vec::new(),
            buffer: Vec::new(),
        }
    }

    pub(crate) fn add_sink(&mut self, sink: EndpointId) -> bool {
        if self.sinks.contains(&sink) {
            return false;
        }
        self.sinks.push(sink);
        true
    }

    /// Drop the first `n` buffered bytes after a write accepted them.
    pub(crate) fn consume(&mut self, n: usize) {
        self.buffer.drain(..n);
    }

    pub(crate) fn interest(&self) -> Interest {
        let mut interest = Interest::empty();
        if !self.sinks.is_empty() {
            interest |= Interest::READ;
        }
        if !self.buffer.is_empty() {
            interest |= Interest::WRITE;
        }
        interest
    }
}
