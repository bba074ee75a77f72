//! rrsh-mux: readiness-driven byte forwarding between file descriptors.
//!
//! A [`Multiplexer`] owns a table of endpoints, one per descriptor, and
//! forwards every byte read from a producer to each of its sinks. Edges are
//! declared with [`Multiplexer::splice`]; [`Multiplexer::run`] drives a
//! single-threaded `poll(2)` loop until the master endpoint has stopped
//! producing and all buffered output has been flushed.
//!
//! # Architecture
//!
//! - [`Handle`]: Normalized descriptor used as the endpoint key.
//! - [`Interest`]: Read/write interest, derived from endpoint state.
//! - [`Poller`]: Registration table over `poll(2)`.
//! - [`Multiplexer`]: The splice graph and its event loop.

mod endpoint;
pub mod handle;
pub mod interest;
pub mod multiplexer;
pub mod poller;
mod sys;

pub use handle::{Handle, IntoHandle};
pub use interest::Interest;
pub use multiplexer::{Multiplexer, CHUNK_SIZE};
pub use poller::Poller;
