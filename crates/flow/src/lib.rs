//! Streamtee - Flow Supervision
//!
//! A *flow* is the per-stream unit of work: one source process whose
//! stdout is teed into the stdins of N sink processes, all supervised.
//!
//! # Architecture
//!
//! ```text
//! [Flow]
//!   ├── BufferPool (rebuilt when a restart leaked buffers)
//!   ├── Source ── stdout ──► mpsc ──► [stall watchdog] ──► SinkSet dispatcher
//!   │                                                        ├──► Sink "a" ── stdin ──► process
//!   │                                                        └──► Sink "b" ── stdin ──► process
//!   └── ScreenServices (stderr log sinks for every child)
//! ```
//!
//! # Key Design
//!
//! - **Hierarchical cancellation**: the flow owns a `CancellationToken`;
//!   sources, sinks and the sink set run on child tokens, and every
//!   blocking operation is multiplexed with cancellation
//! - **One-shot barriers**: death is signalled through [`Latch`]es; a
//!   fallen latch stays readable forever, so late observers never block
//! - **Drop the slow consumer**: the dispatcher never blocks on a sink;
//!   a sink whose channel is full on delivery is evicted and killed, and
//!   its supervisor restarts it after a back-off
//! - **Exact refcounting at fan-out**: the dispatcher holds one buffer
//!   reference, every attempted delivery adds one, a failed delivery
//!   gives it back immediately, so the buffer recycles exactly when all
//!   successful recipients have freed it
//! - **Kill once, never after reap**: every group-kill path runs through
//!   a once-latch shared with the cancel watchdog

mod error;
mod flow;
mod latch;
mod sink;
mod sinkset;
mod source;
mod util;
mod watch;

pub use error::{FlowError, Result};
pub use flow::Flow;
pub use latch::Latch;
pub use sink::Sink;
pub use sinkset::{SinkCmd, SinkHandle, SinkSet};
pub use source::Source;

#[cfg(test)]
mod dispatcher_test;
#[cfg(test)]
mod watch_test;
