//! Streamtee - Buffer Pool
//!
//! A fixed-size pool of fixed-size byte buffers with manual reference
//! counting, shared by the source and sinks of one flow.
//!
//! # Design
//!
//! - **Single backing allocation**: all buffers are slices of one
//!   contiguous region, assigned statically at pool construction
//! - **Bounded free queue**: available buffers sit in a queue whose
//!   capacity equals the pool size, so returning a buffer can never block
//! - **Manual refcounts**: a buffer taken from the pool must be claimed
//!   with [`Buf::acquire_first`]; fan-out adds references with
//!   [`Buf::acquire`]; every holder calls [`Buf::free`], and the last
//!   `free` recycles the buffer back into the queue
//! - **Backpressure**: [`BufferPool::take`] waits for a buffer to come
//!   back; [`BufferPool::try_take`] lets the source detect exhaustion
//!
//! Misusing the refcount protocol (claiming a live buffer, freeing a dead
//! one, growing a buffer past its capacity) is a bug in the caller and
//! panics immediately rather than corrupting the pool.

mod bufpool;

pub use bufpool::{Buf, BufferPool};
