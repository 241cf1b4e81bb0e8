//! Buffer pool dimensions.

use serde::{Deserialize, Serialize};

/// The `source_buffer` section: dimensions of the per-flow buffer pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceBufferConfig {
    /// Number of buffers in the pool.
    pub buffer_count: usize,
    /// Size of each buffer in bytes.
    pub buffer_size: usize,
}

impl Default for SourceBufferConfig {
    fn default() -> Self {
        Self {
            buffer_count: 32,
            buffer_size: 65536,
        }
    }
}

/// The `sink_buffer` section: capacity of each sink's delivery channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkBufferConfig {
    /// Buffers a sink may fall behind before it counts as stalled.
    pub buffer_count: usize,
}

impl Default for SinkBufferConfig {
    fn default() -> Self {
        Self { buffer_count: 32 }
    }
}
