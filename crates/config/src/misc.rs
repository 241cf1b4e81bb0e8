//! Miscellaneous behavior toggles.

use serde::{Deserialize, Serialize};

/// The `misc` section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MiscConfig {
    /// Share one log-sink screen across process restarts instead of
    /// spawning a fresh one each time.
    pub reuse_screens: bool,

    /// Restart the whole flow when a single sink dies.
    pub restart_when_sink_dies: bool,
}

impl Default for MiscConfig {
    fn default() -> Self {
        Self {
            reuse_screens: true,
            restart_when_sink_dies: false,
        }
    }
}
