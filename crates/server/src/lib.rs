//! Streamtee - Stream Server Probes
//!
//! The supervisor discovers which streams should be flowing by asking an
//! external stream server. A probe exposes exactly one operation: return
//! the current set of active stream names, or fail.
//!
//! Three probes exist:
//!
//! - [`NginxRtmp`]: fetches the stat XML page and extracts stream names
//!   with a configurable XPath expression
//! - [`Icecast`]: fetches the JSON status page and derives stream names
//!   from each source's `listenurl` path
//! - [`StaticStreamList`]: returns the configured list unchanged
//!
//! Failures are returned to the caller, which keeps its previous state;
//! the server watchdog decides when silence means "all streams gone".

mod icecast;
mod nginx_rtmp;
mod static_list;

use std::collections::HashSet;

use async_trait::async_trait;
use thiserror::Error;

use streamtee_config::{Config, ServerKind};

pub use icecast::Icecast;
pub use nginx_rtmp::NginxRtmp;
pub use static_list::StaticStreamList;

/// Result type for probe operations.
pub type Result<T> = std::result::Result<T, ServerError>;

/// Errors a probe can produce.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The HTTP request failed or timed out.
    #[error("stream server request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The stat page was not valid XML.
    #[error("failed to parse stat XML: {0}")]
    Xml(String),

    /// The XPath expression could not be evaluated.
    #[error("failed to evaluate xpath: {0}")]
    XPath(String),

    /// The Icecast status page was not valid JSON.
    #[error("failed to parse Icecast status: {0}")]
    Json(#[from] serde_json::Error),

    /// The Icecast status page had an unexpected shape.
    #[error("unexpected Icecast status: {0}")]
    IcecastStatus(&'static str),

    /// An Icecast `listenurl` did not parse as a URL.
    #[error("failed to parse listenurl: {0}")]
    ListenUrl(#[from] url::ParseError),
}

/// A source of the currently-active stream set.
#[async_trait]
pub trait StreamServer: Send + Sync {
    /// Fetch the set of active stream names.
    async fn active_streams(&self) -> Result<HashSet<String>>;
}

/// Build the probe the configuration asks for.
pub fn new_server(config: &Config) -> Box<dyn StreamServer> {
    match config.server.kind {
        ServerKind::NginxRtmp => Box::new(NginxRtmp::new(config)),
        ServerKind::Icecast => Box::new(Icecast::new(config)),
        ServerKind::Static => Box::new(StaticStreamList::new(config)),
    }
}
