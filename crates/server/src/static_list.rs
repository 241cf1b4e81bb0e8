//! Static stream-list probe.

use std::collections::HashSet;

use async_trait::async_trait;

use streamtee_config::Config;

use crate::{Result, StreamServer};

/// Always reports the configured set of streams as active.
pub struct StaticStreamList {
    streams: HashSet<String>,
}

impl StaticStreamList {
    /// Build a probe from the configuration.
    pub fn new(config: &Config) -> Self {
        Self {
            streams: config.server.streams.iter().cloned().collect(),
        }
    }
}

#[async_trait]
impl StreamServer for StaticStreamList {
    async fn active_streams(&self) -> Result<HashSet<String>> {
        Ok(self.streams.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[tokio::test]
    async fn test_returns_the_configured_set() {
        let config = streamtee_config::Config::from_str(
            "server:\n  type: static\n  streams: [a, b, a]\n",
        )
        .unwrap();

        let probe = StaticStreamList::new(&config);
        let streams = probe.active_streams().await.unwrap();
        assert_eq!(streams, HashSet::from(["a".to_string(), "b".to_string()]));
    }
}
