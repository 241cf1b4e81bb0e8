//! Icecast status-page probe.

use std::collections::HashSet;

use async_trait::async_trait;
use serde_json::Value;
use url::Url;

use streamtee_config::Config;

use crate::{Result, ServerError, StreamServer};

/// Polls an Icecast server's JSON status page.
///
/// The status lists zero sources as a missing field, one source as an
/// object, and several as an array; each source's `listenurl` path (with
/// the leading slash stripped) is the stream name.
pub struct Icecast {
    client: reqwest::Client,
    url: String,
}

impl Icecast {
    /// Build a probe from the configuration.
    pub fn new(config: &Config) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.times.server_request_timeout)
            .build()
            .expect("HTTP client construction cannot fail with static options");

        Self {
            client,
            url: config.server.url.clone(),
        }
    }
}

#[async_trait]
impl StreamServer for Icecast {
    async fn active_streams(&self) -> Result<HashSet<String>> {
        let body = self
            .client
            .get(&self.url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        parse_status(&body)
    }
}

fn parse_status(body: &str) -> Result<HashSet<String>> {
    let root: Value = serde_json::from_str(body)?;

    let mut streams = HashSet::new();
    match root.get("icestats").and_then(|stats| stats.get("source")) {
        None | Some(Value::Null) => {}
        Some(Value::Array(sources)) => {
            for source in sources {
                insert_source(&mut streams, source)?;
            }
        }
        Some(source) => insert_source(&mut streams, source)?,
    }
    Ok(streams)
}

fn insert_source(streams: &mut HashSet<String>, source: &Value) -> Result<()> {
    let object = source
        .as_object()
        .ok_or(ServerError::IcecastStatus("source is not an object"))?;
    let listenurl = object
        .get("listenurl")
        .ok_or(ServerError::IcecastStatus("listenurl field not present"))?
        .as_str()
        .ok_or(ServerError::IcecastStatus("listenurl is not a string"))?;

    let url = Url::parse(listenurl)?;
    streams.insert(url.path().trim_start_matches('/').to_string());
    Ok(())
}
