//! nginx-rtmp stat-page probe.

use std::collections::HashSet;

use async_trait::async_trait;

use streamtee_config::Config;

use crate::{Result, ServerError, StreamServer};

/// Polls an nginx-rtmp server's stat XML page.
pub struct NginxRtmp {
    client: reqwest::Client,
    url: String,
    xpath: String,
}

impl NginxRtmp {
    /// Build a probe from the configuration.
    pub fn new(config: &Config) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.times.server_request_timeout)
            .build()
            .expect("HTTP client construction cannot fail with static options");

        Self {
            client,
            url: config.server.url.clone(),
            xpath: config.server.expanded_xpath(),
        }
    }
}

#[async_trait]
impl StreamServer for NginxRtmp {
    async fn active_streams(&self) -> Result<HashSet<String>> {
        let body = self
            .client
            .get(&self.url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        extract_streams(&body, &self.xpath)
    }
}

/// Evaluate the XPath expression against a stat document and collect the
/// text of every matched node.
fn extract_streams(xml: &str, xpath: &str) -> Result<HashSet<String>> {
    let package = sxd_document::parser::parse(xml)
        .map_err(|error| ServerError::Xml(format!("{error:?}")))?;
    let document = package.as_document();

    let value = sxd_xpath::evaluate_xpath(&document, xpath)
        .map_err(|error| ServerError::XPath(error.to_string()))?;

    let mut streams = HashSet::new();
    if let sxd_xpath::Value::Nodeset(nodes) = value {
        for node in nodes.document_order() {
            let name = node.string_value();
            if !name.is_empty() {
                streams.insert(name);
            }
        }
    }
    Ok(streams)
}

#[cfg(test)]
mod tests {
    use super::*;

    const STAT: &str = r#"<?xml version="1.0"?>
<rtmp>
  <server>
    <application>
      <name>live</name>
      <live>
        <stream><name>cam1</name><active/></stream>
        <stream><name>cam2</name><active/></stream>
        <stream><name>idle</name></stream>
      </live>
    </application>
    <application>
      <name>other</name>
      <live>
        <stream><name>elsewhere</name><active/></stream>
      </live>
    </application>
  </server>
</rtmp>"#;

    fn default_xpath_for(app: &str) -> String {
        streamtee_config::DEFAULT_XPATH_TEMPLATE.replace("%s", app)
    }

    #[test]
    fn test_extracts_active_streams_of_the_right_app() {
        let streams = extract_streams(STAT, &default_xpath_for("live")).unwrap();

        let mut names: Vec<&str> = streams.iter().map(String::as_str).collect();
        names.sort_unstable();
        assert_eq!(names, vec!["cam1", "cam2"]);
    }

    #[test]
    fn test_unknown_app_yields_no_streams() {
        let streams = extract_streams(STAT, &default_xpath_for("nope")).unwrap();
        assert!(streams.is_empty());
    }

    #[test]
    fn test_garbage_xml_is_an_error() {
        let result = extract_streams("<rtmp", &default_xpath_for("live"));
        assert!(matches!(result, Err(ServerError::Xml(_))));
    }
}
