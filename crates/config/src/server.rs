//! Stream-server configuration.

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

/// XPath expression matching the names of active streams in an
/// nginx-rtmp server's stat XML document. `%s` is replaced with the
/// application name.
pub const DEFAULT_XPATH_TEMPLATE: &str =
    "/rtmp/server/application[name/text()='%s']/live/stream[active]/name/text()";

fn default_xpath() -> String {
    DEFAULT_XPATH_TEMPLATE.to_string()
}

/// Which kind of stream server to poll for active streams.
///
/// Unknown values are rejected at parse time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerKind {
    #[serde(rename = "nginx-rtmp")]
    NginxRtmp,
    #[serde(rename = "icecast")]
    Icecast,
    #[serde(rename = "static")]
    Static,
}

/// The `server` section: where the set of active streams comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server kind.
    #[serde(rename = "type")]
    pub kind: ServerKind,

    /// HTTP endpoint, required for nginx-rtmp and Icecast.
    #[serde(default)]
    pub url: String,

    /// nginx-rtmp application name.
    #[serde(default)]
    pub app: String,

    /// Stat-page XPath expression; `%s` is replaced with `app`.
    #[serde(default = "default_xpath")]
    pub xpath: String,

    /// Literal stream names for `static` servers.
    #[serde(default)]
    pub streams: Vec<String>,
}

impl ServerConfig {
    /// The XPath expression with the application name filled in.
    pub fn expanded_xpath(&self) -> String {
        self.xpath.replace("%s", &self.app)
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if matches!(self.kind, ServerKind::NginxRtmp | ServerKind::Icecast)
            && self.url.is_empty()
        {
            return Err(ConfigError::MissingServerUrl);
        }
        if self.kind == ServerKind::NginxRtmp && self.app.is_empty() {
            return Err(ConfigError::MissingServerApp);
        }
        if self.xpath.is_empty() {
            return Err(ConfigError::MissingXpath);
        }

        // Proper quoting for XPath is hard, but we don't need it.
        if self.app.contains('\'') || self.app.contains('"') {
            return Err(ConfigError::AppContainsQuotes);
        }

        let expanded = self.expanded_xpath();
        match sxd_xpath::Factory::new().build(&expanded) {
            Ok(Some(_)) => Ok(()),
            Ok(None) => Err(ConfigError::InvalidXpath("empty expression".to_string())),
            Err(error) => Err(ConfigError::InvalidXpath(error.to_string())),
        }
    }
}
