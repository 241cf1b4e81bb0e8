//! Flow rule configuration.

use std::collections::BTreeMap;

use regex::Regex;
use serde::{Deserialize, Serialize};

use streamtee_process::CmdTemplate;

/// One flow rule: which streams it matches and which processes it runs.
///
/// Command templates are shell-tokenized at parse time; each argument
/// equal to the literal token `{stream}` is substituted with the stream
/// name when the flow starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowConfig {
    /// Stream-name match pattern.
    #[serde(with = "regex_string")]
    pub regexp: Regex,

    /// The source process command.
    pub source: CmdTemplate,

    /// Sink name to sink process command.
    #[serde(default)]
    pub sinks: BTreeMap<String, CmdTemplate>,
}

impl FlowConfig {
    /// True if this rule applies to the given stream name.
    pub fn matches(&self, stream: &str) -> bool {
        self.regexp.is_match(stream)
    }
}

mod regex_string {
    use regex::Regex;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(regex: &Regex, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(regex.as_str())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Regex, D::Error> {
        let pattern = String::deserialize(deserializer)?;
        Regex::new(&pattern).map_err(serde::de::Error::custom)
    }
}
