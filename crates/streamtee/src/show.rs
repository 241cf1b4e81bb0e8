//! The `--show-streams` and `--show-config` inspection modes.

use anyhow::Result;
use serde::Serialize;

use streamtee_config::Config;

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct StreamsReport {
    url: String,
    matched_streams: Vec<String>,
    unmatched_streams: Vec<String>,
}

/// Poll the configured server once and report which streams the flow
/// rules would pick up.
pub(crate) async fn show_streams(config: &Config) -> Result<()> {
    let server = streamtee_server::new_server(config);
    let streams = server.active_streams().await?;

    let mut matched = Vec::new();
    let mut unmatched = Vec::new();
    for stream in streams {
        if config.flows.values().any(|flow| flow.matches(&stream)) {
            matched.push(stream);
        } else {
            unmatched.push(stream);
        }
    }
    matched.sort_unstable();
    unmatched.sort_unstable();

    let report = StreamsReport {
        url: config.server.url.clone(),
        matched_streams: matched,
        unmatched_streams: unmatched,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Echo the parsed configuration back as YAML.
pub(crate) fn show_config(config: &Config) -> Result<()> {
    print!("{}", config.to_yaml()?);
    Ok(())
}
