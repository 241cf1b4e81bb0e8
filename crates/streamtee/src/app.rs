//! The top-level controller: polls the stream server, diffs the active
//! set and keeps one flow per matched stream running.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

use streamtee_config::{Config, FlowConfig};
use streamtee_flow::Flow;
use streamtee_metrics::{registry, Reporter};
use streamtee_process::CmdTemplate;

/// The running supervisor.
pub struct App {
    config: Arc<Config>,
    cancel: CancellationToken,
}

impl App {
    /// Build an app around a validated configuration.
    pub fn new(config: Config) -> Self {
        Self {
            config: Arc::new(config),
            cancel: CancellationToken::new(),
        }
    }

    /// The root cancellation scope; cancelling it shuts the app down.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run until interrupted. Returns cleanly once every flow has
    /// stopped.
    pub async fn run(&self) -> Result<()> {
        let cancel = self.cancel.clone();

        tokio::spawn(handle_interrupt(cancel.clone(), self.config.debug));
        tokio::spawn(handle_stack_dump());
        if self.config.times.idle_time > Duration::ZERO {
            tokio::spawn(report_idleness(self.config.times.idle_time, cancel.clone()));
        }
        tokio::spawn(Reporter::new(self.config.metrics.influx.as_ref()).run(cancel.clone()));

        let server = streamtee_server::new_server(&self.config);
        let streams_gauge = registry().gauge("streams");

        // The first poll happens immediately, then every interval.
        let mut ticker = tokio::time::interval(self.config.times.server_poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        let mut flows = FlowMap::new(Arc::clone(&self.config), cancel.clone());
        let mut previous: HashSet<String> = HashSet::new();
        let mut watchdog: Option<tokio::time::Instant> = None;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match server.active_streams().await {
                        Err(error) => {
                            // Keep the previous state; the watchdog
                            // decides when silence means "all gone".
                            tracing::warn!(error = %error, "Stream server poll failed");
                        }
                        Ok(current) => {
                            watchdog = Some(
                                tokio::time::Instant::now() + self.config.times.server_timeout,
                            );
                            streams_gauge.set(current.len() as i64);

                            for stream in current.difference(&previous) {
                                flows.add_stream(stream);
                            }
                            let removed: Vec<String> =
                                previous.difference(&current).cloned().collect();
                            for stream in &removed {
                                flows.remove_stream(stream).await;
                            }

                            // All streams gone is a good moment to give
                            // memory back.
                            if !previous.is_empty() && current.is_empty() {
                                release_memory();
                            }

                            previous = current;
                        }
                    }
                }

                _ = watchdog_expired(watchdog) => {
                    tracing::warn!("No reply from the stream server, assuming all streams gone");
                    watchdog = None;
                    let gone: Vec<String> = previous.drain().collect();
                    for stream in &gone {
                        flows.remove_stream(stream).await;
                    }
                }

                _ = cancel.cancelled() => {
                    flows.stop_all().await;
                    return Ok(());
                }
            }
        }
    }
}

/// Pending server-watchdog expiry; never resolves while no deadline is
/// armed.
async fn watchdog_expired(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// The controller's stream-to-flows bookkeeping.
///
/// A stream may match several flow rules; all of its flows live and die
/// together under its key.
struct FlowMap {
    config: Arc<Config>,
    root: CancellationToken,
    flows: HashMap<String, Vec<Flow>>,
}

impl FlowMap {
    fn new(config: Arc<Config>, root: CancellationToken) -> Self {
        Self {
            config,
            root,
            flows: HashMap::new(),
        }
    }

    /// Start a flow for every rule the stream name matches.
    fn add_stream(&mut self, stream: &str) {
        let config = Arc::clone(&self.config);
        let mut matched = false;

        for (flow_name, flow_config) in &config.flows {
            if flow_config.matches(stream) {
                if !matched {
                    matched = true;
                    tracing::warn!(stream = %stream, matched = true, "New stream");
                }
                self.add_flow(flow_name, stream, flow_config);
            }
        }

        if !matched {
            tracing::debug!(stream = %stream, matched = false, "New stream, ignoring");
        }
    }

    fn add_flow(&mut self, name: &str, stream: &str, flow_config: &FlowConfig) {
        let mut vars = HashMap::new();
        vars.insert("{stream}", stream);

        let source = flow_config.source.substitute(&vars);
        let sinks: BTreeMap<String, CmdTemplate> = flow_config
            .sinks
            .iter()
            .map(|(sink_name, template)| (sink_name.clone(), template.substitute(&vars)))
            .collect();

        tracing::info!(stream = %stream, flow = %name, "Starting flow");
        let flow = Flow::spawn(
            &self.root,
            name,
            stream,
            Arc::clone(&self.config),
            source,
            sinks,
        );
        self.flows.entry(stream.to_string()).or_default().push(flow);
    }

    /// Stop and forget every flow of a stream.
    async fn remove_stream(&mut self, stream: &str) {
        let flows = match self.flows.remove(stream) {
            Some(flows) => flows,
            None => {
                tracing::debug!(stream = %stream, "Ignored stream gone");
                return;
            }
        };

        tracing::warn!(stream = %stream, "Stream gone");
        for flow in flows {
            tracing::info!(stream = %stream, flow = %flow.name(), "Stopping flow");
            flow.stop().await;
        }
    }

    /// Stop everything; used on shutdown and when the server watchdog
    /// fires.
    async fn stop_all(&mut self) {
        for (_, flows) in self.flows.drain() {
            for flow in flows {
                flow.stop().await;
            }
        }
    }

    fn contains(&self, stream: &str) -> bool {
        self.flows.contains_key(stream)
    }

    fn flow_count(&self, stream: &str) -> usize {
        self.flows.get(stream).map(Vec::len).unwrap_or(0)
    }

    fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }
}

/// First interrupt: shut down cleanly, or abort when debugging so a
/// post-mortem is available.
async fn handle_interrupt(cancel: CancellationToken, debug: bool) {
    if tokio::signal::ctrl_c().await.is_err() {
        return;
    }
    if debug {
        tracing::error!("Interrupted, aborting for post-mortem");
        std::process::abort();
    }
    tracing::info!("Interrupted, shutting down...");
    cancel.cancel();
}

/// SIGUSR1 writes a stack trace to /tmp for live diagnosis.
async fn handle_stack_dump() {
    let mut signals = match signal(SignalKind::user_defined1()) {
        Ok(signals) => signals,
        Err(error) => {
            tracing::warn!(error = %error, "Failed to install the SIGUSR1 handler");
            return;
        }
    };

    while signals.recv().await.is_some() {
        let path = format!("/tmp/streamtee.{}.stack", std::process::id());
        let backtrace = std::backtrace::Backtrace::force_capture();
        if std::fs::write(&path, format!("{backtrace}\n")).is_ok() {
            tracing::info!(path = %path, "Wrote stack trace");
        }
    }
}

/// Log how idle the process is, once per configured interval.
async fn report_idleness(interval: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    ticker.tick().await;

    let mut last = cpu_time();
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = cancel.cancelled() => return,
        }

        let now = cpu_time();
        let busy = now.checked_sub(last).unwrap_or_default().as_secs_f64()
            / interval.as_secs_f64();
        let idle = ((1.0 - busy) * 100.0).clamp(0.0, 100.0);
        tracing::debug!(idle_percent = idle, "Idleness");
        last = now;
    }
}

fn cpu_time() -> Duration {
    let mut usage = std::mem::MaybeUninit::<libc::rusage>::zeroed();
    if unsafe { libc::getrusage(libc::RUSAGE_SELF, usage.as_mut_ptr()) } != 0 {
        return Duration::ZERO;
    }
    let usage = unsafe { usage.assume_init() };
    let to_duration =
        |tv: libc::timeval| Duration::new(tv.tv_sec as u64, (tv.tv_usec as u32) * 1000);
    to_duration(usage.ru_utime) + to_duration(usage.ru_stime)
}

#[cfg(all(target_os = "linux", target_env = "gnu"))]
fn release_memory() {
    unsafe {
        libc::malloc_trim(0);
    }
    tracing::debug!("Released free heap memory");
}

#[cfg(not(all(target_os = "linux", target_env = "gnu")))]
fn release_memory() {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn config(yaml: &str) -> Arc<Config> {
        Arc::new(Config::from_str(yaml).unwrap())
    }

    fn single_rule_config() -> Arc<Config> {
        config(
            r#"
server:
  type: static
times:
  source_restart_delay: 1
  sink_restart_delay: 1
flows:
  all:
    regexp: '.*'
    source: cat
    sinks:
      out: cat
"#,
        )
    }

    #[tokio::test]
    async fn test_add_then_remove_leaves_the_map_empty() {
        let mut flows = FlowMap::new(single_rule_config(), CancellationToken::new());

        flows.add_stream("a");
        assert!(flows.contains("a"));
        assert_eq!(flows.flow_count("a"), 1);

        flows.remove_stream("a").await;
        assert!(flows.is_empty());
    }

    #[tokio::test]
    async fn test_poll_diff_adds_and_removes_flows() {
        let mut flows = FlowMap::new(single_rule_config(), CancellationToken::new());

        // First poll sees {A, B}.
        flows.add_stream("A");
        flows.add_stream("B");
        assert!(flows.contains("A") && flows.contains("B"));

        // Next poll sees {B, C}: remove A, add C.
        flows.remove_stream("A").await;
        flows.add_stream("C");
        assert!(!flows.contains("A"));
        assert!(flows.contains("B") && flows.contains("C"));

        flows.stop_all().await;
        assert!(flows.is_empty());
    }

    #[tokio::test]
    async fn test_unmatched_streams_are_ignored() {
        let config = config(
            r#"
server:
  type: static
times:
  source_restart_delay: 1
flows:
  cams:
    regexp: '^cam'
    source: cat
"#,
        );
        let mut flows = FlowMap::new(config, CancellationToken::new());

        flows.add_stream("radio");
        assert!(flows.is_empty());
    }

    #[tokio::test]
    async fn test_one_stream_can_match_several_rules() {
        let config = config(
            r#"
server:
  type: static
times:
  source_restart_delay: 1
flows:
  archive:
    regexp: '^cam'
    source: cat
  relay:
    regexp: 'cam1'
    source: cat
"#,
        );
        let mut flows = FlowMap::new(config, CancellationToken::new());

        flows.add_stream("cam1");
        assert_eq!(flows.flow_count("cam1"), 2);

        // Removal terminates all of them.
        flows.remove_stream("cam1").await;
        assert!(flows.is_empty());
    }

    #[tokio::test]
    async fn test_removing_an_unknown_stream_is_harmless() {
        let mut flows = FlowMap::new(single_rule_config(), CancellationToken::new());
        flows.remove_stream("ghost").await;
        assert!(flows.is_empty());
    }

    #[tokio::test]
    async fn test_stopping_a_flow_twice_is_a_no_op() {
        let config = single_rule_config();
        let root = CancellationToken::new();
        let flow = Flow::spawn(
            &root,
            "all",
            "cam1",
            Arc::clone(&config),
            CmdTemplate::parse("cat").unwrap(),
            BTreeMap::new(),
        );

        flow.stop().await;
        flow.stop().await;
    }
}
