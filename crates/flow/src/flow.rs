//! The per-stream supervisor.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use streamtee_config::Config;
use streamtee_pool::BufferPool;
use streamtee_process::{CmdTemplate, ScreenMode, ScreenService};

use crate::sinkset::{SinkCmd, SinkSet};
use crate::source::Source;
use crate::util::sleep_or_cancelled;
use crate::watch::watch_channel;

/// One stream's worth of supervision: a source, a sink set, a buffer
/// pool and the log-sink screens, restarted on death until stopped.
pub struct Flow {
    name: String,
    stream: String,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl Flow {
    /// Start supervising. Does not block; the flow runs until
    /// [`stop`](Flow::stop).
    ///
    /// `source_cmd` and `sink_cmds` must already have the stream name
    /// substituted in.
    pub fn spawn(
        parent: &CancellationToken,
        name: &str,
        stream: &str,
        config: Arc<Config>,
        source_cmd: CmdTemplate,
        sink_cmds: BTreeMap<String, CmdTemplate>,
    ) -> Flow {
        let cancel = parent.child_token();
        let tracker = TaskTracker::new();

        tracker.spawn(run_flow(
            name.to_string(),
            stream.to_string(),
            config,
            source_cmd,
            sink_cmds,
            cancel.clone(),
            tracker.clone(),
        ));

        Flow {
            name: name.to_string(),
            stream: stream.to_string(),
            cancel,
            tracker,
        }
    }

    /// The flow rule this flow was built from.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The stream this flow serves.
    pub fn stream(&self) -> &str {
        &self.stream
    }

    /// End all processes and supervision tasks.
    ///
    /// Idempotent. Blocks until everything has wound down.
    pub async fn stop(&self) {
        self.cancel.cancel();
        self.tracker.close();
        self.tracker.wait().await;
    }
}

async fn run_flow(
    name: String,
    stream: String,
    config: Arc<Config>,
    source_cmd: CmdTemplate,
    sink_templates: BTreeMap<String, CmdTemplate>,
    cancel: CancellationToken,
    tracker: TaskTracker,
) {
    let pid = std::process::id();
    let mode = if config.misc.reuse_screens {
        ScreenMode::Shared
    } else {
        ScreenMode::Exclusive
    };

    let source_screens = Arc::new(ScreenService::with_mode(
        format!("streamtee.{pid}.source"),
        mode,
    ));
    let mut sink_cmds: HashMap<String, SinkCmd> = HashMap::new();
    for (sink_name, template) in sink_templates {
        sink_cmds.insert(
            sink_name,
            SinkCmd {
                screens: Arc::new(ScreenService::with_mode(
                    format!("streamtee.{pid}.sink"),
                    mode,
                )),
                command: template,
            },
        );
    }

    let mut pool: Option<Arc<BufferPool>> = None;

    while !cancel.is_cancelled() {
        // A pool that is not full at this point lost buffers to a task
        // that died holding them; rebuilding keeps the refcounts honest.
        if let Some(existing) = &pool {
            if !existing.is_full() {
                tracing::warn!(
                    stream = %stream,
                    flow = %name,
                    "Not all buffers were freed; allocating a fresh pool"
                );
                pool = None;
            }
        }
        if pool.is_none() {
            pool = Some(Arc::new(BufferPool::new(
                &stream,
                config.source_buffer.buffer_count,
                config.source_buffer.buffer_size,
            )));
        }
        let active_pool = match &pool {
            Some(pool) => Arc::clone(pool),
            None => break,
        };

        // Get a log sink for the new source process.
        let screen = match source_screens.acquire().await {
            Ok(screen) => screen,
            Err(error) => {
                tracing::warn!(
                    stream = %stream,
                    error = %error,
                    "Failed to start a log sink screen"
                );
                if sleep_or_cancelled(config.times.source_restart_delay, &cancel).await {
                    break;
                }
                continue;
            }
        };

        let mut source = Source::new(
            &stream,
            source_cmd.clone(),
            screen,
            active_pool,
            cancel.child_token(),
        );
        let mut channel = source.take_channel();
        if config.times.source_timeout > Duration::ZERO {
            channel = watch_channel(
                channel,
                config.times.source_timeout,
                source.cancel_token(),
                &tracker,
                stream.clone(),
            );
        }

        let mut sinks = SinkSet::new(
            &stream,
            sink_cmds.clone(),
            channel,
            Arc::clone(&config),
            cancel.child_token(),
        );
        sinks.start();

        if let Err(error) = source.start().await {
            tracing::warn!(stream = %stream, error = %error, "Source failed to start");
            sinks.stop().await;
            source_screens.release().await;
            if sleep_or_cancelled(config.times.source_restart_delay, &cancel).await {
                break;
            }
            continue;
        }

        // Wait till it dies, or should die, or wants to die.
        let death = source.death_latch();
        let any_sink_died = sinks.any_sink_died();
        tokio::select! {
            _ = death.wait_fallen() => {}
            _ = any_sink_died.wait_fallen(), if config.misc.restart_when_sink_dies => {}
            _ = cancel.cancelled() => {}
        }

        // Wait till it's really dead.
        source.stop().await;
        sinks.stop().await;

        // Stopping screens can take a moment each; do them in parallel.
        let mut releases = Vec::new();
        {
            let screens = Arc::clone(&source_screens);
            releases.push(tokio::spawn(async move { screens.release().await }));
        }
        for command in sink_cmds.values() {
            let screens = Arc::clone(&command.screens);
            releases.push(tokio::spawn(async move { screens.release().await }));
        }
        for release in releases {
            let _ = release.await;
        }

        // Wait before respawning.
        if sleep_or_cancelled(config.times.source_restart_delay, &cancel).await {
            break;
        }
    }

    source_screens.stop().await;
    for command in sink_cmds.values() {
        command.screens.stop().await;
    }
}
