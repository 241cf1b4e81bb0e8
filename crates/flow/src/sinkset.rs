//! The fan-out dispatcher and its per-sink supervisors.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use streamtee_config::Config;
use streamtee_pool::Buf;
use streamtee_process::{CmdTemplate, ScreenService};

use crate::latch::Latch;
use crate::sink::Sink;
use crate::util::sleep_or_cancelled;

/// What the dispatcher knows about a live sink: where to deliver and how
/// to kill.
#[derive(Clone)]
pub struct SinkHandle {
    id: u64,
    name: String,
    sender: mpsc::Sender<Buf>,
    cancel: CancellationToken,
}

impl SinkHandle {
    pub(crate) fn new(
        id: u64,
        name: String,
        sender: mpsc::Sender<Buf>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id,
            name,
            sender,
            cancel,
        }
    }

    /// Identity of the sink instance behind this handle.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The sink's configured name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Deliver without blocking; the buffer comes back on a full or
    /// closed channel.
    pub fn try_send(&self, buf: Buf) -> Result<(), Buf> {
        self.sender.try_send(buf).map_err(|error| match error {
            mpsc::error::TrySendError::Full(buf) => buf,
            mpsc::error::TrySendError::Closed(buf) => buf,
        })
    }

    /// Ask the sink to die. Doesn't block.
    pub fn kill(&self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for SinkHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SinkHandle")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish()
    }
}

/// How to run one configured sink: its command and its log-sink service.
#[derive(Clone)]
pub struct SinkCmd {
    pub screens: Arc<ScreenService>,
    pub command: CmdTemplate,
}

/// Starts and supervises the sinks of one flow and multicasts the
/// source's buffers to them.
pub struct SinkSet {
    stream: String,
    commands: HashMap<String, SinkCmd>,
    config: Arc<Config>,
    cancel: CancellationToken,

    upstream: Option<mpsc::Receiver<Buf>>,
    add_tx: mpsc::Sender<SinkHandle>,
    add_rx: Option<mpsc::Receiver<SinkHandle>>,
    remove_tx: mpsc::Sender<SinkHandle>,
    remove_rx: Option<mpsc::Receiver<SinkHandle>>,

    run_exited: Latch,
    any_sink_died: Latch,
    tracker: TaskTracker,
}

impl SinkSet {
    /// Describe a sink set fed by `upstream`.
    pub fn new(
        stream: &str,
        commands: HashMap<String, SinkCmd>,
        upstream: mpsc::Receiver<Buf>,
        config: Arc<Config>,
        cancel: CancellationToken,
    ) -> Self {
        let (add_tx, add_rx) = mpsc::channel(1);
        let (remove_tx, remove_rx) = mpsc::channel(1);

        Self {
            stream: stream.to_string(),
            commands,
            config,
            cancel,
            upstream: Some(upstream),
            add_tx,
            add_rx: Some(add_rx),
            remove_tx,
            remove_rx: Some(remove_rx),
            run_exited: Latch::new(),
            any_sink_died: Latch::new(),
            tracker: TaskTracker::new(),
        }
    }

    /// Falls the first time any sink's death barrier falls.
    pub fn any_sink_died(&self) -> Latch {
        self.any_sink_died.clone()
    }

    /// Start the dispatcher and one supervisor per configured sink.
    ///
    /// Must only be called once. Does not block.
    pub fn start(&mut self) {
        let upstream = self
            .upstream
            .take()
            .expect("a sink set can only be started once");
        let add_rx = self
            .add_rx
            .take()
            .expect("a sink set can only be started once");
        let remove_rx = self
            .remove_rx
            .take()
            .expect("a sink set can only be started once");

        self.tracker.spawn(dispatch(
            upstream,
            add_rx,
            remove_rx,
            self.cancel.clone(),
            self.run_exited.clone(),
            self.stream.clone(),
        ));

        for (name, command) in self.commands.clone() {
            self.tracker.spawn(supervise_sink(
                self.stream.clone(),
                name,
                command,
                Arc::clone(&self.config),
                self.cancel.clone(),
                self.add_tx.clone(),
                self.remove_tx.clone(),
                self.run_exited.clone(),
                self.any_sink_died.clone(),
            ));
        }
    }

    /// End all sink processes and supervision tasks.
    ///
    /// Idempotent. Blocks until everything has wound down.
    pub async fn stop(&mut self) {
        self.cancel.cancel();
        self.tracker.close();
        self.tracker.wait().await;
    }
}

/// Starts a sink, hands it to the dispatcher, waits for it to die, takes
/// it back and restarts it after a back-off. Loops until cancellation.
#[allow(clippy::too_many_arguments)]
async fn supervise_sink(
    stream: String,
    name: String,
    command: SinkCmd,
    config: Arc<Config>,
    cancel: CancellationToken,
    add_tx: mpsc::Sender<SinkHandle>,
    remove_tx: mpsc::Sender<SinkHandle>,
    run_exited: Latch,
    any_sink_died: Latch,
) {
    let restart_delay = config.times.sink_restart_delay;

    loop {
        // Get a log sink for the new process.
        let screen = match command.screens.acquire().await {
            Ok(screen) => screen,
            Err(error) => {
                tracing::warn!(
                    stream = %stream,
                    sink = %name,
                    error = %error,
                    "Failed to start a log sink screen"
                );
                if sleep_or_cancelled(restart_delay, &cancel).await {
                    return;
                }
                continue;
            }
        };

        let mut sink = Sink::new(
            &stream,
            &name,
            command.command.clone(),
            config.sink_buffer.buffer_count,
            screen,
            cancel.child_token(),
        );

        if let Err(error) = sink.start().await {
            tracing::warn!(
                stream = %stream,
                sink = %name,
                error = %error,
                "Sink failed to start"
            );
            command.screens.release().await;
            if sleep_or_cancelled(restart_delay, &cancel).await {
                return;
            }
            continue;
        }

        // Give it to the dispatcher.
        let handle = sink.handle();
        tokio::select! {
            _ = add_tx.send(handle.clone()) => {}
            _ = cancel.cancelled() => {}
        }

        // Wait till it dies.
        let death = sink.death_latch();
        tokio::select! {
            _ = death.wait_fallen() => {}
            _ = cancel.cancelled() => {}
        }

        any_sink_died.fall();

        // Take it back, unless the dispatcher is already gone.
        tokio::select! {
            _ = remove_tx.send(handle) => {}
            _ = run_exited.wait_fallen() => {}
        }

        // Wait till it's really dead.
        sink.stop().await;
        command.screens.release().await;

        // Wait before respawning.
        if sleep_or_cancelled(restart_delay, &cancel).await {
            return;
        }
    }
}

/// Delivers incoming buffers to the live sinks.
///
/// Never blocks on a sink: a full channel evicts and kills its sink on
/// the spot, so live sinks are not delayed by dead ones.
pub(crate) async fn dispatch(
    mut upstream: mpsc::Receiver<Buf>,
    mut add_rx: mpsc::Receiver<SinkHandle>,
    mut remove_rx: mpsc::Receiver<SinkHandle>,
    cancel: CancellationToken,
    run_exited: Latch,
    stream: String,
) {
    let mut sinks: HashMap<u64, SinkHandle> = HashMap::new();
    let mut upstream_open = true;

    loop {
        tokio::select! {
            // New sinks from the supervisors.
            Some(handle) = add_rx.recv() => {
                sinks.insert(handle.id(), handle);
            }

            // Sinks that died on their own.
            Some(handle) = remove_rx.recv() => {
                sinks.remove(&handle.id());
            }

            // A buffer with fresh bytes.
            msg = upstream.recv(), if upstream_open => {
                let buf = match msg {
                    Some(buf) => buf,
                    None => {
                        // The source is gone; wait for cancellation
                        // without spinning on the closed channel.
                        upstream_open = false;
                        continue;
                    }
                };

                // One reference per delivery attempt, plus our own.
                buf.acquire(sinks.len() as i64);
                let mut stalled = Vec::new();
                for handle in sinks.values() {
                    match handle.try_send(buf.clone()) {
                        Ok(()) => {}
                        Err(returned) => {
                            tracing::warn!(
                                stream = %stream,
                                sink = %handle.name(),
                                "Sink stalled"
                            );
                            returned.free(); // the sink's ref
                            stalled.push(handle.id());
                            handle.kill();
                        }
                    }
                }
                for id in stalled {
                    sinks.remove(&id);
                }
                buf.free(); // our own ref
            }

            // The sink set is quitting; all sinks count as released.
            _ = cancel.cancelled() => {
                run_exited.fall();
                return;
            }
        }
    }
}
