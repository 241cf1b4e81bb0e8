//! The sink side of a flow: one process fed buffers on its stdin.

use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use streamtee_pool::Buf;
use streamtee_process::{
    CmdTemplate, GroupKiller, ManagedProcess, PipeWriter, Screen,
};

use crate::latch::Latch;
use crate::sinkset::SinkHandle;
use crate::Result;

static NEXT_SINK_ID: AtomicU64 = AtomicU64::new(1);

/// Drives one sink process: consumes buffers from a bounded channel and
/// writes them to the child's stdin.
pub struct Sink {
    id: u64,
    stream: String,
    name: String,
    command: CmdTemplate,
    screen: Option<Screen>,
    cancel: CancellationToken,
    death: Latch,
    tracker: TaskTracker,
    tx: mpsc::Sender<Buf>,
    rx: Option<mpsc::Receiver<Buf>>,
}

impl Sink {
    /// Describe a sink with a delivery channel of `buffer_count` slots.
    pub fn new(
        stream: &str,
        name: &str,
        command: CmdTemplate,
        buffer_count: usize,
        screen: Screen,
        cancel: CancellationToken,
    ) -> Self {
        let (tx, rx) = mpsc::channel(buffer_count.max(1));

        Self {
            id: NEXT_SINK_ID.fetch_add(1, Ordering::Relaxed),
            stream: stream.to_string(),
            name: name.to_string(),
            command,
            screen: Some(screen),
            cancel,
            death: Latch::new(),
            tracker: TaskTracker::new(),
            tx,
            rx: Some(rx),
        }
    }

    /// The handle the dispatcher delivers through.
    pub fn handle(&self) -> SinkHandle {
        SinkHandle::new(
            self.id,
            self.name.clone(),
            self.tx.clone(),
            self.cancel.clone(),
        )
    }

    /// Falls when the sink process dies.
    pub fn death_latch(&self) -> Latch {
        self.death.clone()
    }

    /// Ask the sink to die. Doesn't block.
    pub fn kill(&self) {
        self.cancel.cancel();
    }

    /// Spawn the sink process and begin writing.
    ///
    /// Must only be called once.
    pub async fn start(&mut self) -> Result<()> {
        // Logging here stays consistent with Source::start.
        tracing::debug!(stream = %self.stream, sink = %self.name, "Starting sink");

        let Screen {
            name: screen_name,
            fd: screen_fd,
        } = self
            .screen
            .take()
            .expect("a sink can only be started once");

        let mut process = self.command.to_process();
        process.set_stderr(screen_fd);
        process.pipe_stdin();
        process.start().await?;

        let stdin = process.stdin_pipe()?;
        let killer = process.group_killer()?;
        let pid = process.pid().unwrap_or(-1);

        // A blocked write is interruptible only by taking the process
        // down; the once-latch keeps this safe against the reap.
        let watchdog_cancel = self.cancel.clone();
        let watchdog_killer = killer.clone();
        self.tracker.spawn(async move {
            watchdog_cancel.cancelled().await;
            watchdog_killer.kill();
        });

        let rx = self.rx.take().expect("a sink can only be started once");
        self.tracker.spawn(run_sink(
            process,
            stdin,
            rx,
            self.cancel.clone(),
            self.death.clone(),
            killer,
            self.stream.clone(),
            self.name.clone(),
        ));

        tracing::info!(
            stream = %self.stream,
            sink = %self.name,
            screen = %screen_name,
            pid,
            "Sink started"
        );
        Ok(())
    }

    /// Kill the process and wait for every task to wind down.
    ///
    /// Idempotent. Blocks.
    pub async fn stop(&mut self) {
        self.cancel.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        tracing::debug!(stream = %self.stream, sink = %self.name, "Sink stopped");
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_sink(
    mut process: ManagedProcess,
    mut stdin: PipeWriter,
    mut rx: mpsc::Receiver<Buf>,
    cancel: CancellationToken,
    death: Latch,
    killer: GroupKiller,
    stream: String,
    name: String,
) {
    // Process alive.
    loop {
        let received = tokio::select! {
            msg = rx.recv() => msg,
            _ = cancel.cancelled() => break,
        };
        let buf = match received {
            Some(buf) => buf,
            None => break,
        };

        let written = stdin.write_all(buf.as_slice()).await;
        buf.free();
        if let Err(error) = written {
            tracing::debug!(stream = %stream, sink = %name, error = %error, "Write failed");
            break;
        }
    }

    tracing::debug!(stream = %stream, sink = %name, "Sink dying");
    death.fall();

    // Process dead or dying: keep freeing deliveries so nothing leaks
    // while the supervisor organizes the restart.
    loop {
        let received = tokio::select! {
            msg = rx.recv() => msg,
            _ = cancel.cancelled() => break,
        };
        match received {
            Some(buf) => buf.free(),
            None => break,
        }
    }

    killer.kill();
    process.wait().await;

    // Final teardown: nothing else may close the channel, and whatever
    // is still queued gets freed here.
    rx.close();
    while let Ok(buf) = rx.try_recv() {
        buf.free();
    }
}
