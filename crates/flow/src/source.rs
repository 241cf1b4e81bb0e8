//! The source side of a flow: one process whose stdout feeds the pool.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use streamtee_metrics::{registry, Meter};
use streamtee_pool::{Buf, BufferPool};
use streamtee_process::{
    CmdTemplate, GroupKiller, ManagedProcess, PipeReader, Screen,
};

use crate::latch::Latch;
use crate::Result;

/// Drives one source process: reads its stdout into pool buffers and
/// publishes them on a channel.
pub struct Source {
    stream: String,
    command: CmdTemplate,
    screen: Option<Screen>,
    pool: Arc<BufferPool>,
    cancel: CancellationToken,
    death: Latch,
    tracker: TaskTracker,
    tx: Option<mpsc::Sender<Buf>>,
    rx: Option<mpsc::Receiver<Buf>>,
}

impl Source {
    /// Describe a source. Nothing runs until [`start`](Source::start).
    pub fn new(
        stream: &str,
        command: CmdTemplate,
        screen: Screen,
        pool: Arc<BufferPool>,
        cancel: CancellationToken,
    ) -> Self {
        let (tx, rx) = mpsc::channel(1);

        Self {
            stream: stream.to_string(),
            command,
            screen: Some(screen),
            pool,
            cancel,
            death: Latch::new(),
            tracker: TaskTracker::new(),
            tx: Some(tx),
            rx: Some(rx),
        }
    }

    /// The channel buffers are published on. Must be taken exactly once,
    /// before [`start`](Source::start).
    pub fn take_channel(&mut self) -> mpsc::Receiver<Buf> {
        self.rx
            .take()
            .expect("the source channel can only be taken once")
    }

    /// The source's own cancellation token; cancelling it kills just
    /// this source.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Falls when the source process dies.
    pub fn death_latch(&self) -> Latch {
        self.death.clone()
    }

    /// Ask the source to die. Doesn't block.
    pub fn kill(&self) {
        self.cancel.cancel();
    }

    /// Spawn the source process and begin reading.
    ///
    /// Must only be called once.
    pub async fn start(&mut self) -> Result<()> {
        // Logging here stays consistent with Sink::start.
        tracing::debug!(stream = %self.stream, "Starting source");

        let Screen {
            name: screen_name,
            fd: screen_fd,
        } = self
            .screen
            .take()
            .expect("a source can only be started once");

        let mut process = self.command.to_process();
        process.set_stderr(screen_fd);
        process.pipe_stdout();
        process.start().await?;

        let stdout = process.stdout_pipe()?;
        let killer = process.group_killer()?;
        let pid = process.pid().unwrap_or(-1);

        // A blocked read is interruptible only by taking the process
        // down; the once-latch keeps this safe against the reap.
        let watchdog_cancel = self.cancel.clone();
        let watchdog_killer = killer.clone();
        self.tracker.spawn(async move {
            watchdog_cancel.cancelled().await;
            watchdog_killer.kill();
        });

        let throughput = registry().meter(&format!("source.{}.throughput", self.stream));
        let tx = self
            .tx
            .take()
            .expect("a source can only be started once");
        self.tracker.spawn(run_source(
            process,
            stdout,
            Arc::clone(&self.pool),
            tx,
            self.cancel.clone(),
            self.death.clone(),
            killer,
            throughput,
            self.stream.clone(),
        ));

        tracing::info!(
            stream = %self.stream,
            screen = %screen_name,
            pid,
            "Source started"
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
        tracing::debug!(stream = %self.stream, "Source stopped");
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_source(
    mut process: ManagedProcess,
    mut stdout: PipeReader,
    pool: Arc<BufferPool>,
    tx: mpsc::Sender<Buf>,
    cancel: CancellationToken,
    death: Latch,
    killer: GroupKiller,
    throughput: Arc<Meter>,
    stream: String,
) {
    // Process alive.
    loop {
        if cancel.is_cancelled() {
            break;
        }

        // All buffers held downstream means a consumer is wedged; die
        // and let the flow rebuild instead of buffering further.
        let mut buf = match pool.try_take() {
            Some(buf) => buf,
            None => {
                tracing::error!(stream = %stream, "Source out of buffer space");
                break;
            }
        };
        buf.acquire_first();

        let read = tokio::select! {
            result = stdout.read(buf.as_mut_slice()) => Some(result),
            _ = cancel.cancelled() => None,
        };
        let n = match read {
            Some(Ok(n)) => n,
            Some(Err(error)) => {
                buf.free();
                tracing::debug!(stream = %stream, error = %error, "Read failed");
                break;
            }
            None => {
                buf.free();
                break;
            }
        };

        if n == 0 {
            buf.free();
            tracing::debug!(stream = %stream, "Source reached end of stream");
            break;
        }

        buf.set_len(n);
        let sent = tokio::select! {
            result = tx.send(buf.clone()) => Some(result),
            _ = cancel.cancelled() => None,
        };
        match sent {
            Some(Ok(())) => throughput.mark(n as u64),
            Some(Err(returned)) => {
                returned.0.free();
                break;
            }
            None => {
                buf.free();
                break;
            }
        }
    }

    tracing::debug!(stream = %stream, "Source dying");
    death.fall();

    // Process dead (or dying); hold position until the flow says stop,
    // then make sure the group is gone before reaping.
    cancel.cancelled().await;
    killer.kill();
    process.wait().await;
}
