//! The no-bytes watchdog: a pass-through stage on the source channel.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use streamtee_pool::Buf;

/// Wrap `rx` with a stage that watches for silence.
///
/// Buffers pass through unchanged. A full interval without one logs the
/// source as slow; a second consecutive silent interval cancels `kill`
/// (exactly once) and the timer stops ticking. The stage ends when the
/// upstream closes or the downstream goes away.
pub(crate) fn watch_channel(
    mut rx: mpsc::Receiver<Buf>,
    timeout: Duration,
    kill: CancellationToken,
    tracker: &TaskTracker,
    stream: String,
) -> mpsc::Receiver<Buf> {
    let (tx, out) = mpsc::channel(1);

    tracker.spawn(async move {
        let mut ticker =
            tokio::time::interval_at(tokio::time::Instant::now() + timeout, timeout);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        let mut slow = false;
        let mut armed = true;

        loop {
            tokio::select! {
                msg = rx.recv() => {
                    let buf = match msg {
                        Some(buf) => buf,
                        None => break,
                    };
                    slow = false;
                    if tx.send(buf.clone()).await.is_err() {
                        // Downstream is gone; give the reference back.
                        buf.free();
                        break;
                    }
                }

                _ = ticker.tick(), if armed => {
                    if !slow {
                        slow = true;
                        tracing::warn!(stream = %stream, "Source is slow");
                    } else {
                        tracing::warn!(stream = %stream, "Source stalled, killing it");
                        kill.cancel();
                        armed = false;
                    }
                }
            }
        }
    });

    out
}
