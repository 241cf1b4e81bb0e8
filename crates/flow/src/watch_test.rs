//! Tests for the no-bytes watchdog stage, under paused time.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use streamtee_pool::{Buf, BufferPool};

use crate::watch::watch_channel;

const TIMEOUT: Duration = Duration::from_secs(3);

struct Rig {
    tx: mpsc::Sender<Buf>,
    out: mpsc::Receiver<Buf>,
    kill: CancellationToken,
    tracker: TaskTracker,
}

fn spawn_watch() -> Rig {
    let (tx, rx) = mpsc::channel(1);
    let kill = CancellationToken::new();
    let tracker = TaskTracker::new();
    let out = watch_channel(rx, TIMEOUT, kill.clone(), &tracker, "teststream".to_string());

    Rig {
        tx,
        out,
        kill,
        tracker,
    }
}

fn publish(pool: &BufferPool, payload: &[u8]) -> Buf {
    let mut buf = pool.try_take().expect("pool should have a free buffer");
    buf.acquire_first();
    buf.as_mut_slice()[..payload.len()].copy_from_slice(payload);
    buf.set_len(payload.len());
    buf
}

#[tokio::test(start_paused = true)]
async fn test_buffers_pass_through_unchanged() {
    let pool = BufferPool::new("watch-pass", 2, 16);
    let mut rig = spawn_watch();

    rig.tx.send(publish(&pool, b"payload")).await.unwrap();
    let buf = rig.out.recv().await.unwrap();
    assert_eq!(buf.as_slice(), b"payload");
    buf.free();
    assert!(pool.is_full());

    drop(rig.tx);
    rig.tracker.close();
    rig.tracker.wait().await;
}

#[tokio::test(start_paused = true)]
async fn test_silent_source_is_killed_after_two_intervals() {
    let _pool = BufferPool::new("watch-silent", 2, 16);
    let rig = spawn_watch();

    // One silent interval: flagged slow, not yet killed.
    tokio::time::sleep(TIMEOUT + Duration::from_millis(100)).await;
    assert!(!rig.kill.is_cancelled());

    // A second consecutive silent interval: the source gets killed.
    tokio::time::sleep(TIMEOUT).await;
    assert!(rig.kill.is_cancelled());

    drop(rig.tx);
    rig.tracker.close();
    rig.tracker.wait().await;
}

#[tokio::test(start_paused = true)]
async fn test_traffic_resets_the_watchdog() {
    let pool = BufferPool::new("watch-reset", 4, 16);
    let mut rig = spawn_watch();

    // Ticks land at 3s, 6s and 9s. Buffers at 2.5s and 4s keep every
    // tick from seeing two silent intervals until 9s.
    tokio::time::sleep(Duration::from_millis(2500)).await;
    rig.tx.send(publish(&pool, b"a")).await.unwrap();
    let buf = rig.out.recv().await.unwrap();
    buf.free();

    tokio::time::sleep(Duration::from_millis(1500)).await;
    rig.tx.send(publish(&pool, b"b")).await.unwrap();
    let buf = rig.out.recv().await.unwrap();
    buf.free();

    // 8.5s: the 6s tick saw traffic since 4s, so still alive.
    tokio::time::sleep(Duration::from_millis(4500)).await;
    assert!(!rig.kill.is_cancelled());

    // 9.5s: the 9s tick closed two silent intervals.
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(rig.kill.is_cancelled());

    drop(rig.tx);
    rig.tracker.close();
    rig.tracker.wait().await;
}

#[tokio::test(start_paused = true)]
async fn test_kill_fires_only_once_and_forwarding_continues() {
    let pool = BufferPool::new("watch-once", 2, 16);
    let mut rig = spawn_watch();

    tokio::time::sleep(2 * TIMEOUT + Duration::from_millis(100)).await;
    assert!(rig.kill.is_cancelled());

    // The stage keeps forwarding while the source winds down.
    rig.tx.send(publish(&pool, b"tail")).await.unwrap();
    let buf = rig.out.recv().await.unwrap();
    assert_eq!(buf.as_slice(), b"tail");
    buf.free();
    assert!(pool.is_full());

    drop(rig.tx);
    rig.tracker.close();
    rig.tracker.wait().await;
}

#[tokio::test(start_paused = true)]
async fn test_closed_downstream_frees_in_flight_buffers() {
    let pool = BufferPool::new("watch-downstream", 2, 16);
    let mut rig = spawn_watch();

    // Hand one buffer through so the stage is past its first forward.
    rig.tx.send(publish(&pool, b"x")).await.unwrap();
    let buf = rig.out.recv().await.unwrap();
    buf.free();

    drop(rig.out);
    rig.tx.send(publish(&pool, b"y")).await.unwrap();

    // The stage notices the closed downstream, frees the buffer and
    // exits.
    rig.tracker.close();
    rig.tracker.wait().await;
    assert!(pool.is_full());
}
