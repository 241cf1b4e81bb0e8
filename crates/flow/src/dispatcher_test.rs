//! Tests for the fan-out dispatcher: delivery, refcount accounting and
//! drop-the-slow-consumer eviction.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use streamtee_pool::{Buf, BufferPool};

use crate::latch::Latch;
use crate::sinkset::{dispatch, SinkHandle};

struct Rig {
    up_tx: mpsc::Sender<Buf>,
    add_tx: mpsc::Sender<SinkHandle>,
    remove_tx: mpsc::Sender<SinkHandle>,
    cancel: CancellationToken,
    run_exited: Latch,
    task: tokio::task::JoinHandle<()>,
}

fn spawn_dispatcher() -> Rig {
    let (up_tx, up_rx) = mpsc::channel(4);
    let (add_tx, add_rx) = mpsc::channel(1);
    let (remove_tx, remove_rx) = mpsc::channel(1);
    let cancel = CancellationToken::new();
    let run_exited = Latch::new();

    let task = tokio::spawn(dispatch(
        up_rx,
        add_rx,
        remove_rx,
        cancel.clone(),
        run_exited.clone(),
        "teststream".to_string(),
    ));

    Rig {
        up_tx,
        add_tx,
        remove_tx,
        cancel,
        run_exited,
        task,
    }
}

fn test_handle(id: u64, name: &str, capacity: usize) -> (SinkHandle, mpsc::Receiver<Buf>, CancellationToken) {
    let (tx, rx) = mpsc::channel(capacity);
    let token = CancellationToken::new();
    (
        SinkHandle::new(id, name.to_string(), tx, token.clone()),
        rx,
        token,
    )
}

fn publish(pool: &BufferPool, payload: &[u8]) -> Buf {
    let mut buf = pool.try_take().expect("pool should have a free buffer");
    buf.acquire_first();
    buf.as_mut_slice()[..payload.len()].copy_from_slice(payload);
    buf.set_len(payload.len());
    buf
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition did not hold within two seconds");
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

#[tokio::test]
async fn test_buffer_reaches_every_live_sink_in_order() {
    let pool = BufferPool::new("dispatch-order", 4, 16);
    let rig = spawn_dispatcher();

    let (h1, mut rx1, _t1) = test_handle(1, "a", 4);
    let (h2, mut rx2, _t2) = test_handle(2, "b", 4);
    rig.add_tx.send(h1).await.unwrap();
    rig.add_tx.send(h2).await.unwrap();
    settle().await;

    rig.up_tx.send(publish(&pool, b"one")).await.unwrap();
    rig.up_tx.send(publish(&pool, b"two")).await.unwrap();

    for rx in [&mut rx1, &mut rx2] {
        let first = rx.recv().await.unwrap();
        assert_eq!(first.as_slice(), b"one");
        first.free();

        let second = rx.recv().await.unwrap();
        assert_eq!(second.as_slice(), b"two");
        second.free();
    }

    wait_until(|| pool.is_full()).await;

    rig.cancel.cancel();
    rig.task.await.unwrap();
}

#[tokio::test]
async fn test_stalled_sink_is_evicted_and_killed_on_first_miss() {
    let pool = BufferPool::new("dispatch-stall", 8, 16);
    let rig = spawn_dispatcher();

    let (fast, mut fast_rx, fast_token) = test_handle(1, "fast", 8);
    // A sink that never reads: one slot of channel space, then it stalls.
    let (slow, mut slow_rx, slow_token) = test_handle(2, "slow", 1);
    rig.add_tx.send(fast).await.unwrap();
    rig.add_tx.send(slow).await.unwrap();
    settle().await;

    // First buffer fits both channels.
    rig.up_tx.send(publish(&pool, b"b1")).await.unwrap();
    // Second buffer finds the slow sink's channel full: evict and kill.
    rig.up_tx.send(publish(&pool, b"b2")).await.unwrap();
    // Third buffer only goes to the surviving sink.
    rig.up_tx.send(publish(&pool, b"b3")).await.unwrap();

    for expected in [b"b1".as_slice(), b"b2", b"b3"] {
        let buf = fast_rx.recv().await.unwrap();
        assert_eq!(buf.as_slice(), expected);
        buf.free();
    }

    wait_until(|| slow_token.is_cancelled()).await;
    assert!(!fast_token.is_cancelled());

    // The slow sink holds exactly the one delivery from before it
    // stalled; freeing it balances the books.
    let left_behind = slow_rx.recv().await.unwrap();
    assert_eq!(left_behind.as_slice(), b"b1");
    left_behind.free();
    assert!(slow_rx.try_recv().is_err());

    wait_until(|| pool.is_full()).await;

    rig.cancel.cancel();
    rig.task.await.unwrap();
}

#[tokio::test]
async fn test_buffers_without_sinks_are_recycled() {
    let pool = BufferPool::new("dispatch-nosinks", 2, 16);
    let rig = spawn_dispatcher();

    rig.up_tx.send(publish(&pool, b"x")).await.unwrap();
    rig.up_tx.send(publish(&pool, b"y")).await.unwrap();

    wait_until(|| pool.is_full()).await;

    rig.cancel.cancel();
    rig.task.await.unwrap();
}

#[tokio::test]
async fn test_removed_sink_gets_nothing() {
    let pool = BufferPool::new("dispatch-remove", 2, 16);
    let rig = spawn_dispatcher();

    let (handle, mut rx, _token) = test_handle(7, "leaver", 4);
    rig.add_tx.send(handle.clone()).await.unwrap();
    settle().await;
    rig.remove_tx.send(handle).await.unwrap();
    settle().await;

    rig.up_tx.send(publish(&pool, b"after")).await.unwrap();
    wait_until(|| pool.is_full()).await;
    assert!(rx.try_recv().is_err());

    rig.cancel.cancel();
    rig.task.await.unwrap();
}

#[tokio::test]
async fn test_closed_upstream_does_not_end_the_dispatcher() {
    let pool = BufferPool::new("dispatch-close", 2, 16);
    let rig = spawn_dispatcher();

    rig.up_tx.send(publish(&pool, b"last")).await.unwrap();
    drop(rig.up_tx);
    settle().await;

    // Still serving adds and removes after the upstream closed.
    assert!(!rig.task.is_finished());
    let (handle, _rx, _token) = test_handle(3, "late", 4);
    rig.add_tx.send(handle).await.unwrap();

    assert!(!rig.run_exited.has_fallen());
    rig.cancel.cancel();
    rig.task.await.unwrap();
    assert!(rig.run_exited.has_fallen());
}
