//! Integration tests driving real child processes through
//! `ManagedProcess`.

use std::fs::File;
use std::os::fd::OwnedFd;
use std::time::{Duration, Instant};

use streamtee_process::{CmdTemplate, ManagedProcess};

#[tokio::test]
async fn test_exit_status_is_reported() {
    let mut process = ManagedProcess::new("sh", ["-c", "exit 7"]);
    process.start().await.unwrap();

    let status = process.wait().await.expect("status should be available");
    assert_eq!(status.code(), Some(7));
}

#[tokio::test]
async fn test_wait_is_idempotent() {
    let mut process = ManagedProcess::new("true", Vec::<String>::new());
    process.start().await.unwrap();

    let first = process.wait().await.unwrap();
    let second = process.wait().await.unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_spawn_failure_is_an_error() {
    let mut process = ManagedProcess::new("streamtee-no-such-binary", Vec::<String>::new());
    let error = process.start().await.expect_err("spawn should fail");
    assert!(error.to_string().contains("streamtee-no-such-binary"));
}

#[tokio::test]
async fn test_stdio_pipes_round_trip() {
    let mut process = ManagedProcess::new("cat", Vec::<String>::new());
    process.pipe_stdin();
    process.pipe_stdout();
    process.start().await.unwrap();

    let mut stdin = process.stdin_pipe().unwrap();
    let mut stdout = process.stdout_pipe().unwrap();

    stdin.write_all(b"hello through cat\n").await.unwrap();
    drop(stdin);

    let mut collected = Vec::new();
    let mut chunk = [0u8; 64];
    loop {
        let n = tokio::time::timeout(Duration::from_secs(5), stdout.read(&mut chunk))
            .await
            .expect("read should not hang")
            .unwrap();
        if n == 0 {
            break;
        }
        collected.extend_from_slice(&chunk[..n]);
    }
    assert_eq!(collected, b"hello through cat\n");

    process.wait().await.unwrap();
}

#[tokio::test]
async fn test_kill_group_interrupts_a_sleeping_child() {
    let mut process = ManagedProcess::new("sleep", ["30"]);
    process.start().await.unwrap();

    process.kill_group();

    let status = tokio::time::timeout(Duration::from_secs(5), process.wait())
        .await
        .expect("killed child should be reaped quickly")
        .unwrap();
    assert!(!status.success());
}

#[tokio::test]
async fn test_group_kill_is_latched_to_one_shot() {
    let mut process = ManagedProcess::new("sleep", ["30"]);
    process.start().await.unwrap();

    let killer = process.group_killer().unwrap();
    killer.kill();
    killer.kill();
    process.kill_group();

    process.wait().await.unwrap();

    // After the reap, further kills stay no-ops instead of signalling a
    // possibly recycled process group.
    killer.kill();
}

#[tokio::test]
async fn test_end_falls_back_to_sigkill_quickly() {
    // A child that ignores SIGTERM has to be taken down by the SIGKILL
    // that follows the grace period.
    let mut process = ManagedProcess::new("sh", ["-c", "trap '' TERM; sleep 30"]);
    process.start().await.unwrap();

    // Give the shell a moment to install the trap.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let started = Instant::now();
    let status = process.end().await.expect("status should be available");
    assert!(!status.success());
    assert!(
        started.elapsed() < Duration::from_secs(5),
        "end() should resolve within the TERM-to-KILL window"
    );
}

#[tokio::test]
async fn test_stderr_goes_to_the_configured_descriptor() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("stderr.log");
    let file = File::create(&path).unwrap();

    let mut process = ManagedProcess::new("sh", ["-c", "echo oops >&2"]);
    process.set_stderr(OwnedFd::from(file));
    process.start().await.unwrap();
    process.wait().await.unwrap();

    let contents = std::fs::read_to_string(&path).unwrap();
    assert_eq!(contents, "oops\n");
}

#[tokio::test]
async fn test_template_builds_a_runnable_process() {
    let template = CmdTemplate::parse("sh -c 'exit 3'").unwrap();
    let mut process = template.to_process();
    process.start().await.unwrap();
    let status = process.wait().await.unwrap();
    assert_eq!(status.code(), Some(3));
}
