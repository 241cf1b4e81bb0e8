//! A child process in its own process group, with a dedicated
//! spawn-and-reap thread.

use std::os::fd::OwnedFd;
use std::os::unix::process::CommandExt;
use std::process::{Command, ExitStatus, Stdio};
use std::sync::{Arc, Once};
use std::time::Duration;

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tokio::sync::{oneshot, watch};

use crate::error::{ProcessError, Result};
use crate::pipe::{PipeReader, PipeWriter};

/// Grace period between SIGTERM and SIGKILL in [`ManagedProcess::end`].
const TERM_GRACE: Duration = Duration::from_millis(250);

/// What the runner thread reports back after spawning.
struct Spawned {
    pid: i32,
    stdin: Option<OwnedFd>,
    stdout: Option<OwnedFd>,
}

/// Kills a process group with SIGKILL, at most once.
///
/// Every group-kill path of one process must go through the same
/// `GroupKiller`, so a kill can never be issued again after the reap.
#[derive(Clone)]
pub struct GroupKiller {
    pgid: i32,
    fired: Arc<Once>,
}

impl GroupKiller {
    /// Signal the group. Later calls are no-ops, and an already-gone
    /// group is tolerated.
    pub fn kill(&self) {
        let pgid = self.pgid;
        self.fired.call_once(move || {
            let _ = signal::killpg(Pid::from_raw(pgid), Signal::SIGKILL);
        });
    }
}

/// A supervised child process.
///
/// The child runs in a fresh process group and carries
/// `PR_SET_PDEATHSIG(SIGKILL)`, so it dies with the supervisor. Because
/// the death signal tracks the forking OS thread, spawn and reap both
/// happen on one dedicated thread; the async side talks to it through
/// channels.
pub struct ManagedProcess {
    program: String,
    args: Vec<String>,
    stdin_fd: Option<OwnedFd>,
    stderr_fd: Option<OwnedFd>,
    want_stdin_pipe: bool,
    want_stdout_pipe: bool,

    pid: Option<i32>,
    stdin: Option<PipeWriter>,
    stdout: Option<PipeReader>,
    killer: Option<GroupKiller>,
    wait_gate: Option<std::sync::mpsc::Sender<()>>,
    exit_rx: Option<watch::Receiver<Option<ExitStatus>>>,
}

impl ManagedProcess {
    /// Describe a process to run. Nothing happens until [`start`].
    ///
    /// [`start`]: ManagedProcess::start
    pub fn new<S, I, A>(program: S, args: I) -> Self
    where
        S: Into<String>,
        I: IntoIterator<Item = A>,
        A: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            stdin_fd: None,
            stderr_fd: None,
            want_stdin_pipe: false,
            want_stdout_pipe: false,
            pid: None,
            stdin: None,
            stdout: None,
            killer: None,
            wait_gate: None,
            exit_rx: None,
        }
    }

    /// Request a stdin pipe; retrieve it after start with
    /// [`stdin_pipe`](ManagedProcess::stdin_pipe).
    pub fn pipe_stdin(&mut self) {
        self.want_stdin_pipe = true;
    }

    /// Request a stdout pipe; retrieve it after start with
    /// [`stdout_pipe`](ManagedProcess::stdout_pipe).
    pub fn pipe_stdout(&mut self) {
        self.want_stdout_pipe = true;
    }

    /// Use `fd` as the child's stdin. Takes precedence over
    /// [`pipe_stdin`](ManagedProcess::pipe_stdin).
    pub fn set_stdin(&mut self, fd: OwnedFd) {
        self.stdin_fd = Some(fd);
    }

    /// Use `fd` as the child's stderr (normally a log-sink screen).
    pub fn set_stderr(&mut self, fd: OwnedFd) {
        self.stderr_fd = Some(fd);
    }

    /// Spawn the child.
    ///
    /// Must only be called once.
    pub async fn start(&mut self) -> Result<()> {
        let (ready_tx, ready_rx) = oneshot::channel();
        let (gate_tx, gate_rx) = std::sync::mpsc::channel::<()>();
        let (exit_tx, exit_rx) = watch::channel(None);

        let program = self.program.clone();
        let args = self.args.clone();
        let stdin_fd = self.stdin_fd.take();
        let stderr_fd = self.stderr_fd.take();
        let want_stdin_pipe = self.want_stdin_pipe;
        let want_stdout_pipe = self.want_stdout_pipe;

        std::thread::Builder::new()
            .name("process-runner".to_string())
            .spawn(move || {
                run_child(
                    program,
                    args,
                    stdin_fd,
                    stderr_fd,
                    want_stdin_pipe,
                    want_stdout_pipe,
                    ready_tx,
                    gate_rx,
                    exit_tx,
                )
            })
            .map_err(ProcessError::RunnerThread)?;

        let spawned = ready_rx.await.map_err(|_| ProcessError::RunnerGone)??;

        self.pid = Some(spawned.pid);
        self.killer = Some(GroupKiller {
            pgid: spawned.pid,
            fired: Arc::new(Once::new()),
        });
        self.stdin = match spawned.stdin {
            Some(fd) => Some(PipeWriter::new(fd).map_err(ProcessError::Pipe)?),
            None => None,
        };
        self.stdout = match spawned.stdout {
            Some(fd) => Some(PipeReader::new(fd).map_err(ProcessError::Pipe)?),
            None => None,
        };
        self.wait_gate = Some(gate_tx);
        self.exit_rx = Some(exit_rx);
        Ok(())
    }

    /// Child PID, once started.
    pub fn pid(&self) -> Option<i32> {
        self.pid
    }

    /// Take the child's stdin pipe.
    pub fn stdin_pipe(&mut self) -> Result<PipeWriter> {
        self.stdin.take().ok_or(ProcessError::MissingPipe)
    }

    /// Take the child's stdout pipe.
    pub fn stdout_pipe(&mut self) -> Result<PipeReader> {
        self.stdout.take().ok_or(ProcessError::MissingPipe)
    }

    /// The once-latched group killer for this process.
    pub fn group_killer(&self) -> Result<GroupKiller> {
        self.killer.clone().ok_or(ProcessError::NotStarted)
    }

    /// SIGKILL the whole process group. Idempotent.
    pub fn kill_group(&self) {
        if let Some(killer) = &self.killer {
            killer.kill();
        }
    }

    /// Subscribe to the child's exit status and let the runner thread
    /// start reaping.
    pub fn wait_channel(&mut self) -> Result<watch::Receiver<Option<ExitStatus>>> {
        let rx = self.exit_rx.as_ref().ok_or(ProcessError::NotStarted)?;
        // Dropping the gate unblocks the runner thread; doing it once is
        // enough and keeps this idempotent.
        self.wait_gate.take();
        Ok(rx.clone())
    }

    /// Wait for the child to exit and return its status.
    ///
    /// Returns `None` if the process was never started or the status is
    /// unavailable.
    pub async fn wait(&mut self) -> Option<ExitStatus> {
        let mut rx = self.wait_channel().ok()?;
        loop {
            {
                let current: Option<ExitStatus> = rx.borrow().clone();
                if current.is_some() {
                    return current;
                }
            }
            if rx.changed().await.is_err() {
                let last: Option<ExitStatus> = rx.borrow().clone();
                return last;
            }
        }
    }

    /// Graceful termination: SIGTERM, a short grace period, SIGKILL,
    /// then reap. Idempotent; an already-dead child is tolerated.
    pub async fn end(&mut self) -> Option<ExitStatus> {
        let pid = match self.pid {
            Some(pid) => Pid::from_raw(pid),
            None => return None,
        };

        let _ = signal::kill(pid, Signal::SIGTERM);
        tokio::time::sleep(TERM_GRACE).await;
        let _ = signal::kill(pid, Signal::SIGKILL);
        self.wait().await
    }
}

#[allow(clippy::too_many_arguments)]
fn run_child(
    program: String,
    args: Vec<String>,
    stdin_fd: Option<OwnedFd>,
    stderr_fd: Option<OwnedFd>,
    want_stdin_pipe: bool,
    want_stdout_pipe: bool,
    ready_tx: oneshot::Sender<Result<Spawned>>,
    gate_rx: std::sync::mpsc::Receiver<()>,
    exit_tx: watch::Sender<Option<ExitStatus>>,
) {
    let mut command = Command::new(&program);
    command.args(&args);
    command.stdin(match (stdin_fd, want_stdin_pipe) {
        (Some(fd), _) => Stdio::from(fd),
        (None, true) => Stdio::piped(),
        (None, false) => Stdio::null(),
    });
    command.stdout(if want_stdout_pipe {
        Stdio::piped()
    } else {
        Stdio::null()
    });
    command.stderr(match stderr_fd {
        Some(fd) => Stdio::from(fd),
        None => Stdio::null(),
    });

    // A fresh process group lets one signal take down the child and
    // everything it spawned. PDEATHSIG must be installed in the child
    // (fork clears it, exec keeps it) and is attributed to the OS thread
    // that forked, which is the thread that also waits below.
    unsafe {
        command.pre_exec(|| {
            if libc::setpgid(0, 0) != 0 {
                return Err(std::io::Error::last_os_error());
            }
            if libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGKILL) != 0 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(source) => {
            let _ = ready_tx.send(Err(ProcessError::Spawn { program, source }));
            return;
        }
    };

    let spawned = Spawned {
        pid: child.id() as i32,
        stdin: child.stdin.take().map(OwnedFd::from),
        stdout: child.stdout.take().map(OwnedFd::from),
    };
    let _ = ready_tx.send(Ok(spawned));

    // Reaping is held back until the owner subscribes to the exit status
    // (or goes away); group kills are latched, so the group can never be
    // signalled again once the wait has returned.
    let _ = gate_rx.recv();
    let status = child.wait().ok();
    let _ = exit_tx.send(status);
}
