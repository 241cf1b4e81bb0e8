//! Log-sink screens.
//!
//! Children write their stderr to a PTY that a detached GNU screen
//! session is attached to, so an operator can `screen -r` and watch any
//! process live. A [`ScreenService`] owns one such session at a time and
//! hands out descriptors for children to use as stderr.

use std::os::fd::{AsFd, OwnedFd};

use nix::pty::{openpty, Winsize};
use nix::sys::termios::Termios;
use nix::unistd::ttyname;
use tokio::sync::Mutex;

use crate::error::{ProcessError, Result};
use crate::managed::ManagedProcess;

/// A live log sink: the screen session's name and a descriptor a child
/// can use as its stderr.
pub struct Screen {
    pub name: String,
    pub fd: OwnedFd,
}

/// How a service hands out its screen session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScreenMode {
    /// One session is spawned lazily and reused for every acquire;
    /// release is a no-op and only [`ScreenService::stop`] tears down.
    Shared,
    /// Every acquire gets a fresh session; release tears it down.
    Exclusive,
}

/// Supplies log-sink screens to the processes of one flow role.
pub struct ScreenService {
    name: String,
    mode: ScreenMode,
    session: Mutex<Option<ScreenSession>>,
}

struct ScreenSession {
    process: ManagedProcess,
    master: OwnedFd,
    _slave: OwnedFd,
}

impl ScreenService {
    /// A service that reuses one screen session across restarts.
    pub fn shared(name: impl Into<String>) -> Self {
        Self::with_mode(name, ScreenMode::Shared)
    }

    /// A service that spawns a fresh screen session per acquire.
    pub fn exclusive(name: impl Into<String>) -> Self {
        Self::with_mode(name, ScreenMode::Exclusive)
    }

    /// Build a service with an explicit mode (`reuse_screens` maps
    /// shared/exclusive).
    pub fn with_mode(name: impl Into<String>, mode: ScreenMode) -> Self {
        Self {
            name: safe_screen_name(&name.into()),
            mode,
            session: Mutex::new(None),
        }
    }

    /// The (sanitized) screen session name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get a log sink, spawning the screen session if needed.
    pub async fn acquire(&self) -> Result<Screen> {
        let mut session = self.session.lock().await;

        match self.mode {
            ScreenMode::Shared => {
                if session.is_none() {
                    *session = Some(self.spawn_session().await?);
                }
            }
            ScreenMode::Exclusive => {
                if let Some(stale) = session.take() {
                    tracing::warn!(
                        screen = %self.name,
                        "Log sink acquired again without a release"
                    );
                    teardown(stale).await;
                }
                *session = Some(self.spawn_session().await?);
            }
        }

        let live = session.as_ref().ok_or(ProcessError::NotStarted)?;
        let fd = live.master.try_clone().map_err(ProcessError::CloneFd)?;
        Ok(Screen {
            name: self.name.clone(),
            fd,
        })
    }

    /// Give the log sink back. Tears down the session in exclusive mode.
    pub async fn release(&self) {
        if self.mode == ScreenMode::Exclusive {
            if let Some(session) = self.session.lock().await.take() {
                teardown(session).await;
            }
        }
    }

    /// Tear down the session regardless of mode.
    pub async fn stop(&self) {
        if let Some(session) = self.session.lock().await.take() {
            teardown(session).await;
        }
    }

    async fn spawn_session(&self) -> Result<ScreenSession> {
        let pty = openpty(None::<&Winsize>, None::<&Termios>).map_err(ProcessError::Pty)?;
        let master = pty.master;
        let slave = pty.slave;
        let tty_path = ttyname(slave.as_fd()).map_err(ProcessError::PtyName)?;

        let mut process = ManagedProcess::new(
            "screen",
            [
                "-DmUS".to_string(),
                self.name.clone(),
                tty_path.to_string_lossy().into_owned(),
            ],
        );
        process.set_stdin(master.try_clone().map_err(ProcessError::CloneFd)?);
        process.start().await?;

        tracing::debug!(
            screen = %self.name,
            pid = process.pid().unwrap_or(-1),
            "Log sink screen started"
        );

        Ok(ScreenSession {
            process,
            master,
            _slave: slave,
        })
    }
}

async fn teardown(session: ScreenSession) {
    let ScreenSession {
        mut process,
        master,
        _slave,
    } = session;
    drop(master);
    drop(_slave);
    let _ = process.end().await;
}

/// Shorten a name so GNU screen can use it as a session name.
///
/// Screen creates sockets at `/var/run/screen/S-$user/$pid.$name` and
/// unix socket paths cap at 108 bytes including the terminator; budget
/// for the username, a 5-digit PID and the separating dot.
fn safe_screen_name(name: &str) -> String {
    let user_len = std::env::var("USER").map(|user| user.len()).unwrap_or(32);
    let max = 108usize.saturating_sub(1 + user_len + 5 + 1);

    let mut name = name.to_string();
    while name.len() > max {
        name.pop();
    }
    name
}
