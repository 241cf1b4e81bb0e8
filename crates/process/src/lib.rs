//! Streamtee - Process Management
//!
//! Wraps the child processes a flow runs: the media source, the sinks,
//! and the GNU screen instances that collect their stderr.
//!
//! # Design
//!
//! - **Process groups**: every child is started in its own process group
//!   so the whole group can be killed with one signal
//! - **Parent-death signal**: `PR_SET_PDEATHSIG` makes the kernel kill
//!   the child if the supervisor dies. The flag tracks the OS thread that
//!   forked, so each child gets a dedicated thread that both spawns and
//!   reaps it
//! - **Async pipes**: the child's stdin/stdout are plain pipes switched
//!   to non-blocking mode and driven through `tokio::io::unix::AsyncFd`,
//!   which keeps reads and writes cancellable
//! - **Once-latched group kill**: [`GroupKiller`] guarantees the group
//!   is signalled at most once per process lifetime, from whichever path
//!   gets there first
//! - **Log-sink screens**: [`ScreenService`] allocates a PTY, runs
//!   `screen` detached on it, and hands out the master side as a child's
//!   stderr so an operator can attach and watch

mod command;
mod error;
mod managed;
mod pipe;
mod screen;

pub use command::CmdTemplate;
pub use error::{ProcessError, Result};
pub use managed::{GroupKiller, ManagedProcess};
pub use pipe::{PipeReader, PipeWriter};
pub use screen::{Screen, ScreenMode, ScreenService};
