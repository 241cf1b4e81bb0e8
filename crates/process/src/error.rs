//! Process management error types.

use std::io;

use thiserror::Error;

/// Result type for process operations.
pub type Result<T> = std::result::Result<T, ProcessError>;

/// Errors that can occur when parsing commands, spawning children or
/// allocating log sinks.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// A command template was empty after tokenization.
    #[error("command must not be empty")]
    EmptyCommand,

    /// A command template could not be shell-tokenized.
    #[error("failed to tokenize command: {0}")]
    Tokenize(#[from] shell_words::ParseError),

    /// The child could not be spawned.
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        /// Program that failed to start.
        program: String,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },

    /// The dedicated spawn/wait thread could not be created.
    #[error("failed to start the process runner thread: {0}")]
    RunnerThread(#[source] io::Error),

    /// The runner thread died before reporting a spawn result.
    #[error("process runner thread exited before reporting a result")]
    RunnerGone,

    /// An operation that needs a started process was called too early.
    #[error("process was not started")]
    NotStarted,

    /// A pipe was not requested before start, or was already taken.
    #[error("pipe was not requested or was already taken")]
    MissingPipe,

    /// Switching a pipe to non-blocking mode failed.
    #[error("failed to set up a pipe: {0}")]
    Pipe(#[source] io::Error),

    /// PTY allocation for a log sink failed.
    #[error("failed to allocate a PTY: {0}")]
    Pty(#[source] nix::Error),

    /// The PTY's device path could not be resolved.
    #[error("failed to resolve the PTY name: {0}")]
    PtyName(#[source] nix::Error),

    /// A log sink descriptor could not be duplicated for a child.
    #[error("failed to duplicate a log sink descriptor: {0}")]
    CloneFd(#[source] io::Error),
}
