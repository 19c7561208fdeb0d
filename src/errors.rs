//! Error handling module for proctimer.

use nix::errno::Errno;
use thiserror::Error;

/// Custom error type for timer, hourglass and alarm operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TimerError {
    /// Invalid parameter provided.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// A schedule entry could not be turned into a timestamp.
    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    /// `start` called while the engine is running.
    #[error("The {0} is already running!")]
    AlreadyRunning(&'static str),

    /// Operation that needs a running engine attempted on an idle one.
    #[error("There is no {0} running!")]
    NotRunning(&'static str),

    /// The stopwatch has no marks to show.
    #[error("There are no marks to show!")]
    NoMarks,

    /// Callback execution failed.
    #[error("Callback execution failed: {0}")]
    CallbackError(String),

    /// Waiting on a worker from async code failed.
    #[error("Waiting for the worker failed: {0}")]
    WaitFailed(String),

    /// Reading or writing the worker report channel failed.
    #[error("I/O error: {0}")]
    Io(String),

    /// An OS primitive (fork, kill, waitpid, mmap) failed.
    #[error("OS error: {0}")]
    Os(#[from] Errno),
}

impl From<std::io::Error> for TimerError {
    fn from(e: std::io::Error) -> Self {
        TimerError::Io(e.to_string())
    }
}

impl TimerError {
    /// Returns `true` for errors caused by calling an operation in the wrong state.
    pub fn is_state_error(&self) -> bool {
        matches!(self, TimerError::AlreadyRunning(_) | TimerError::NotRunning(_))
    }
}
