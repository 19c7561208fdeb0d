//! Worker process lifecycle and owner suspend/resume.
//!
//! Workers are plain `fork`ed children. The child runs a closure and leaves
//! through `_exit`, so it never unwinds back into the caller's code and never
//! runs the parent's exit handlers.
//!
//! Only the forking thread exists in the child. The worker still takes the
//! stdout lock and spawns threads, so a worker forked while another owner
//! thread holds the stdout lock can hang on its first narration. Avoid
//! starting engines while other threads are printing.

use std::io::{self, Write};
use std::panic::{self, AssertUnwindSafe};

use nix::errno::Errno;
use nix::libc;
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{fork, getpid, ForkResult, Pid};
#[cfg(feature = "logging")]
use log::{debug, error};

use crate::errors::TimerError;

/// Exit code of a worker whose body panicked.
const EXIT_PANICKED: i32 = 101;

/// Returns `true` if a process with this id exists (including zombies).
pub fn pid_exists(pid: u32) -> bool {
    alive(Pid::from_raw(pid as i32))
}

fn alive(pid: Pid) -> bool {
    matches!(kill(pid, None), Ok(()) | Err(Errno::EPERM))
}

/// A forked background worker owned by one engine.
#[derive(Debug)]
pub(crate) struct WorkerProcess {
    pid: Pid,
    exited: bool,
}

impl WorkerProcess {
    /// Forks and runs `body` in the child; its return value becomes the exit code.
    pub(crate) fn spawn<F>(body: F) -> Result<Self, TimerError>
    where
        F: FnOnce() -> i32,
    {
        match unsafe { fork() }? {
            ForkResult::Parent { child } => {
                #[cfg(feature = "logging")]
                debug!("Spawned worker process {}.", child);
                Ok(WorkerProcess {
                    pid: child,
                    exited: false,
                })
            }
            ForkResult::Child => {
                // Failures are reported through `invoke`, gated by visibility.
                panic::set_hook(Box::new(|_| {}));
                let code = panic::catch_unwind(AssertUnwindSafe(body)).unwrap_or(EXIT_PANICKED);
                let _ = io::stdout().flush();
                unsafe { libc::_exit(code) }
            }
        }
    }

    pub(crate) fn pid(&self) -> u32 {
        self.pid.as_raw() as u32
    }

    /// Non-blocking liveness check. Reaps the worker if it has exited.
    pub(crate) fn is_alive(&mut self) -> bool {
        while !self.exited {
            match waitpid(self.pid, Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::StillAlive) => return true,
                Ok(WaitStatus::Exited(..)) | Ok(WaitStatus::Signaled(..)) => self.exited = true,
                Ok(_) => return true,
                Err(Errno::EINTR) => continue,
                // ECHILD: somebody else already reaped it.
                Err(_) => self.exited = true,
            }
        }
        false
    }

    /// Kills the worker immediately and reaps it.
    pub(crate) fn terminate(&mut self) -> Result<(), TimerError> {
        if self.exited {
            return Ok(());
        }
        match kill(self.pid, Signal::SIGKILL) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(e) => return Err(e.into()),
        }
        join(self.pid())?;
        self.exited = true;
        Ok(())
    }
}

/// Blocks until the worker with this id has exited and reaps it.
///
/// Takes a bare id so that callers can release their locks while waiting.
pub(crate) fn join(pid: u32) -> Result<(), TimerError> {
    let pid = Pid::from_raw(pid as i32);
    loop {
        match waitpid(pid, None) {
            Ok(WaitStatus::Exited(..)) | Ok(WaitStatus::Signaled(..)) => return Ok(()),
            Ok(_) | Err(Errno::EINTR) => continue,
            Err(Errno::ECHILD) => return Ok(()),
            Err(e) => return Err(e.into()),
        }
    }
}

/// The process that started an engine, as seen from its worker.
#[derive(Debug, Clone, Copy)]
pub(crate) struct OwnerProcess {
    pid: Pid,
}

impl OwnerProcess {
    pub(crate) fn current() -> Self {
        OwnerProcess { pid: getpid() }
    }

    pub(crate) fn is_alive(&self) -> bool {
        alive(self.pid)
    }

    /// Stops the owner with `SIGSTOP`. It is resumed when the guard drops.
    pub(crate) fn suspend(&self) -> Suspension {
        let active = match kill(self.pid, Signal::SIGSTOP) {
            Ok(()) => true,
            Err(_e) => {
                #[cfg(feature = "logging")]
                error!("Could not suspend owner {}: {}", self.pid, _e);
                false
            }
        };
        Suspension {
            pid: self.pid,
            active,
        }
    }
}

/// Keeps the owner process stopped for as long as it lives.
#[must_use = "the owner is resumed as soon as the suspension is dropped"]
pub(crate) struct Suspension {
    pid: Pid,
    active: bool,
}

impl Drop for Suspension {
    fn drop(&mut self) {
        if self.active {
            let _ = kill(self.pid, Signal::SIGCONT);
        }
    }
}
