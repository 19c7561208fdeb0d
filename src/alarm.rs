//! Alarm engine: a worker process polls the wall clock and fires the target
//! whenever the current second matches a schedule.
//!
//! The worker keeps its own copy of the schedule list. Every firing is
//! reported back over a socket pair as the list index of the matched entry,
//! and the owner applies the same removal to its list the next time it looks.

use std::io::{ErrorKind, Read, Write};
use std::os::unix::net::UnixStream;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use chrono::NaiveDateTime;
#[cfg(feature = "logging")]
use log::debug;

use crate::callback::{invoke, Target};
use crate::errors::TimerError;
use crate::process::{join, OwnerProcess, WorkerProcess};
use crate::schedule::{self, normalize_all, ScheduleBook, ScheduleSpec};

const NAME: &str = "alarm";
const REPORT_LEN: usize = 4;

/// How often the worker samples the clock.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Fires a target at one or more absolute local times.
#[derive(Debug)]
pub struct Alarm {
    target: Target,
    visibility: bool,
    keep_schedules: bool,
    suspend_owner: bool,
    poll_interval: Duration,
    state: Mutex<AlarmState>,
}

#[derive(Debug, Default)]
struct AlarmState {
    schedules: Vec<NaiveDateTime>,
    worker: Option<WorkerProcess>,
    reports: Option<ReportReader>,
    fired: usize,
}

/// Owner end of the report channel.
#[derive(Debug)]
struct ReportReader {
    stream: UnixStream,
    pending: Vec<u8>,
}

impl ReportReader {
    /// Returns every complete report received so far without blocking.
    fn read_available(&mut self) -> Vec<usize> {
        let mut buf = [0u8; 256];
        loop {
            match self.stream.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => self.pending.extend_from_slice(&buf[..n]),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }

        let complete = self.pending.len() - self.pending.len() % REPORT_LEN;
        let indices = self.pending[..complete]
            .chunks_exact(REPORT_LEN)
            .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]) as usize)
            .collect();
        self.pending.drain(..complete);
        indices
    }
}

impl AlarmState {
    /// Applies reports from the worker to the owner's copy of the schedules.
    fn drain(&mut self, keep_schedules: bool) {
        let Some(reports) = self.reports.as_mut() else {
            return;
        };
        for index in reports.read_available() {
            self.fired += 1;
            if !keep_schedules && index < self.schedules.len() {
                self.schedules.remove(index);
            }
        }
    }

    /// Returns the worker pid if it is alive; otherwise forgets the worker
    /// after collecting its last reports.
    fn refresh(&mut self, keep_schedules: bool) -> Option<u32> {
        let alive = self.worker.as_mut().is_some_and(|w| w.is_alive());
        self.drain(keep_schedules);
        if alive {
            self.worker.as_ref().map(|w| w.pid())
        } else {
            self.worker = None;
            self.reports = None;
            None
        }
    }
}

impl Alarm {
    /// Creates an idle alarm. `schedules` must not be empty and `target` must be set.
    pub fn new<I, S>(schedules: I, target: Target) -> Result<Self, TimerError>
    where
        I: IntoIterator<Item = S>,
        S: Into<ScheduleSpec>,
    {
        let schedules = normalize_all(schedules)?;
        if schedules.is_empty() {
            return Err(TimerError::InvalidParameter(
                "Schedules must be defined!".into(),
            ));
        }
        if !target.is_set() {
            return Err(TimerError::InvalidParameter(
                "Target function must be defined!".into(),
            ));
        }
        Ok(Alarm {
            target,
            visibility: false,
            keep_schedules: false,
            suspend_owner: true,
            poll_interval: DEFAULT_POLL_INTERVAL,
            state: Mutex::new(AlarmState {
                schedules,
                ..AlarmState::default()
            }),
        })
    }

    /// Narrates lifecycle events to standard output.
    pub fn with_visibility(mut self, visibility: bool) -> Self {
        self.visibility = visibility;
        self
    }

    /// Leaves matched schedules in place instead of removing them.
    pub fn with_keep_schedules(mut self, keep_schedules: bool) -> Self {
        self.keep_schedules = keep_schedules;
        self
    }

    /// Whether the owner is stopped while the target runs. On by default.
    pub fn with_suspend_owner(mut self, suspend_owner: bool) -> Self {
        self.suspend_owner = suspend_owner;
        self
    }

    /// Adjusts how often the worker samples the clock. Takes effect on the next `start`.
    pub fn set_poll_interval(&mut self, interval: Duration) -> Result<(), TimerError> {
        if interval.is_zero() || interval >= Duration::from_secs(1) {
            return Err(TimerError::InvalidParameter(
                "Poll interval must be greater than zero and shorter than one second.".into(),
            ));
        }
        self.poll_interval = interval;
        Ok(())
    }

    /// What runs when a schedule matches.
    pub fn target(&self) -> &Target {
        &self.target
    }

    /// Whether lifecycle events are narrated.
    pub fn visibility(&self) -> bool {
        self.visibility
    }

    /// Whether matched schedules stay in the list.
    pub fn keep_schedules(&self) -> bool {
        self.keep_schedules
    }

    /// Whether the owner is stopped while the target runs.
    pub fn suspend_owner(&self) -> bool {
        self.suspend_owner
    }

    /// How often the worker samples the clock.
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// The owner's copy of the schedule list, with all reported firings applied.
    pub fn schedules(&self) -> Vec<NaiveDateTime> {
        let mut state = self.lock_state();
        state.refresh(self.keep_schedules);
        state.schedules.clone()
    }

    /// Number of firings reported by workers of this alarm so far.
    pub fn fired(&self) -> usize {
        let mut state = self.lock_state();
        state.refresh(self.keep_schedules);
        state.fired
    }

    /// Appends a schedule. Only allowed while the alarm is idle.
    pub fn add_schedule(&self, schedule: impl Into<ScheduleSpec>) -> Result<(), TimerError> {
        let at = schedule.into().normalize()?;
        let mut state = self.lock_state();
        if state.refresh(self.keep_schedules).is_some() {
            return Err(TimerError::AlreadyRunning(NAME));
        }
        state.schedules.push(at);
        Ok(())
    }

    /// Spawns the polling worker.
    pub fn start(&self) -> Result<&Self, TimerError> {
        let mut state = self.lock_state();
        if state.refresh(self.keep_schedules).is_some() {
            return Err(TimerError::AlreadyRunning(NAME));
        }
        if state.schedules.is_empty() {
            return Err(TimerError::InvalidParameter(
                "Schedules must be defined!".into(),
            ));
        }
        narrate!(self.visibility, "Setting up alarm!");

        let (reader, writer) = UnixStream::pair()?;
        reader.set_nonblocking(true)?;
        writer.set_nonblocking(true)?;

        let book = ScheduleBook::new(&state.schedules, self.keep_schedules);
        let owner = OwnerProcess::current();
        let worker = WorkerProcess::spawn(move || self.poll(book, owner, writer))?;

        state.worker = Some(worker);
        state.reports = Some(ReportReader {
            stream: reader,
            pending: Vec::new(),
        });
        Ok(self)
    }

    /// Kills the worker.
    pub fn stop(&self) -> Result<(), TimerError> {
        let mut state = self.lock_state();
        let Some(mut running) = state.worker.take() else {
            return Err(TimerError::NotRunning(NAME));
        };
        if !running.is_alive() {
            state.drain(self.keep_schedules);
            state.reports = None;
            return Err(TimerError::NotRunning(NAME));
        }
        if let Err(e) = running.terminate() {
            state.worker = Some(running);
            return Err(e);
        }
        state.drain(self.keep_schedules);
        state.reports = None;
        narrate!(self.visibility, "Alarm stopped!");
        Ok(())
    }

    /// Blocks until the worker exits: every schedule fired, the owner went
    /// away, or somebody stopped it.
    pub fn wait(&self) -> Result<(), TimerError> {
        let pid = self.pid()?;
        join(pid)?;
        self.lock_state().refresh(self.keep_schedules);
        Ok(())
    }

    /// Async variant of [`Alarm::wait`]; the blocking join runs on tokio's blocking pool.
    pub async fn wait_async(&self) -> Result<(), TimerError> {
        let pid = self.pid()?;
        tokio::task::spawn_blocking(move || join(pid))
            .await
            .map_err(|e| TimerError::WaitFailed(e.to_string()))??;
        self.lock_state().refresh(self.keep_schedules);
        Ok(())
    }

    /// `true` while the worker process is alive.
    pub fn status(&self) -> bool {
        self.lock_state().refresh(self.keep_schedules).is_some()
    }

    /// Process id of the worker.
    pub fn pid(&self) -> Result<u32, TimerError> {
        self.lock_state()
            .refresh(self.keep_schedules)
            .ok_or(TimerError::NotRunning(NAME))
    }

    fn lock_state(&self) -> MutexGuard<'_, AlarmState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Worker body: runs in the forked child.
    fn poll(&self, mut book: ScheduleBook, owner: OwnerProcess, mut reports: UnixStream) -> i32 {
        while !book.is_empty() && owner.is_alive() {
            let Some(index) = book.next_due(schedule::now()) else {
                thread::sleep(self.poll_interval);
                continue;
            };

            #[cfg(feature = "logging")]
            debug!("Alarm schedule {} matched.", index);

            let suspension = self.suspend_owner.then(|| owner.suspend());
            invoke(&self.target, self.visibility);
            // A full channel only loses the firing count of a kept schedule;
            // removals are bounded by the list length.
            let _ = reports.write_all(&(index as u32).to_le_bytes());
            drop(suspension);
        }

        narrate!(self.visibility, "Alarm finished!");
        0
    }
}
