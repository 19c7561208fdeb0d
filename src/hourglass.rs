//! Countdown engine backed by a worker process.
//!
//! The remaining time lives in a [`SharedCounter`] (milliseconds) that both
//! the owner and the worker see. Only the worker decrements it; the owner
//! reads it and may overwrite it with [`HourGlass::retarget`].

use std::cmp::Ordering;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use crate::callback::{invoke, Invocation, Target};
use crate::clock::{checked_seconds, to_clock_parts, ClockParts};
use crate::errors::TimerError;
use crate::process::{join, OwnerProcess, WorkerProcess};
use crate::shared::SharedCounter;

const NAME: &str = "hourglass";

/// Length of one countdown tick.
pub const DEFAULT_TICK: Duration = Duration::from_secs(1);

/// A countdown that runs its target once the time is up.
#[derive(Debug)]
pub struct HourGlass {
    remaining_ms: SharedCounter,
    target: Target,
    visibility: bool,
    persist: bool,
    tick: Duration,
    worker: Mutex<Option<WorkerProcess>>,
}

fn to_millis(seconds: f64) -> i64 {
    (seconds * 1000.0).round() as i64
}

impl HourGlass {
    /// Creates an idle hourglass holding `seconds`, which must be positive.
    pub fn new(seconds: f64) -> Result<Self, TimerError> {
        let millis = to_millis(checked_seconds(seconds)?);
        if millis <= 0 {
            return Err(TimerError::InvalidParameter(
                "Seconds must be greater than 0!".into(),
            ));
        }
        Ok(HourGlass {
            remaining_ms: SharedCounter::new(millis)?,
            target: Target::None,
            visibility: false,
            persist: false,
            tick: DEFAULT_TICK,
            worker: Mutex::new(None),
        })
    }

    /// Sets what runs when the time is up. Without one the hourglass is a silent countdown.
    pub fn with_target(mut self, target: Target) -> Self {
        self.target = target;
        self
    }

    /// Narrates lifecycle events to standard output.
    pub fn with_visibility(mut self, visibility: bool) -> Self {
        self.visibility = visibility;
        self
    }

    /// Keeps counting down after the owner process has exited.
    pub fn with_persist(mut self, persist: bool) -> Self {
        self.persist = persist;
        self
    }

    /// Adjusts the tick length. Takes effect on the next `start`.
    pub fn set_tick(&mut self, tick: Duration) -> Result<(), TimerError> {
        if tick.as_millis() == 0 {
            return Err(TimerError::InvalidParameter(
                "Tick must be at least one millisecond.".into(),
            ));
        }
        self.tick = tick;
        Ok(())
    }

    /// What runs when the time is up.
    pub fn target(&self) -> &Target {
        &self.target
    }

    /// Whether lifecycle events are narrated.
    pub fn visibility(&self) -> bool {
        self.visibility
    }

    /// Whether the countdown outlives its owner.
    pub fn persist(&self) -> bool {
        self.persist
    }

    /// Length of one countdown tick.
    pub fn tick(&self) -> Duration {
        self.tick
    }

    /// Spawns the countdown worker.
    pub fn start(&self) -> Result<&Self, TimerError> {
        let mut worker = self.lock_worker();
        if worker.as_mut().is_some_and(|w| w.is_alive()) {
            return Err(TimerError::AlreadyRunning(NAME));
        }
        narrate!(self.visibility, "Starting hourglass!");

        let owner = OwnerProcess::current();
        *worker = Some(WorkerProcess::spawn(|| self.count_down(owner))?);
        Ok(self)
    }

    /// Kills the worker without running the target.
    pub fn stop(&self) -> Result<(), TimerError> {
        let mut worker = self.lock_worker();
        let Some(mut running) = worker.take() else {
            return Err(TimerError::NotRunning(NAME));
        };
        if !running.is_alive() {
            return Err(TimerError::NotRunning(NAME));
        }
        if let Err(e) = running.terminate() {
            *worker = Some(running);
            return Err(e);
        }
        narrate!(self.visibility, "Hourglass stopped!");
        Ok(())
    }

    /// Blocks until the worker exits, either because the time ran out or
    /// because somebody stopped it.
    pub fn wait(&self) -> Result<(), TimerError> {
        let pid = self.pid()?;
        join(pid)?;
        self.refresh();
        Ok(())
    }

    /// Async variant of [`HourGlass::wait`]; the blocking join runs on tokio's blocking pool.
    pub async fn wait_async(&self) -> Result<(), TimerError> {
        let pid = self.pid()?;
        tokio::task::spawn_blocking(move || join(pid))
            .await
            .map_err(|e| TimerError::WaitFailed(e.to_string()))??;
        self.refresh();
        Ok(())
    }

    /// `true` while the worker process is alive.
    pub fn status(&self) -> bool {
        self.refresh().is_some()
    }

    /// Process id of the worker.
    pub fn pid(&self) -> Result<u32, TimerError> {
        self.refresh().ok_or(TimerError::NotRunning(NAME))
    }

    /// Raw value of the shared counter, readable in any state.
    pub fn remaining_seconds(&self) -> f64 {
        self.remaining_ms.get() as f64 / 1000.0
    }

    /// Live remaining time of a running countdown.
    pub fn remaining_time(&self) -> Result<ClockParts, TimerError> {
        if !self.status() {
            return Err(TimerError::NotRunning(NAME));
        }
        Ok(to_clock_parts(self.remaining_seconds()))
    }

    /// Overwrites the remaining time in place.
    ///
    /// A running worker picks the new value up on its next tick; the tick
    /// cadence itself is not restarted.
    pub fn retarget(&self, seconds: f64) -> Result<&Self, TimerError> {
        let millis = to_millis(checked_seconds(seconds)?);
        self.remaining_ms.set(millis);
        Ok(self)
    }

    fn lock_worker(&self) -> MutexGuard<'_, Option<WorkerProcess>> {
        self.worker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the worker pid if it is still alive, forgetting it otherwise.
    fn refresh(&self) -> Option<u32> {
        let mut worker = self.lock_worker();
        if worker.as_mut().is_some_and(|w| w.is_alive()) {
            worker.as_ref().map(|w| w.pid())
        } else {
            *worker = None;
            None
        }
    }

    /// Worker body: runs in the forked child.
    fn count_down(&self, owner: OwnerProcess) -> i32 {
        let tick_ms = self.tick.as_millis().min(i64::MAX as u128) as i64;

        while self.persist || owner.is_alive() {
            let current = self.remaining_ms.get();
            if current <= 0 {
                break;
            }
            // The last tick may be shorter, so a fractional remainder is kept.
            let step = current.min(tick_ms);
            thread::sleep(Duration::from_millis(step as u64));
            self.remaining_ms.update(|ms| Some((ms - step).max(0)));
        }

        let owner_alive = owner.is_alive();
        narrate!(
            self.visibility,
            "{}",
            if owner_alive {
                "Time is up!"
            } else {
                "Main process interrupted!"
            }
        );

        let suspension = owner.suspend();
        let outcome = invoke(&self.target, self.visibility);
        drop(suspension);

        match outcome {
            Invocation::Failed(_) => 1,
            Invocation::Completed | Invocation::Skipped => 0,
        }
    }
}

impl PartialEq for HourGlass {
    fn eq(&self, other: &Self) -> bool {
        self.remaining_ms.get() == other.remaining_ms.get()
    }
}

impl PartialOrd for HourGlass {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.remaining_ms.get().cmp(&other.remaining_ms.get()))
    }
}

impl fmt::Display for HourGlass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "HourGlass")?;
        writeln!(f, "Visibility: {}", self.visibility)?;
        writeln!(
            f,
            "Remaining time: {}",
            to_clock_parts(self.remaining_seconds().max(0.0))
        )?;
        match self.refresh() {
            Some(pid) => writeln!(f, "Process id: {pid}")?,
            None => writeln!(f, "Process id: None")?,
        }
        writeln!(f, "Target: {}", self.target)?;
        writeln!(f, "Arguments: {}", self.target.arguments().unwrap_or("()"))?;
        writeln!(f, "Persist: {}", self.persist)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_positive_durations() {
        assert!(matches!(
            HourGlass::new(0.0),
            Err(TimerError::InvalidParameter(_))
        ));
        assert!(HourGlass::new(-3.0).is_err());
        assert!(HourGlass::new(f64::NAN).is_err());
        assert!(HourGlass::new(0.0001).is_err());
    }

    #[test]
    fn keeps_the_initial_duration_until_started() {
        for seconds in [0.5, 1.0, 5.5, 3601.0] {
            let hourglass = HourGlass::new(seconds).unwrap();
            assert_eq!(hourglass.remaining_seconds(), seconds);
            assert!(!hourglass.status());
        }
    }

    #[test]
    fn exposes_its_configuration() {
        let hourglass = HourGlass::new(5.0)
            .unwrap()
            .with_target(Target::call_with(|_: &(&str, &str)| {}, ("arg1", "arg2")))
            .with_visibility(true)
            .with_persist(true);
        assert!(hourglass.target().is_set());
        assert_eq!(hourglass.target().arguments(), Some("(\"arg1\", \"arg2\")"));
        assert!(hourglass.visibility());
        assert!(hourglass.persist());
        assert_eq!(hourglass.tick(), DEFAULT_TICK);
    }

    #[test]
    fn idle_state_errors() {
        let hourglass = HourGlass::new(5.0).unwrap();
        assert_eq!(hourglass.stop(), Err(TimerError::NotRunning(NAME)));
        assert_eq!(hourglass.wait(), Err(TimerError::NotRunning(NAME)));
        assert_eq!(hourglass.pid(), Err(TimerError::NotRunning(NAME)));
        assert!(hourglass.remaining_time().unwrap_err().is_state_error());
    }

    #[test]
    fn compares_by_remaining_time() {
        let a = HourGlass::new(5.0).unwrap();
        let b = HourGlass::new(5.0).unwrap();
        assert!(a == b);

        b.retarget(6.0).unwrap();
        assert!(a != b);
        assert!(a < b);
        assert!(a <= b);
        assert!(b > a);
        assert!(b >= a);
    }

    #[test]
    fn retarget_validates_and_overwrites() {
        let hourglass = HourGlass::new(2.0).unwrap();
        assert!(hourglass.retarget(-1.0).is_err());
        hourglass.retarget(3.25).unwrap();
        assert_eq!(hourglass.remaining_seconds(), 3.25);
    }

    #[test]
    fn tick_must_be_positive() {
        let mut hourglass = HourGlass::new(1.0).unwrap();
        assert!(hourglass.set_tick(Duration::ZERO).is_err());
        hourglass.set_tick(Duration::from_millis(100)).unwrap();
        assert_eq!(hourglass.tick(), Duration::from_millis(100));
    }

    #[test]
    fn displays_its_state() {
        let text = HourGlass::new(3.5).unwrap().to_string();
        assert!(text.contains("Remaining time: 00:00:03.500000"));
        assert!(text.contains("Process id: None"));
        assert!(text.contains("Target: None"));
    }
}
