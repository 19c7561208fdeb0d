use std::cmp::Ordering;
use std::fmt;
use std::future::Future;
use std::ops::{Deref, DerefMut};
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
#[cfg(feature = "logging")]
use log::debug;

use crate::clock::ClockParts;
use crate::errors::TimerError;

const NAME: &str = "timer";

/// Represents the state of a stopwatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerState {
    Idle,
    Running,
}

/// An elapsed-time snapshot taken by [`Timer::mark`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mark {
    /// Time since the start when the mark was taken.
    pub elapsed: Duration,
    /// Optional caller-supplied label.
    pub label: Option<String>,
}

impl fmt::Display for Mark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", ClockParts::from(self.elapsed))?;
        if let Some(label) = &self.label {
            write!(f, "\t{label}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct Started {
    instant: Instant,
    wall: DateTime<Local>,
}

/// In-process stopwatch with marks.
///
/// Besides explicit `start`/`stop`, a timer can guard a scope ([`Timer::enter`],
/// [`Timer::scope`], [`Timer::time_async`]) or wrap a function
/// ([`Timer::decorate`]). Scopes nest: only the outermost one starts and
/// stops the clock.
#[derive(Debug, Clone, Default)]
pub struct Timer {
    started: Option<Started>,
    marks: Vec<Mark>,
    visibility: bool,
    clear_marks_on_stop: bool,
    depth: usize,
    runs: usize,
    last_elapsed: Option<Duration>,
}

impl Timer {
    /// Creates a new, idle timer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Narrates start, stop, restart and marks to standard output.
    pub fn with_visibility(mut self, visibility: bool) -> Self {
        self.visibility = visibility;
        self
    }

    /// Drops the recorded marks whenever the timer stops.
    pub fn with_clear_marks_on_stop(mut self, clear: bool) -> Self {
        self.clear_marks_on_stop = clear;
        self
    }

    /// Whether narration is on.
    pub fn visibility(&self) -> bool {
        self.visibility
    }

    /// Current [`TimerState`].
    pub fn state(&self) -> TimerState {
        if self.started.is_some() {
            TimerState::Running
        } else {
            TimerState::Idle
        }
    }

    /// `true` while running.
    pub fn status(&self) -> bool {
        self.started.is_some()
    }

    /// Wall-clock time of the current start, if running.
    pub fn started_at(&self) -> Option<DateTime<Local>> {
        self.started.map(|s| s.wall)
    }

    /// Number of completed start/stop cycles.
    pub fn runs(&self) -> usize {
        self.runs
    }

    /// Elapsed time reported by the most recent stop.
    pub fn last_elapsed(&self) -> Option<Duration> {
        self.last_elapsed
    }

    /// Starts the timer.
    pub fn start(&mut self) -> Result<&mut Self, TimerError> {
        if self.started.is_some() {
            return Err(TimerError::AlreadyRunning(NAME));
        }
        let started = Started {
            instant: Instant::now(),
            wall: Local::now(),
        };
        self.started = Some(started);
        narrate!(self.visibility, "Starttime: {}", started.wall.format("%H:%M:%S%.6f"));
        Ok(self)
    }

    /// Stops the timer and returns the elapsed time.
    pub fn stop(&mut self) -> Result<Duration, TimerError> {
        let started = self.started.take().ok_or(TimerError::NotRunning(NAME))?;
        let elapsed = started.instant.elapsed();
        self.depth = 0;
        self.runs += 1;
        self.last_elapsed = Some(elapsed);

        narrate!(self.visibility, "Endtime: {}", ClockParts::from(elapsed));
        if self.visibility && !self.marks.is_empty() {
            println!("Marks:");
            self.print_marks();
        }
        if self.clear_marks_on_stop {
            self.marks.clear();
        }
        Ok(elapsed)
    }

    /// Moves the start to now and drops all marks.
    pub fn restart(&mut self) -> Result<(), TimerError> {
        if self.started.is_none() {
            return Err(TimerError::NotRunning(NAME));
        }
        let now = Local::now();
        narrate!(self.visibility, "Restarting point: {}", now);
        self.started = Some(Started {
            instant: Instant::now(),
            wall: now,
        });
        self.marks.clear();
        Ok(())
    }

    /// Time since the start.
    pub fn elapsed(&self) -> Result<Duration, TimerError> {
        self.started
            .map(|s| s.instant.elapsed())
            .ok_or(TimerError::NotRunning(NAME))
    }

    /// Time since the start, broken into clock parts.
    pub fn current_time(&self) -> Result<ClockParts, TimerError> {
        self.elapsed().map(ClockParts::from)
    }

    /// Records the elapsed time with an optional label.
    pub fn mark(&mut self, label: Option<&str>) -> Result<Duration, TimerError> {
        let elapsed = self.elapsed()?;
        let mark = Mark {
            elapsed,
            label: label.map(str::to_string),
        };
        narrate!(self.visibility, "Mark {}: {}", self.marks.len() + 1, mark);
        self.marks.push(mark);
        Ok(elapsed)
    }

    /// Recorded marks in the order they were taken.
    pub fn marks(&self) -> Result<&[Mark], TimerError> {
        if self.marks.is_empty() {
            return Err(TimerError::NoMarks);
        }
        Ok(&self.marks)
    }

    fn print_marks(&self) {
        for (i, mark) in self.marks.iter().enumerate() {
            println!("{}: {}", i + 1, mark);
        }
    }

    /// Enters a timed scope, starting the clock unless an enclosing scope
    /// already did. The returned guard ends the scope when dropped.
    ///
    /// A timer started by hand with [`Timer::start`] is not a scope: entering
    /// it fails with [`TimerError::AlreadyRunning`] and leaves it running.
    pub fn enter(&mut self) -> Result<TimerGuard<'_>, TimerError> {
        if self.depth == 0 {
            self.start()?;
        }
        self.depth += 1;
        #[cfg(feature = "logging")]
        debug!("Entered timer scope at depth {}.", self.depth);
        Ok(TimerGuard { timer: self })
    }

    fn exit(&mut self) {
        self.depth = self.depth.saturating_sub(1);
        if self.depth == 0 && self.started.is_some() {
            let _ = self.stop();
        }
    }

    /// Runs `f` inside a timed scope. The clock stops before the result,
    /// including an `Err`, is handed back.
    pub fn scope<R, F>(&mut self, f: F) -> Result<R, TimerError>
    where
        F: FnOnce(&mut Timer) -> R,
    {
        let mut guard = self.enter()?;
        Ok(f(&mut guard))
    }

    /// Awaits `future` inside a timed scope.
    pub async fn time_async<Fut>(&mut self, future: Fut) -> Result<Fut::Output, TimerError>
    where
        Fut: Future,
    {
        let _guard = self.enter()?;
        Ok(future.await)
    }

    /// Turns the timer into a reusable wrapper around `func`.
    pub fn decorate<F>(self, func: F) -> Timed<F> {
        Timed { timer: self, func }
    }
}

/// Keeps a timed scope open; see [`Timer::enter`].
pub struct TimerGuard<'a> {
    timer: &'a mut Timer,
}

impl Deref for TimerGuard<'_> {
    type Target = Timer;

    fn deref(&self) -> &Timer {
        self.timer
    }
}

impl DerefMut for TimerGuard<'_> {
    fn deref_mut(&mut self) -> &mut Timer {
        self.timer
    }
}

impl Drop for TimerGuard<'_> {
    fn drop(&mut self) {
        self.timer.exit();
    }
}

/// A function wrapped by a [`Timer`]; every call is a timed scope.
pub struct Timed<F> {
    timer: Timer,
    func: F,
}

impl<F> Timed<F> {
    /// Calls the wrapped function inside a timed scope.
    pub fn call<A, R>(&mut self, args: A) -> Result<R, TimerError>
    where
        F: FnMut(A) -> R,
    {
        let _guard = self.timer.enter()?;
        Ok((self.func)(args))
    }

    /// The timer that measures each call.
    pub fn timer(&self) -> &Timer {
        &self.timer
    }

    /// Gives back the timer and the function.
    pub fn into_inner(self) -> (Timer, F) {
        (self.timer, self.func)
    }
}

impl PartialEq for Timer {
    fn eq(&self, other: &Self) -> bool {
        self.started.map(|s| s.instant) == other.started.map(|s| s.instant)
    }
}

impl PartialOrd for Timer {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(
            self.started
                .map(|s| s.instant)
                .cmp(&other.started.map(|s| s.instant)),
        )
    }
}

impl fmt::Display for Timer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Timer")?;
        writeln!(f, "Visibility: {}", self.visibility)?;
        writeln!(f, "Status: {}", if self.status() { "on" } else { "off" })?;
        match (self.started, self.current_time()) {
            (Some(started), Ok(current)) => {
                writeln!(f, "Start time: {}", started.wall)?;
                writeln!(f, "Time since start: {current}")?;
            }
            _ => {
                writeln!(f, "Start time: None")?;
                writeln!(f, "Time since start: None")?;
            }
        }
        writeln!(f, "Quantity of marks: {}", self.marks.len())
    }
}
