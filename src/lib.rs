//! # proctimer
//! Stopwatch, countdown and alarm primitives.
//!
//! [`HourGlass`] and [`Alarm`] run in a forked worker process. When they fire,
//! the worker stops the owning process with `SIGSTOP`, runs the callback and
//! resumes the owner with `SIGCONT`, so the owner never runs concurrently with
//! its own callback. [`Timer`] is an in-process stopwatch.
//!
//! Callbacks run in the worker's address space: side effects on the owner's
//! memory are not visible to the owner. Use a [`SharedCounter`] (or any other
//! IPC) to report back.

/// Prints when `visible` is set, and logs at debug level with the `logging` feature.
macro_rules! narrate {
    ($visible:expr, $($arg:tt)+) => {{
        #[cfg(feature = "logging")]
        log::debug!($($arg)+);
        if $visible {
            println!($($arg)+);
        }
    }};
}

pub mod alarm;
pub mod callback;
pub mod clock;
pub mod errors;
pub mod hourglass;
pub mod process;
pub mod schedule;
pub mod shared;
pub mod timer;

pub use alarm::Alarm;
pub use callback::{invoke, Invocation, Target, TimerCallback};
pub use clock::{checked_seconds, to_clock_parts, ClockParts};
pub use errors::TimerError;
pub use hourglass::HourGlass;
pub use process::pid_exists;
pub use schedule::ScheduleSpec;
pub use shared::SharedCounter;
pub use timer::{Mark, Timed, Timer, TimerGuard, TimerState};
