//! Callback targets and the invoker that runs them without letting failures escape.

use std::any::Any;
use std::fmt;
use std::thread;

use async_trait::async_trait;
#[cfg(feature = "logging")]
use log::{debug, error};

use crate::errors::TimerError;

/// A trait for timer callbacks.
#[async_trait]
pub trait TimerCallback: Send + Sync {
    /// The function to execute when the timer triggers.
    async fn execute(&self) -> Result<(), TimerError>;
}

/// Adapts a plain function and its stored arguments to [`TimerCallback`].
struct FnCallback<F, A> {
    func: F,
    args: A,
}

#[async_trait]
impl<F, A> TimerCallback for FnCallback<F, A>
where
    F: Fn(&A) + Send + Sync,
    A: Send + Sync,
{
    async fn execute(&self) -> Result<(), TimerError> {
        (self.func)(&self.args);
        Ok(())
    }
}

/// What an engine runs when it fires.
///
/// Arguments only exist inside [`Target::Callback`], so a set of arguments
/// without something to call them with cannot be expressed.
pub enum Target {
    /// Nothing to run; the engine still counts down and narrates.
    None,
    /// A callback plus a printable description of its arguments.
    Callback {
        callback: Box<dyn TimerCallback>,
        arguments: Option<String>,
    },
}

impl Target {
    /// Wraps a function that takes no arguments.
    pub fn call<F>(func: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Target::Callback {
            callback: Box::new(FnCallback {
                func: move |_: &()| func(),
                args: (),
            }),
            arguments: None,
        }
    }

    /// Wraps a function together with the arguments it will be called with.
    pub fn call_with<F, A>(func: F, args: A) -> Self
    where
        F: Fn(&A) + Send + Sync + 'static,
        A: fmt::Debug + Send + Sync + 'static,
    {
        let arguments = Some(format!("{args:?}"));
        Target::Callback {
            callback: Box::new(FnCallback { func, args }),
            arguments,
        }
    }

    /// Wraps an async, fallible callback.
    pub fn callback<C>(callback: C) -> Self
    where
        C: TimerCallback + 'static,
    {
        Target::Callback {
            callback: Box::new(callback),
            arguments: None,
        }
    }

    /// `true` unless this is [`Target::None`].
    pub fn is_set(&self) -> bool {
        matches!(self, Target::Callback { .. })
    }

    /// Debug rendering of the stored arguments, if any were given.
    pub fn arguments(&self) -> Option<&str> {
        match self {
            Target::Callback { arguments, .. } => arguments.as_deref(),
            Target::None => None,
        }
    }
}

impl Default for Target {
    fn default() -> Self {
        Target::None
    }
}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::None => f.write_str("Target::None"),
            Target::Callback { arguments, .. } => f
                .debug_struct("Target::Callback")
                .field("arguments", arguments)
                .finish_non_exhaustive(),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::None => f.write_str("None"),
            Target::Callback { .. } => f.write_str("<callback>"),
        }
    }
}

/// Outcome of a single [`invoke`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    /// No target was set.
    Skipped,
    /// The callback returned normally.
    Completed,
    /// The callback returned an error or panicked.
    Failed(String),
}

impl Invocation {
    /// `true` if the callback returned an error or panicked.
    pub fn is_failure(&self) -> bool {
        matches!(self, Invocation::Failed(_))
    }
}

/// Runs `target` and reports how it went. Never panics on behalf of the callback.
///
/// The callback gets its own OS thread and a current-thread tokio runtime.
/// The fresh thread matters inside a forked worker: the forking thread may
/// have been inside a runtime, and that context is copied into the child.
pub fn invoke(target: &Target, visibility: bool) -> Invocation {
    let callback = match target {
        Target::None => return Invocation::Skipped,
        Target::Callback { callback, .. } => callback.as_ref(),
    };

    #[cfg(feature = "logging")]
    debug!("Invoking callback.");

    let outcome = thread::scope(|scope| {
        let runner = thread::Builder::new()
            .name("proctimer-callback".into())
            .spawn_scoped(scope, || {
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_time()
                    .build()
                    .map_err(|e| TimerError::CallbackError(e.to_string()))?;
                runtime.block_on(callback.execute())
            });
        match runner {
            Ok(handle) => handle
                .join()
                .unwrap_or_else(|panic| Err(TimerError::CallbackError(panic_message(panic)))),
            Err(e) => Err(TimerError::CallbackError(e.to_string())),
        }
    });

    match outcome {
        Ok(()) => Invocation::Completed,
        Err(e) => {
            #[cfg(feature = "logging")]
            error!("Callback execution error: {}", e);
            if visibility {
                println!("{e}");
            }
            Invocation::Failed(e.to_string())
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "callback panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Failing;

    #[async_trait]
    impl TimerCallback for Failing {
        async fn execute(&self) -> Result<(), TimerError> {
            Err(TimerError::CallbackError("Simulated error!".into()))
        }
    }

    struct Sleepy(Arc<AtomicUsize>);

    #[async_trait]
    impl TimerCallback for Sleepy {
        async fn execute(&self) -> Result<(), TimerError> {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn missing_target_is_a_no_op() {
        assert_eq!(invoke(&Target::None, false), Invocation::Skipped);
    }

    #[test]
    fn spreads_stored_arguments() {
        let seen = Arc::new(AtomicUsize::new(0));
        let sink = Arc::clone(&seen);
        let target = Target::call_with(
            move |(a, b): &(usize, usize)| {
                sink.store(a * 10 + b, Ordering::SeqCst);
            },
            (4, 2),
        );
        assert_eq!(target.arguments(), Some("(4, 2)"));
        assert_eq!(invoke(&target, false), Invocation::Completed);
        assert_eq!(seen.load(Ordering::SeqCst), 42);
    }

    #[test]
    fn errors_are_reported_not_propagated() {
        let outcome = invoke(&Target::callback(Failing), false);
        assert_eq!(
            outcome,
            Invocation::Failed("Callback execution failed: Simulated error!".into())
        );
    }

    #[test]
    fn panics_are_caught() {
        let target = Target::call(|| panic!("boom"));
        assert_eq!(
            invoke(&target, false),
            Invocation::Failed("Callback execution failed: boom".into())
        );
    }

    #[test]
    fn async_callbacks_can_await() {
        let count = Arc::new(AtomicUsize::new(0));
        let target = Target::callback(Sleepy(Arc::clone(&count)));
        assert_eq!(invoke(&target, false), Invocation::Completed);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn works_from_inside_a_runtime() {
        let count = Arc::new(AtomicUsize::new(0));
        let sink = Arc::clone(&count);
        let target = Target::call(move || {
            sink.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(invoke(&target, false), Invocation::Completed);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
