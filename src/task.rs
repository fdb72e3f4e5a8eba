//! The per-family sampling logic plugged into a [`Sampler`](crate::Sampler).

use std::time::Duration;

use crate::config::SamplerConfig;
use crate::error::{Result, SamplerError};

/// What a [`Sampler`](crate::Sampler) does after a failed cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureAction {
    /// Unregister from the scheduler. A configuration update may start the
    /// sampler again.
    Stop,
    /// Stop and release every resource. The sampler never runs again.
    Dispose,
}

/// Family specific behavior of a sampler.
///
/// The lifecycle (registration with the scheduler, enablement, failure
/// handling) lives in [`Sampler`](crate::Sampler); implementors only read
/// their metric source, compute deltas and forward samples.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use runtime_samplers::{Result, SamplingTask};
///
/// struct Heartbeat {
///     beats: u64,
/// }
///
/// impl SamplingTask for Heartbeat {
///     fn name(&self) -> &'static str {
///         "heartbeat"
///     }
///
///     fn interval(&self) -> Duration {
///         Duration::from_secs(30)
///     }
///
///     fn sample(&mut self) -> Result<()> {
///         self.beats += 1;
///         Ok(())
///     }
/// }
/// ```
pub trait SamplingTask: Send + 'static {
    /// Name of this sampler for logging.
    fn name(&self) -> &'static str;

    /// How often [`sample`](Self::sample) should run.
    fn interval(&self) -> Duration;

    /// Sampler specific part of the enabled predicate.
    ///
    /// Evaluated on every start, never cached.
    fn is_enabled(&self, _config: &SamplerConfig) -> bool {
        true
    }

    /// Acquires resources (event listeners, counters) after the sampler was
    /// registered with the scheduler.
    fn on_start(&mut self, _config: &SamplerConfig) -> Result<()> {
        Ok(())
    }

    /// Releases resources that are re-acquired on the next start.
    fn on_stop(&mut self) {}

    /// Releases everything. Called at most once.
    fn on_dispose(&mut self) {}

    /// Runs one sampling cycle.
    ///
    /// A failed cycle must leave the previous-sample baseline untouched.
    fn sample(&mut self) -> Result<()>;

    /// Decides how the sampler reacts to a failed cycle.
    fn failure_action(&self, _error: &SamplerError) -> FailureAction {
        FailureAction::Stop
    }
}
