//! Error types shared by samplers and metric source accessors.

use thiserror::Error;

/// The metric family a sampler or accessor deals with.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MetricFamily {
    /// Process CPU times.
    Cpu,
    /// Process memory usage.
    Memory,
    /// Garbage collector statistics.
    Gc,
    /// Thread pool capacity and throughput.
    ThreadPool,
}

impl std::fmt::Display for MetricFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            MetricFamily::Cpu => "cpu",
            MetricFamily::Memory => "memory",
            MetricFamily::Gc => "gc",
            MetricFamily::ThreadPool => "threadpool",
        })
    }
}

/// Errors produced while reading runtime metrics.
///
/// Whether an error disables a sampler permanently is decided by the
/// sampler's failure policy, except for [`SamplerError::Unsupported`], which
/// always does.
#[derive(Debug, Error)]
pub enum SamplerError {
    /// The metric family is not available on the current runtime.
    #[error("{family} metrics are not supported on this runtime")]
    Unsupported {
        /// The family that is missing.
        family: MetricFamily,
    },
    /// The sampler could not set up its metric source and will never sample.
    #[error("{family} sampler failed to initialize: {reason}")]
    InitializationFailed {
        /// The family of the sampler.
        family: MetricFamily,
        /// What went wrong.
        reason: String,
    },
    /// The accessor failed to produce a value this cycle.
    #[error("metric source unavailable: {0}")]
    Unavailable(String),
    /// The process is not allowed to read the requested counters.
    #[error("not authorized to read performance counters (running as {identity})")]
    Unauthorized {
        /// Best-effort description of the OS identity of this process.
        identity: String,
    },
    /// A performance counter proxy could not be created.
    #[error("failed to set up counter: {0}")]
    CounterSetup(String),
    /// A sampling call panicked.
    #[error("sampler panicked: {0}")]
    Panicked(String),
    /// An I/O error while reading OS provided statistics.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl SamplerError {
    /// Returns `true` if retrying can never succeed on this runtime.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            SamplerError::Unsupported { .. } | SamplerError::InitializationFailed { .. }
        )
    }

    pub(crate) fn unavailable(msg: impl Into<String>) -> Self {
        SamplerError::Unavailable(msg.into())
    }
}

/// Result alias used across the crate.
pub type Result<T, E = SamplerError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SamplerError::Unsupported {
            family: MetricFamily::Gc,
        };
        assert_eq!(err.to_string(), "gc metrics are not supported on this runtime");
        assert!(err.is_permanent());

        let err = SamplerError::unavailable("boom");
        assert_eq!(err.to_string(), "metric source unavailable: boom");
        assert!(!err.is_permanent());
    }

    #[test]
    fn test_io_conversion() {
        let err: SamplerError = std::io::Error::new(std::io::ErrorKind::Other, "nope").into();
        assert!(matches!(err, SamplerError::Io(_)));
    }
}
