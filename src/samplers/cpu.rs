//! CPU usage sampler.

use std::sync::Arc;
use std::time::Duration;

use crate::error::{MetricFamily, Result, SamplerError};
use crate::protocol::ImmutableCpuSample;
use crate::sources::{CpuReading, CpuSource};
use crate::task::SamplingTask;
use crate::transform::SampleTransformer;

/// How often CPU usage is sampled.
pub const CPU_SAMPLE_INTERVAL: Duration = Duration::from_secs(60);

/// Pairs consecutive CPU readings for the CPU transform.
///
/// The first baseline is read at construction. If that fails the sampler is
/// permanently unavailable and stops itself on its first cycle.
pub struct CpuSampler {
    source: Arc<dyn CpuSource>,
    transformer: Arc<dyn SampleTransformer<ImmutableCpuSample>>,
    processor_count: u32,
    last: std::result::Result<CpuReading, String>,
}

impl CpuSampler {
    /// Creates a CPU sampler reading from `source`.
    pub fn new<T>(source: Arc<dyn CpuSource>, transformer: T) -> Self
    where
        T: SampleTransformer<ImmutableCpuSample>,
    {
        let last = source.read().map_err(|err| {
            log::debug!("unable to read the initial process CPU time: {err}");
            err.to_string()
        });
        Self {
            processor_count: source.processor_count(),
            source,
            transformer: Arc::new(transformer),
            last,
        }
    }

    /// The reading the next sample is paired with.
    pub fn baseline(&self) -> Option<CpuReading> {
        self.last.as_ref().ok().copied()
    }
}

impl SamplingTask for CpuSampler {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn interval(&self) -> Duration {
        CPU_SAMPLE_INTERVAL
    }

    fn sample(&mut self) -> Result<()> {
        let last = match &self.last {
            Ok(last) => *last,
            Err(reason) => {
                return Err(SamplerError::InitializationFailed {
                    family: MetricFamily::Cpu,
                    reason: reason.clone(),
                })
            }
        };

        let current = self.source.read()?;
        self.transformer.transform(ImmutableCpuSample {
            processor_count: self.processor_count,
            last_sample_time: last.wall_clock,
            last_user_processor_time: last.user_processor_time,
            current_sample_time: current.wall_clock,
            current_user_processor_time: current.user_processor_time,
        });

        self.last = Ok(current);
        Ok(())
    }
}

impl std::fmt::Debug for CpuSampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CpuSampler")
            .field("processor_count", &self.processor_count)
            .field("last", &self.last)
            .finish()
    }
}
