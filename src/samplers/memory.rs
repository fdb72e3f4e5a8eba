//! Process memory sampler.

use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::protocol::ImmutableMemorySample;
use crate::sources::MemorySource;
use crate::task::SamplingTask;
use crate::transform::SampleTransformer;

/// How often process memory is sampled.
pub const MEMORY_SAMPLE_INTERVAL: Duration = Duration::from_secs(10);

/// Forwards point-in-time process memory usage.
pub struct MemorySampler {
    source: Arc<dyn MemorySource>,
    transformer: Arc<dyn SampleTransformer<ImmutableMemorySample>>,
}

impl MemorySampler {
    /// Creates a memory sampler reading from `source`.
    pub fn new<T>(source: Arc<dyn MemorySource>, transformer: T) -> Self
    where
        T: SampleTransformer<ImmutableMemorySample>,
    {
        Self {
            source,
            transformer: Arc::new(transformer),
        }
    }
}

impl SamplingTask for MemorySampler {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn interval(&self) -> Duration {
        MEMORY_SAMPLE_INTERVAL
    }

    fn sample(&mut self) -> Result<()> {
        let reading = self.source.read()?;
        self.transformer.transform(ImmutableMemorySample::new(
            reading.private_bytes,
            reading.working_set_bytes,
        ));
        Ok(())
    }
}
