use std::sync::Arc;
use std::time::{Duration, SystemTime};

use crate::error::Result;
use crate::protocol::{GcTotals, ImmutableGcSample, GC_GENERATION_COUNT};
use crate::samplers::gc::GC_SAMPLE_INTERVAL;
use crate::sources::GcMemoryInfoSource;
use crate::task::SamplingTask;
use crate::transform::SampleTransformer;
use crate::utils::{counter_delta, element_or_default};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Baseline {
    sample_time: SystemTime,
    collection_counts: [i32; GC_GENERATION_COUNT],
}

/// Samples the runtime's rich GC memory info.
///
/// Collection counts from the runtime are cumulative since process start;
/// this sampler reports collections since its previous sample. Nothing is
/// forwarded until the runtime has performed at least one gen0 collection.
pub struct ModernGcSampler {
    source: Arc<dyn GcMemoryInfoSource>,
    transformer: Arc<dyn SampleTransformer<ImmutableGcSample>>,
    baseline: Baseline,
    has_collected: bool,
}

impl ModernGcSampler {
    /// Creates a sampler reading from `source`.
    pub fn new<T>(source: Arc<dyn GcMemoryInfoSource>, transformer: T) -> Self
    where
        T: SampleTransformer<ImmutableGcSample>,
    {
        Self {
            source,
            transformer: Arc::new(transformer),
            baseline: Baseline {
                sample_time: SystemTime::now(),
                collection_counts: [0; GC_GENERATION_COUNT],
            },
            has_collected: false,
        }
    }

    /// Cumulative collection counts the next sample is compared against.
    pub fn baseline_collection_counts(&self) -> [i32; GC_GENERATION_COUNT] {
        self.baseline.collection_counts
    }

    /// Time of the last forwarded sample (or of construction).
    pub fn baseline_sample_time(&self) -> SystemTime {
        self.baseline.sample_time
    }
}

impl SamplingTask for ModernGcSampler {
    fn name(&self) -> &'static str {
        "gc"
    }

    fn interval(&self) -> Duration {
        GC_SAMPLE_INTERVAL
    }

    fn sample(&mut self) -> Result<()> {
        let snapshot = self.source.read()?;
        let now = SystemTime::now();

        if !self.has_collected {
            if element_or_default(&snapshot.collection_counts, 0) <= 0 {
                log::trace!("no garbage collection observed yet, skipping GC sample");
                return Ok(());
            }
            self.has_collected = true;
        }

        if snapshot.collection_counts.len() < GC_GENERATION_COUNT {
            log::trace!(
                "runtime reported {} of {} generations, defaulting the rest",
                snapshot.collection_counts.len(),
                GC_GENERATION_COUNT
            );
        }

        let mut current = [0; GC_GENERATION_COUNT];
        let mut deltas = [0; GC_GENERATION_COUNT];
        for (i, previous) in self.baseline.collection_counts.iter().enumerate() {
            current[i] = element_or_default(&snapshot.collection_counts, i);
            deltas[i] = counter_delta(current[i] as i64, *previous as i64) as i32;
        }

        let sample = ImmutableGcSample::new(
            self.baseline.sample_time,
            now,
            GcTotals {
                total_memory_bytes: snapshot.total_heap_bytes,
                total_allocated_bytes: snapshot.total_allocated_bytes,
                total_committed_bytes: snapshot.total_committed_bytes,
            },
            &snapshot.heap_size_bytes,
            &deltas,
            &snapshot.fragmentation_bytes,
        );
        self.transformer.transform(sample);

        self.baseline = Baseline {
            sample_time: now,
            collection_counts: current,
        };
        Ok(())
    }
}
