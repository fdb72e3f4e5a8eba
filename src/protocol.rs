//! Immutable sample types handed to the transform pipeline.
//!
//! A sample is built fresh every sampling cycle, passed by value to a
//! [`SampleTransformer`](crate::SampleTransformer) and never touched by the
//! sampler again.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{Duration, SystemTime};

use crate::utils::{element_or_default, non_negative};

/// Number of heap generations tracked by [`ImmutableGcSample`].
pub const GC_GENERATION_COUNT: usize = 5;

/// Heap generations in the order used by every per-generation array.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GcGeneration {
    /// Generation 0.
    Gen0,
    /// Generation 1.
    Gen1,
    /// Generation 2.
    Gen2,
    /// The large object heap.
    Loh,
    /// The pinned object heap.
    Poh,
}

impl GcGeneration {
    /// All generations, indexed like the sample arrays.
    pub const ALL: [GcGeneration; GC_GENERATION_COUNT] = [
        GcGeneration::Gen0,
        GcGeneration::Gen1,
        GcGeneration::Gen2,
        GcGeneration::Loh,
        GcGeneration::Poh,
    ];

    /// Position of this generation in the sample arrays.
    pub fn index(self) -> usize {
        self as usize
    }
}

/// Paired CPU readings from two consecutive sampling cycles.
///
/// Utilization is `(current_user_processor_time - last_user_processor_time)
/// / (current_sample_time - last_sample_time) / processor_count`; computing
/// it is left to the transform.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImmutableCpuSample {
    /// Logical processors available to the process.
    pub processor_count: u32,
    /// Wall clock time of the previous reading.
    pub last_sample_time: SystemTime,
    /// User processor time consumed at the previous reading.
    pub last_user_processor_time: Duration,
    /// Wall clock time of this reading.
    pub current_sample_time: SystemTime,
    /// User processor time consumed at this reading.
    pub current_user_processor_time: Duration,
}

/// Point-in-time process memory usage.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImmutableMemorySample {
    /// Memory committed privately by the process.
    pub private_bytes: i64,
    /// Resident set / working set size.
    pub working_set_bytes: i64,
}

impl ImmutableMemorySample {
    /// Creates a sample, clamping negative readings to zero.
    pub fn new(private_bytes: i64, working_set_bytes: i64) -> Self {
        Self {
            private_bytes: non_negative(private_bytes),
            working_set_bytes: non_negative(working_set_bytes),
        }
    }
}

/// Reduces nested per-generation collection counts to per-generation counts.
///
/// The runtime counts a generation N collection as a collection of every
/// generation below N as well, so gen0 and gen1 subtract the next generation
/// while gen2 is taken as is. The large and pinned object heap counts are
/// passed through unchanged and default to zero when `raw` is too short.
///
/// ```
/// use runtime_samplers::protocol::reduce_collection_counts;
///
/// assert_eq!(reduce_collection_counts(&[12, 5, 1]), [7, 4, 1, 0, 0]);
/// ```
pub fn reduce_collection_counts(raw: &[i32]) -> [i32; GC_GENERATION_COUNT] {
    let gen0 = element_or_default(raw, 0);
    let gen1 = element_or_default(raw, 1);
    let gen2 = element_or_default(raw, 2);
    let clamp = |v: i32| v.max(0);

    // TODO: confirm whether LOH/POH counts should also be differenced against
    // gen2 once the runtime reporting semantics are verified.
    [
        clamp(gen0.saturating_sub(gen1)),
        clamp(gen1.saturating_sub(gen2)),
        clamp(gen2),
        clamp(element_or_default(raw, 3)),
        clamp(element_or_default(raw, 4)),
    ]
}

fn fixed_generations(values: &[i64]) -> [i64; GC_GENERATION_COUNT] {
    let mut out = [0; GC_GENERATION_COUNT];
    for (i, slot) in out.iter_mut().enumerate() {
        *slot = element_or_default(values, i);
    }
    out
}

/// Garbage collector statistics from the rich memory info API.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImmutableGcSample {
    /// Time of the previous sample.
    pub last_sample_time: SystemTime,
    /// Time of this sample.
    pub current_sample_time: SystemTime,
    /// Total size of the managed heap.
    pub total_memory_bytes: i64,
    /// Bytes allocated since process start.
    pub total_allocated_bytes: i64,
    /// Bytes committed by the collector.
    pub total_committed_bytes: i64,
    /// Size after the last collection, per generation.
    pub gc_heap_sizes_bytes: [i64; GC_GENERATION_COUNT],
    /// Collections since the previous sample, per generation.
    pub gc_collection_counts: [i32; GC_GENERATION_COUNT],
    /// Fragmentation after the last collection, per generation.
    pub gc_fragmentation_sizes_bytes: [i64; GC_GENERATION_COUNT],
}

impl ImmutableGcSample {
    /// Builds a sample from variable length source arrays.
    ///
    /// `collection_counts` holds nested per-generation counts since the
    /// previous sample; they are reduced with [`reduce_collection_counts`].
    /// Missing trailing generations default to zero.
    pub fn new(
        last_sample_time: SystemTime,
        current_sample_time: SystemTime,
        totals: GcTotals,
        heap_sizes_bytes: &[i64],
        collection_counts: &[i32],
        fragmentation_sizes_bytes: &[i64],
    ) -> Self {
        Self {
            last_sample_time,
            current_sample_time,
            total_memory_bytes: totals.total_memory_bytes,
            total_allocated_bytes: totals.total_allocated_bytes,
            total_committed_bytes: totals.total_committed_bytes,
            gc_heap_sizes_bytes: fixed_generations(heap_sizes_bytes),
            gc_collection_counts: reduce_collection_counts(collection_counts),
            gc_fragmentation_sizes_bytes: fixed_generations(fragmentation_sizes_bytes),
        }
    }

    /// Collections of `generation` since the previous sample.
    pub fn collection_count(&self, generation: GcGeneration) -> i32 {
        self.gc_collection_counts[generation.index()]
    }

    /// Heap size of `generation` after the last collection.
    pub fn heap_size(&self, generation: GcGeneration) -> i64 {
        self.gc_heap_sizes_bytes[generation.index()]
    }
}

/// Heap wide totals reported alongside per-generation data.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GcTotals {
    /// Total size of the managed heap.
    pub total_memory_bytes: i64,
    /// Bytes allocated since process start.
    pub total_allocated_bytes: i64,
    /// Bytes committed by the collector.
    pub total_committed_bytes: i64,
}

/// Statistics reported by the event-stream and platform-counter GC samplers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GcSampleType {
    /// Generation 0 heap size.
    Gen0Size,
    /// Bytes promoted out of generation 0.
    Gen0Promoted,
    /// Generation 1 heap size.
    Gen1Size,
    /// Bytes promoted out of generation 1.
    Gen1Promoted,
    /// Generation 2 heap size.
    Gen2Size,
    /// Bytes surviving a generation 2 collection.
    Gen2Survived,
    /// Large object heap size.
    LohSize,
    /// Bytes surviving in the large object heap.
    LohSurvived,
    /// Number of GC handles.
    HandlesCount,
    /// Collections explicitly induced by code since the previous sample.
    InducedCount,
    /// Percentage of elapsed time spent collecting.
    PercentTimeInGc,
    /// Generation 0 collections since the previous sample.
    Gen0CollectionCount,
    /// Generation 1 collections since the previous sample.
    Gen1CollectionCount,
    /// Generation 2 collections since the previous sample.
    Gen2CollectionCount,
}

impl GcSampleType {
    /// Returns `true` for counters reported as a delta against the previous
    /// sample rather than a point-in-time value.
    pub fn is_delta(self) -> bool {
        matches!(
            self,
            GcSampleType::InducedCount
                | GcSampleType::Gen0CollectionCount
                | GcSampleType::Gen1CollectionCount
                | GcSampleType::Gen2CollectionCount
        )
    }
}

/// A set of GC statistics keyed by [`GcSampleType`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GcSampleValues(BTreeMap<GcSampleType, f32>);

impl GcSampleValues {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the value for a statistic.
    pub fn insert(&mut self, ty: GcSampleType, value: f32) {
        self.0.insert(ty, value);
    }

    /// Value of a statistic, if sampled.
    pub fn get(&self, ty: GcSampleType) -> Option<f32> {
        self.0.get(&ty).copied()
    }

    /// Number of statistics in the set.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if nothing was sampled.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates statistics in [`GcSampleType`] order.
    pub fn iter(&self) -> impl Iterator<Item = (GcSampleType, f32)> + '_ {
        self.0.iter().map(|(k, v)| (*k, *v))
    }
}

impl FromIterator<(GcSampleType, f32)> for GcSampleValues {
    fn from_iter<I: IntoIterator<Item = (GcSampleType, f32)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Point-in-time thread pool usage.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadpoolUsageStatsSample {
    /// Worker threads that could still be started.
    pub worker_threads_available: i64,
    /// Worker threads in use.
    pub worker_threads_used: i64,
    /// Completion (I/O) threads that could still be started.
    pub completion_threads_available: i64,
    /// Completion (I/O) threads in use.
    pub completion_threads_used: i64,
}

impl ThreadpoolUsageStatsSample {
    /// Derives usage from maximum and available counts.
    pub fn new(
        max_worker_threads: i64,
        available_worker_threads: i64,
        max_completion_threads: i64,
        available_completion_threads: i64,
    ) -> Self {
        Self {
            worker_threads_available: non_negative(available_worker_threads),
            worker_threads_used: non_negative(max_worker_threads - available_worker_threads),
            completion_threads_available: non_negative(available_completion_threads),
            completion_threads_used: non_negative(
                max_completion_threads - available_completion_threads,
            ),
        }
    }
}

/// Thread request throughput since the previous sample.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadpoolThroughputEventsSample {
    /// Work items enqueued since the previous sample.
    pub count_thread_requests_queued: i64,
    /// Work items dequeued since the previous sample.
    pub count_thread_requests_dequeued: i64,
    /// Work items waiting at sample time.
    pub thread_request_queue_length: i64,
}

impl ThreadpoolThroughputEventsSample {
    /// Creates a sample. All values are clamped to zero, so a negative queue
    /// length can never reach a transform.
    pub fn new(queued: i64, dequeued: i64, queue_length: i64) -> Self {
        Self {
            count_thread_requests_queued: non_negative(queued),
            count_thread_requests_dequeued: non_negative(dequeued),
            thread_request_queue_length: non_negative(queue_length),
        }
    }
}
