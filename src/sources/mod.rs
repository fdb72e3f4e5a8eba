//! Metric source accessors.
//!
//! Samplers never talk to the runtime directly. Each family reads from one
//! of these capability traits, which return a typed reading or an error;
//! [`SamplerError::Unsupported`](crate::SamplerError::Unsupported) means the
//! capability does not exist on this runtime and disables the sampler for
//! good.
//!
//! Default process level implementations live behind the `process` feature.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use crate::error::Result;

#[cfg(feature = "process")]
mod process;

#[cfg(feature = "process")]
pub use process::{ProcessCpuSource, ProcessMemorySource};

/// One reading of the process CPU clock.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CpuReading {
    /// Wall clock time the reading was taken at.
    pub wall_clock: SystemTime,
    /// User processor time consumed by the process so far.
    pub user_processor_time: Duration,
}

/// Reads process CPU usage.
pub trait CpuSource: Send + Sync {
    /// Logical processors available to the process.
    fn processor_count(&self) -> u32;

    /// Reads the wall clock and the user processor time together.
    fn read(&self) -> Result<CpuReading>;
}

/// One reading of process memory usage.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MemoryReading {
    /// Memory committed privately by the process.
    pub private_bytes: i64,
    /// Resident set / working set size.
    pub working_set_bytes: i64,
}

/// Reads process memory usage.
pub trait MemorySource: Send + Sync {
    /// Reads current memory usage.
    fn read(&self) -> Result<MemoryReading>;
}

/// Raw garbage collector statistics from the rich memory info API.
///
/// Per-generation vectors are indexed like
/// [`GcGeneration`](crate::protocol::GcGeneration) and may be shorter than
/// five elements on runtimes without a large or pinned object heap.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GcMemorySnapshot {
    /// Bytes allocated since process start.
    pub total_allocated_bytes: i64,
    /// Bytes committed by the collector.
    pub total_committed_bytes: i64,
    /// Total size of the managed heap.
    pub total_heap_bytes: i64,
    /// Size after the last collection, per generation.
    pub heap_size_bytes: Vec<i64>,
    /// Fragmentation after the last collection, per generation.
    pub fragmentation_bytes: Vec<i64>,
    /// Collections since process start, per generation (nested counts).
    pub collection_counts: Vec<i32>,
}

/// Reads the runtime's GC memory info.
pub trait GcMemoryInfoSource: Send + Sync {
    /// Reads a full snapshot.
    fn read(&self) -> Result<GcMemorySnapshot>;
}

/// A runtime event provider delivering events to a listener of type `L`.
///
/// Events are delivered on the provider's own threads, concurrently with
/// sampling.
pub trait EventSource<L: ?Sized>: Send + Sync {
    /// Starts delivering events to `listener`.
    fn subscribe(&self, listener: Arc<L>) -> Result<()>;

    /// Stops delivering events to `listener`. Unknown listeners are ignored.
    fn unsubscribe(&self, listener: &Arc<L>);
}

/// A single OS performance counter.
///
/// Dropping the counter releases the underlying OS handle.
pub trait PerformanceCounter: Send {
    /// Reads the next value.
    fn next_value(&mut self) -> Result<f32>;
}

/// Creates OS performance counters.
pub trait PerformanceCounterFactory: Send + Sync {
    /// Resolves the counter instance name of the current process within
    /// `category`. The name may change during the lifetime of the process.
    fn current_process_instance_name(&self, category: &str) -> Result<String>;

    /// Opens a counter.
    fn create_counter(
        &self,
        category: &str,
        counter: &str,
        instance: &str,
    ) -> Result<Box<dyn PerformanceCounter>>;
}

/// Thread pool capacity at one point in time.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ThreadPoolCapacity {
    /// Maximum number of worker threads.
    pub max_worker_threads: i64,
    /// Worker threads that could still be started.
    pub available_worker_threads: i64,
    /// Maximum number of completion (I/O) threads.
    pub max_completion_threads: i64,
    /// Completion threads that could still be started.
    pub available_completion_threads: i64,
}

/// Reads thread pool capacity.
pub trait ThreadPoolSource: Send + Sync {
    /// Reads current capacity.
    fn capacity(&self) -> Result<ThreadPoolCapacity>;
}
