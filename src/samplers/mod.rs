//! Built-in samplers.
//!
//! Each sampler here is a [`SamplingTask`](crate::SamplingTask); wrap it in a
//! [`Sampler`](crate::Sampler) to run it on a scheduler:
//! - CPU usage
//! - Process memory
//! - Garbage collector statistics (three runtime dependent variants)
//! - Thread pool usage and throughput

mod cpu;
pub mod gc;
mod memory;
mod thread_stats;

pub use cpu::{CpuSampler, CPU_SAMPLE_INTERVAL};
pub use gc::{GcCapabilities, GcSampler, GC_SAMPLE_INTERVAL};
pub use memory::{MemorySampler, MEMORY_SAMPLE_INTERVAL};
pub use thread_stats::{
    ThreadEventsListener, ThreadPoolEvent, ThreadStatsSampler, THREAD_STATS_SAMPLE_INTERVAL,
};
