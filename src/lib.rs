//! Periodic runtime health samplers.
//!
//! This crate continuously samples a process's runtime health (CPU, memory,
//! garbage collector generations, thread pool throughput) on a fixed
//! cadence, turns the raw counters into normalized delta or point-in-time
//! samples and hands them to a transform pipeline. A metric source that is
//! missing on the current runtime disables its sampler; it never takes down
//! other samplers or the host process.
//!
//! # Overview
//!
//! - [`Sampler`] drives the lifecycle: it registers with a [`Scheduler`],
//!   follows configuration updates from a [`ConfigurationService`] and stops
//!   or disposes itself when a cycle fails.
//! - A [`SamplingTask`] implements one metric family. The built-in ones live
//!   in [`samplers`].
//! - Metric values come from the capability traits in [`sources`] and leave
//!   as the immutable samples in [`protocol`] through a
//!   [`SampleTransformer`].
//!
//! # Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use runtime_samplers::protocol::ImmutableMemorySample;
//! use runtime_samplers::samplers::MemorySampler;
//! use runtime_samplers::sources::{MemoryReading, MemorySource};
//! use runtime_samplers::{ConfigurationService, ManualScheduler, Result, Sampler, SamplerState};
//!
//! struct StaticMemory;
//!
//! impl MemorySource for StaticMemory {
//!     fn read(&self) -> Result<MemoryReading> {
//!         Ok(MemoryReading {
//!             private_bytes: 1 << 20,
//!             working_set_bytes: 2 << 20,
//!         })
//!     }
//! }
//!
//! let scheduler = Arc::new(ManualScheduler::new());
//! let config = Arc::new(ConfigurationService::default());
//! let sampler = Sampler::new(
//!     MemorySampler::new(Arc::new(StaticMemory), |sample: ImmutableMemorySample| {
//!         println!("working set: {} bytes", sample.working_set_bytes);
//!     }),
//!     scheduler.clone(),
//!     config,
//! );
//!
//! sampler.start();
//! assert_eq!(sampler.state(), SamplerState::Running);
//! scheduler.tick(sampler.callback_id());
//! ```

#![warn(missing_docs)]

mod config;
mod error;
mod sampler;
mod scheduler;
mod task;
mod transform;
mod utils;

pub mod protocol;
pub mod samplers;
pub mod sources;

pub use config::{ConfigurationService, SamplerConfig, SubscriptionId};
pub use error::{MetricFamily, Result, SamplerError};
pub use sampler::{ManagedSampler, Sampler, SamplerSet, SamplerState, INITIAL_SAMPLE_DELAY};
#[cfg(feature = "tokio-runtime")]
pub use scheduler::TokioScheduler;
pub use scheduler::{CallbackId, ManualScheduler, SampleCallback, Scheduler, ThreadScheduler};
pub use task::{FailureAction, SamplingTask};
pub use transform::SampleTransformer;
pub use utils::AtomicCounter;
