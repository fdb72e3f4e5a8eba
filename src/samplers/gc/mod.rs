//! Garbage collector samplers.
//!
//! Runtimes expose GC statistics through different, version gated APIs, so
//! there are three implementations of the same sampler:
//!
//! - [`ModernGcSampler`] reads a rich memory info snapshot,
//! - [`EventGcSampler`] accumulates GC events from a runtime event stream,
//! - [`CounterGcSampler`] reads OS performance counters.
//!
//! [`GcSampler::select`] probes the capabilities once and picks the best
//! available variant; nothing is re-probed per call.

use std::sync::Arc;
use std::time::Duration;

use crate::config::SamplerConfig;
use crate::error::{Result, SamplerError};
use crate::protocol::{GcSampleValues, ImmutableGcSample};
use crate::sources::{EventSource, GcMemoryInfoSource, PerformanceCounterFactory};
use crate::task::{FailureAction, SamplingTask};
use crate::transform::SampleTransformer;

mod counters;
mod events;
mod modern;

pub use counters::{CounterGcSampler, GC_COUNTER_CATEGORY, MAX_CONSECUTIVE_COUNTER_FAILURES};
pub use events::{
    EventGcSampler, GcEvent, GcEventListener, GcHeapStatsEvent, GcStartEvent, GC_REASON_INDUCED,
    GC_REASON_INDUCED_NOT_BLOCKING,
};
pub use modern::ModernGcSampler;

/// How often GC statistics are sampled.
pub const GC_SAMPLE_INTERVAL: Duration = Duration::from_secs(60);

/// The GC metric sources the host runtime can provide.
#[derive(Clone, Default)]
pub struct GcCapabilities {
    /// The rich memory info API.
    pub memory_info: Option<Arc<dyn GcMemoryInfoSource>>,
    /// The runtime GC event stream.
    pub event_source: Option<Arc<dyn EventSource<GcEventListener>>>,
    /// OS performance counters.
    pub performance_counters: Option<Arc<dyn PerformanceCounterFactory>>,
}

impl GcCapabilities {
    /// No capabilities.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the memory info capability.
    #[must_use]
    pub fn with_memory_info(mut self, source: Arc<dyn GcMemoryInfoSource>) -> Self {
        self.memory_info = Some(source);
        self
    }

    /// Adds the event stream capability.
    #[must_use]
    pub fn with_event_source(mut self, source: Arc<dyn EventSource<GcEventListener>>) -> Self {
        self.event_source = Some(source);
        self
    }

    /// Adds the performance counter capability.
    #[must_use]
    pub fn with_performance_counters(
        mut self,
        factory: Arc<dyn PerformanceCounterFactory>,
    ) -> Self {
        self.performance_counters = Some(factory);
        self
    }
}

impl std::fmt::Debug for GcCapabilities {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GcCapabilities")
            .field("memory_info", &self.memory_info.is_some())
            .field("event_source", &self.event_source.is_some())
            .field("performance_counters", &self.performance_counters.is_some())
            .finish()
    }
}

/// One of the three GC sampler variants.
pub enum GcSampler {
    /// Reads the rich memory info API.
    Modern(ModernGcSampler),
    /// Listens to the runtime GC event stream.
    EventStream(EventGcSampler),
    /// Reads OS performance counters.
    PlatformCounter(CounterGcSampler),
}

impl GcSampler {
    /// Picks the best variant the runtime supports.
    ///
    /// The modern API wins over the event stream, which wins over
    /// performance counters. Returns `None` if no capability is available.
    pub fn select<M, V>(
        capabilities: GcCapabilities,
        sample_transformer: M,
        values_transformer: V,
    ) -> Option<Self>
    where
        M: SampleTransformer<ImmutableGcSample>,
        V: SampleTransformer<GcSampleValues>,
    {
        let sampler = if let Some(source) = capabilities.memory_info {
            GcSampler::Modern(ModernGcSampler::new(source, sample_transformer))
        } else if let Some(source) = capabilities.event_source {
            GcSampler::EventStream(EventGcSampler::new(source, values_transformer))
        } else if let Some(factory) = capabilities.performance_counters {
            GcSampler::PlatformCounter(CounterGcSampler::new(factory, values_transformer))
        } else {
            log::debug!("no GC metric source available, GC metrics will not be collected");
            return None;
        };
        log::debug!("selected {} GC sampler", sampler.variant_name());
        Some(sampler)
    }

    /// Short name of the selected variant.
    pub fn variant_name(&self) -> &'static str {
        match self {
            GcSampler::Modern(_) => "modern",
            GcSampler::EventStream(_) => "event-stream",
            GcSampler::PlatformCounter(_) => "platform-counter",
        }
    }

    fn task(&self) -> &dyn SamplingTask {
        match self {
            GcSampler::Modern(s) => s,
            GcSampler::EventStream(s) => s,
            GcSampler::PlatformCounter(s) => s,
        }
    }

    fn task_mut(&mut self) -> &mut dyn SamplingTask {
        match self {
            GcSampler::Modern(s) => s,
            GcSampler::EventStream(s) => s,
            GcSampler::PlatformCounter(s) => s,
        }
    }
}

impl SamplingTask for GcSampler {
    fn name(&self) -> &'static str {
        "gc"
    }

    fn interval(&self) -> Duration {
        GC_SAMPLE_INTERVAL
    }

    fn is_enabled(&self, config: &SamplerConfig) -> bool {
        self.task().is_enabled(config)
    }

    fn on_start(&mut self, config: &SamplerConfig) -> Result<()> {
        self.task_mut().on_start(config)
    }

    fn on_stop(&mut self) {
        self.task_mut().on_stop()
    }

    fn on_dispose(&mut self) {
        self.task_mut().on_dispose()
    }

    fn sample(&mut self) -> Result<()> {
        self.task_mut().sample()
    }

    fn failure_action(&self, error: &SamplerError) -> FailureAction {
        self.task().failure_action(error)
    }
}

impl std::fmt::Debug for GcSampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("GcSampler")
            .field(&self.variant_name())
            .finish()
    }
}
