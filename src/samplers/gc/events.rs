use std::sync::Arc;
use std::time::Duration;

use crate::config::SamplerConfig;
use crate::error::{Result, SamplerError};
use crate::protocol::{GcSampleType, GcSampleValues};
use crate::samplers::gc::GC_SAMPLE_INTERVAL;
use crate::sources::EventSource;
use crate::task::{FailureAction, SamplingTask};
use crate::transform::SampleTransformer;
use crate::utils::AtomicCounter;

/// GC reason code of a collection induced by an explicit call.
pub const GC_REASON_INDUCED: u32 = 1;
/// GC reason code of a non-blocking collection induced by an explicit call.
pub const GC_REASON_INDUCED_NOT_BLOCKING: u32 = 7;

const TRACKED_GENERATIONS: usize = 3;

/// A garbage collection started.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GcStartEvent {
    /// Highest generation being collected.
    pub depth: u32,
    /// Runtime reason code for the collection.
    pub reason: u32,
}

/// Heap statistics published after a collection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GcHeapStatsEvent {
    /// Generation 0 size.
    pub gen0_size: i64,
    /// Bytes promoted out of generation 0.
    pub gen0_promoted: i64,
    /// Generation 1 size.
    pub gen1_size: i64,
    /// Bytes promoted out of generation 1.
    pub gen1_promoted: i64,
    /// Generation 2 size.
    pub gen2_size: i64,
    /// Bytes surviving generation 2.
    pub gen2_survived: i64,
    /// Large object heap size.
    pub loh_size: i64,
    /// Bytes surviving in the large object heap.
    pub loh_survived: i64,
    /// Number of GC handles in use.
    pub handles_count: i64,
}

/// Events understood by [`GcEventListener`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GcEvent {
    /// See [`GcStartEvent`].
    Start(GcStartEvent),
    /// See [`GcHeapStatsEvent`].
    HeapStats(GcHeapStatsEvent),
}

/// Accumulates GC events delivered on the runtime's event thread.
///
/// Heap statistics are point-in-time values and are overwritten by every
/// event. Collection and induced counts accumulate until [`sample`] swaps
/// them back to zero.
///
/// [`sample`]: GcEventListener::sample
#[derive(Debug, Default)]
pub struct GcEventListener {
    gen0_size: AtomicCounter,
    gen0_promoted: AtomicCounter,
    gen1_size: AtomicCounter,
    gen1_promoted: AtomicCounter,
    gen2_size: AtomicCounter,
    gen2_survived: AtomicCounter,
    loh_size: AtomicCounter,
    loh_survived: AtomicCounter,
    handles_count: AtomicCounter,
    induced: AtomicCounter,
    collections: [AtomicCounter; TRACKED_GENERATIONS],
}

impl GcEventListener {
    /// Creates a listener with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Dispatches an event to the matching handler.
    pub fn on_event(&self, event: GcEvent) {
        match event {
            GcEvent::Start(start) => self.on_gc_start(start),
            GcEvent::HeapStats(stats) => self.on_gc_heap_stats(stats),
        }
    }

    /// Counts a collection of every generation up to `event.depth`.
    pub fn on_gc_start(&self, event: GcStartEvent) {
        let depth = (event.depth as usize).min(TRACKED_GENERATIONS - 1);
        for counter in &self.collections[..=depth] {
            counter.increment();
        }
        if matches!(
            event.reason,
            GC_REASON_INDUCED | GC_REASON_INDUCED_NOT_BLOCKING
        ) {
            self.induced.increment();
        }
    }

    /// Records the latest heap statistics.
    pub fn on_gc_heap_stats(&self, event: GcHeapStatsEvent) {
        self.gen0_size.exchange(event.gen0_size);
        self.gen0_promoted.exchange(event.gen0_promoted);
        self.gen1_size.exchange(event.gen1_size);
        self.gen1_promoted.exchange(event.gen1_promoted);
        self.gen2_size.exchange(event.gen2_size);
        self.gen2_survived.exchange(event.gen2_survived);
        self.loh_size.exchange(event.loh_size);
        self.loh_survived.exchange(event.loh_survived);
        self.handles_count.exchange(event.handles_count);
    }

    /// Reads the current heap statistics and takes the accumulated counts.
    pub fn sample(&self) -> GcSampleValues {
        let counts = [
            GcSampleType::Gen0CollectionCount,
            GcSampleType::Gen1CollectionCount,
            GcSampleType::Gen2CollectionCount,
        ];

        let mut values: GcSampleValues = [
            (GcSampleType::Gen0Size, &self.gen0_size),
            (GcSampleType::Gen0Promoted, &self.gen0_promoted),
            (GcSampleType::Gen1Size, &self.gen1_size),
            (GcSampleType::Gen1Promoted, &self.gen1_promoted),
            (GcSampleType::Gen2Size, &self.gen2_size),
            (GcSampleType::Gen2Survived, &self.gen2_survived),
            (GcSampleType::LohSize, &self.loh_size),
            (GcSampleType::LohSurvived, &self.loh_survived),
            (GcSampleType::HandlesCount, &self.handles_count),
        ]
        .into_iter()
        .map(|(ty, counter)| (ty, counter.value() as f32))
        .collect();

        values.insert(GcSampleType::InducedCount, self.induced.exchange(0) as f32);
        for (ty, counter) in counts.into_iter().zip(&self.collections) {
            values.insert(ty, counter.exchange(0) as f32);
        }
        values
    }
}

/// GC sampler fed by the runtime event stream.
///
/// The listener is attached on start and detached on stop, so it only runs
/// while event listener samplers are enabled. It is created once and kept
/// across restarts so the last heap statistics survive a configuration
/// update; only disposing drops it.
pub struct EventGcSampler {
    source: Arc<dyn EventSource<GcEventListener>>,
    transformer: Arc<dyn SampleTransformer<GcSampleValues>>,
    listener: Option<Arc<GcEventListener>>,
    attached: bool,
}

impl EventGcSampler {
    /// Creates a sampler that subscribes to `source` when started.
    pub fn new<T>(source: Arc<dyn EventSource<GcEventListener>>, transformer: T) -> Self
    where
        T: SampleTransformer<GcSampleValues>,
    {
        Self {
            source,
            transformer: Arc::new(transformer),
            listener: None,
            attached: false,
        }
    }

    /// The listener, once the sampler has been started and until disposed.
    pub fn listener(&self) -> Option<&Arc<GcEventListener>> {
        self.listener.as_ref()
    }

    /// Returns `true` while the listener is subscribed to the event source.
    pub fn is_attached(&self) -> bool {
        self.attached
    }

    fn detach(&mut self) {
        if !self.attached {
            return;
        }
        if let Some(listener) = &self.listener {
            self.source.unsubscribe(listener);
        }
        self.attached = false;
    }
}

impl SamplingTask for EventGcSampler {
    fn name(&self) -> &'static str {
        "gc"
    }

    fn interval(&self) -> Duration {
        GC_SAMPLE_INTERVAL
    }

    fn is_enabled(&self, config: &SamplerConfig) -> bool {
        config.event_listener_samplers_enabled
    }

    fn on_start(&mut self, _config: &SamplerConfig) -> Result<()> {
        self.detach();
        let listener = self
            .listener
            .get_or_insert_with(|| Arc::new(GcEventListener::new()))
            .clone();
        self.source.subscribe(listener)?;
        self.attached = true;
        Ok(())
    }

    fn on_stop(&mut self) {
        self.detach();
    }

    fn on_dispose(&mut self) {
        self.detach();
        self.listener = None;
    }

    fn sample(&mut self) -> Result<()> {
        if !self.attached {
            return Ok(());
        }
        if let Some(listener) = &self.listener {
            self.transformer.transform(listener.sample());
        }
        Ok(())
    }

    fn failure_action(&self, _error: &SamplerError) -> FailureAction {
        FailureAction::Dispose
    }
}
