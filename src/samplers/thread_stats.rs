//! Thread pool usage and throughput sampler.

use std::sync::Arc;
use std::time::Duration;

use crate::config::SamplerConfig;
use crate::error::{Result, SamplerError};
use crate::protocol::{ThreadpoolThroughputEventsSample, ThreadpoolUsageStatsSample};
use crate::sources::{EventSource, ThreadPoolSource};
use crate::task::{FailureAction, SamplingTask};
use crate::transform::SampleTransformer;
use crate::utils::AtomicCounter;

/// How often thread pool statistics are sampled.
pub const THREAD_STATS_SAMPLE_INTERVAL: Duration = Duration::from_secs(60);

/// Thread pool work item events.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ThreadPoolEvent {
    /// A work item was queued.
    Enqueue,
    /// A work item was taken off the queue for execution.
    Dequeue,
}

/// Counts thread pool work item events between two samples.
///
/// Handlers run on the runtime's event thread and only touch atomics.
#[derive(Debug, Default)]
pub struct ThreadEventsListener {
    queued: AtomicCounter,
    dequeued: AtomicCounter,
    queue_length: AtomicCounter,
}

impl ThreadEventsListener {
    /// Creates a listener with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Dispatches an event to the matching handler.
    pub fn on_event(&self, event: ThreadPoolEvent) {
        match event {
            ThreadPoolEvent::Enqueue => self.on_enqueue(),
            ThreadPoolEvent::Dequeue => self.on_dequeue(),
        }
    }

    /// Records a queued work item.
    pub fn on_enqueue(&self) {
        self.queued.increment();
        self.queue_length.increment();
    }

    /// Records a dequeued work item.
    pub fn on_dequeue(&self) {
        self.dequeued.increment();
        self.queue_length.decrement();
    }

    /// Takes the counts accumulated since the previous sample.
    ///
    /// Dequeues of work queued before the listener was attached can drive
    /// the queue length below zero; it is reset here rather than on every
    /// dequeue, and clamped again when the sample is built.
    pub fn sample(&self) -> ThreadpoolThroughputEventsSample {
        let queued = self.queued.exchange(0);
        let dequeued = self.dequeued.exchange(0);
        self.queue_length.reset_if_negative();
        let queue_length = self.queue_length.exchange(0);
        ThreadpoolThroughputEventsSample::new(queued, dequeued, queue_length)
    }
}

/// Reports thread pool capacity and, when event listeners are enabled,
/// work item throughput.
pub struct ThreadStatsSampler {
    source: Arc<dyn ThreadPoolSource>,
    usage_transformer: Arc<dyn SampleTransformer<ThreadpoolUsageStatsSample>>,
    throughput_transformer: Arc<dyn SampleTransformer<ThreadpoolThroughputEventsSample>>,
    event_source: Option<Arc<dyn EventSource<ThreadEventsListener>>>,
    listener: Option<Arc<ThreadEventsListener>>,
}

impl ThreadStatsSampler {
    /// Creates a sampler reporting usage only.
    pub fn new<U, T>(source: Arc<dyn ThreadPoolSource>, usage: U, throughput: T) -> Self
    where
        U: SampleTransformer<ThreadpoolUsageStatsSample>,
        T: SampleTransformer<ThreadpoolThroughputEventsSample>,
    {
        Self {
            source,
            usage_transformer: Arc::new(usage),
            throughput_transformer: Arc::new(throughput),
            event_source: None,
            listener: None,
        }
    }

    /// Also reports throughput from the events of `source`.
    #[must_use]
    pub fn with_event_source(mut self, source: Arc<dyn EventSource<ThreadEventsListener>>) -> Self {
        self.event_source = Some(source);
        self
    }

    /// The attached listener, if any.
    pub fn listener(&self) -> Option<&Arc<ThreadEventsListener>> {
        self.listener.as_ref()
    }

    fn detach(&mut self) {
        if let (Some(source), Some(listener)) = (&self.event_source, self.listener.take()) {
            source.unsubscribe(&listener);
        }
    }
}

impl SamplingTask for ThreadStatsSampler {
    fn name(&self) -> &'static str {
        "threadpool"
    }

    fn interval(&self) -> Duration {
        THREAD_STATS_SAMPLE_INTERVAL
    }

    fn on_start(&mut self, config: &SamplerConfig) -> Result<()> {
        self.detach();
        let Some(source) = &self.event_source else {
            return Ok(());
        };
        if !config.event_listener_samplers_enabled {
            log::debug!("event listener samplers are disabled, not reporting thread pool throughput");
            return Ok(());
        }

        let listener = Arc::new(ThreadEventsListener::new());
        match source.subscribe(listener.clone()) {
            Ok(()) => self.listener = Some(listener),
            Err(err) => {
                log::warn!("unable to listen to thread pool events, throughput will not be reported: {err}")
            }
        }
        Ok(())
    }

    fn on_stop(&mut self) {
        self.detach();
    }

    fn on_dispose(&mut self) {
        self.detach();
    }

    fn sample(&mut self) -> Result<()> {
        let capacity = self.source.capacity()?;
        self.usage_transformer.transform(ThreadpoolUsageStatsSample::new(
            capacity.max_worker_threads,
            capacity.available_worker_threads,
            capacity.max_completion_threads,
            capacity.available_completion_threads,
        ));

        if let Some(listener) = &self.listener {
            self.throughput_transformer.transform(listener.sample());
        }
        Ok(())
    }

    fn failure_action(&self, _error: &SamplerError) -> FailureAction {
        FailureAction::Dispose
    }
}
