use std::sync::{Arc, Mutex};

use rstest::rstest;

use runtime_samplers::protocol::{ThreadpoolThroughputEventsSample, ThreadpoolUsageStatsSample};
use runtime_samplers::samplers::{ThreadEventsListener, ThreadPoolEvent, ThreadStatsSampler};
use runtime_samplers::sources::{EventSource, ThreadPoolCapacity, ThreadPoolSource};
use runtime_samplers::{
    ConfigurationService, ManualScheduler, Result, Sampler, SamplerConfig, SamplerError,
    SamplerState,
};

/// Deterministic event sequence with `dequeue_bias` percent dequeues.
fn events(seed: u64, len: usize, dequeue_bias: u64) -> Vec<ThreadPoolEvent> {
    let mut state = seed;
    (0..len)
        .map(|_| {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            if (state >> 33) % 100 < dequeue_bias {
                ThreadPoolEvent::Dequeue
            } else {
                ThreadPoolEvent::Enqueue
            }
        })
        .collect()
}

#[rstest]
#[case(1, 50)]
#[case(2, 80)]
#[case(3, 100)]
#[case(4, 20)]
fn test_queue_length_is_never_negative(#[case] seed: u64, #[case] dequeue_bias: u64) {
    let listener = ThreadEventsListener::new();
    for window in 0..5 {
        for event in events(seed + window, 200, dequeue_bias) {
            listener.on_event(event);
        }
        let sample = listener.sample();
        assert!(sample.thread_request_queue_length >= 0);
        assert!(sample.count_thread_requests_queued >= 0);
        assert!(sample.count_thread_requests_dequeued >= 0);
    }
}

#[test]
fn test_queue_length_concurrent_dequeue_heavy() {
    let listener = Arc::new(ThreadEventsListener::new());
    let workers: Vec<_> = (0..4)
        .map(|i| {
            let listener = listener.clone();
            std::thread::spawn(move || {
                for event in events(i, 1000, 70) {
                    listener.on_event(event);
                }
            })
        })
        .collect();

    let mut samples = Vec::new();
    for _ in 0..20 {
        samples.push(listener.sample());
        std::thread::yield_now();
    }
    for worker in workers {
        worker.join().unwrap();
    }
    samples.push(listener.sample());

    assert!(samples.iter().all(|s| s.thread_request_queue_length >= 0));
    let queued: i64 = samples.iter().map(|s| s.count_thread_requests_queued).sum();
    let dequeued: i64 = samples.iter().map(|s| s.count_thread_requests_dequeued).sum();
    assert_eq!(queued + dequeued, 4000);
}

#[derive(Default)]
struct FakeEvents {
    listeners: Mutex<Vec<Arc<ThreadEventsListener>>>,
}

impl FakeEvents {
    fn emit(&self, event: ThreadPoolEvent, times: usize) {
        for listener in self.listeners.lock().unwrap().iter() {
            for _ in 0..times {
                listener.on_event(event);
            }
        }
    }

    fn subscribed(&self) -> usize {
        self.listeners.lock().unwrap().len()
    }
}

impl EventSource<ThreadEventsListener> for FakeEvents {
    fn subscribe(&self, listener: Arc<ThreadEventsListener>) -> Result<()> {
        self.listeners.lock().unwrap().push(listener);
        Ok(())
    }

    fn unsubscribe(&self, listener: &Arc<ThreadEventsListener>) {
        self.listeners
            .lock()
            .unwrap()
            .retain(|l| !Arc::ptr_eq(l, listener));
    }
}

struct Pool {
    fail: bool,
}

impl ThreadPoolSource for Pool {
    fn capacity(&self) -> Result<ThreadPoolCapacity> {
        if self.fail {
            return Err(SamplerError::Unavailable("thread pool accessor threw".into()));
        }
        Ok(ThreadPoolCapacity {
            max_worker_threads: 32767,
            available_worker_threads: 32765,
            max_completion_threads: 1000,
            available_completion_threads: 1000,
        })
    }
}

struct Fixture {
    sampler: Sampler<ThreadStatsSampler>,
    scheduler: Arc<ManualScheduler>,
    config: Arc<ConfigurationService>,
    events: Arc<FakeEvents>,
    usage: Arc<Mutex<Vec<ThreadpoolUsageStatsSample>>>,
    throughput: Arc<Mutex<Vec<ThreadpoolThroughputEventsSample>>>,
}

fn fixture(fail: bool) -> Fixture {
    let scheduler = Arc::new(ManualScheduler::new());
    let config = Arc::new(ConfigurationService::default());
    let events = Arc::new(FakeEvents::default());
    let usage = Arc::new(Mutex::new(Vec::new()));
    let throughput = Arc::new(Mutex::new(Vec::new()));
    let (u, t) = (usage.clone(), throughput.clone());
    let task = ThreadStatsSampler::new(
        Arc::new(Pool { fail }),
        move |s: ThreadpoolUsageStatsSample| u.lock().unwrap().push(s),
        move |s: ThreadpoolThroughputEventsSample| t.lock().unwrap().push(s),
    )
    .with_event_source(events.clone());
    Fixture {
        sampler: Sampler::new(task, scheduler.clone(), config.clone()),
        scheduler,
        config,
        events,
        usage,
        throughput,
    }
}

#[test]
fn test_enqueue_dequeue_window() {
    let f = fixture(false);
    f.sampler.start();

    f.events.emit(ThreadPoolEvent::Enqueue, 100);
    f.events.emit(ThreadPoolEvent::Dequeue, 40);
    f.scheduler.tick(f.sampler.callback_id());
    f.scheduler.tick(f.sampler.callback_id());

    let throughput = f.throughput.lock().unwrap();
    assert_eq!(
        throughput[0],
        ThreadpoolThroughputEventsSample {
            count_thread_requests_queued: 100,
            count_thread_requests_dequeued: 40,
            thread_request_queue_length: 60,
        }
    );
    assert_eq!(throughput[1], ThreadpoolThroughputEventsSample::new(0, 0, 0));

    let usage = f.usage.lock().unwrap();
    assert_eq!(usage.len(), 2);
    assert_eq!(usage[0].worker_threads_used, 2);
    assert_eq!(usage[0].completion_threads_available, 1000);
}

#[test]
fn test_listener_requires_event_samplers() {
    let f = fixture(false);
    f.config
        .update(SamplerConfig::new().with_event_listener_samplers(false));
    f.sampler.start();
    assert_eq!(f.events.subscribed(), 0);

    f.scheduler.tick(f.sampler.callback_id());
    assert_eq!(f.usage.lock().unwrap().len(), 1);
    assert!(f.throughput.lock().unwrap().is_empty());

    f.config.update(SamplerConfig::new());
    assert_eq!(f.events.subscribed(), 1);
    assert!(f.sampler.with_task(|t| t.listener().is_some()));
}

#[test]
fn test_capacity_failure_disposes() {
    let f = fixture(true);
    f.sampler.start();
    assert_eq!(f.events.subscribed(), 1);

    f.scheduler.tick(f.sampler.callback_id());
    assert_eq!(f.sampler.state(), SamplerState::Disposed);
    assert_eq!(f.events.subscribed(), 0);

    f.config.update(SamplerConfig::new());
    assert_eq!(f.sampler.state(), SamplerState::Disposed);
    assert_eq!(f.scheduler.registered_count(), 0);
}
