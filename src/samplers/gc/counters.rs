use std::sync::Arc;
use std::time::Duration;

use crate::error::{Result, SamplerError};
use crate::protocol::{GcSampleType, GcSampleValues};
use crate::samplers::gc::GC_SAMPLE_INTERVAL;
use crate::sources::{PerformanceCounter, PerformanceCounterFactory};
use crate::task::SamplingTask;
use crate::transform::SampleTransformer;

/// Performance counter category holding the GC counters.
pub const GC_COUNTER_CATEGORY: &str = ".NET CLR Memory";

/// Failed cycles in a row after which the sampler stops.
pub const MAX_CONSECUTIVE_COUNTER_FAILURES: u32 = 5;

const TRACKED_COUNTERS: [(GcSampleType, &str); 12] = [
    (GcSampleType::Gen0Size, "Gen 0 heap size"),
    (GcSampleType::Gen0Promoted, "Promoted Memory from Gen 0"),
    (GcSampleType::Gen1Size, "Gen 1 heap size"),
    (GcSampleType::Gen1Promoted, "Promoted Memory from Gen 1"),
    (GcSampleType::Gen2Size, "Gen 2 heap size"),
    (GcSampleType::LohSize, "Large Object Heap size"),
    (GcSampleType::HandlesCount, "# GC Handles"),
    (GcSampleType::InducedCount, "# Induced GC"),
    (GcSampleType::PercentTimeInGc, "% Time in GC"),
    (GcSampleType::Gen0CollectionCount, "# Gen 0 Collections"),
    (GcSampleType::Gen1CollectionCount, "# Gen 1 Collections"),
    (GcSampleType::Gen2CollectionCount, "# Gen 2 Collections"),
];

struct CounterProxy {
    ty: GcSampleType,
    counter: Box<dyn PerformanceCounter>,
}

/// GC sampler reading OS performance counters.
///
/// The counter instance name of a process can change while it runs (another
/// process with the same executable name starting or exiting renumbers the
/// instances), so it is resolved every cycle and the counters are reopened
/// when it changes. Counters that cannot be opened are skipped.
pub struct CounterGcSampler {
    factory: Arc<dyn PerformanceCounterFactory>,
    transformer: Arc<dyn SampleTransformer<GcSampleValues>>,
    instance: Option<String>,
    proxies: Vec<CounterProxy>,
    previous: GcSampleValues,
    consecutive_failures: u32,
}

impl CounterGcSampler {
    /// Creates a sampler opening its counters through `factory`.
    pub fn new<T>(factory: Arc<dyn PerformanceCounterFactory>, transformer: T) -> Self
    where
        T: SampleTransformer<GcSampleValues>,
    {
        Self {
            factory,
            transformer: Arc::new(transformer),
            instance: None,
            proxies: Vec::new(),
            previous: GcSampleValues::new(),
            consecutive_failures: 0,
        }
    }

    /// Number of open counters.
    pub fn open_counters(&self) -> usize {
        self.proxies.len()
    }

    /// Instance name the open counters belong to.
    pub fn instance_name(&self) -> Option<&str> {
        self.instance.as_deref()
    }

    /// Failed cycles since the last successful one.
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    fn release_counters(&mut self) {
        self.proxies.clear();
        self.instance = None;
    }

    fn ensure_counters(&mut self) -> Result<()> {
        let instance = self
            .factory
            .current_process_instance_name(GC_COUNTER_CATEGORY)?;

        if self.instance.as_deref() != Some(instance.as_str()) {
            if let Some(previous) = &self.instance {
                log::debug!(
                    "performance counter instance changed from {previous:?} to {instance:?}, reopening counters"
                );
            }
            self.proxies.clear();
            self.instance = Some(instance);
        }

        if !self.proxies.is_empty() {
            return Ok(());
        }

        let instance = self.instance.as_deref().unwrap_or_default();
        let mut dropped = Vec::new();
        for (ty, name) in TRACKED_COUNTERS {
            match self.factory.create_counter(GC_COUNTER_CATEGORY, name, instance) {
                Ok(counter) => self.proxies.push(CounterProxy { ty, counter }),
                Err(err @ SamplerError::Unauthorized { .. }) => {
                    self.proxies.clear();
                    return Err(err);
                }
                Err(err) => {
                    log::trace!("unable to open counter {name:?}: {err}");
                    dropped.push(name);
                }
            }
        }

        if self.proxies.is_empty() {
            return Err(SamplerError::CounterSetup(format!(
                "no counters in {GC_COUNTER_CATEGORY:?} could be opened for instance {instance:?}"
            )));
        }
        if !dropped.is_empty() {
            log::warn!(
                "unable to open {} GC performance counters, they will not be reported: {}",
                dropped.len(),
                dropped.join(", ")
            );
        }
        Ok(())
    }

    fn read_counters(&mut self) -> Result<GcSampleValues> {
        self.ensure_counters()?;

        let mut raw = GcSampleValues::new();
        for proxy in &mut self.proxies {
            raw.insert(proxy.ty, proxy.counter.next_value()?);
        }
        Ok(raw)
    }

    fn report(&self, raw: &GcSampleValues) -> GcSampleValues {
        raw.iter()
            .map(|(ty, value)| {
                if ty.is_delta() {
                    let previous = self.previous.get(ty).unwrap_or(0.0);
                    (ty, (value - previous).max(0.0))
                } else {
                    (ty, value)
                }
            })
            .collect()
    }
}

impl SamplingTask for CounterGcSampler {
    fn name(&self) -> &'static str {
        "gc"
    }

    fn interval(&self) -> Duration {
        GC_SAMPLE_INTERVAL
    }

    fn on_stop(&mut self) {
        self.release_counters();
    }

    fn on_dispose(&mut self) {
        self.release_counters();
    }

    fn sample(&mut self) -> Result<()> {
        match self.read_counters() {
            Ok(raw) => {
                self.consecutive_failures = 0;
                let values = self.report(&raw);
                self.transformer.transform(values);
                self.previous = raw;
                Ok(())
            }
            Err(SamplerError::Unauthorized { .. }) => {
                let identity = current_identity();
                log::error!(
                    "process identity {identity:?} is not allowed to read GC performance counters"
                );
                Err(SamplerError::Unauthorized { identity })
            }
            Err(err) => {
                self.consecutive_failures += 1;
                if self.consecutive_failures >= MAX_CONSECUTIVE_COUNTER_FAILURES {
                    return Err(err);
                }
                log::warn!(
                    "unable to sample GC performance counters ({} of {} attempts): {err}",
                    self.consecutive_failures,
                    MAX_CONSECUTIVE_COUNTER_FAILURES
                );
                Ok(())
            }
        }
    }
}

/// Best-effort name of the OS user this process runs as.
fn current_identity() -> String {
    if let Some(user) = std::env::var_os("USER").or_else(|| std::env::var_os("USERNAME")) {
        return user.to_string_lossy().into_owned();
    }

    #[cfg(unix)]
    {
        // SAFETY: geteuid has no preconditions and cannot fail.
        let uid = unsafe { libc::geteuid() };
        format!("uid {uid}")
    }
    #[cfg(not(unix))]
    {
        "<unknown>".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct SharedCounter {
        value: Arc<Mutex<f32>>,
        fail: Arc<AtomicBool>,
        open: Arc<AtomicUsize>,
    }

    impl PerformanceCounter for SharedCounter {
        fn next_value(&mut self) -> Result<f32> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(SamplerError::unavailable("counter read failed"));
            }
            Ok(*self.value.lock().unwrap())
        }
    }

    impl Drop for SharedCounter {
        fn drop(&mut self) {
            self.open.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct FakeFactory {
        instance: Mutex<String>,
        value: Arc<Mutex<f32>>,
        fail_reads: Arc<AtomicBool>,
        open: Arc<AtomicUsize>,
        created: AtomicUsize,
        refuse_odd: bool,
        unauthorized: bool,
    }

    impl PerformanceCounterFactory for FakeFactory {
        fn current_process_instance_name(&self, category: &str) -> Result<String> {
            assert_eq!(category, GC_COUNTER_CATEGORY);
            Ok(self.instance.lock().unwrap().clone())
        }

        fn create_counter(
            &self,
            _category: &str,
            _counter: &str,
            _instance: &str,
        ) -> Result<Box<dyn PerformanceCounter>> {
            if self.unauthorized {
                return Err(SamplerError::Unauthorized {
                    identity: String::new(),
                });
            }
            let attempt = self.created.fetch_add(1, Ordering::SeqCst) + 1;
            if self.refuse_odd && attempt % 2 == 1 {
                return Err(SamplerError::CounterSetup("missing".into()));
            }
            self.open.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(SharedCounter {
                value: self.value.clone(),
                fail: self.fail_reads.clone(),
                open: self.open.clone(),
            }))
        }
    }

    fn factory() -> Arc<FakeFactory> {
        let factory = FakeFactory::default();
        *factory.instance.lock().unwrap() = "app".into();
        Arc::new(factory)
    }

    fn capture(
        factory: Arc<FakeFactory>,
    ) -> (CounterGcSampler, Arc<Mutex<Vec<GcSampleValues>>>) {
        let samples = Arc::new(Mutex::new(Vec::new()));
        let captured = samples.clone();
        let sampler = CounterGcSampler::new(factory, move |v: GcSampleValues| {
            captured.lock().unwrap().push(v)
        });
        (sampler, samples)
    }

    #[test]
    fn test_deltas_and_pass_through() {
        let factory = factory();
        *factory.value.lock().unwrap() = 3.0;
        let (mut sampler, samples) = capture(factory.clone());

        sampler.sample().unwrap();
        *factory.value.lock().unwrap() = 13.0;
        sampler.sample().unwrap();

        let samples = samples.lock().unwrap();
        assert_eq!(samples[0].len(), TRACKED_COUNTERS.len());
        assert!(samples[0].iter().all(|(_, v)| v == 3.0));
        for (ty, value) in samples[1].iter() {
            let expected = if ty.is_delta() { 10.0 } else { 13.0 };
            assert_eq!(value, expected, "{ty:?}");
        }
    }

    #[test]
    fn test_partial_counter_setup_continues() {
        let factory = Arc::new(FakeFactory {
            instance: Mutex::new("app".into()),
            refuse_odd: true,
            ..Default::default()
        });
        let (mut sampler, samples) = capture(factory.clone());

        sampler.sample().unwrap();
        assert_eq!(factory.created.load(Ordering::SeqCst), TRACKED_COUNTERS.len());
        assert_eq!(sampler.open_counters(), TRACKED_COUNTERS.len() / 2);
        assert_eq!(samples.lock().unwrap()[0].len(), TRACKED_COUNTERS.len() / 2);
        assert_eq!(sampler.consecutive_failures(), 0);
    }

    #[test]
    fn test_instance_change_reopens_counters() {
        let factory = factory();
        let (mut sampler, _samples) = capture(factory.clone());

        sampler.sample().unwrap();
        sampler.sample().unwrap();
        assert_eq!(factory.created.load(Ordering::SeqCst), 12);

        *factory.instance.lock().unwrap() = "app#1".into();
        sampler.sample().unwrap();
        assert_eq!(factory.created.load(Ordering::SeqCst), 24);
        assert_eq!(factory.open.load(Ordering::SeqCst), 12);
        assert_eq!(sampler.instance_name(), Some("app#1"));
    }

    #[test]
    fn test_gives_up_after_consecutive_failures() {
        let factory = factory();
        let (mut sampler, samples) = capture(factory.clone());
        factory.fail_reads.store(true, Ordering::SeqCst);

        for _ in 1..MAX_CONSECUTIVE_COUNTER_FAILURES {
            sampler.sample().unwrap();
        }
        assert!(sampler.sample().is_err());
        assert!(samples.lock().unwrap().is_empty());
    }

    #[test]
    fn test_success_resets_failure_count() {
        let factory = factory();
        let (mut sampler, _samples) = capture(factory.clone());

        factory.fail_reads.store(true, Ordering::SeqCst);
        sampler.sample().unwrap();
        sampler.sample().unwrap();
        assert_eq!(sampler.consecutive_failures(), 2);

        factory.fail_reads.store(false, Ordering::SeqCst);
        sampler.sample().unwrap();
        assert_eq!(sampler.consecutive_failures(), 0);
    }

    #[test]
    fn test_unauthorized_fails_immediately() {
        let factory = Arc::new(FakeFactory {
            instance: Mutex::new("app".into()),
            unauthorized: true,
            ..Default::default()
        });
        let (mut sampler, _samples) = capture(factory);

        match sampler.sample() {
            Err(SamplerError::Unauthorized { identity }) => assert!(!identity.is_empty()),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_stop_releases_counters() {
        let factory = factory();
        let (mut sampler, _samples) = capture(factory.clone());

        sampler.sample().unwrap();
        assert_eq!(factory.open.load(Ordering::SeqCst), 12);
        sampler.on_stop();
        assert_eq!(factory.open.load(Ordering::SeqCst), 0);
        assert_eq!(sampler.open_counters(), 0);
    }
}
