use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::thread::{self, ThreadId};
use std::time::{Duration, SystemTime};

use log::{Level, Log, Metadata, Record};

use runtime_samplers::protocol::ImmutableCpuSample;
use runtime_samplers::samplers::{CpuSampler, CPU_SAMPLE_INTERVAL};
use runtime_samplers::sources::{CpuReading, CpuSource};
use runtime_samplers::{
    ConfigurationService, ManualScheduler, Result, Sampler, SamplerError, SamplerState,
};

struct ScriptedCpu {
    processors: u32,
    readings: Mutex<VecDeque<Result<CpuReading>>>,
}

impl ScriptedCpu {
    fn new(processors: u32, readings: Vec<Result<CpuReading>>) -> Arc<Self> {
        Arc::new(Self {
            processors,
            readings: Mutex::new(readings.into()),
        })
    }
}

impl CpuSource for ScriptedCpu {
    fn processor_count(&self) -> u32 {
        self.processors
    }

    fn read(&self) -> Result<CpuReading> {
        self.readings
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(SamplerError::Unavailable("no more readings".into())))
    }
}

fn t0() -> SystemTime {
    SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000)
}

#[test]
fn test_cpu_sample_carries_raw_readings() {
    let p0 = Duration::from_secs(500);
    let source = ScriptedCpu::new(
        4,
        vec![
            Ok(CpuReading {
                wall_clock: t0(),
                user_processor_time: p0,
            }),
            Ok(CpuReading {
                wall_clock: t0() + Duration::from_secs(60),
                user_processor_time: p0 + Duration::from_secs(120),
            }),
        ],
    );
    let samples = Arc::new(Mutex::new(Vec::new()));
    let captured = samples.clone();
    let scheduler = Arc::new(ManualScheduler::new());
    let sampler = Sampler::new(
        CpuSampler::new(source, move |s: ImmutableCpuSample| {
            captured.lock().unwrap().push(s)
        }),
        scheduler.clone(),
        Arc::new(ConfigurationService::default()),
    );

    sampler.start();
    assert_eq!(sampler.interval(), CPU_SAMPLE_INTERVAL);
    scheduler.tick(sampler.callback_id());

    assert_eq!(
        *samples.lock().unwrap(),
        vec![ImmutableCpuSample {
            processor_count: 4,
            last_sample_time: t0(),
            last_user_processor_time: p0,
            current_sample_time: t0() + Duration::from_secs(60),
            current_user_processor_time: p0 + Duration::from_secs(120),
        }]
    );
}

#[test]
fn test_failed_read_keeps_previous_reading() {
    let reading = |secs: u64| CpuReading {
        wall_clock: t0() + Duration::from_secs(secs),
        user_processor_time: Duration::from_secs(secs / 2),
    };
    let source = ScriptedCpu::new(
        2,
        vec![
            Ok(reading(0)),
            Ok(reading(60)),
            Err(SamplerError::Unavailable("permission denied".into())),
            Ok(reading(180)),
        ],
    );
    let samples = Arc::new(Mutex::new(Vec::new()));
    let captured = samples.clone();
    let scheduler = Arc::new(ManualScheduler::new());
    let config = Arc::new(ConfigurationService::default());
    let sampler = Sampler::new(
        CpuSampler::new(source, move |s: ImmutableCpuSample| {
            captured.lock().unwrap().push(s)
        }),
        scheduler.clone(),
        config,
    );

    sampler.start();
    scheduler.tick(sampler.callback_id());
    assert_eq!(sampler.with_task(|t| t.baseline()), Some(reading(60)));

    scheduler.tick(sampler.callback_id());
    assert_eq!(sampler.state(), SamplerState::Stopped);
    assert_eq!(sampler.with_task(|t| t.baseline()), Some(reading(60)));

    // a restart pairs the next reading with the last good one
    sampler.start();
    scheduler.tick(sampler.callback_id());
    let samples = samples.lock().unwrap();
    assert_eq!(samples.len(), 2);
    assert_eq!(samples[1].last_sample_time, reading(60).wall_clock);
    assert_eq!(samples[1].current_sample_time, reading(180).wall_clock);
}

#[test]
fn test_unreadable_cpu_never_starts_again() {
    let source = ScriptedCpu::new(1, vec![Err(SamplerError::Unavailable("nope".into()))]);
    let scheduler = Arc::new(ManualScheduler::new());
    let config = Arc::new(ConfigurationService::default());
    let sampler = Sampler::new(
        CpuSampler::new(source, |_: ImmutableCpuSample| {}),
        scheduler.clone(),
        config.clone(),
    );

    sampler.start();
    scheduler.tick(sampler.callback_id());
    assert_eq!(sampler.state(), SamplerState::Stopped);

    config.update(runtime_samplers::SamplerConfig::new());
    assert_eq!(sampler.state(), SamplerState::Stopped);
    assert_eq!(scheduler.registered_count(), 0);
}

/// Keeps warnings and errors together with the thread that logged them.
struct CapturingLogger {
    records: Mutex<Vec<(ThreadId, Level, String)>>,
}

impl Log for CapturingLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= Level::Warn
    }

    fn log(&self, record: &Record<'_>) {
        if self.enabled(record.metadata()) {
            self.records.lock().unwrap().push((
                thread::current().id(),
                record.level(),
                record.args().to_string(),
            ));
        }
    }

    fn flush(&self) {}
}

static LOGGER: CapturingLogger = CapturingLogger {
    records: Mutex::new(Vec::new()),
};

#[test]
fn test_unreadable_cpu_is_reported_once() {
    log::set_logger(&LOGGER).ok();
    log::set_max_level(log::LevelFilter::Warn);

    let source = ScriptedCpu::new(1, vec![Err(SamplerError::Unavailable("denied".into()))]);
    let scheduler = Arc::new(ManualScheduler::new());
    let sampler = Sampler::new(
        CpuSampler::new(source, |_: ImmutableCpuSample| {}),
        scheduler.clone(),
        Arc::new(ConfigurationService::default()),
    );
    sampler.start();
    scheduler.tick(sampler.callback_id());
    scheduler.tick(sampler.callback_id());

    let me = thread::current().id();
    let reported: Vec<_> = LOGGER
        .records
        .lock()
        .unwrap()
        .iter()
        .filter(|(thread, _, _)| *thread == me)
        .cloned()
        .collect();
    assert_eq!(reported.len(), 1);
    assert_eq!(reported[0].1, Level::Error);
    assert!(reported[0].2.starts_with("cpu sampler failed"));
}
