//! The periodic sampling lifecycle shared by all samplers.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError, Weak};
use std::time::Duration;

use crate::config::{ConfigurationService, SubscriptionId};
use crate::error::SamplerError;
use crate::scheduler::{CallbackId, Scheduler};
use crate::task::{FailureAction, SamplingTask};

/// Delay before the first sample so sampling does not compete with process
/// startup.
pub const INITIAL_SAMPLE_DELAY: Duration = Duration::from_secs(1);

/// Lifecycle state of a [`Sampler`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SamplerState {
    /// Not registered with the scheduler.
    Stopped,
    /// Registered, acquiring task resources.
    Starting,
    /// Registered and sampling.
    Running,
    /// Stopped for good.
    Disposed,
}

impl SamplerState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => SamplerState::Starting,
            2 => SamplerState::Running,
            3 => SamplerState::Disposed,
            _ => SamplerState::Stopped,
        }
    }

    fn is_registered(self) -> bool {
        matches!(self, SamplerState::Starting | SamplerState::Running)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_owned()
    }
}

/// Object safe view of a sampler, independent of its task type.
pub trait ManagedSampler: Send + Sync {
    /// Name of the sampler.
    fn name(&self) -> &'static str;
    /// Starts sampling if enabled.
    fn start(&self);
    /// Stops sampling. Idempotent.
    fn stop(&self);
    /// Stops sampling and releases all resources. Idempotent.
    fn dispose(&self);
    /// Current lifecycle state.
    fn state(&self) -> SamplerState;
}

struct Inner<T: SamplingTask> {
    id: CallbackId,
    name: &'static str,
    interval: Duration,
    scheduler: Arc<dyn Scheduler>,
    config: Arc<ConfigurationService>,
    task: Mutex<T>,
    state: AtomicU8,
    // serializes every state transition together with its scheduler
    // (un)registration: owner requests, config updates and failed cycles
    lifecycle: Mutex<()>,
    // bumped on every registration; callbacks of older ones are stale
    generation: AtomicU64,
    subscription: Mutex<Option<SubscriptionId>>,
    unavailable: AtomicBool,
    dispose_requested: AtomicBool,
}

/// Runs a [`SamplingTask`] on a [`Scheduler`] while it is enabled.
///
/// The sampler subscribes to configuration updates: every update stops it
/// and re-evaluates whether it may start, so enabling or disabling samplers
/// at runtime needs no restart. A failed cycle is logged and stops (or
/// disposes) the sampler, depending on [`SamplingTask::failure_action`];
/// errors and panics never reach the scheduler.
pub struct Sampler<T: SamplingTask> {
    inner: Arc<Inner<T>>,
}

impl<T: SamplingTask> Sampler<T> {
    /// Creates a stopped sampler.
    pub fn new(task: T, scheduler: Arc<dyn Scheduler>, config: Arc<ConfigurationService>) -> Self {
        let inner = Arc::new(Inner {
            id: CallbackId::next(),
            name: task.name(),
            interval: task.interval(),
            scheduler,
            config: config.clone(),
            task: Mutex::new(task),
            state: AtomicU8::new(SamplerState::Stopped as u8),
            lifecycle: Mutex::new(()),
            generation: AtomicU64::new(0),
            subscription: Mutex::new(None),
            unavailable: AtomicBool::new(false),
            dispose_requested: AtomicBool::new(false),
        });

        let weak = Arc::downgrade(&inner);
        let subscription = config.subscribe(move |_| {
            if let Some(inner) = weak.upgrade() {
                inner.restart();
            }
        });
        *lock(&inner.subscription) = Some(subscription);

        Self { inner }
    }

    /// Identity under which the sampler registers with the scheduler.
    pub fn callback_id(&self) -> CallbackId {
        self.inner.id
    }

    /// The fixed sampling interval.
    pub fn interval(&self) -> Duration {
        self.inner.interval
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SamplerState {
        self.inner.state()
    }

    /// Evaluates the enabled predicate against the current configuration.
    pub fn is_enabled(&self) -> bool {
        self.inner.is_enabled()
    }

    /// Registers with the scheduler if enabled. No-op otherwise.
    pub fn start(&self) {
        let _guard = lock(&self.inner.lifecycle);
        Inner::start_locked(&self.inner);
    }

    /// Unregisters from the scheduler. Idempotent.
    pub fn stop(&self) {
        let _guard = lock(&self.inner.lifecycle);
        self.inner.halt(SamplerState::Stopped);
    }

    /// Stops and releases task resources. Idempotent.
    pub fn dispose(&self) {
        let _guard = lock(&self.inner.lifecycle);
        self.inner.halt(SamplerState::Disposed);
    }

    /// Runs one sampling cycle now, as the scheduler would.
    ///
    /// Does nothing unless the sampler is starting or running.
    pub fn sample(&self) {
        let generation = self.inner.generation.load(Ordering::SeqCst);
        self.inner.run_sample(generation);
    }

    /// Gives read access to the task, e.g. to inspect its baseline.
    pub fn with_task<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&lock(&self.inner.task))
    }
}

impl<T: SamplingTask> Inner<T> {
    fn state(&self) -> SamplerState {
        SamplerState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn is_enabled(&self) -> bool {
        if self.unavailable.load(Ordering::SeqCst) || !self.config.samplers_allowed() {
            return false;
        }
        let config = self.config.current();
        lock(&self.task).is_enabled(&config)
    }

    fn start_locked(this: &Arc<Self>) {
        if this.state() != SamplerState::Stopped {
            return;
        }
        if this.dispose_requested.load(Ordering::SeqCst) {
            this.halt(SamplerState::Disposed);
            return;
        }
        if !this.is_enabled() {
            log::debug!("{} sampler is disabled and will not be started", this.name);
            return;
        }

        let generation = this.generation.fetch_add(1, Ordering::SeqCst) + 1;
        this.state
            .store(SamplerState::Starting as u8, Ordering::SeqCst);

        let weak: Weak<Self> = Arc::downgrade(this);
        this.scheduler.execute_every(
            this.id,
            Arc::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.run_sample(generation);
                }
            }),
            this.interval,
            Some(INITIAL_SAMPLE_DELAY),
        );

        let config = this.config.current();
        let started = catch_unwind(AssertUnwindSafe(|| lock(&this.task).on_start(&config)))
            .unwrap_or_else(|payload| Err(SamplerError::Panicked(panic_message(&*payload))));

        match started {
            Ok(()) => {
                this.state
                    .store(SamplerState::Running as u8, Ordering::SeqCst);
                log::debug!(
                    "{} sampler started, sampling every {:?}",
                    this.name,
                    this.interval
                );
            }
            Err(err) => {
                let action = this.report_failure(&err);
                this.halt(action.into());
            }
        }
    }

    fn restart(self: Arc<Self>) {
        let _guard = lock(&self.lifecycle);
        if self.state() == SamplerState::Disposed {
            return;
        }
        self.halt(SamplerState::Stopped);
        Inner::start_locked(&self);
    }

    /// Moves to `next` (`Stopped` or `Disposed`), unregistering and releasing
    /// resources as needed. Callers hold `lifecycle`.
    fn halt(&self, next: SamplerState) -> bool {
        let mut current = self.state.load(Ordering::SeqCst);
        let previous = loop {
            let state = SamplerState::from_u8(current);
            if state == SamplerState::Disposed || state == next {
                return false;
            }
            match self.state.compare_exchange(
                current,
                next as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => break state,
                Err(actual) => current = actual,
            }
        };

        if previous.is_registered() {
            self.scheduler.stop_executing(self.id);
            lock(&self.task).on_stop();
            log::debug!("{} sampler stopped", self.name);
        }

        if next == SamplerState::Disposed {
            if let Some(subscription) = lock(&self.subscription).take() {
                self.config.unsubscribe(subscription);
            }
            lock(&self.task).on_dispose();
            log::debug!("{} sampler disposed", self.name);
        }
        true
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation && self.state().is_registered()
    }

    fn run_sample(&self, generation: u64) {
        if !self.is_current(generation) {
            return;
        }

        let result = catch_unwind(AssertUnwindSafe(|| lock(&self.task).sample()))
            .unwrap_or_else(|payload| Err(SamplerError::Panicked(panic_message(&*payload))));

        if let Err(err) = result {
            self.fail(err, generation);
        }
    }

    /// Logs a failure and records its consequences that outlive a restart.
    fn report_failure(&self, err: &SamplerError) -> FailureAction {
        if err.is_permanent() {
            self.unavailable.store(true, Ordering::SeqCst);
        }

        let action = lock(&self.task).failure_action(err);
        if action == FailureAction::Dispose {
            self.dispose_requested.store(true, Ordering::SeqCst);
        }
        log::error!(
            "{} sampler failed, further {} metrics will not be collected: {}",
            self.name,
            self.name,
            err
        );
        action
    }

    /// Stops the registration `generation` after a failed cycle.
    ///
    /// Runs on the scheduler's thread. A lifecycle operation holding the
    /// lock may be waiting for this very callback to return (a thread
    /// scheduler joins its worker), so the lock is only tried. Once that
    /// operation has unregistered `generation` it owns the transition and
    /// picks up `unavailable` and `dispose_requested` itself.
    fn fail(&self, err: SamplerError, generation: u64) {
        let action = self.report_failure(&err);
        loop {
            let _guard = match self.lifecycle.try_lock() {
                Ok(guard) => guard,
                Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
                Err(TryLockError::WouldBlock) => {
                    if !self.is_current(generation) {
                        return;
                    }
                    std::thread::yield_now();
                    continue;
                }
            };
            if self.is_current(generation) {
                self.halt(action.into());
            } else if action == FailureAction::Dispose {
                self.halt(SamplerState::Disposed);
            }
            return;
        }
    }
}

impl From<FailureAction> for SamplerState {
    fn from(action: FailureAction) -> Self {
        match action {
            FailureAction::Stop => SamplerState::Stopped,
            FailureAction::Dispose => SamplerState::Disposed,
        }
    }
}

impl<T: SamplingTask> ManagedSampler for Sampler<T> {
    fn name(&self) -> &'static str {
        self.inner.name
    }

    fn start(&self) {
        Sampler::start(self)
    }

    fn stop(&self) {
        Sampler::stop(self)
    }

    fn dispose(&self) {
        Sampler::dispose(self)
    }

    fn state(&self) -> SamplerState {
        Sampler::state(self)
    }
}

impl<T: SamplingTask> Drop for Sampler<T> {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl<T: SamplingTask> std::fmt::Debug for Sampler<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sampler")
            .field("name", &self.inner.name)
            .field("callback_id", &self.inner.id)
            .field("interval", &self.inner.interval)
            .field("state", &self.state())
            .finish()
    }
}

/// A group of samplers started and shut down together.
#[derive(Default)]
pub struct SamplerSet {
    samplers: Vec<Box<dyn ManagedSampler>>,
}

impl SamplerSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a sampler to the set.
    pub fn add<S: ManagedSampler + 'static>(&mut self, sampler: S) {
        self.samplers.push(Box::new(sampler));
    }

    /// Starts every enabled sampler.
    pub fn start_all(&self) {
        for sampler in &self.samplers {
            sampler.start();
        }
    }

    /// Marks the process as shutting down and disposes every sampler.
    ///
    /// Call this before tearing down the scheduler.
    pub fn shutdown(&self, config: &ConfigurationService) {
        config.begin_shutdown();
        for sampler in &self.samplers {
            sampler.dispose();
        }
    }

    /// Names and states of the samplers in the set.
    pub fn states(&self) -> Vec<(&'static str, SamplerState)> {
        self.samplers
            .iter()
            .map(|s| (s.name(), s.state()))
            .collect()
    }

    /// Number of samplers in the set.
    pub fn len(&self) -> usize {
        self.samplers.len()
    }

    /// Returns true if the set is empty.
    pub fn is_empty(&self) -> bool {
        self.samplers.is_empty()
    }
}

impl std::fmt::Debug for SamplerSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SamplerSet")
            .field("samplers", &self.states())
            .finish()
    }
}
