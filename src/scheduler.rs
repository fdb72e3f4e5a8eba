//! Periodic execution of sampling callbacks.
//!
//! Samplers never spawn threads themselves; they register a callback with a
//! [`Scheduler`] under a unique [`CallbackId`] and unregister it when they
//! stop.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// A callback registered with a scheduler.
pub type SampleCallback = Arc<dyn Fn() + Send + Sync>;

/// Identity under which a callback is registered.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CallbackId(u64);

impl CallbackId {
    /// Allocates a process-unique id.
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        CallbackId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for CallbackId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Runs callbacks at a fixed interval.
///
/// Implementations must never run the same registration concurrently with
/// itself. Different registrations may run in parallel.
pub trait Scheduler: Send + Sync {
    /// Registers `callback` to run every `interval`, first after
    /// `initial_delay` (or `interval` when `None`).
    ///
    /// Registering an id that is already registered replaces it.
    fn execute_every(
        &self,
        id: CallbackId,
        callback: SampleCallback,
        interval: Duration,
        initial_delay: Option<Duration>,
    );

    /// Unregisters a callback. Unknown ids are a no-op.
    ///
    /// This may be called from within the callback itself.
    fn stop_executing(&self, id: CallbackId);
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Worker {
    shutdown: Arc<(Mutex<bool>, Condvar)>,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    fn stop(mut self) {
        let (flag, cvar) = self.shutdown.as_ref();
        *lock(flag) = true;
        cvar.notify_all();

        if let Some(handle) = self.handle.take() {
            // a callback stopping itself must not join its own thread
            if handle.thread().id() != std::thread::current().id() {
                handle.join().ok();
            }
        }
    }
}

/// A scheduler running every registration on its own background thread.
///
/// Dropping the scheduler stops and joins all workers.
#[derive(Default)]
pub struct ThreadScheduler {
    workers: Mutex<BTreeMap<CallbackId, Worker>>,
}

impl ThreadScheduler {
    /// Creates a scheduler without registrations.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of active registrations.
    pub fn registered_count(&self) -> usize {
        lock(&self.workers).len()
    }
}

impl Scheduler for ThreadScheduler {
    fn execute_every(
        &self,
        id: CallbackId,
        callback: SampleCallback,
        interval: Duration,
        initial_delay: Option<Duration>,
    ) {
        self.stop_executing(id);

        #[allow(clippy::mutex_atomic)]
        let shutdown = Arc::new((Mutex::new(false), Condvar::new()));
        let worker_shutdown = shutdown.clone();
        // held across the spawn so a fast callback stopping itself finds its worker
        let mut workers = lock(&self.workers);
        let spawned = std::thread::Builder::new()
            .name(format!("runtime-sampler-{id}"))
            .spawn(move || {
                let (flag, cvar) = worker_shutdown.as_ref();
                let mut next_run = Instant::now() + initial_delay.unwrap_or(interval);
                loop {
                    {
                        let mut stopped = lock(flag);
                        loop {
                            if *stopped {
                                return;
                            }
                            let now = Instant::now();
                            if now >= next_run {
                                break;
                            }
                            stopped = cvar
                                .wait_timeout(stopped, next_run - now)
                                .unwrap_or_else(PoisonError::into_inner)
                                .0;
                        }
                    }

                    callback();

                    next_run += interval;
                    let now = Instant::now();
                    if next_run < now {
                        // a slow callback skips missed ticks instead of bursting
                        next_run = now + interval;
                    }
                }
            });

        match spawned {
            Ok(handle) => {
                workers.insert(
                    id,
                    Worker {
                        shutdown,
                        handle: Some(handle),
                    },
                );
            }
            Err(err) => {
                log::error!("failed to spawn sampler thread for callback {id}: {err}");
            }
        }
    }

    fn stop_executing(&self, id: CallbackId) {
        let worker = lock(&self.workers).remove(&id);
        if let Some(worker) = worker {
            worker.stop();
        }
    }
}

impl Drop for ThreadScheduler {
    fn drop(&mut self) {
        let workers = std::mem::take(&mut *lock(&self.workers));
        for (_, worker) in workers {
            worker.stop();
        }
    }
}

impl std::fmt::Debug for ThreadScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadScheduler")
            .field("registered_count", &self.registered_count())
            .finish()
    }
}

#[derive(Clone)]
struct Registration {
    callback: SampleCallback,
    interval: Duration,
    initial_delay: Option<Duration>,
}

/// A scheduler that only runs callbacks when told to.
///
/// Useful for hosts that already own a timer and for deterministic tests.
#[derive(Default)]
pub struct ManualScheduler {
    registrations: Mutex<BTreeMap<CallbackId, Registration>>,
    execute_calls: AtomicUsize,
    stop_calls: AtomicUsize,
}

impl ManualScheduler {
    /// Creates a scheduler without registrations.
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs the callback registered under `id` once.
    ///
    /// Returns `false` if nothing is registered under `id`.
    pub fn tick(&self, id: CallbackId) -> bool {
        let registration = lock(&self.registrations).get(&id).cloned();
        match registration {
            Some(registration) => {
                (registration.callback)();
                true
            }
            None => false,
        }
    }

    /// Runs every registered callback once, returning how many ran.
    pub fn tick_all(&self) -> usize {
        let callbacks: Vec<SampleCallback> = lock(&self.registrations)
            .values()
            .map(|r| r.callback.clone())
            .collect();
        for callback in &callbacks {
            callback();
        }
        callbacks.len()
    }

    /// Returns `true` if `id` is currently registered.
    pub fn is_registered(&self, id: CallbackId) -> bool {
        lock(&self.registrations).contains_key(&id)
    }

    /// Number of active registrations.
    pub fn registered_count(&self) -> usize {
        lock(&self.registrations).len()
    }

    /// The interval and initial delay `id` was registered with.
    pub fn timing_of(&self, id: CallbackId) -> Option<(Duration, Option<Duration>)> {
        lock(&self.registrations)
            .get(&id)
            .map(|r| (r.interval, r.initial_delay))
    }

    /// How many times `execute_every` was called.
    pub fn execute_calls(&self) -> usize {
        self.execute_calls.load(Ordering::SeqCst)
    }

    /// How many times `stop_executing` was called, including no-op calls.
    pub fn stop_calls(&self) -> usize {
        self.stop_calls.load(Ordering::SeqCst)
    }
}

impl Scheduler for ManualScheduler {
    fn execute_every(
        &self,
        id: CallbackId,
        callback: SampleCallback,
        interval: Duration,
        initial_delay: Option<Duration>,
    ) {
        self.execute_calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.registrations).insert(
            id,
            Registration {
                callback,
                interval,
                initial_delay,
            },
        );
    }

    fn stop_executing(&self, id: CallbackId) {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.registrations).remove(&id);
    }
}

impl std::fmt::Debug for ManualScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManualScheduler")
            .field("registered_count", &self.registered_count())
            .finish()
    }
}

#[cfg(feature = "tokio-runtime")]
pub use self::tokio_scheduler::TokioScheduler;

#[cfg(feature = "tokio-runtime")]
mod tokio_scheduler {
    use super::*;

    use tokio::runtime::Handle;
    use tokio::task::JoinHandle as TaskHandle;
    use tokio::time::MissedTickBehavior;

    /// A scheduler spawning one interval task per registration on a Tokio
    /// runtime.
    pub struct TokioScheduler {
        handle: Handle,
        tasks: Mutex<BTreeMap<CallbackId, TaskHandle<()>>>,
    }

    impl TokioScheduler {
        /// Try to create a scheduler on the current Tokio runtime.
        ///
        /// Returns `None` if no Tokio runtime is available.
        pub fn try_new() -> Option<Self> {
            Handle::try_current().ok().map(Self::with_handle)
        }

        /// Creates a scheduler with the given runtime handle.
        pub fn with_handle(handle: Handle) -> Self {
            Self {
                handle,
                tasks: Mutex::new(BTreeMap::new()),
            }
        }
    }

    impl Scheduler for TokioScheduler {
        fn execute_every(
            &self,
            id: CallbackId,
            callback: SampleCallback,
            interval: Duration,
            initial_delay: Option<Duration>,
        ) {
            let task = self.handle.spawn(async move {
                tokio::time::sleep(initial_delay.unwrap_or(interval)).await;
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    callback();
                }
            });
            if let Some(previous) = lock(&self.tasks).insert(id, task) {
                previous.abort();
            }
        }

        fn stop_executing(&self, id: CallbackId) {
            if let Some(task) = lock(&self.tasks).remove(&id) {
                task.abort();
            }
        }
    }

    impl Drop for TokioScheduler {
        fn drop(&mut self) {
            for (_, task) in std::mem::take(&mut *lock(&self.tasks)) {
                task.abort();
            }
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_scheduler_ticks_registered_callbacks() {
        let scheduler = ManualScheduler::new();
        let count = Arc::new(AtomicUsize::new(0));
        let id = CallbackId::next();

        let count_clone = count.clone();
        scheduler.execute_every(
            id,
            Arc::new(move || {
                count_clone.fetch_add(1, Ordering::SeqCst);
            }),
            Duration::from_secs(60),
            Some(Duration::from_secs(1)),
        );

        assert!(scheduler.tick(id));
        assert_eq!(scheduler.tick_all(), 1);
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert_eq!(
            scheduler.timing_of(id),
            Some((Duration::from_secs(60), Some(Duration::from_secs(1))))
        );

        scheduler.stop_executing(id);
        scheduler.stop_executing(id);
        assert!(!scheduler.tick(id));
        assert_eq!(scheduler.stop_calls(), 2);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_thread_scheduler_runs_callback() {
        let scheduler = ThreadScheduler::new();
        let (tx, rx) = std::sync::mpsc::channel();
        let id = CallbackId::next();

        let tx = Mutex::new(tx);
        scheduler.execute_every(
            id,
            Arc::new(move || {
                lock(&tx).send(()).ok();
            }),
            Duration::from_millis(10),
            Some(Duration::from_millis(1)),
        );

        rx.recv_timeout(Duration::from_secs(5))
            .expect("callback should run");
        rx.recv_timeout(Duration::from_secs(5))
            .expect("callback should run again");

        scheduler.stop_executing(id);
        scheduler.stop_executing(id);
        assert_eq!(scheduler.registered_count(), 0);
    }

    #[test]
    fn test_thread_scheduler_callback_can_stop_itself() {
        let scheduler = Arc::new(ThreadScheduler::new());
        let count = Arc::new(AtomicUsize::new(0));
        let id = CallbackId::next();

        let weak = Arc::downgrade(&scheduler);
        let count_clone = count.clone();
        scheduler.execute_every(
            id,
            Arc::new(move || {
                count_clone.fetch_add(1, Ordering::SeqCst);
                if let Some(scheduler) = weak.upgrade() {
                    scheduler.stop_executing(id);
                }
            }),
            Duration::from_millis(5),
            Some(Duration::from_millis(1)),
        );

        let deadline = Instant::now() + Duration::from_secs(5);
        while scheduler.registered_count() > 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(scheduler.registered_count(), 0);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
