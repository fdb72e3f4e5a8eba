//! Configuration consumed by the samplers.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

/// Flags that decide whether samplers may run.
///
/// Every sampler re-reads these on start and on every configuration update,
/// so changing them at runtime takes effect without a restart.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SamplerConfig {
    /// Global kill switch for all samplers.
    ///
    /// Default: false
    pub samplers_disabled: bool,

    /// Enable samplers that rely on runtime event listeners (the GC
    /// event-stream sampler and the thread pool throughput listener).
    ///
    /// Default: true
    pub event_listener_samplers_enabled: bool,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            samplers_disabled: false,
            event_listener_samplers_enabled: true,
        }
    }
}

impl SamplerConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the global kill switch.
    #[must_use]
    pub fn with_samplers_disabled(mut self, disabled: bool) -> Self {
        self.samplers_disabled = disabled;
        self
    }

    /// Enables or disables event listener based samplers.
    #[must_use]
    pub fn with_event_listener_samplers(mut self, enabled: bool) -> Self {
        self.event_listener_samplers_enabled = enabled;
        self
    }
}

/// Identifies a configuration change subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(u64);

type Subscriber = Arc<dyn Fn(&SamplerConfig) + Send + Sync>;

/// Supplies the current [`SamplerConfig`], the process shutdown state and
/// change notifications.
pub struct ConfigurationService {
    current: RwLock<Arc<SamplerConfig>>,
    shutting_down: AtomicBool,
    subscribers: Mutex<BTreeMap<SubscriptionId, Subscriber>>,
    next_id: AtomicU64,
}

impl ConfigurationService {
    /// Creates a service holding the given configuration.
    pub fn new(config: SamplerConfig) -> Self {
        Self {
            current: RwLock::new(Arc::new(config)),
            shutting_down: AtomicBool::new(false),
            subscribers: Mutex::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Returns the current configuration.
    pub fn current(&self) -> Arc<SamplerConfig> {
        match self.current.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Replaces the configuration and notifies every subscriber.
    ///
    /// Subscribers run synchronously on the calling thread, after the new
    /// configuration is visible through [`current`](Self::current).
    pub fn update(&self, config: SamplerConfig) {
        let config = Arc::new(config);
        match self.current.write() {
            Ok(mut guard) => *guard = config.clone(),
            Err(poisoned) => *poisoned.into_inner() = config.clone(),
        }
        log::debug!("sampler configuration updated: {:?}", config);

        // clone the list so subscribers may (un)subscribe while notified
        let subscribers: Vec<Subscriber> = self
            .subscribers
            .lock()
            .map(|subs| subs.values().cloned().collect())
            .unwrap_or_default();
        for subscriber in subscribers {
            subscriber(&config);
        }
    }

    /// Registers a callback invoked on every configuration update.
    pub fn subscribe<F>(&self, f: F) -> SubscriptionId
    where
        F: Fn(&SamplerConfig) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.insert(id, Arc::new(f));
        }
        id
    }

    /// Removes a subscription. Unknown ids are ignored.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.remove(&id);
        }
    }

    /// Marks the process as shutting down. Samplers will refuse to start.
    pub fn begin_shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
    }

    /// Returns `true` once [`begin_shutdown`](Self::begin_shutdown) was called.
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// The base enabled predicate shared by every sampler.
    pub fn samplers_allowed(&self) -> bool {
        !self.current().samplers_disabled && !self.is_shutting_down()
    }
}

impl Default for ConfigurationService {
    fn default() -> Self {
        Self::new(SamplerConfig::default())
    }
}

impl std::fmt::Debug for ConfigurationService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigurationService")
            .field("current", &self.current())
            .field("shutting_down", &self.is_shutting_down())
            .field(
                "subscribers_count",
                &self.subscribers.lock().map(|s| s.len()).unwrap_or(0),
            )
            .finish()
    }
}
