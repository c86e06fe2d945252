//! Shared filter context.
//!
//! One context is created per host process (or per test) and injected into
//! every pipeline. It owns the current configuration and the engine cache,
//! and forwards configuration changes to every live recognition worker.

use crate::asr::cache::EngineCache;
use crate::asr::worker::WorkerCommand;
use crate::config::FilterConfig;
use crate::status::lock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, RwLock, TryLockError};

pub struct FilterContext {
    config: RwLock<Arc<FilterConfig>>,
    generation: AtomicU64,
    cache: Arc<EngineCache>,
    subscribers: Mutex<Vec<Sender<WorkerCommand>>>,
}

impl FilterContext {
    pub fn new(cache: Arc<EngineCache>, config: FilterConfig) -> Self {
        Self {
            config: RwLock::new(Arc::new(config.sanitized())),
            generation: AtomicU64::new(1),
            cache,
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Context backed by the engine this crate was built with.
    pub fn with_default_engine(config: FilterConfig) -> Self {
        Self::new(Arc::new(EngineCache::default()), config)
    }

    pub fn cache(&self) -> &Arc<EngineCache> {
        &self.cache
    }

    /// Bumped on every [`FilterContext::apply`].
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Current configuration. May wait for a concurrent `apply`.
    pub fn config(&self) -> Arc<FilterConfig> {
        match self.config.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Non-blocking variant for the audio thread. `None` means a writer holds
    /// the lock; keep the previous settings.
    pub fn try_config(&self) -> Option<Arc<FilterConfig>> {
        match self.config.try_read() {
            Ok(guard) => Some(guard.clone()),
            Err(TryLockError::Poisoned(poisoned)) => Some(poisoned.into_inner().clone()),
            Err(TryLockError::WouldBlock) => None,
        }
    }

    /// Start forwarding configuration changes to a worker.
    pub fn register(&self, sender: Sender<WorkerCommand>) {
        lock(&self.subscribers).push(sender);
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.subscribers).len()
    }

    /// Sanitize and publish a new configuration. Workers whose receiver is
    /// gone are forgotten.
    pub fn apply(&self, config: FilterConfig) -> Arc<FilterConfig> {
        let config = Arc::new(config.sanitized());
        {
            let mut current = match self.config.write() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            *current = config.clone();
        }
        self.generation.fetch_add(1, Ordering::AcqRel);

        lock(&self.subscribers)
            .retain(|tx| tx.send(WorkerCommand::ApplyConfig(config.clone())).is_ok());
        config
    }
}
