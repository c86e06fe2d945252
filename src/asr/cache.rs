//! Engine Cache
//!
//! Loaded engines are shared between every pipeline that asks for the same
//! (model directory, provider) identity. The map only holds weak references:
//! pipelines keep engines alive, and an engine is destroyed the moment its
//! last stream lets go of it.
//!
//! # Lifecycle
//! - **Acquire**: upgrade a live entry, otherwise build under the map lock.
//!   Builds are serialized; a caller may block while another thread loads.
//! - **Release**: dropping the last [`SharedEngine`] destroys the engine.
//!   The stale weak entry is pruned on the next build.

use crate::asr::engine::{
    default_factory, EngineFactory, ModelArtifacts, RecognizerConfig, RecognizerEngine,
};
use crate::error::{FilterError, Result};
use crate::status::lock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ModelIdentity {
    pub model_path: PathBuf,
    pub provider: String,
}

impl ModelIdentity {
    pub fn new(model_path: impl Into<PathBuf>, provider: &str) -> Self {
        Self {
            model_path: model_path.into(),
            provider: provider.to_string(),
        }
    }

    pub fn model_path(&self) -> &Path {
        &self.model_path
    }
}

/// Construction and destruction counts, for diagnostics.
#[derive(Default)]
pub struct CacheStats {
    constructed: AtomicUsize,
    destroyed: AtomicUsize,
}

impl CacheStats {
    pub fn constructed(&self) -> usize {
        self.constructed.load(Ordering::SeqCst)
    }

    pub fn destroyed(&self) -> usize {
        self.destroyed.load(Ordering::SeqCst)
    }
}

pub struct EngineInstance {
    identity: ModelIdentity,
    engine: Box<dyn RecognizerEngine>,
    stats: Arc<CacheStats>,
}

impl EngineInstance {
    pub fn identity(&self) -> &ModelIdentity {
        &self.identity
    }

    pub fn engine(&self) -> &dyn RecognizerEngine {
        self.engine.as_ref()
    }
}

impl Drop for EngineInstance {
    fn drop(&mut self) {
        self.stats.destroyed.fetch_add(1, Ordering::SeqCst);
        log::info!(
            "Recognition engine released: {} ({})",
            self.identity.model_path.display(),
            self.identity.provider
        );
    }
}

pub type SharedEngine = Arc<EngineInstance>;

pub struct EngineCache {
    factory: Arc<dyn EngineFactory>,
    entries: Mutex<HashMap<ModelIdentity, Weak<EngineInstance>>>,
    stats: Arc<CacheStats>,
}

impl Default for EngineCache {
    fn default() -> Self {
        Self::new(default_factory())
    }
}

impl EngineCache {
    pub fn new(factory: Arc<dyn EngineFactory>) -> Self {
        Self {
            factory,
            entries: Mutex::new(HashMap::new()),
            stats: Arc::new(CacheStats::default()),
        }
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Number of identities with a live engine.
    pub fn live_count(&self) -> usize {
        lock(&self.entries)
            .values()
            .filter(|w| w.strong_count() > 0)
            .count()
    }

    pub fn acquire(&self, identity: &ModelIdentity) -> Result<SharedEngine> {
        if identity.model_path.as_os_str().is_empty() {
            return Err(FilterError::NotConfigured);
        }

        let mut entries = lock(&self.entries);
        if let Some(live) = entries.get(identity).and_then(Weak::upgrade) {
            return Ok(live);
        }

        let artifacts = ModelArtifacts::locate(&identity.model_path)?;
        let config = RecognizerConfig::new(artifacts, &identity.provider);
        let engine = self.factory.build(&config)?;

        let instance = Arc::new(EngineInstance {
            identity: identity.clone(),
            engine,
            stats: self.stats.clone(),
        });
        self.stats.constructed.fetch_add(1, Ordering::SeqCst);
        log::info!(
            "Recognition engine loaded: {} ({})",
            identity.model_path.display(),
            identity.provider
        );

        entries.retain(|_, w| w.strong_count() > 0);
        entries.insert(identity.clone(), Arc::downgrade(&instance));
        Ok(instance)
    }
}
