//! Process-wide, time-bounded cache of the chat engine.

use super::{ChatEngine, CondensePlusContextEngine};
use crate::config::Settings;
use crate::error::Result;
use async_trait::async_trait;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::info;

/// Builds chat engines for the cache.
#[async_trait]
pub trait EngineFactory: Send + Sync {
    /// Identifies the configuration an engine is built from.
    fn fingerprint(&self) -> u64;

    /// Build a fresh engine.
    async fn build(&self) -> Result<Arc<dyn ChatEngine>>;
}

/// Builds [`CondensePlusContextEngine`]s from settings.
pub struct OpenAIEngineFactory {
    settings: Settings,
}

impl OpenAIEngineFactory {
    pub fn new(settings: Settings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl EngineFactory for OpenAIEngineFactory {
    fn fingerprint(&self) -> u64 {
        let s = &self.settings;
        let mut hasher = DefaultHasher::new();
        for section in [
            serde_json::to_string(&s.openai),
            serde_json::to_string(&s.embedding),
            serde_json::to_string(&s.vector_store),
            serde_json::to_string(&s.rag),
            serde_json::to_string(&s.prompts.custom_dir),
        ] {
            section.unwrap_or_default().hash(&mut hasher);
        }
        let mut variables: Vec<_> = s.prompts.variables.iter().collect();
        variables.sort();
        variables.hash(&mut hasher);
        hasher.finish()
    }

    async fn build(&self) -> Result<Arc<dyn ChatEngine>> {
        let engine = CondensePlusContextEngine::from_settings(&self.settings)?;
        Ok(Arc::new(engine))
    }
}

struct CachedEngine {
    fingerprint: u64,
    built_at: Instant,
    engine: Arc<dyn ChatEngine>,
}

/// Lazily builds the engine once and shares it until the TTL runs out or the
/// configuration fingerprint changes. Concurrent callers wait for a single build.
pub struct EngineCache {
    ttl: Duration,
    slot: Mutex<Option<CachedEngine>>,
}

impl EngineCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slot: Mutex::new(None),
        }
    }

    /// Return the cached engine, building it if absent, stale or built from a
    /// different configuration.
    pub async fn get_or_build(&self, factory: &dyn EngineFactory) -> Result<Arc<dyn ChatEngine>> {
        let mut slot = self.slot.lock().await;
        let fingerprint = factory.fingerprint();

        if let Some(cached) = slot.as_ref() {
            if cached.fingerprint == fingerprint && cached.built_at.elapsed() < self.ttl {
                return Ok(cached.engine.clone());
            }
        }

        info!(fingerprint, "Building chat engine");
        let engine = factory.build().await?;
        *slot = Some(CachedEngine {
            fingerprint,
            built_at: Instant::now(),
            engine: engine.clone(),
        });
        Ok(engine)
    }
}
