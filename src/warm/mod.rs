//! # Cache Warming Module
//!
//! Proactive population of cache entries before real demand arrives, driven
//! by a registry of known-popular input identifiers.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`CacheWarmer`] | Drives registered generators over popular identifiers |
//! | [`PopularityRegistry`] | Ordered per-namespace identifier sets (advisory only) |
//! | [`WarmGenerator`] | Boxed async function producing the value for one identifier |

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, RwLock};

use futures::future::BoxFuture;
use tracing::debug;

use crate::cache::CacheStore;
use crate::Result;

/// Async value producer for one popular identifier.
pub type WarmGenerator =
    Arc<dyn Fn(String) -> BoxFuture<'static, Result<serde_json::Value>> + Send + Sync>;

/// Ordered set of known high-traffic input identifiers per namespace.
///
/// Advisory only: nothing here is authoritative data, and a stale registry
/// costs at worst some wasted generator calls.
#[derive(Default)]
pub struct PopularityRegistry {
    inner: RwLock<BTreeMap<String, BTreeSet<String>>>,
}

impl PopularityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, namespace: &str, identifiers: impl IntoIterator<Item = String>) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner
            .entry(namespace.to_string())
            .or_default()
            .extend(identifiers);
    }

    pub fn namespaces(&self) -> Vec<String> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.keys().cloned().collect()
    }

    pub fn identifiers_for(&self, namespace: &str) -> Vec<String> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner
            .get(namespace)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }
}

/// Thin driver over [`CacheStore::warm`] plus the [`PopularityRegistry`].
pub struct CacheWarmer {
    store: Arc<CacheStore>,
    registry: PopularityRegistry,
    generators: RwLock<HashMap<String, WarmGenerator>>,
}

impl CacheWarmer {
    pub fn new(store: Arc<CacheStore>) -> Self {
        Self {
            store,
            registry: PopularityRegistry::new(),
            generators: RwLock::new(HashMap::new()),
        }
    }

    /// Record known-popular identifiers for a namespace.
    pub fn register_popular(&self, namespace: &str, identifiers: impl IntoIterator<Item = String>) {
        self.registry.register(namespace, identifiers);
    }

    /// Register the value producer for a namespace.
    pub fn register_generator<F>(&self, namespace: &str, generator: F)
    where
        F: Fn(String) -> BoxFuture<'static, Result<serde_json::Value>> + Send + Sync + 'static,
    {
        let mut generators = self.generators.write().unwrap_or_else(|e| e.into_inner());
        generators.insert(namespace.to_string(), Arc::new(generator));
    }

    /// Warm every namespace that has both identifiers and a generator.
    ///
    /// Returns the number of entries actually written. Namespaces without a
    /// generator are skipped; individual generator failures are logged inside
    /// [`CacheStore::warm`] and do not abort the rest.
    pub async fn warm_all(&self) -> usize {
        let mut warmed = 0;
        for namespace in self.registry.namespaces() {
            let generator = {
                let generators = self.generators.read().unwrap_or_else(|e| e.into_inner());
                generators.get(&namespace).cloned()
            };
            let Some(generator) = generator else {
                debug!(
                    target: "ai_gatekit::warm",
                    namespace = namespace.as_str(),
                    "no generator registered, skipping"
                );
                continue;
            };
            let identifiers = self.registry.identifiers_for(&namespace);
            warmed += self
                .store
                .warm(&namespace, &identifiers, |id| generator(id))
                .await;
        }
        warmed
    }
}
