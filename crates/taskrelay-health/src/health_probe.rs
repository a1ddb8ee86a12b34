use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use taskrelay_config::Config;
use taskrelay_llm::HttpClient;
use taskrelay_utils::ProviderError;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::probes::{Probe, probe_for_provider};
use crate::status::ProviderHealth;

#[derive(Debug, Clone)]
struct CachedHealth {
    health: ProviderHealth,
    stored_at: Instant,
}

/// Per-provider health checks behind a TTL cache.
///
/// The cache is the only state shared between concurrent dispatches. It is a
/// last-write-wins map keyed by provider name; two concurrent misses may both
/// probe, and the later result wins.
pub struct HealthProbe {
    probes: BTreeMap<String, Arc<dyn Probe>>,
    ttl: Duration,
    probe_timeout: Duration,
    cache: Mutex<HashMap<String, CachedHealth>>,
}

impl std::fmt::Debug for HealthProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthProbe")
            .field("providers", &self.probes.keys().collect::<Vec<_>>())
            .field("ttl", &self.ttl)
            .field("probe_timeout", &self.probe_timeout)
            .finish_non_exhaustive()
    }
}

impl HealthProbe {
    #[must_use]
    pub fn new(ttl: Duration, probe_timeout: Duration) -> Self {
        Self {
            probes: BTreeMap::new(),
            ttl,
            probe_timeout,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// One probe per configured provider, with TTL and timeout from `[health]`.
    ///
    /// # Errors
    ///
    /// Fails only if the shared HTTP client cannot be built.
    pub fn from_config(config: &Config) -> Result<Self, ProviderError> {
        let client = HttpClient::new()?;
        let mut health = Self::new(config.health.cache_ttl(), config.health.probe_timeout());
        for (name, provider) in &config.providers {
            health.register(name, probe_for_provider(provider, &client));
        }
        Ok(health)
    }

    /// Add or replace the probe for `provider`.
    pub fn register(&mut self, provider: impl Into<String>, probe: Arc<dyn Probe>) {
        self.probes.insert(provider.into(), probe);
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    #[must_use]
    pub fn provider_names(&self) -> Vec<String> {
        self.probes.keys().cloned().collect()
    }

    /// Probe `provider` now, bypassing the cache.
    ///
    /// An unknown provider yields an `unhealthy` record listing the valid names.
    pub async fn check(&self, provider: &str) -> ProviderHealth {
        let Some(probe) = self.probes.get(provider) else {
            return ProviderHealth::unhealthy(provider, format!("unknown provider '{provider}'"))
                .with_detail("valid_providers", self.provider_names());
        };
        run_probe(provider, Arc::clone(probe), self.probe_timeout).await
    }

    /// Cached check: entries younger than the TTL are returned unchanged.
    pub async fn check_cached(&self, provider: &str) -> ProviderHealth {
        if let Some(hit) = self.cached(provider) {
            debug!(provider, status = %hit.status, "Health cache hit");
            return hit;
        }

        let health = self.check(provider).await;
        if self.probes.contains_key(provider)
            && let Ok(mut cache) = self.cache.lock()
        {
            cache.insert(
                provider.to_string(),
                CachedHealth {
                    health: health.clone(),
                    stored_at: Instant::now(),
                },
            );
        }
        health
    }

    fn cached(&self, provider: &str) -> Option<ProviderHealth> {
        let cache = self.cache.lock().ok()?;
        let entry = cache.get(provider)?;
        (entry.stored_at.elapsed() < self.ttl).then(|| entry.health.clone())
    }

    /// Drop one provider's cached entry, or every entry when `provider` is `None`.
    pub fn clear_cache(&self, provider: Option<&str>) {
        if let Ok(mut cache) = self.cache.lock() {
            match provider {
                Some(name) => {
                    cache.remove(name);
                }
                None => cache.clear(),
            }
        }
    }

    /// Strictly `healthy`; degraded counts as not healthy here.
    pub async fn is_healthy(&self, provider: &str) -> bool {
        self.check_cached(provider).await.is_healthy()
    }

    /// Probe every registered provider concurrently, sorted by name.
    pub async fn check_all(&self) -> Vec<ProviderHealth> {
        let mut set = JoinSet::new();
        for (name, probe) in &self.probes {
            let name = name.clone();
            let probe = Arc::clone(probe);
            let timeout = self.probe_timeout;
            set.spawn(async move { run_probe(&name, probe, timeout).await });
        }

        let mut results = Vec::with_capacity(self.probes.len());
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(health) => results.push(health),
                Err(e) => warn!(error = %e, "Health probe task failed"),
            }
        }
        results.sort_by(|a, b| a.provider.cmp(&b.provider));
        results
    }
}

async fn run_probe(provider: &str, probe: Arc<dyn Probe>, timeout: Duration) -> ProviderHealth {
    // Probes carry their own timeouts; this bounds probes that ignore them.
    let grace = timeout + Duration::from_secs(1);
    let health = match tokio::time::timeout(grace, probe.probe(provider, timeout)).await {
        Ok(health) => health,
        Err(_) => ProviderHealth::unhealthy(
            provider,
            format!("health probe timed out after {}s", timeout.as_secs()),
        ),
    };
    debug!(provider, status = %health.status, message = %health.message, "Health probe finished");
    health
}
