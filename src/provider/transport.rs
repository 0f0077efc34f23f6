// Transport-level provider concerns, distinct from the wire-encoding
// `Provider` adapters in this module: a base URL, a request-signing
// hook, and a cached model listing. Grounded on this codebase's
// per-vendor config structs (base URL plus an auth header builder) and
// generalized into a trait so the caching layer doesn't need to know
// which vendor it's fronting.

use crate::error::CompletionResult;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// One model a provider's `listModels` call discovered.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelInfo {
    pub id: String,
    pub display_name: Option<String>,
    pub max_context_tokens: Option<u32>,
}

/// Transport-level identity of a vendor endpoint: where requests go and
/// how they're authenticated, independent of how a request/response is
/// encoded on the wire.
#[async_trait]
pub trait ProviderTransport: Send + Sync {
    /// Used as half of `CachedModelList`'s cache key, so two transports
    /// pointed at the same base URL but different vendors don't share
    /// a cache entry.
    fn type_name(&self) -> &'static str;

    fn base_url(&self) -> &str;

    /// Mutates an outgoing request to carry credentials: a bearer
    /// token, an api-key header, or nothing for an unauthenticated
    /// endpoint.
    fn authenticate(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder;

    async fn list_models(&self) -> CompletionResult<Vec<ModelInfo>>;
}

const DEFAULT_TTL: Duration = Duration::from_secs(3600);

struct CacheEntry {
    models: Vec<ModelInfo>,
    expires_at: Instant,
}

/// Caches `listModels()` results per `(typeName, baseURL)` so repeated
/// calls against the same endpoint don't re-hit the network inside the
/// default one-hour window.
pub struct CachedModelList {
    ttl: Duration,
    cache: Mutex<HashMap<(String, String), CacheEntry>>,
}

impl CachedModelList {
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self { ttl, cache: Mutex::new(HashMap::new()) }
    }

    pub async fn models(
        &self,
        provider: &dyn ProviderTransport,
        force_refresh: bool,
    ) -> CompletionResult<Vec<ModelInfo>> {
        let key = (provider.type_name().to_string(), provider.base_url().to_string());

        if !force_refresh {
            let cache = self.cache.lock().await;
            if let Some(entry) = cache.get(&key) {
                if entry.expires_at > Instant::now() {
                    return Ok(entry.models.clone());
                }
            }
        }

        let models = provider.list_models().await?;
        let mut cache = self.cache.lock().await;
        cache.insert(
            key,
            CacheEntry { models: models.clone(), expires_at: Instant::now() + self.ttl },
        );
        Ok(models)
    }
}

impl Default for CachedModelList {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    struct CountingTransport {
        calls: Arc<AtomicU32>,
    }

    #[async_trait]
    impl ProviderTransport for CountingTransport {
        fn type_name(&self) -> &'static str {
            "counting"
        }

        fn base_url(&self) -> &str {
            "https://example.test"
        }

        fn authenticate(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
            request
        }

        async fn list_models(&self) -> CompletionResult<Vec<ModelInfo>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![ModelInfo {
                id: "model-a".to_string(),
                display_name: None,
                max_context_tokens: None,
            }])
        }
    }

    #[tokio::test]
    async fn caches_list_models_within_ttl() {
        let calls = Arc::new(AtomicU32::new(0));
        let transport = CountingTransport { calls: calls.clone() };
        let cached = CachedModelList::with_ttl(Duration::from_secs(60));

        cached.models(&transport, false).await.unwrap();
        cached.models(&transport, false).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn force_refresh_bypasses_cache() {
        let calls = Arc::new(AtomicU32::new(0));
        let transport = CountingTransport { calls: calls.clone() };
        let cached = CachedModelList::with_ttl(Duration::from_secs(60));

        cached.models(&transport, false).await.unwrap();
        cached.models(&transport, true).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn expired_entry_triggers_refetch() {
        let calls = Arc::new(AtomicU32::new(0));
        let transport = CountingTransport { calls: calls.clone() };
        let cached = CachedModelList::with_ttl(Duration::from_millis(1));

        cached.models(&transport, false).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        cached.models(&transport, false).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
