//! Two-tier metadata cache in front of the metadata store.
//!
//! Local tier: in-process LRU with TTL. Distributed tier (optional): shared
//! across process instances so a fleet does not thundering-herd the store.
//! Credentials stay encrypted in both tiers; nothing here ever decrypts.
//!
//! Failure semantics: an unreachable distributed tier degrades to
//! local-only with a warning; an unreachable store fails with
//! `StoreUnavailable`, unless fail-open is configured and a stale local
//! entry exists.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lru::LruCache;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use tessera_core::models::ResolvedTenant;
use tessera_core::{RouterConfig, RouterError};
use tessera_db::MetadataStore;

const DIST_HINT_PREFIX: &str = "tessera:meta:hint:";
const DIST_ID_PREFIX: &str = "tessera:meta:id:";

/// Optional shared cache tier (e.g. Redis). Treated as eventually
/// consistent: a hit here is a hint, not a durability guarantee.
#[async_trait]
pub trait DistributedTier: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, RouterError>;
    async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<(), RouterError>;
    async fn remove(&self, key: &str) -> Result<(), RouterError>;
}

/// A cached resolution snapshot. Entries older than the TTL are treated as
/// absent and force a store re-fetch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub resolved: ResolvedTenant,
    pub fetched_at: DateTime<Utc>,
}

impl CacheEntry {
    fn new(resolved: ResolvedTenant) -> Self {
        Self {
            resolved,
            fetched_at: Utc::now(),
        }
    }

    pub fn is_fresh(&self, ttl: Duration) -> bool {
        Utc::now()
            .signed_duration_since(self.fetched_at)
            .to_std()
            .map(|age| age <= ttl)
            .unwrap_or(true)
    }
}

/// Hit/miss counters for the stats surface.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

struct LocalTier {
    entries: LruCache<String, CacheEntry>,
    hint_by_id: HashMap<Uuid, String>,
}

pub struct MetadataCache {
    store: Arc<dyn MetadataStore>,
    distributed: Option<Arc<dyn DistributedTier>>,
    ttl: Duration,
    fetch_timeout: Duration,
    fail_open: bool,
    local: Mutex<LocalTier>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl MetadataCache {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        distributed: Option<Arc<dyn DistributedTier>>,
        config: &RouterConfig,
    ) -> Self {
        let capacity = NonZeroUsize::new(config.cache_capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            store,
            distributed,
            ttl: config.cache_ttl,
            fetch_timeout: config.fetch_timeout,
            fail_open: config.cache_fail_open,
            local: Mutex::new(LocalTier {
                entries: LruCache::new(capacity),
                hint_by_id: HashMap::new(),
            }),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Look up connection metadata by normalized routing hint.
    pub async fn get(&self, hint: &str) -> Result<Option<ResolvedTenant>, RouterError> {
        // Local tier
        let stale = {
            let mut local = self.local.lock().await;
            match local.entries.get(hint) {
                Some(entry) if entry.is_fresh(self.ttl) => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return Ok(Some(entry.resolved.clone()));
                }
                Some(entry) => Some(entry.clone()),
                None => None,
            }
        };

        // Distributed tier, degrading to local-only on failure
        if let Some(dist) = &self.distributed {
            match dist.get(&format!("{}{}", DIST_HINT_PREFIX, hint)).await {
                Ok(Some(json)) => match serde_json::from_str::<CacheEntry>(&json) {
                    Ok(entry) if entry.is_fresh(self.ttl) => {
                        self.hits.fetch_add(1, Ordering::Relaxed);
                        self.fill_local(hint, &entry).await;
                        return Ok(Some(entry.resolved));
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(hint = %hint, "Discarding undecodable distributed cache entry: {}", e);
                    }
                },
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(hint = %hint, "Distributed cache tier unreachable, degrading to local: {}", e);
                }
            }
        }

        // Source of truth
        self.misses.fetch_add(1, Ordering::Relaxed);
        match self
            .bounded(self.store.fetch_by_hint(hint), &format!("hint '{}'", hint))
            .await
        {
            Ok(Some(resolved)) => {
                let entry = CacheEntry::new(resolved.clone());
                self.fill_local(hint, &entry).await;
                self.fill_distributed(hint, &entry).await;
                Ok(Some(resolved))
            }
            Ok(None) => Ok(None),
            Err(err @ RouterError::StoreUnavailable(_)) => {
                if self.fail_open {
                    if let Some(entry) = stale {
                        tracing::warn!(
                            hint = %hint,
                            "Metadata store unavailable, serving stale cache entry (fail-open)"
                        );
                        return Ok(Some(entry.resolved));
                    }
                }
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    /// Look up connection metadata by tenant id.
    ///
    /// The id indexes the same entry as the hint: locally through the
    /// reverse map, in the distributed tier through the id key (which
    /// stores the hint). A cold miss on both goes to the store by id.
    pub async fn get_by_id(&self, tenant_id: Uuid) -> Result<Option<ResolvedTenant>, RouterError> {
        let hint = {
            let local = self.local.lock().await;
            local.hint_by_id.get(&tenant_id).cloned()
        };
        if let Some(hint) = hint {
            return self.get(&hint).await;
        }

        if let Some(dist) = &self.distributed {
            match dist.get(&format!("{}{}", DIST_ID_PREFIX, tenant_id)).await {
                Ok(Some(hint)) => return self.get(&hint).await,
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(
                        tenant_id = %tenant_id,
                        "Distributed cache tier unreachable, degrading to local: {}",
                        e
                    );
                }
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        match self
            .bounded(
                self.store.fetch_by_id(tenant_id),
                &format!("tenant {}", tenant_id),
            )
            .await?
        {
            Some(resolved) => {
                let hint = resolved.tenant.routing_hint.clone();
                let entry = CacheEntry::new(resolved.clone());
                self.fill_local(&hint, &entry).await;
                self.fill_distributed(&hint, &entry).await;
                Ok(Some(resolved))
            }
            None => Ok(None),
        }
    }

    /// Bound a store fetch by the configured timeout; elapse is an outage,
    /// not an absence.
    async fn bounded<F>(&self, fetch: F, what: &str) -> Result<Option<ResolvedTenant>, RouterError>
    where
        F: std::future::Future<Output = Result<Option<ResolvedTenant>, RouterError>>,
    {
        match tokio::time::timeout(self.fetch_timeout, fetch).await {
            Ok(result) => result,
            Err(_) => Err(RouterError::StoreUnavailable(format!(
                "metadata fetch for {} timed out after {:?}",
                what, self.fetch_timeout
            ))),
        }
    }

    /// Drop a tenant from both tiers. Must be called whenever the tenant's
    /// connection metadata changes.
    pub async fn invalidate(&self, tenant_id: Uuid) {
        let hint = {
            let mut local = self.local.lock().await;
            let hint = local.hint_by_id.remove(&tenant_id);
            if let Some(hint) = &hint {
                local.entries.pop(hint);
            }
            hint
        };

        if let Some(dist) = &self.distributed {
            let id_key = format!("{}{}", DIST_ID_PREFIX, tenant_id);
            // The id key stores the hint, so other instances can find the
            // entry even when this one never cached it locally.
            let dist_hint = match hint {
                Some(h) => Some(h),
                None => dist.get(&id_key).await.ok().flatten(),
            };
            if let Some(h) = dist_hint {
                if let Err(e) = dist.remove(&format!("{}{}", DIST_HINT_PREFIX, h)).await {
                    tracing::warn!(tenant_id = %tenant_id, "Failed to invalidate distributed entry: {}", e);
                }
            }
            if let Err(e) = dist.remove(&id_key).await {
                tracing::warn!(tenant_id = %tenant_id, "Failed to invalidate distributed id key: {}", e);
            }
        }

        tracing::debug!(tenant_id = %tenant_id, "Invalidated cached metadata");
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    async fn fill_local(&self, hint: &str, entry: &CacheEntry) {
        let mut local = self.local.lock().await;
        local
            .hint_by_id
            .insert(entry.resolved.tenant.id, hint.to_string());
        local.entries.put(hint.to_string(), entry.clone());
    }

    async fn fill_distributed(&self, hint: &str, entry: &CacheEntry) {
        let Some(dist) = &self.distributed else {
            return;
        };
        let json = match serde_json::to_string(entry) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!(hint = %hint, "Failed to serialize cache entry: {}", e);
                return;
            }
        };
        let hint_key = format!("{}{}", DIST_HINT_PREFIX, hint);
        let id_key = format!("{}{}", DIST_ID_PREFIX, entry.resolved.tenant.id);
        if let Err(e) = dist.put(&hint_key, &json, self.ttl).await {
            tracing::warn!(hint = %hint, "Failed to populate distributed cache: {}", e);
            return;
        }
        if let Err(e) = dist.put(&id_key, hint, self.ttl).await {
            tracing::warn!(hint = %hint, "Failed to populate distributed id key: {}", e);
        }
    }
}
