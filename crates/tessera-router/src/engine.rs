//! The routing engine facade.
//!
//! Wires resolver, cache, pool manager, and enforcer together behind the
//! narrow contract the rest of the system consumes: "give me a ready
//! session for this hint" and "tell me whether this operation is safely
//! tenant-scoped."

use std::future::Future;
use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use tessera_core::{CredentialCodec, RouterConfig, RouterError};
use tessera_db::MetadataStore;

use crate::backend::ConnectionBackend;
use crate::cache::{CacheStats, DistributedTier, MetadataCache};
use crate::context::{ActiveTenant, TenantContext, TenantSession};
use crate::enforcer::{QueryIsolationEnforcer, ViolationCounts};
use crate::pool::{ConnectionPoolManager, PoolStats};
use crate::resolver::TenantResolver;

/// Operator-facing stats snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct RouterStats {
    pub pools: PoolStats,
    pub cache: CacheStats,
    pub violations: ViolationCounts,
}

pub struct TenantRouter<B: ConnectionBackend> {
    cache: Arc<MetadataCache>,
    resolver: TenantResolver,
    pools: Arc<ConnectionPoolManager<B>>,
    enforcer: Arc<QueryIsolationEnforcer>,
}

impl<B: ConnectionBackend> TenantRouter<B> {
    pub async fn new(
        config: RouterConfig,
        store: Arc<dyn MetadataStore>,
        codec: CredentialCodec,
        backend: B,
        distributed: Option<Arc<dyn DistributedTier>>,
    ) -> Result<Self, RouterError> {
        config.validate()?;

        let cache = Arc::new(MetadataCache::new(Arc::clone(&store), distributed, &config));
        let resolver = TenantResolver::new(Arc::clone(&cache), &config);
        let enforcer = Arc::new(QueryIsolationEnforcer::new(
            config.isolation_policy,
            config.tenant_global_tables.clone(),
        ));
        let pools = Arc::new(
            ConnectionPoolManager::new(backend, store, codec, config).await?,
        );

        Ok(Self {
            cache,
            resolver,
            pools,
            enforcer,
        })
    }

    /// Start a unit of work: resolve the hint, acquire a connection, and
    /// return the session that owns both. The caller wraps its work in
    /// `scoped` (or `TenantContext::scope`) so downstream checks can see
    /// the current tenant.
    pub async fn begin(&self, hint: &str) -> Result<TenantSession<B::Pool>, RouterError> {
        let resolved = self.resolver.resolve(hint).await?;
        let active = ActiveTenant {
            tenant_id: resolved.tenant.id,
            isolation_mode: resolved.tenant.isolation_mode,
        };
        tracing::debug!(
            tenant_id = %active.tenant_id,
            isolation_mode = ?active.isolation_mode,
            "Resolved unit of work"
        );
        let handle = self.pools.acquire(&resolved).await?;
        Ok(TenantSession::new(active, handle))
    }

    /// Run a full unit of work: `begin`, establish the tenant context, run
    /// the closure, and tear everything down on every exit path.
    pub async fn scoped<F, Fut, T>(&self, hint: &str, work: F) -> Result<T, RouterError>
    where
        F: FnOnce(TenantSession<B::Pool>) -> Fut,
        Fut: Future<Output = Result<T, RouterError>>,
    {
        let session = self.begin(hint).await?;
        let active = session.active().clone();
        TenantContext::scope(active, work(session)).await
    }

    /// Signal that a tenant's record or connection metadata changed:
    /// drops cached metadata and retires any live pool so the next acquire
    /// sees fresh state.
    pub async fn invalidate_tenant(&self, tenant_id: Uuid) {
        self.cache.invalidate(tenant_id).await;
        self.pools.retire(tenant_id).await;
    }

    pub fn enforcer(&self) -> &QueryIsolationEnforcer {
        &self.enforcer
    }

    pub fn pools(&self) -> &Arc<ConnectionPoolManager<B>> {
        &self.pools
    }

    /// Spawn the periodic idle-pool sweep.
    pub fn start_idle_sweeper(&self) -> tokio::task::JoinHandle<()> {
        Arc::clone(&self.pools).start_idle_sweeper()
    }

    pub async fn stats(&self) -> RouterStats {
        RouterStats {
            pools: self.pools.stats().await,
            cache: self.cache.stats(),
            violations: self.enforcer.violation_counts(),
        }
    }
}
