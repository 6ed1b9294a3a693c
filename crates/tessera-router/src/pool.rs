//! Connection pool manager.
//!
//! Owns a bounded collection of physical pools keyed by tenant, plus the
//! always-resident admin pool for the shared/central database. Tenant pools
//! are built lazily on first acquisition, LRU-evicted under admission
//! pressure, and reclaimed by a periodic idle sweep. Both eviction paths go
//! through the same close-and-remove routine so they cannot race each other
//! into closing an entry twice.

use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Instant;

use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use uuid::Uuid;

use tessera_core::models::{ConnectionMetadata, IsolationMode, ResolvedTenant};
use tessera_core::{CredentialCodec, RouterConfig, RouterError};
use tessera_db::MetadataStore;

use crate::backend::{ConnectionBackend, PhysicalPool, PoolParams, PoolSpec};

/// Registry key for a physical pool. Shared-mode tenants all route to
/// `Admin`; only dedicated tenants get a key of their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PoolKey {
    Admin,
    Tenant(Uuid),
}

impl std::fmt::Display for PoolKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PoolKey::Admin => write!(f, "admin"),
            PoolKey::Tenant(id) => write!(f, "tenant/{}", id),
        }
    }
}

/// One live physical pool plus its bookkeeping.
pub struct PoolEntry<P> {
    key: PoolKey,
    pool: P,
    created_at: Instant,
    last_access: StdMutex<Instant>,
    in_use: AtomicUsize,
}

impl<P> PoolEntry<P> {
    fn new(key: PoolKey, pool: P) -> Self {
        let now = Instant::now();
        Self {
            key,
            pool,
            created_at: now,
            last_access: StdMutex::new(now),
            in_use: AtomicUsize::new(0),
        }
    }

    pub fn key(&self) -> PoolKey {
        self.key
    }

    pub fn in_use(&self) -> usize {
        self.in_use.load(Ordering::SeqCst)
    }

    fn touch(&self) {
        if let Ok(mut guard) = self.last_access.lock() {
            *guard = Instant::now();
        }
    }

    fn last_access(&self) -> Instant {
        self.last_access
            .lock()
            .map(|guard| *guard)
            .unwrap_or(self.created_at)
    }
}

/// A checked-out connection tied to its pool entry. Dropping the handle
/// returns the connection and decrements the in-use count on every exit
/// path, including cancellation.
pub struct PoolHandle<P: PhysicalPool> {
    conn: P::Conn,
    entry: Arc<PoolEntry<P>>,
}

impl<P: PhysicalPool> std::fmt::Debug for PoolHandle<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolHandle")
            .field("key", &self.entry.key)
            .finish_non_exhaustive()
    }
}

impl<P: PhysicalPool> PoolHandle<P> {
    pub fn key(&self) -> PoolKey {
        self.entry.key
    }
}

impl<P: PhysicalPool> Deref for PoolHandle<P> {
    type Target = P::Conn;

    fn deref(&self) -> &Self::Target {
        &self.conn
    }
}

impl<P: PhysicalPool> DerefMut for PoolHandle<P> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.conn
    }
}

impl<P: PhysicalPool> Drop for PoolHandle<P> {
    fn drop(&mut self) {
        self.entry.in_use.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Per-pool stats snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct PoolStat {
    pub key: String,
    pub in_use: usize,
    pub idle_secs: u64,
}

/// Manager-level stats snapshot. `live_tenant_pools` excludes the admin pool.
#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub live_tenant_pools: usize,
    pub pools: Vec<PoolStat>,
    pub exhausted_total: u64,
}

pub struct ConnectionPoolManager<B: ConnectionBackend> {
    backend: B,
    store: Arc<dyn MetadataStore>,
    codec: CredentialCodec,
    config: RouterConfig,
    admin: Arc<PoolEntry<B::Pool>>,
    entries: Mutex<HashMap<Uuid, Arc<PoolEntry<B::Pool>>>>,
    // Per-key build locks so concurrent first acquisitions for the same
    // tenant build exactly one pool. Entries are kept for the manager's
    // lifetime; removing them could let a late builder race a fresh one.
    build_locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
    exhausted: AtomicU64,
}

impl<B: ConnectionBackend> ConnectionPoolManager<B> {
    /// Build the manager and its always-resident admin pool.
    pub async fn new(
        backend: B,
        store: Arc<dyn MetadataStore>,
        codec: CredentialCodec,
        config: RouterConfig,
    ) -> Result<Self, RouterError> {
        let admin_spec = PoolSpec::Admin {
            url: config.database_url.clone(),
            max_connections: config.admin_pool_size,
            acquire_timeout: config.acquire_timeout,
        };
        let admin_pool = backend.build(&admin_spec).await.map_err(|e| {
            RouterError::Config(format!("failed to build admin pool: {}", e))
        })?;
        tracing::info!(
            max_connections = config.admin_pool_size,
            "Admin connection pool ready"
        );

        Ok(Self {
            backend,
            store,
            codec,
            config,
            admin: Arc::new(PoolEntry::new(PoolKey::Admin, admin_pool)),
            entries: Mutex::new(HashMap::new()),
            build_locks: Mutex::new(HashMap::new()),
            exhausted: AtomicU64::new(0),
        })
    }

    /// Acquire a connection for a resolved tenant, building the tenant's
    /// pool first if needed. May wait up to the configured acquire timeout.
    pub async fn acquire(
        &self,
        resolved: &ResolvedTenant,
    ) -> Result<PoolHandle<B::Pool>, RouterError> {
        let entry = match resolved.tenant.isolation_mode {
            IsolationMode::Shared => {
                self.admin.touch();
                Arc::clone(&self.admin)
            }
            IsolationMode::Dedicated => self.entry_for(resolved).await?,
        };

        let conn = match entry.pool.checkout().await {
            Ok(conn) => conn,
            Err(err) => {
                if matches!(err, RouterError::PoolExhausted { .. }) {
                    self.exhausted.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(key = %entry.key, "Pool saturated, acquisition timed out");
                }
                return Err(err);
            }
        };

        entry.in_use.fetch_add(1, Ordering::SeqCst);
        Ok(PoolHandle { conn, entry })
    }

    /// Look up or build the pool entry for a dedicated tenant.
    async fn entry_for(
        &self,
        resolved: &ResolvedTenant,
    ) -> Result<Arc<PoolEntry<B::Pool>>, RouterError> {
        let tenant_id = resolved.tenant.id;

        if let Some(entry) = self.entries.lock().await.get(&tenant_id) {
            entry.touch();
            return Ok(Arc::clone(entry));
        }

        let build_lock = {
            let mut locks = self.build_locks.lock().await;
            Arc::clone(
                locks
                    .entry(tenant_id)
                    .or_insert_with(|| Arc::new(Mutex::new(()))),
            )
        };
        let _guard = build_lock.lock().await;

        // A concurrent caller may have finished the build while we waited.
        if let Some(entry) = self.entries.lock().await.get(&tenant_id) {
            entry.touch();
            return Ok(Arc::clone(entry));
        }

        let metadata = resolved.metadata.as_ref().ok_or_else(|| {
            RouterError::ConnectionBuildFailed {
                tenant_id,
                detail: "dedicated tenant has no connection metadata".to_string(),
            }
        })?;

        let params = self.tenant_params(tenant_id, metadata)?;
        tracing::debug!(
            tenant_id = %tenant_id,
            database = %params.database_name,
            "Building tenant connection pool"
        );

        let pool = match self.backend.build(&PoolSpec::Tenant(params)).await {
            Ok(pool) => pool,
            Err(e) => {
                let detail = e.to_string();
                // Writeback for observability; the error already fails the
                // acquisition, so a failed writeback only gets a warning.
                if let Err(w) = self.store.record_connection_error(tenant_id, &detail).await {
                    tracing::warn!(tenant_id = %tenant_id, "Failed to record build error: {}", w);
                }
                tracing::error!(tenant_id = %tenant_id, "Tenant pool build failed: {}", detail);
                return Err(RouterError::ConnectionBuildFailed { tenant_id, detail });
            }
        };
        if let Err(w) = self.store.record_connection_ok(tenant_id).await {
            tracing::warn!(tenant_id = %tenant_id, "Failed to record build success: {}", w);
        }

        let entry = Arc::new(PoolEntry::new(PoolKey::Tenant(tenant_id), pool));

        // Admission: evict the least-recently-accessed entry first when the
        // budget is full, ties broken by earliest creation.
        let victim = {
            let mut entries = self.entries.lock().await;
            let victim = if entries.len() >= self.config.max_tenant_pools {
                entries
                    .iter()
                    .min_by_key(|(_, e)| (e.last_access(), e.created_at))
                    .map(|(id, _)| *id)
                    .and_then(|id| entries.remove(&id))
            } else {
                None
            };
            entries.insert(tenant_id, Arc::clone(&entry));
            victim
        };

        if let Some(victim) = victim {
            tracing::info!(key = %victim.key, "Evicting LRU pool to admit {}", entry.key);
            self.close_entry(victim).await;
        }

        tracing::info!(tenant_id = %tenant_id, "Tenant connection pool ready");
        Ok(entry)
    }

    /// Decrypt credentials and assemble connect parameters. The plaintext
    /// password moves into the params and dies with the build call.
    fn tenant_params(
        &self,
        tenant_id: Uuid,
        metadata: &ConnectionMetadata,
    ) -> Result<PoolParams, RouterError> {
        let creds = self
            .codec
            .decrypt_credentials(&metadata.encrypted_credentials)
            .map_err(|e| RouterError::ConnectionBuildFailed {
                tenant_id,
                detail: format!("credential decrypt failed: {}", e),
            })?;

        let base = metadata
            .pool_size
            .unwrap_or(self.config.tenant_pool_size as i32)
            .max(1) as u32;
        let overflow = metadata
            .pool_overflow
            .unwrap_or(self.config.tenant_pool_overflow as i32)
            .max(0) as u32;

        Ok(PoolParams {
            label: PoolKey::Tenant(tenant_id).to_string(),
            host: metadata.host.clone(),
            port: metadata.port,
            database_name: metadata.database_name.clone(),
            username: creds.username,
            password: creds.password,
            tls: metadata.tls,
            max_connections: base + overflow,
            acquire_timeout: self.config.acquire_timeout,
        })
    }

    /// Close a removed entry: wait for in-flight connections to drain up to
    /// the drain timeout, then close regardless. The single arbitration
    /// point for both LRU eviction and the idle sweep.
    async fn close_entry(&self, entry: Arc<PoolEntry<B::Pool>>) {
        let deadline = Instant::now() + self.config.drain_timeout;
        while entry.in_use() > 0 && Instant::now() < deadline {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        }
        if entry.in_use() > 0 {
            tracing::warn!(
                key = %entry.key,
                in_use = entry.in_use(),
                "Drain timeout reached, closing pool with in-flight connections"
            );
        }
        entry.pool.close().await;
        tracing::info!(key = %entry.key, "Closed connection pool");
    }

    /// Remove and close every tenant pool idle past the inactivity
    /// threshold. Returns the number of pools reclaimed. The admin pool is
    /// never swept.
    pub async fn evict_idle(&self) -> usize {
        let threshold = self.config.idle_timeout;
        let victims: Vec<Arc<PoolEntry<B::Pool>>> = {
            let mut entries = self.entries.lock().await;
            let now = Instant::now();
            let idle_ids: Vec<Uuid> = entries
                .iter()
                .filter(|(_, e)| {
                    e.in_use() == 0 && now.duration_since(e.last_access()) >= threshold
                })
                .map(|(id, _)| *id)
                .collect();
            idle_ids
                .into_iter()
                .filter_map(|id| entries.remove(&id))
                .collect()
        };

        let count = victims.len();
        for victim in victims {
            tracing::info!(key = %victim.key, "Reclaiming idle pool");
            self.close_entry(victim).await;
        }
        count
    }

    /// Close and remove a specific tenant's pool, e.g. after its connection
    /// metadata changed or the tenant was suspended. A subsequent acquire
    /// rebuilds transparently.
    pub async fn retire(&self, tenant_id: Uuid) {
        let entry = self.entries.lock().await.remove(&tenant_id);
        if let Some(entry) = entry {
            tracing::info!(tenant_id = %tenant_id, "Retiring tenant pool");
            self.close_entry(entry).await;
        }
    }

    /// Spawn the periodic idle-reclamation sweep.
    pub fn start_idle_sweeper(self: Arc<Self>) -> JoinHandle<()> {
        let interval = self.config.sweep_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // first tick fires immediately
            loop {
                ticker.tick().await;
                let reclaimed = self.evict_idle().await;
                if reclaimed > 0 {
                    tracing::debug!(reclaimed, "Idle sweep reclaimed pools");
                }
            }
        })
    }

    pub async fn stats(&self) -> PoolStats {
        let now = Instant::now();
        let mut pools = vec![PoolStat {
            key: self.admin.key.to_string(),
            in_use: self.admin.in_use(),
            idle_secs: now.duration_since(self.admin.last_access()).as_secs(),
        }];

        let entries = self.entries.lock().await;
        for entry in entries.values() {
            pools.push(PoolStat {
                key: entry.key.to_string(),
                in_use: entry.in_use(),
                idle_secs: now.duration_since(entry.last_access()).as_secs(),
            });
        }

        PoolStats {
            live_tenant_pools: entries.len(),
            pools,
            exhausted_total: self.exhausted.load(Ordering::Relaxed),
        }
    }
}
