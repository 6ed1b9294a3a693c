//! Tessera routing engine.
//!
//! Resolves inbound tenant hints to tenant identity and connection
//! metadata, routes each unit of work to a pooled connection against the
//! correct physical database, and enforces that every data-access
//! operation stays scoped to its tenant.

pub mod backend;
pub mod cache;
pub mod context;
pub mod enforcer;
pub mod engine;
pub mod pool;
pub mod resolver;
pub mod telemetry;
pub mod testing;

pub use backend::{ConnectionBackend, PgBackend, PhysicalPool, PoolParams, PoolSpec};
pub use cache::{CacheEntry, CacheStats, DistributedTier, MetadataCache};
pub use context::{ActiveTenant, TenantContext, TenantSession};
pub use enforcer::{
    Predicate, QueryIsolationEnforcer, QueryVerb, Statement, StructuredQuery, Verdict,
    ViolationCounts,
};
pub use engine::{RouterStats, TenantRouter};
pub use pool::{ConnectionPoolManager, PoolHandle, PoolKey, PoolStats};
pub use resolver::{TenantResolver, SYSTEM_HINT};
