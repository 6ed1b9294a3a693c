//! Unit-of-work tenant context.
//!
//! The current tenant identity is carried in a task-local, never a process
//! global: concurrently executing units of work can never observe each
//! other's tenant. Establishment happens-before any data access inside the
//! scope, and teardown is the scope exit itself, so it runs on every path
//! including cancellation.

use std::future::Future;

use uuid::Uuid;

use tessera_core::models::IsolationMode;
use tessera_core::RouterError;

use crate::backend::PhysicalPool;
use crate::pool::PoolHandle;

tokio::task_local! {
    static ACTIVE_TENANT: ActiveTenant;
}

/// The identity half of a tenant context: what downstream data-access calls
/// need to verify scoping. Cheap to clone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveTenant {
    pub tenant_id: Uuid,
    pub isolation_mode: IsolationMode,
}

/// Accessors for the task-scoped tenant context.
pub struct TenantContext;

impl TenantContext {
    /// Run a unit of work with the given tenant established as current.
    pub async fn scope<F>(active: ActiveTenant, fut: F) -> F::Output
    where
        F: Future,
    {
        ACTIVE_TENANT.scope(active, fut).await
    }

    /// The tenant of the current unit of work.
    ///
    /// Failing here is always a programming defect: a data-access call ran
    /// outside any established scope. It is logged at the highest severity.
    pub fn current() -> Result<ActiveTenant, RouterError> {
        ACTIVE_TENANT.try_with(|active| active.clone()).map_err(|_| {
            tracing::error!("Data access attempted outside any tenant context");
            RouterError::ContextNotEstablished
        })
    }

    pub fn is_established() -> bool {
        ACTIVE_TENANT.try_with(|_| ()).is_ok()
    }
}

/// A unit of work's tenant identity plus its acquired connection handle.
///
/// Dropping the session returns the connection to its pool; the session is
/// owned exclusively by the unit of work that created it.
pub struct TenantSession<P: PhysicalPool> {
    active: ActiveTenant,
    handle: PoolHandle<P>,
}

impl<P: PhysicalPool> std::fmt::Debug for TenantSession<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantSession")
            .field("active", &self.active)
            .finish_non_exhaustive()
    }
}

impl<P: PhysicalPool> TenantSession<P> {
    pub(crate) fn new(active: ActiveTenant, handle: PoolHandle<P>) -> Self {
        Self { active, handle }
    }

    pub fn active(&self) -> &ActiveTenant {
        &self.active
    }

    pub fn tenant_id(&self) -> Uuid {
        self.active.tenant_id
    }

    pub fn handle(&self) -> &PoolHandle<P> {
        &self.handle
    }

    pub fn handle_mut(&mut self) -> &mut PoolHandle<P> {
        &mut self.handle
    }
}
