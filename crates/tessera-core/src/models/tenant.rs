use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Tenant lifecycle status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(
    feature = "sqlx",
    sqlx(type_name = "tenant_status", rename_all = "lowercase")
)]
#[serde(rename_all = "lowercase")]
pub enum TenantStatus {
    Trial,
    Active,
    Suspended,
    Cancelled,
}

/// How a tenant's data is physically isolated.
///
/// `Shared` tenants live in the central database, distinguished by a tenant
/// column. `Dedicated` tenants own a separate physical database. The two
/// modes differ only in how connection metadata resolves to a pool key, so
/// this is a plain discriminant rather than a trait hierarchy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(
    feature = "sqlx",
    sqlx(type_name = "isolation_mode", rename_all = "lowercase")
)]
#[serde(rename_all = "lowercase")]
pub enum IsolationMode {
    Shared,
    Dedicated,
}

/// Tenant (organization) entity.
///
/// The routing hint is the subdomain-style label requests arrive with. It is
/// unique and immutable once assigned; records are never physically deleted
/// (status only), so a retired hint can never be re-bound to another tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Tenant {
    pub id: Uuid,
    pub code: String,
    pub routing_hint: String,
    pub isolation_mode: IsolationMode,
    pub status: TenantStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Tenant {
    pub fn is_active(&self) -> bool {
        matches!(self.status, TenantStatus::Active | TenantStatus::Trial)
    }
}
