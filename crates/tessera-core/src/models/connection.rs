use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::tenant::Tenant;

/// Database engine kind for a tenant database.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(
    feature = "sqlx",
    sqlx(type_name = "db_engine", rename_all = "lowercase")
)]
#[serde(rename_all = "lowercase")]
pub enum DbEngine {
    Postgres,
}

/// Connection metadata for a dedicated tenant database.
///
/// Credentials are stored encrypted and stay encrypted in every cache tier;
/// the plaintext exists only transiently while a physical pool is being
/// built. `last_ok_at` / `last_error` are observability writebacks from the
/// pool manager, not routing inputs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionMetadata {
    pub tenant_id: Uuid,
    pub host: String,
    pub port: u16,
    pub database_name: String,
    pub encrypted_credentials: String,
    pub engine: DbEngine,
    pub tls: bool,
    pub pool_size: Option<i32>,
    pub pool_overflow: Option<i32>,
    pub read_only: bool,
    pub last_ok_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// Plaintext shape of the encrypted credential blob.
///
/// Serialized to JSON before encryption so the blob stays self-describing;
/// instances of this struct must never be logged or persisted.
#[derive(Debug, Serialize, Deserialize)]
pub struct DbCredentials {
    pub username: String,
    pub password: String,
}

/// Immutable per-unit-of-work snapshot of a resolution result.
///
/// `metadata` is `Some` for every `Dedicated` tenant; `Shared` tenants route
/// to the central database and carry no connection metadata of their own.
/// Once handed to a unit of work the snapshot is never re-fetched mid-flight.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedTenant {
    pub tenant: Tenant,
    pub metadata: Option<ConnectionMetadata>,
}
