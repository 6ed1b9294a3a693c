//! Error types module
//!
//! All routing-engine failures are unified under the `RouterError` enum.
//! The taxonomy separates client-facing rejections (a unit of work that
//! cannot proceed safely) from retryable infrastructure errors, so callers
//! can apply backoff instead of treating an outage as a tenant-configuration
//! problem.
//!
//! The `Database` variant and `From<sqlx::Error>` are gated behind the
//! `sqlx` feature.

#[cfg(feature = "sqlx")]
use sqlx::Error as SqlxError;
use uuid::Uuid;

/// Log level for error reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Debug level - for expected errors like unmatched hints
    Debug,
    /// Warning level - for recoverable issues like saturation
    Warn,
    /// Error level - for unexpected failures and contract violations
    Error,
}

/// Metadata for error reporting - defines how an error should be presented.
///
/// `client_message` is what an end user may see; it never carries host,
/// credential, or other internal detail. The full error text is for
/// operator-facing logs only.
pub trait ErrorMetadata {
    /// Machine-readable error code (e.g., "TENANT_NOT_RESOLVED")
    fn error_code(&self) -> &'static str;

    /// Whether this error is recoverable (can be retried)
    fn is_recoverable(&self) -> bool;

    /// Client-facing message (may differ from internal error message)
    fn client_message(&self) -> String;

    /// Whether internal details must be hidden from clients
    fn is_sensitive(&self) -> bool;

    /// Log level for this error
    fn log_level(&self) -> LogLevel;
}

#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error("tenant not resolved: {0}")]
    TenantNotResolved(String),

    #[error("metadata store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("connection build failed for tenant {tenant_id}: {detail}")]
    ConnectionBuildFailed { tenant_id: Uuid, detail: String },

    #[error("pool exhausted for {key}: acquisition timed out")]
    PoolExhausted { key: String },

    #[error("isolation violation: {0}")]
    IsolationViolation(String),

    #[error("no tenant context established for this unit of work")]
    ContextNotEstablished,

    #[cfg(feature = "sqlx")]
    #[error("database error: {0}")]
    Database(#[source] SqlxError),

    #[error("credential codec error: {0}")]
    Crypto(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

#[cfg(feature = "sqlx")]
impl From<SqlxError> for RouterError {
    fn from(err: SqlxError) -> Self {
        RouterError::Database(err)
    }
}

impl From<serde_json::Error> for RouterError {
    fn from(err: serde_json::Error) -> Self {
        RouterError::Internal(format!("JSON error: {}", err))
    }
}

/// Static metadata per variant: (error_code, recoverable, sensitive, log_level).
/// client_message stays per-variant for dynamic content.
fn router_error_static_metadata(err: &RouterError) -> (&'static str, bool, bool, LogLevel) {
    match err {
        RouterError::TenantNotResolved(_) => ("TENANT_NOT_RESOLVED", false, false, LogLevel::Debug),
        RouterError::StoreUnavailable(_) => ("STORE_UNAVAILABLE", true, true, LogLevel::Error),
        RouterError::ConnectionBuildFailed { .. } => {
            ("CONNECTION_BUILD_FAILED", true, true, LogLevel::Error)
        }
        RouterError::PoolExhausted { .. } => ("POOL_EXHAUSTED", true, false, LogLevel::Warn),
        RouterError::IsolationViolation(_) => ("ISOLATION_VIOLATION", false, false, LogLevel::Error),
        RouterError::ContextNotEstablished => {
            ("CONTEXT_NOT_ESTABLISHED", false, false, LogLevel::Error)
        }
        #[cfg(feature = "sqlx")]
        RouterError::Database(_) => ("DATABASE_ERROR", true, true, LogLevel::Error),
        RouterError::Crypto(_) => ("CRYPTO_ERROR", false, true, LogLevel::Error),
        RouterError::Config(_) => ("CONFIG_ERROR", false, true, LogLevel::Error),
        RouterError::Internal(_) => ("INTERNAL_ERROR", true, true, LogLevel::Error),
    }
}

impl ErrorMetadata for RouterError {
    fn error_code(&self) -> &'static str {
        router_error_static_metadata(self).0
    }

    fn is_recoverable(&self) -> bool {
        router_error_static_metadata(self).1
    }

    fn is_sensitive(&self) -> bool {
        router_error_static_metadata(self).2
    }

    fn log_level(&self) -> LogLevel {
        router_error_static_metadata(self).3
    }

    fn client_message(&self) -> String {
        match self {
            RouterError::TenantNotResolved(_) => "Tenant could not be resolved".to_string(),
            RouterError::StoreUnavailable(_)
            | RouterError::ConnectionBuildFailed { .. }
            | RouterError::PoolExhausted { .. } => "Service temporarily unavailable".to_string(),
            RouterError::IsolationViolation(ref msg) => {
                format!("Operation rejected: {}", msg)
            }
            RouterError::ContextNotEstablished => "Internal server error".to_string(),
            #[cfg(feature = "sqlx")]
            RouterError::Database(_) => "Service temporarily unavailable".to_string(),
            RouterError::Crypto(_) | RouterError::Config(_) | RouterError::Internal(_) => {
                "Internal server error".to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_resolved_is_client_rejection() {
        let err = RouterError::TenantNotResolved("unknown hint 'nope'".to_string());
        assert_eq!(err.error_code(), "TENANT_NOT_RESOLVED");
        assert!(!err.is_recoverable());
        assert_eq!(err.client_message(), "Tenant could not be resolved");
        assert_eq!(err.log_level(), LogLevel::Debug);
    }

    #[test]
    fn test_build_failure_hides_host_detail() {
        let err = RouterError::ConnectionBuildFailed {
            tenant_id: Uuid::new_v4(),
            detail: "could not reach db7.internal:5432".to_string(),
        };
        assert!(err.is_recoverable());
        assert!(err.is_sensitive());
        assert!(!err.client_message().contains("db7.internal"));
    }

    #[test]
    fn test_pool_exhausted_is_retryable_saturation() {
        let err = RouterError::PoolExhausted {
            key: "tenant/5b2e".to_string(),
        };
        assert_eq!(err.error_code(), "POOL_EXHAUSTED");
        assert!(err.is_recoverable());
        assert_eq!(err.log_level(), LogLevel::Warn);
    }

    #[test]
    fn test_context_not_established_is_fatal() {
        let err = RouterError::ContextNotEstablished;
        assert!(!err.is_recoverable());
        assert_eq!(err.log_level(), LogLevel::Error);
    }
}
