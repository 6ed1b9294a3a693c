//! Configuration module
//!
//! Environment-variable driven configuration for the routing engine:
//! pool admission limits, cache TTLs, isolation-enforcement policy, and
//! hint-fallback behavior.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::RouterError;

// Defaults
const MAX_TENANT_POOLS: usize = 100;
const TENANT_POOL_SIZE: u32 = 2;
const TENANT_POOL_OVERFLOW: u32 = 3;
const ADMIN_POOL_SIZE: u32 = 20;
const POOL_ACQUIRE_TIMEOUT_SECS: u64 = 30;
const POOL_IDLE_TIMEOUT_SECS: u64 = 900;
const POOL_DRAIN_TIMEOUT_SECS: u64 = 5;
const POOL_SWEEP_INTERVAL_SECS: u64 = 60;
const METADATA_CACHE_TTL_SECS: u64 = 300;
const METADATA_CACHE_CAPACITY: usize = 1024;
const METADATA_FETCH_TIMEOUT_SECS: u64 = 5;

/// Isolation-enforcement policy for data-access operations.
///
/// `Enforce` is the default; `Warn` exists only for staged rollout and
/// `Bypass` is a narrow escape hatch for system/migration jobs. Neither of
/// the weaker modes is ever selected implicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationPolicy {
    Enforce,
    Warn,
    Bypass,
}

impl Default for IsolationPolicy {
    fn default() -> Self {
        IsolationPolicy::Enforce
    }
}

impl FromStr for IsolationPolicy {
    type Err = RouterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "enforce" => Ok(IsolationPolicy::Enforce),
            "warn" => Ok(IsolationPolicy::Warn),
            "bypass" => Ok(IsolationPolicy::Bypass),
            other => Err(RouterError::Config(format!(
                "Invalid ISOLATION_POLICY '{}': expected enforce, warn, or bypass",
                other
            ))),
        }
    }
}

/// Router configuration, loaded from the environment.
#[derive(Clone, Debug)]
pub struct RouterConfig {
    pub environment: String,
    /// Admin/shared central database (always-on pool, never evicted).
    pub database_url: String,
    pub admin_pool_size: u32,
    /// Maximum concurrently-live tenant pools, excluding the admin pool.
    pub max_tenant_pools: usize,
    pub tenant_pool_size: u32,
    pub tenant_pool_overflow: u32,
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
    pub drain_timeout: Duration,
    pub sweep_interval: Duration,
    pub cache_ttl: Duration,
    pub cache_capacity: usize,
    /// Serve stale cache entries when the metadata store is down.
    pub cache_fail_open: bool,
    /// Upper bound on a single metadata-store fetch; elapse surfaces as
    /// `StoreUnavailable` so a hung store cannot hang resolution.
    pub fetch_timeout: Duration,
    pub isolation_policy: IsolationPolicy,
    /// Tables exempt from tenant-predicate enforcement (shared catalog data).
    pub tenant_global_tables: Vec<String>,
    /// Substitute the reserved system tenant for empty/unmatched hints.
    /// Honored only outside production; see `validate`.
    pub hint_fallback_enabled: bool,
    /// Host suffixes stripped during hint normalization (e.g. ".example.com").
    pub hint_strip_suffixes: Vec<String>,
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_list(key: &str) -> Vec<String> {
    env::var(key)
        .unwrap_or_default()
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

impl RouterConfig {
    pub fn from_env() -> Result<Self, RouterError> {
        dotenvy::dotenv().ok();

        let environment = env::var("ENVIRONMENT")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string());

        let database_url = env::var("DATABASE_URL")
            .map_err(|_| RouterError::Config("DATABASE_URL must be set".to_string()))?;

        let isolation_policy = match env::var("ISOLATION_POLICY") {
            Ok(v) => v.parse()?,
            Err(_) => IsolationPolicy::default(),
        };

        let config = Self {
            environment,
            database_url,
            admin_pool_size: env_parse("ADMIN_POOL_SIZE", ADMIN_POOL_SIZE),
            max_tenant_pools: env_parse("MAX_TENANT_POOLS", MAX_TENANT_POOLS),
            tenant_pool_size: env_parse("TENANT_POOL_SIZE", TENANT_POOL_SIZE),
            tenant_pool_overflow: env_parse("TENANT_POOL_OVERFLOW", TENANT_POOL_OVERFLOW),
            acquire_timeout: Duration::from_secs(env_parse(
                "POOL_ACQUIRE_TIMEOUT_SECS",
                POOL_ACQUIRE_TIMEOUT_SECS,
            )),
            idle_timeout: Duration::from_secs(env_parse(
                "POOL_IDLE_TIMEOUT_SECS",
                POOL_IDLE_TIMEOUT_SECS,
            )),
            drain_timeout: Duration::from_secs(env_parse(
                "POOL_DRAIN_TIMEOUT_SECS",
                POOL_DRAIN_TIMEOUT_SECS,
            )),
            sweep_interval: Duration::from_secs(env_parse(
                "POOL_SWEEP_INTERVAL_SECS",
                POOL_SWEEP_INTERVAL_SECS,
            )),
            cache_ttl: Duration::from_secs(env_parse(
                "METADATA_CACHE_TTL_SECS",
                METADATA_CACHE_TTL_SECS,
            )),
            cache_capacity: env_parse("METADATA_CACHE_CAPACITY", METADATA_CACHE_CAPACITY),
            cache_fail_open: env_parse("METADATA_CACHE_FAIL_OPEN", false),
            fetch_timeout: Duration::from_secs(env_parse(
                "METADATA_FETCH_TIMEOUT_SECS",
                METADATA_FETCH_TIMEOUT_SECS,
            )),
            isolation_policy,
            tenant_global_tables: env_list("TENANT_GLOBAL_TABLES"),
            hint_fallback_enabled: env_parse("HINT_FALLBACK_ENABLED", false),
            hint_strip_suffixes: env_list("HINT_STRIP_SUFFIXES"),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    pub fn validate(&self) -> Result<(), RouterError> {
        if self.max_tenant_pools == 0 {
            return Err(RouterError::Config(
                "MAX_TENANT_POOLS must be at least 1".to_string(),
            ));
        }
        if self.cache_ttl.is_zero() {
            return Err(RouterError::Config(
                "METADATA_CACHE_TTL_SECS must be greater than 0".to_string(),
            ));
        }
        if self.cache_capacity == 0 {
            return Err(RouterError::Config(
                "METADATA_CACHE_CAPACITY must be at least 1".to_string(),
            ));
        }
        if self.fetch_timeout.is_zero() {
            return Err(RouterError::Config(
                "METADATA_FETCH_TIMEOUT_SECS must be greater than 0".to_string(),
            ));
        }
        // Routing unmatched hints to a default tenant in production is an
        // isolation hazard; reject it at startup rather than at resolve time.
        if self.is_production() && self.hint_fallback_enabled {
            return Err(RouterError::Config(
                "HINT_FALLBACK_ENABLED must be false in production".to_string(),
            ));
        }
        if self.is_production() && self.isolation_policy == IsolationPolicy::Bypass {
            return Err(RouterError::Config(
                "ISOLATION_POLICY=bypass is not allowed as a production-wide default".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> RouterConfig {
        RouterConfig {
            environment: "development".to_string(),
            database_url: "postgres://localhost/tessera".to_string(),
            admin_pool_size: ADMIN_POOL_SIZE,
            max_tenant_pools: MAX_TENANT_POOLS,
            tenant_pool_size: TENANT_POOL_SIZE,
            tenant_pool_overflow: TENANT_POOL_OVERFLOW,
            acquire_timeout: Duration::from_secs(POOL_ACQUIRE_TIMEOUT_SECS),
            idle_timeout: Duration::from_secs(POOL_IDLE_TIMEOUT_SECS),
            drain_timeout: Duration::from_secs(POOL_DRAIN_TIMEOUT_SECS),
            sweep_interval: Duration::from_secs(POOL_SWEEP_INTERVAL_SECS),
            cache_ttl: Duration::from_secs(METADATA_CACHE_TTL_SECS),
            cache_capacity: METADATA_CACHE_CAPACITY,
            cache_fail_open: false,
            fetch_timeout: Duration::from_secs(METADATA_FETCH_TIMEOUT_SECS),
            isolation_policy: IsolationPolicy::default(),
            tenant_global_tables: vec![],
            hint_fallback_enabled: false,
            hint_strip_suffixes: vec![],
        }
    }

    #[test]
    fn test_default_policy_is_enforce() {
        assert_eq!(IsolationPolicy::default(), IsolationPolicy::Enforce);
    }

    #[test]
    fn test_policy_parsing() {
        assert_eq!(
            "warn".parse::<IsolationPolicy>().unwrap(),
            IsolationPolicy::Warn
        );
        assert_eq!(
            "ENFORCE".parse::<IsolationPolicy>().unwrap(),
            IsolationPolicy::Enforce
        );
        assert!("open".parse::<IsolationPolicy>().is_err());
    }

    #[test]
    fn test_production_rejects_hint_fallback() {
        let mut config = base_config();
        config.environment = "production".to_string();
        config.hint_fallback_enabled = true;
        assert!(config.validate().is_err());

        config.hint_fallback_enabled = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_production_rejects_bypass_default() {
        let mut config = base_config();
        config.environment = "production".to_string();
        config.isolation_policy = IsolationPolicy::Bypass;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_pool_budget_rejected() {
        let mut config = base_config();
        config.max_tenant_pools = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_fetch_timeout_rejected() {
        let mut config = base_config();
        config.fetch_timeout = Duration::ZERO;
        assert!(config.validate().is_err());
    }
}
