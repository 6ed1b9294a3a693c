//! Tenant resolver: inbound routing hint to tenant identity and metadata.
//!
//! Normalization strips configured host suffixes and case-folds; lookups go
//! through the metadata cache. Empty or malformed hints are subject to an
//! environment-gated fallback: outside production, the reserved system
//! tenant may substitute (local development without per-tenant DNS). In
//! production the resolver always fails closed — routing an unmatched hint
//! to any privileged default is the one failure mode this design forbids.

use std::sync::Arc;

use tessera_core::models::ResolvedTenant;
use tessera_core::{RouterConfig, RouterError};

use crate::cache::MetadataCache;

/// Reserved routing hint for the development-only system tenant.
pub const SYSTEM_HINT: &str = "system";

pub struct TenantResolver {
    cache: Arc<MetadataCache>,
    production: bool,
    fallback_enabled: bool,
    strip_suffixes: Vec<String>,
}

impl TenantResolver {
    pub fn new(cache: Arc<MetadataCache>, config: &RouterConfig) -> Self {
        Self {
            cache,
            production: config.is_production(),
            fallback_enabled: config.hint_fallback_enabled,
            strip_suffixes: config.hint_strip_suffixes.clone(),
        }
    }

    /// Resolve a raw inbound hint to a tenant snapshot.
    pub async fn resolve(&self, raw_hint: &str) -> Result<ResolvedTenant, RouterError> {
        let Some(hint) = self.normalize_hint(raw_hint) else {
            tracing::debug!(raw_hint = %raw_hint, "Empty or malformed tenant hint");
            return self.fallback(raw_hint).await;
        };

        match self.cache.get(&hint).await? {
            Some(resolved) if resolved.tenant.is_active() => Ok(resolved),
            Some(resolved) => {
                tracing::info!(
                    tenant_id = %resolved.tenant.id,
                    status = ?resolved.tenant.status,
                    "Rejecting hint for non-active tenant"
                );
                Err(RouterError::TenantNotResolved(format!(
                    "tenant for hint '{}' is not active",
                    hint
                )))
            }
            // A well-formed but unmatched hint never falls back, in any
            // environment: the fallback exists for hint-less local setups,
            // not for typos that could route to the wrong tenant.
            None => Err(RouterError::TenantNotResolved(format!(
                "no tenant for hint '{}'",
                hint
            ))),
        }
    }

    /// Normalize a raw hint: trim, case-fold, strip configured suffixes,
    /// keep the leftmost label, and reject anything outside `[a-z0-9-]`.
    fn normalize_hint(&self, raw: &str) -> Option<String> {
        let mut hint = raw.trim().to_ascii_lowercase();

        for suffix in &self.strip_suffixes {
            if let Some(stripped) = hint.strip_suffix(suffix.as_str()) {
                hint = stripped.to_string();
                break;
            }
        }

        if let Some((leftmost, _)) = hint.split_once('.') {
            hint = leftmost.to_string();
        }

        if hint.is_empty()
            || !hint
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            return None;
        }
        Some(hint)
    }

    async fn fallback(&self, raw_hint: &str) -> Result<ResolvedTenant, RouterError> {
        if !self.production && self.fallback_enabled {
            tracing::warn!(
                raw_hint = %raw_hint,
                "Substituting system tenant for empty/malformed hint (non-production fallback)"
            );
            if let Some(resolved) = self.cache.get(SYSTEM_HINT).await? {
                if resolved.tenant.is_active() {
                    return Ok(resolved);
                }
            }
        }
        Err(RouterError::TenantNotResolved(format!(
            "hint '{}' is empty or malformed",
            raw_hint
        )))
    }
}
