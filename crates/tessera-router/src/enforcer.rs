//! Query isolation enforcement.
//!
//! Defense in depth: every data-access operation is inspected before
//! execution and must carry a tenant predicate matching the current
//! context, unless its target is a declared tenant-global table.
//!
//! Structured operations are verified programmatically (and can have the
//! predicate injected). Literal query text only gets best-effort pattern
//! matching, which is strictly weaker and is reported as lower confidence —
//! a compatibility bridge, not the primary mechanism.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

use regex::Regex;
use serde::Serialize;

use tessera_core::{IsolationPolicy, RouterError};

use crate::context::ActiveTenant;

const DEFAULT_TENANT_COLUMN: &str = "tenant_id";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryVerb {
    Select,
    Insert,
    Update,
    Delete,
}

/// An equality predicate (or, for inserts, a column value).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Predicate {
    pub column: String,
    pub value: String,
}

/// A query builder's abstract representation of an operation.
#[derive(Debug, Clone)]
pub struct StructuredQuery {
    pub verb: QueryVerb,
    pub table: String,
    pub predicates: Vec<Predicate>,
}

impl StructuredQuery {
    pub fn new(verb: QueryVerb, table: impl Into<String>) -> Self {
        Self {
            verb,
            table: table.into(),
            predicates: Vec::new(),
        }
    }

    pub fn with_predicate(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.predicates.push(Predicate {
            column: column.into(),
            value: value.into(),
        });
        self
    }
}

/// A data-access operation in one of the two supported shapes.
#[derive(Debug, Clone)]
pub enum Statement {
    Structured(StructuredQuery),
    Raw(String),
}

/// Outcome of a passed check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Structured operation with a verified tenant predicate.
    Scoped,
    /// Literal text matched the predicate pattern; weaker guarantee.
    ScopedLowConfidence,
    /// Target is a declared tenant-global table.
    Global,
    /// Violation observed but policy is `warn`; execution proceeds.
    Warned,
    /// Policy is `bypass`; no check performed.
    Bypassed,
}

/// Violations observed per policy mode, for the stats surface.
#[derive(Debug, Clone, Serialize)]
pub struct ViolationCounts {
    pub enforced: u64,
    pub warned: u64,
    pub bypassed: u64,
}

pub struct QueryIsolationEnforcer {
    policy: IsolationPolicy,
    tenant_column: String,
    global_tables: HashSet<String>,
    predicate_re: Regex,
    table_re: Regex,
    enforced: AtomicU64,
    warned: AtomicU64,
    bypassed: AtomicU64,
}

impl QueryIsolationEnforcer {
    pub fn new(policy: IsolationPolicy, global_tables: impl IntoIterator<Item = String>) -> Self {
        Self::with_tenant_column(policy, global_tables, DEFAULT_TENANT_COLUMN)
    }

    pub fn with_tenant_column(
        policy: IsolationPolicy,
        global_tables: impl IntoIterator<Item = String>,
        tenant_column: &str,
    ) -> Self {
        if policy != IsolationPolicy::Enforce {
            tracing::warn!(policy = ?policy, "Isolation enforcement weakened by explicit opt-in");
        }
        let predicate_re = Regex::new(&format!(
            r#"(?i)\b{}\s*=\s*'?([0-9a-f]{{8}}-[0-9a-f]{{4}}-[0-9a-f]{{4}}-[0-9a-f]{{4}}-[0-9a-f]{{12}}|\$\d+)"#,
            regex::escape(tenant_column)
        ))
        .expect("tenant predicate regex is valid");
        let table_re = Regex::new(r#"(?i)\b(?:from|into|update|join)\s+"?([A-Za-z_][A-Za-z0-9_]*)"#)
            .expect("table extraction regex is valid");

        Self {
            policy,
            tenant_column: tenant_column.to_string(),
            global_tables: global_tables
                .into_iter()
                .map(|t| t.to_ascii_lowercase())
                .collect(),
            predicate_re,
            table_re,
            enforced: AtomicU64::new(0),
            warned: AtomicU64::new(0),
            bypassed: AtomicU64::new(0),
        }
    }

    /// Check an operation against the current tenant context.
    ///
    /// Under `enforce`, a violation is a blocking error raised before
    /// execution. Under `warn` it is logged and execution proceeds. Under
    /// `bypass` no check is performed at all.
    pub fn check(
        &self,
        statement: &Statement,
        current: &ActiveTenant,
    ) -> Result<Verdict, RouterError> {
        if self.policy == IsolationPolicy::Bypass {
            self.bypassed.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(tenant_id = %current.tenant_id, "Isolation check bypassed");
            return Ok(Verdict::Bypassed);
        }

        let outcome = match statement {
            Statement::Structured(query) => self.check_structured(query, current),
            Statement::Raw(sql) => self.check_raw(sql, current),
        };

        match outcome {
            Ok(verdict) => {
                if verdict == Verdict::ScopedLowConfidence {
                    tracing::debug!(
                        tenant_id = %current.tenant_id,
                        "Literal query verified by textual matching only (low confidence)"
                    );
                }
                Ok(verdict)
            }
            Err(reason) => match self.policy {
                IsolationPolicy::Enforce => {
                    self.enforced.fetch_add(1, Ordering::Relaxed);
                    tracing::error!(tenant_id = %current.tenant_id, "Isolation violation: {}", reason);
                    Err(RouterError::IsolationViolation(reason))
                }
                IsolationPolicy::Warn => {
                    self.warned.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        tenant_id = %current.tenant_id,
                        "Isolation violation (policy=warn, proceeding): {}",
                        reason
                    );
                    Ok(Verdict::Warned)
                }
                IsolationPolicy::Bypass => unreachable!("bypass returns early"),
            },
        }
    }

    /// Like `check`, but reads the tenant from the task-local context.
    pub fn check_current(&self, statement: &Statement) -> Result<Verdict, RouterError> {
        let current = crate::context::TenantContext::current()?;
        self.check(statement, &current)
    }

    /// Return the query with the tenant predicate injected if it was
    /// missing. Tenant-global tables are returned unchanged.
    pub fn ensure_scoped(&self, mut query: StructuredQuery, current: &ActiveTenant) -> StructuredQuery {
        if self.is_global(&query.table) {
            return query;
        }
        let has_predicate = query
            .predicates
            .iter()
            .any(|p| p.column.eq_ignore_ascii_case(&self.tenant_column));
        if !has_predicate {
            query.predicates.push(Predicate {
                column: self.tenant_column.clone(),
                value: current.tenant_id.to_string(),
            });
        }
        query
    }

    pub fn violation_counts(&self) -> ViolationCounts {
        ViolationCounts {
            enforced: self.enforced.load(Ordering::Relaxed),
            warned: self.warned.load(Ordering::Relaxed),
            bypassed: self.bypassed.load(Ordering::Relaxed),
        }
    }

    fn is_global(&self, table: &str) -> bool {
        self.global_tables.contains(&table.to_ascii_lowercase())
    }

    fn check_structured(
        &self,
        query: &StructuredQuery,
        current: &ActiveTenant,
    ) -> Result<Verdict, String> {
        if self.is_global(&query.table) {
            return Ok(Verdict::Global);
        }
        let want = current.tenant_id.to_string();
        for predicate in &query.predicates {
            if predicate.column.eq_ignore_ascii_case(&self.tenant_column) {
                if predicate.value.eq_ignore_ascii_case(&want) {
                    return Ok(Verdict::Scoped);
                }
                return Err(format!(
                    "{:?} on '{}' carries a tenant predicate for a different tenant",
                    query.verb, query.table
                ));
            }
        }
        Err(format!(
            "{:?} on '{}' lacks the '{}' predicate",
            query.verb, query.table, self.tenant_column
        ))
    }

    fn check_raw(&self, sql: &str, current: &ActiveTenant) -> Result<Verdict, String> {
        let tables: Vec<String> = self
            .table_re
            .captures_iter(sql)
            .map(|caps| caps[1].to_ascii_lowercase())
            .collect();
        if !tables.is_empty() && tables.iter().all(|t| self.global_tables.contains(t)) {
            return Ok(Verdict::Global);
        }

        match self.predicate_re.captures(sql) {
            Some(caps) => {
                let value = &caps[1];
                if value.starts_with('$') {
                    // Bound parameter: predicate present, value unverifiable.
                    return Ok(Verdict::ScopedLowConfidence);
                }
                if value.eq_ignore_ascii_case(&current.tenant_id.to_string()) {
                    return Ok(Verdict::ScopedLowConfidence);
                }
                Err("literal query carries a tenant predicate for a different tenant".to_string())
            }
            None => Err(format!(
                "literal query lacks a '{}' predicate",
                self.tenant_column
            )),
        }
    }
}
