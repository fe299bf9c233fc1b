// crates/xgate-policy/src/resolver.rs
// ============================================================================
// Module: Domain/Policy Resolver
// Description: Resolves the effective Domain Pack + Tenant Policy Pack for
//              a (tenant_id, domain_name) pair (spec §4.8).
// Purpose: Give agents one cached, precedence-applied view of policy
//          configuration instead of re-reading and re-merging packs on
//          every stage invocation.
// Dependencies: xgate-core, crate::error
// ============================================================================

//! ## Overview
//! A [`PackSource`] loads raw packs (from files, in tests from memory) along
//! with an opaque [`ConfigVersion`] identifying the loaded content.
//! [`PolicyResolver`] caches the merged [`ResolvedPolicy`] keyed by the
//! identity tuple `(tenant_id, domain_name)`, the cache-keyed-by-identity
//! pattern described for Decision Gate's scenario-spec cache
//! (`decision-gate-core::interfaces`), and re-resolves only when either
//! pack's version changes.
//!
//! Precedence (spec §4.8): the tenant's `custom_guardrails`, when present,
//! replace the domain pack's guardrails outright; `custom_playbooks` and
//! `custom_severity_overrides` union with the domain pack's own playbooks
//! and severity rules rather than replacing them.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;

use xgate_core::DomainName;
use xgate_core::DomainPack;
use xgate_core::Guardrails;
use xgate_core::PlaybookDef;
use xgate_core::TenantId;
use xgate_core::TenantPolicyPack;

use crate::error::PolicyError;

/// Opaque identity of a loaded pack's content, used to detect when the
/// resolver's cache has gone stale (spec §4.8: "invalidates when the
/// underlying configuration version changes").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigVersion(String);

impl ConfigVersion {
    /// Builds a version identity from any string-like value (e.g. a file
    /// modification time or a content hash).
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }
}

/// Loads raw Domain Packs and Tenant Policy Packs by identity, tagging each
/// with a [`ConfigVersion`] the resolver uses for cache invalidation.
pub trait PackSource: Send + Sync {
    /// Loads the Domain Pack named `domain_name`.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::ConfigUnavailable`] when no pack exists for
    /// `domain_name`.
    fn domain_pack(&self, domain_name: &DomainName) -> Result<(DomainPack, ConfigVersion), PolicyError>;

    /// Loads the Tenant Policy Pack for `(tenant_id, domain_name)`.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::ConfigUnavailable`] when no pack exists for
    /// the given tenant and domain.
    fn tenant_policy_pack(
        &self,
        tenant_id: &TenantId,
        domain_name: &DomainName,
    ) -> Result<(TenantPolicyPack, ConfigVersion), PolicyError>;
}

/// The merged view of policy configuration an agent stage consumes (spec
/// §4.8). `candidate_playbooks` is the union of the domain pack's and the
/// tenant's custom playbooks; `effective_guardrails` is the tenant's
/// override when present, else the domain pack's.
#[derive(Debug, Clone)]
pub struct ResolvedPolicy {
    /// The resolved Domain Pack.
    pub domain_pack: DomainPack,
    /// The resolved Tenant Policy Pack.
    pub tenant_policy_pack: TenantPolicyPack,
    /// Effective guardrails after precedence is applied.
    pub effective_guardrails: Guardrails,
    /// Domain playbooks unioned with the tenant's custom playbooks.
    pub candidate_playbooks: Vec<PlaybookDef>,
}

impl ResolvedPolicy {
    fn merge(domain_pack: DomainPack, tenant_policy_pack: TenantPolicyPack) -> Self {
        let effective_guardrails =
            tenant_policy_pack.custom_guardrails.clone().unwrap_or_else(|| domain_pack.guardrails.clone());
        let mut candidate_playbooks = domain_pack.playbooks.clone();
        candidate_playbooks.extend(tenant_policy_pack.custom_playbooks.iter().cloned());
        Self {
            domain_pack,
            tenant_policy_pack,
            effective_guardrails,
            candidate_playbooks,
        }
    }
}

struct CacheEntry {
    resolved: Arc<ResolvedPolicy>,
    domain_version: ConfigVersion,
    tenant_version: ConfigVersion,
}

/// Caches [`ResolvedPolicy`] values by `(tenant_id, domain_name)`, re-merging
/// only when the underlying pack versions change (spec §4.8).
pub struct PolicyResolver<S: PackSource> {
    source: S,
    cache: Mutex<BTreeMap<(TenantId, DomainName), CacheEntry>>,
}

impl<S: PackSource> PolicyResolver<S> {
    /// Builds a resolver backed by `source`, with an empty cache.
    pub fn new(source: S) -> Self {
        Self {
            source,
            cache: Mutex::new(BTreeMap::new()),
        }
    }

    /// Returns the effective policy for `(tenant_id, domain_name)`, reusing
    /// the cached value when both packs' versions are unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::ConfigUnavailable`] when either pack cannot be
    /// loaded from `source`.
    pub fn resolve(&self, tenant_id: &TenantId, domain_name: &DomainName) -> Result<Arc<ResolvedPolicy>, PolicyError> {
        let (domain_pack, domain_version) = self.source.domain_pack(domain_name)?;
        let (tenant_policy_pack, tenant_version) = self.source.tenant_policy_pack(tenant_id, domain_name)?;

        let key = (tenant_id.clone(), domain_name.clone());
        let mut cache = self.cache.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(entry) = cache.get(&key)
            && entry.domain_version == domain_version
            && entry.tenant_version == tenant_version
        {
            return Ok(Arc::clone(&entry.resolved));
        }

        let resolved = Arc::new(ResolvedPolicy::merge(domain_pack, tenant_policy_pack));
        tracing::debug!(tenant_id = %tenant_id, domain_name = %domain_name, "resolved policy cache miss");
        cache.insert(
            key,
            CacheEntry {
                resolved: Arc::clone(&resolved),
                domain_version,
                tenant_version,
            },
        );
        Ok(resolved)
    }

    /// Drops every cached entry, forcing the next [`Self::resolve`] call for
    /// each key to re-merge from `source`.
    pub fn invalidate_all(&self) {
        self.cache.lock().unwrap_or_else(std::sync::PoisonError::into_inner).clear();
    }
}
