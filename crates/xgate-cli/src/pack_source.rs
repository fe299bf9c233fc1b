// crates/xgate-cli/src/pack_source.rs
// ============================================================================
// Module: File-backed Pack Source
// Description: Adapts xgate-config's file loaders to xgate-policy's
//              PackSource trait for the CLI's single-domain, single-tenant
//              invocation shape.
// Purpose: Let `xgate ingest` resolve one Domain Pack + Tenant Policy Pack
//          pair from disk without standing up the full multi-tenant
//          config-root convention the long-running service would use.
// Dependencies: xgate-config, xgate-policy, xgate-core
// ============================================================================

use std::path::Path;
use std::path::PathBuf;

use xgate_core::DomainName;
use xgate_core::DomainPack;
use xgate_core::TenantId;
use xgate_core::TenantPolicyPack;
use xgate_policy::ConfigVersion;
use xgate_policy::PackSource;
use xgate_policy::PolicyError;

/// Resolves a single `(domain_pack_path, tenant_policy_path)` pair,
/// re-reading both files on every call. [`ConfigVersion`] is the file's
/// modification time, so a resolver caching over this source still picks up
/// edits made between runs.
pub struct FilePackSource {
    domain_pack_path: PathBuf,
    tenant_policy_path: PathBuf,
}

impl FilePackSource {
    /// Builds a source reading the Domain Pack from `domain_pack_path` and
    /// the Tenant Policy Pack from `tenant_policy_path`.
    pub fn new(domain_pack_path: impl Into<PathBuf>, tenant_policy_path: impl Into<PathBuf>) -> Self {
        Self { domain_pack_path: domain_pack_path.into(), tenant_policy_path: tenant_policy_path.into() }
    }
}

fn mtime_version(path: &Path) -> Result<ConfigVersion, PolicyError> {
    let metadata = std::fs::metadata(path)
        .map_err(|err| PolicyError::ConfigUnavailable(format!("{}: {err}", path.display())))?;
    let modified = metadata
        .modified()
        .map_err(|err| PolicyError::ConfigUnavailable(format!("{}: {err}", path.display())))?;
    Ok(ConfigVersion::new(format!("{modified:?}")))
}

impl PackSource for FilePackSource {
    fn domain_pack(&self, _domain_name: &DomainName) -> Result<(DomainPack, ConfigVersion), PolicyError> {
        let pack = xgate_config::load_domain_pack(&self.domain_pack_path)?;
        let version = mtime_version(&self.domain_pack_path)?;
        Ok((pack, version))
    }

    fn tenant_policy_pack(
        &self,
        _tenant_id: &TenantId,
        _domain_name: &DomainName,
    ) -> Result<(TenantPolicyPack, ConfigVersion), PolicyError> {
        let pack = xgate_config::load_tenant_policy_pack(&self.tenant_policy_path)?;
        let version = mtime_version(&self.tenant_policy_path)?;
        Ok((pack, version))
    }
}
