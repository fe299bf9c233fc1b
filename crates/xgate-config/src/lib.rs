// crates/xgate-config/src/lib.rs
// ============================================================================
// Module: Configuration Loader
// Description: Domain Pack / Tenant Policy Pack / SLO Target loaders, JSON
//              or YAML (spec §1, SPEC_FULL §10.3).
// Purpose: Give the Domain/Policy Resolver and SLO Engine a real
//          deserialization path from on-disk packs instead of requiring
//          every caller to hand-build xgate_core::model values.
// Dependencies: xgate-core, serde, serde_json, serde_yaml, thiserror, tracing
// ============================================================================

//! ## Overview
//! Business logic for resolving and combining packs lives in `xgate-policy`;
//! this crate only turns bytes on disk into the [`xgate_core::DomainPack`],
//! [`xgate_core::TenantPolicyPack`], and [`xgate_core::SloTarget`] values
//! those components already agree on, mirroring the teacher's dedicated
//! `decision-gate-config` crate's role ("canonical configuration model")
//! without its TOML server/auth surface, which has no counterpart here.
//! Format is inferred from the file extension: `.json` or `.yaml`/`.yml`.

#![forbid(unsafe_code)]

use std::path::Path;

use serde::de::DeserializeOwned;
use thiserror::Error;
use xgate_core::DomainPack;
use xgate_core::SloTarget;
use xgate_core::TenantPolicyPack;

/// Errors returned while loading a configuration artifact.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("config io error reading {path}: {source}")]
    Io {
        /// The path that could not be read.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The file extension was neither `.json`, `.yaml`, nor `.yml`.
    #[error("unrecognized config format for {0}: expected .json, .yaml, or .yml")]
    UnknownFormat(String),
    /// The file's contents did not deserialize into the expected shape.
    #[error("config parse error in {path}: {message}")]
    Parse {
        /// The path that failed to parse.
        path: String,
        /// A human-readable parse failure message.
        message: String,
    },
}

/// The two recognized serialization formats for configuration artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConfigFormat {
    /// `.json`
    Json,
    /// `.yaml` or `.yml`
    Yaml,
}

impl ConfigFormat {
    fn from_path(path: &Path) -> Option<Self> {
        match path.extension().and_then(std::ffi::OsStr::to_str) {
            Some("json") => Some(Self::Json),
            Some("yaml" | "yml") => Some(Self::Yaml),
            _ => None,
        }
    }
}

fn load<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let format = ConfigFormat::from_path(path)
        .ok_or_else(|| ConfigError::UnknownFormat(path.display().to_string()))?;
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let parsed = match format {
        ConfigFormat::Json => serde_json::from_str(&contents).map_err(|err| ConfigError::Parse {
            path: path.display().to_string(),
            message: err.to_string(),
        }),
        ConfigFormat::Yaml => serde_yaml::from_str(&contents).map_err(|err| ConfigError::Parse {
            path: path.display().to_string(),
            message: err.to_string(),
        }),
    }?;
    tracing::debug!(path = %path.display(), "config artifact loaded");
    Ok(parsed)
}

/// Loads a [`DomainPack`] from a JSON or YAML file.
///
/// # Errors
///
/// Returns [`ConfigError`] when the file cannot be read, has an
/// unrecognized extension, or fails to deserialize.
pub fn load_domain_pack(path: impl AsRef<Path>) -> Result<DomainPack, ConfigError> {
    load(path.as_ref())
}

/// Loads a [`TenantPolicyPack`] from a JSON or YAML file.
///
/// # Errors
///
/// Returns [`ConfigError`] when the file cannot be read, has an
/// unrecognized extension, or fails to deserialize.
pub fn load_tenant_policy_pack(path: impl AsRef<Path>) -> Result<TenantPolicyPack, ConfigError> {
    load(path.as_ref())
}

/// Loads an [`SloTarget`] from `./config/slo/{tenant_id}[_{domain}].yaml`
/// (spec §6) or the JSON equivalent.
///
/// # Errors
///
/// Returns [`ConfigError`] when the file cannot be read, has an
/// unrecognized extension, or fails to deserialize.
pub fn load_slo_target(path: impl AsRef<Path>) -> Result<SloTarget, ConfigError> {
    load(path.as_ref())
}

/// Returns the conventional SLO config path for a tenant, optionally scoped
/// to a domain, under `config_root` (spec §6:
/// `./config/slo/{tenant_id}[_{domain}].yaml`).
#[must_use]
pub fn slo_config_path(config_root: impl AsRef<Path>, tenant_id: &str, domain: Option<&str>) -> std::path::PathBuf {
    let filename = domain.map_or_else(|| format!("{tenant_id}.yaml"), |domain| format!("{tenant_id}_{domain}.yaml"));
    config_root.as_ref().join(filename)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, name: &str, contents: &str) -> std::path::PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, contents).expect("write fixture");
        path
    }

    #[test]
    fn loads_domain_pack_from_json() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write(
            dir.path(),
            "finance.json",
            r#"{
                "domain_name": "finance",
                "exception_types": {
                    "SETTLEMENT_FAIL": {"description": "settlement failure", "detection_rules": []}
                },
                "severity_rules": [
                    {"condition": "exceptionType == 'SETTLEMENT_FAIL'", "severity": "HIGH"}
                ],
                "playbooks": [],
                "guardrails": {"allow_lists": [], "block_lists": [], "human_approval_threshold": 0.7}
            }"#,
        );
        let pack = load_domain_pack(&path).expect("load");
        assert_eq!(pack.domain_name.as_str(), "finance");
        assert!(pack.exception_types.contains_key("SETTLEMENT_FAIL"));
    }

    #[test]
    fn loads_tenant_policy_pack_from_yaml() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write(
            dir.path(),
            "tenant_a.yaml",
            "tenant_id: TENANT_A\n\
             domain_name: finance\n\
             custom_severity_overrides: []\n\
             custom_playbooks: []\n\
             human_approval_rules:\n\
             \x20\x20- severity: CRITICAL\n\
             \x20\x20\x20\x20require_approval: true\n\
             approved_business_processes: []\n",
        );
        let pack = load_tenant_policy_pack(&path).expect("load");
        assert_eq!(pack.tenant_id.as_str(), "TENANT_A");
        assert_eq!(pack.human_approval_rules.len(), 1);
    }

    #[test]
    fn loads_slo_target_and_derives_conventional_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        let derived = slo_config_path(dir.path(), "TENANT_A", Some("finance"));
        assert_eq!(derived.file_name().and_then(std::ffi::OsStr::to_str), Some("TENANT_A_finance.yaml"));

        let path = write(
            dir.path(),
            "TENANT_A_finance.yaml",
            "target_latency_ms_p95: 500.0\n\
             target_error_rate: 0.01\n\
             target_mttr_minutes: 15.0\n\
             target_auto_resolution_rate: 0.8\n\
             window_minutes: 60\n",
        );
        let target = load_slo_target(&path).expect("load");
        assert!((target.target_latency_ms_p95 - 500.0).abs() < f64::EPSILON);
    }

    #[test]
    fn unrecognized_extension_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write(dir.path(), "pack.toml", "domain_name = \"finance\"");
        let err = load_domain_pack(&path).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownFormat(_)));
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write(dir.path(), "broken.json", "{not valid json");
        let err = load_domain_pack(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }
}
