// crates/xgate-policy/src/error.rs
// ============================================================================
// Module: Policy errors
// Description: Error taxonomy for pack resolution and playbook matching.
// Dependencies: thiserror, xgate-core
// ============================================================================

use thiserror::Error;
use xgate_core::ExceptionKind;

/// Errors raised while resolving policy configuration or matching
/// playbooks.
#[derive(Debug, Error)]
pub enum PolicyError {
    /// A [`crate::resolver::PackSource`] could not produce a pack for the
    /// requested identity (no Domain Pack configured for a domain, no
    /// Tenant Policy Pack configured for a tenant/domain pair).
    #[error("configuration unavailable: {0}")]
    ConfigUnavailable(String),
    /// A pagination cursor passed to [`crate::matcher::list_playbooks`] was
    /// not one this crate previously issued.
    #[error("invalid pagination cursor: {0}")]
    InvalidCursor(String),
}

impl PolicyError {
    /// Maps this error onto the shared exception taxonomy.
    #[must_use]
    pub fn kind(&self) -> ExceptionKind {
        match self {
            Self::ConfigUnavailable(_) => ExceptionKind::ConfigUnavailable,
            Self::InvalidCursor(_) => ExceptionKind::ValidationFailed,
        }
    }
}

impl From<xgate_config::ConfigError> for PolicyError {
    fn from(err: xgate_config::ConfigError) -> Self {
        Self::ConfigUnavailable(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_unavailable_maps_to_config_unavailable_kind() {
        let err = PolicyError::ConfigUnavailable("missing domain pack".to_string());
        assert_eq!(err.kind(), ExceptionKind::ConfigUnavailable);
    }

    #[test]
    fn invalid_cursor_maps_to_validation_failed_kind() {
        let err = PolicyError::InvalidCursor("bad cursor".to_string());
        assert_eq!(err.kind(), ExceptionKind::ValidationFailed);
    }
}
