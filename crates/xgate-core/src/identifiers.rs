// crates/xgate-core/src/identifiers.rs
// ============================================================================
// Module: Identifiers
// Description: Newtype identifiers for tenants, exceptions, events, and the
//              rest of the control plane's addressable entities.
// Purpose: Prevent accidental mixing of string-shaped ids across domains.
// Dependencies: serde, uuid
// ============================================================================

//! ## Overview
//! Every identifier in the control plane is a distinct newtype so that a
//! `TenantId` and an `ExceptionId` can never be swapped at a call site
//! without a compile error. UUID-backed ids (`EventId`, evidence ids) wrap
//! [`uuid::Uuid`]; everything else is an opaque, caller-supplied string.

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use uuid::Uuid;

macro_rules! string_id {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Builds an identifier from any string-like value.
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Returns the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

macro_rules! uuid_id {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Generates a fresh random identifier.
            #[must_use]
            pub fn generate() -> Self {
                Self(Uuid::new_v4())
            }

            /// Wraps an existing UUID value.
            #[must_use]
            pub const fn from_uuid(value: Uuid) -> Self {
                Self(value)
            }

            /// Returns the underlying UUID.
            #[must_use]
            pub const fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(value).map(Self)
            }
        }
    };
}

// Caller-assigned, tenant-scoped identifiers. `tenant_id` never changes once
// an Exception Record is created (spec §3 invariant).
string_id!(TenantId, "Identifies a tenant; required and non-empty (spec §3).");
string_id!(ExceptionId, "Identifies an exception; stable, generated if absent.");
string_id!(SourceSystem, "Identifies the upstream system an exception came from.");
string_id!(ExceptionType, "Canonicalized exception type, validated against a Domain Pack.");
string_id!(RunId, "Identifies one pipeline invocation over one batch, for audit purposes.");
string_id!(DomainName, "Identifies a Domain Pack by name.");
string_id!(AgentName, "Identifies an agent by its stage name (intake, triage, ...).");
string_id!(StageName, "Identifies a pipeline stage name.");
string_id!(ActorId, "Identifies the actor (agent or user) responsible for an event.");

/// Identifies a playbook within a tenant's candidate set.
///
/// The source data model uses a nullable integer; a caller-supplied opaque
/// string id is used here instead so playbooks loaded from JSON/YAML packs
/// do not need a synthetic numeric primary key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlaybookId(String);

impl PlaybookId {
    /// Builds a playbook identifier from any string-like value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PlaybookId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PlaybookId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

// UUID-backed identifiers: generated by the system, never caller-supplied.
uuid_id!(EventId, "Identifies one immutable Event row (spec §3), unique per tenant.");
uuid_id!(EvidenceId, "Identifies one Evidence Item.");
uuid_id!(EvidenceLinkId, "Identifies one Evidence Link edge.");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_id_round_trips_through_json() {
        let id = TenantId::new("TENANT_FINANCE_001");
        let json = serde_json::to_string(&id).expect("serialize");
        assert_eq!(json, "\"TENANT_FINANCE_001\"");
        let back: TenantId = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, id);
    }

    #[test]
    fn uuid_id_generates_unique_values() {
        let a = EventId::generate();
        let b = EventId::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn event_id_parses_from_str() {
        let id = EventId::generate();
        let text = id.to_string();
        let parsed: EventId = text.parse().expect("parse");
        assert_eq!(parsed, id);
    }
}
