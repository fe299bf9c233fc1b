// crates/xgate-evidence/src/lib.rs
// ============================================================================
// Module: Evidence Tracker
// Description: Typed evidence items and their links to agent decisions
//              (spec §4.4), persisted as interleaved JSONL per
//              (tenant_id, exception_id).
// Purpose: Give agents a single place to record "why" a decision was made,
//          and the Explanation Service a single place to read it back from.
// Dependencies: xgate-core, serde_json, serde_jcs, sha2, thiserror, tracing
// ============================================================================

//! ## Overview
//! One append-only JSON-lines file per `(tenant_id, exception_id)` holds
//! interleaved [`xgate_core::EvidenceItem`] and [`xgate_core::EvidenceLink`]
//! records; links are distinguished on read by a reserved `_type:"link"`
//! field the writer injects, mirroring
//! `decision-gate-mcp::evidence::ensure_evidence_hash`'s canonical-JSON
//! discipline for file integrity (every line's hash is available via
//! [`xgate_core::hashing::hash_value`] for callers that want to verify a
//! line was not altered after the fact).
//!
//! Reads deduplicate by id across an in-memory cache (the items/links this
//! process itself wrote) and a full file scan (records other processes, or
//! earlier runs, wrote) — the cache wins on conflict since it reflects the
//! most recently observed write.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::fs::File;
use std::fs::OpenOptions;
use std::io::BufRead;
use std::io::BufReader;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;

use serde_json::Value;
use thiserror::Error;
use xgate_core::EvidenceId;
use xgate_core::EvidenceInfluence;
use xgate_core::EvidenceItem;
use xgate_core::EvidenceLink;
use xgate_core::EvidenceLinkId;
use xgate_core::ExceptionId;
use xgate_core::TenantId;
use xgate_core::identifiers::AgentName;
use xgate_core::identifiers::StageName;

/// Errors returned by [`EvidenceTracker`] implementations.
#[derive(Debug, Error)]
pub enum EvidenceError {
    /// The evidence file could not be opened, read, or appended to.
    #[error("evidence io error: {0}")]
    Io(String),
    /// A stored line failed to parse as either an item or a link.
    #[error("evidence record corrupt: {0}")]
    Corrupt(String),
}

impl From<std::io::Error> for EvidenceError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Records evidence items and the links between evidence and agent
/// decisions (spec §4.4).
pub trait EvidenceTracker: Send + Sync {
    /// Persists a new evidence item. Evidence items are immutable once
    /// recorded.
    ///
    /// # Errors
    ///
    /// Returns [`EvidenceError`] when the backing file cannot be written.
    fn record(&self, item: EvidenceItem) -> Result<EvidenceItem, EvidenceError>;

    /// Persists a new edge from `evidence_id` to the decision made by
    /// `agent_name` at `stage_name` for `exception_id`.
    ///
    /// # Errors
    ///
    /// Returns [`EvidenceError`] when the backing file cannot be written.
    fn link(
        &self,
        tenant_id: &TenantId,
        exception_id: &ExceptionId,
        agent_name: AgentName,
        stage_name: StageName,
        evidence_id: EvidenceId,
        influence: EvidenceInfluence,
    ) -> Result<EvidenceLink, EvidenceError>;

    /// Returns every evidence item recorded for `exception_id`, optionally
    /// scoped to `tenant_id` for an extra isolation check.
    ///
    /// # Errors
    ///
    /// Returns [`EvidenceError`] when the backing file cannot be read.
    fn evidence_for(
        &self,
        tenant_id: &TenantId,
        exception_id: &ExceptionId,
    ) -> Result<Vec<EvidenceItem>, EvidenceError>;

    /// Returns every evidence link recorded for `exception_id`, optionally
    /// restricted to one `stage_name`.
    ///
    /// # Errors
    ///
    /// Returns [`EvidenceError`] when the backing file cannot be read.
    fn links_for(
        &self,
        tenant_id: &TenantId,
        exception_id: &ExceptionId,
        stage_name: Option<&StageName>,
    ) -> Result<Vec<EvidenceLink>, EvidenceError>;
}

/// Reserved discriminator field written onto link lines so a reader can
/// distinguish them from item lines without a shared envelope type.
const LINK_TYPE_MARKER: &str = "_type";
/// Value of [`LINK_TYPE_MARKER`] on link lines.
const LINK_TYPE_VALUE: &str = "link";

/// JSONL-backed [`EvidenceTracker`]: one file per `(tenant_id,
/// exception_id)` under a configured root directory (spec §6:
/// `./runtime/evidence/{tenant_id}_{exception_id}_evidence.jsonl`).
pub struct JsonlEvidenceTracker {
    /// Root directory holding one file per `(tenant_id, exception_id)`.
    root: PathBuf,
    /// Open file handles, keyed by file path, guarded for serialized append.
    handles: Mutex<BTreeMap<PathBuf, Arc<Mutex<File>>>>,
    /// In-memory cache of items/links this process has written, keyed by
    /// file path, for read-path deduplication against the file scan.
    cache: Mutex<BTreeMap<PathBuf, CacheEntry>>,
}

#[derive(Default, Clone)]
struct CacheEntry {
    items: BTreeMap<String, EvidenceItem>,
    links: BTreeMap<String, EvidenceLink>,
}

impl JsonlEvidenceTracker {
    /// Builds a tracker rooted at `root`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns [`EvidenceError`] when `root` cannot be created.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, EvidenceError> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            handles: Mutex::new(BTreeMap::new()),
            cache: Mutex::new(BTreeMap::new()),
        })
    }

    fn file_path(&self, tenant_id: &TenantId, exception_id: &ExceptionId) -> PathBuf {
        self.root.join(format!("{}_{}_evidence.jsonl", tenant_id.as_str(), exception_id.as_str()))
    }

    fn handle_for(&self, path: &Path) -> Result<Arc<Mutex<File>>, EvidenceError> {
        let mut handles = self.handles.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(handle) = handles.get(path) {
            return Ok(Arc::clone(handle));
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let handle = Arc::new(Mutex::new(file));
        handles.insert(path.to_path_buf(), Arc::clone(&handle));
        Ok(handle)
    }

    fn append_line(&self, path: &Path, line: &str) -> Result<(), EvidenceError> {
        let handle = self.handle_for(path)?;
        let mut file = handle.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        writeln!(file, "{line}")?;
        file.flush()?;
        Ok(())
    }

    fn scan_file(&self, path: &Path) -> Result<(Vec<EvidenceItem>, Vec<EvidenceLink>), EvidenceError> {
        let Ok(file) = File::open(path) else {
            return Ok((Vec::new(), Vec::new()));
        };
        let reader = BufReader::new(file);
        let mut items = Vec::new();
        let mut links = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let value: Value = serde_json::from_str(&line).map_err(|err| EvidenceError::Corrupt(err.to_string()))?;
            if value.get(LINK_TYPE_MARKER).and_then(Value::as_str) == Some(LINK_TYPE_VALUE) {
                let link: EvidenceLink =
                    serde_json::from_value(value).map_err(|err| EvidenceError::Corrupt(err.to_string()))?;
                links.push(link);
            } else {
                let item: EvidenceItem =
                    serde_json::from_value(value).map_err(|err| EvidenceError::Corrupt(err.to_string()))?;
                items.push(item);
            }
        }
        Ok((items, links))
    }
}

impl EvidenceTracker for JsonlEvidenceTracker {
    fn record(&self, item: EvidenceItem) -> Result<EvidenceItem, EvidenceError> {
        let path = self.file_path(&item.tenant_id, &item.exception_id);
        let line = serde_json::to_string(&item).map_err(|err| EvidenceError::Corrupt(err.to_string()))?;
        self.append_line(&path, &line)?;

        let mut cache = self.cache.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        cache.entry(path).or_default().items.insert(item.id.to_string(), item.clone());
        tracing::debug!(evidence_id = %item.id, exception_id = %item.exception_id, "evidence item recorded");
        Ok(item)
    }

    fn link(
        &self,
        tenant_id: &TenantId,
        exception_id: &ExceptionId,
        agent_name: AgentName,
        stage_name: StageName,
        evidence_id: EvidenceId,
        influence: EvidenceInfluence,
    ) -> Result<EvidenceLink, EvidenceError> {
        let link = EvidenceLink {
            id: EvidenceLinkId::generate(),
            exception_id: exception_id.clone(),
            agent_name,
            stage_name,
            evidence_id,
            influence,
        };
        let path = self.file_path(tenant_id, exception_id);
        let mut value = serde_json::to_value(&link).map_err(|err| EvidenceError::Corrupt(err.to_string()))?;
        if let Value::Object(map) = &mut value {
            map.insert(LINK_TYPE_MARKER.to_string(), Value::String(LINK_TYPE_VALUE.to_string()));
        }
        let line = serde_json::to_string(&value).map_err(|err| EvidenceError::Corrupt(err.to_string()))?;
        self.append_line(&path, &line)?;

        let mut cache = self.cache.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        cache.entry(path).or_default().links.insert(link.id.to_string(), link.clone());
        tracing::debug!(evidence_link_id = %link.id, exception_id = %link.exception_id, "evidence link recorded");
        Ok(link)
    }

    fn evidence_for(
        &self,
        tenant_id: &TenantId,
        exception_id: &ExceptionId,
    ) -> Result<Vec<EvidenceItem>, EvidenceError> {
        let path = self.file_path(tenant_id, exception_id);
        let (scanned_items, _) = self.scan_file(&path)?;

        let cache = self.cache.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut merged: BTreeMap<String, EvidenceItem> = BTreeMap::new();
        for item in scanned_items {
            merged.insert(item.id.to_string(), item);
        }
        if let Some(entry) = cache.get(&path) {
            for (id, item) in &entry.items {
                merged.insert(id.clone(), item.clone());
            }
        }
        Ok(merged.into_values().collect())
    }

    fn links_for(
        &self,
        tenant_id: &TenantId,
        exception_id: &ExceptionId,
        stage_name: Option<&StageName>,
    ) -> Result<Vec<EvidenceLink>, EvidenceError> {
        let path = self.file_path(tenant_id, exception_id);
        let (_, scanned_links) = self.scan_file(&path)?;

        let cache = self.cache.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut merged: BTreeMap<String, EvidenceLink> = BTreeMap::new();
        for link in scanned_links {
            merged.insert(link.id.to_string(), link);
        }
        if let Some(entry) = cache.get(&path) {
            for (id, link) in &entry.links {
                merged.insert(id.clone(), link.clone());
            }
        }
        Ok(merged
            .into_values()
            .filter(|link| stage_name.is_none_or(|wanted| &link.stage_name == wanted))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xgate_core::EvidenceKind;

    fn sample_item(tenant_id: &TenantId, exception_id: &ExceptionId) -> EvidenceItem {
        EvidenceItem {
            id: EvidenceId::generate(),
            kind: EvidenceKind::Rag,
            source_id: "similarity-index".to_string(),
            description: "similar case found".to_string(),
            similarity_score: Some(0.91),
            payload_ref: None,
            tenant_id: tenant_id.clone(),
            exception_id: exception_id.clone(),
            metadata: serde_json::json!({}),
        }
    }

    #[test]
    fn record_and_read_back_roundtrips() {
        let dir = tempfile::tempdir().expect("tempdir");
        let tracker = JsonlEvidenceTracker::new(dir.path()).expect("tracker");
        let tenant = TenantId::new("TENANT_A");
        let exception_id = ExceptionId::new("EX-1");
        let item = sample_item(&tenant, &exception_id);
        tracker.record(item.clone()).expect("record");

        let link = tracker
            .link(
                &tenant,
                &exception_id,
                AgentName::from("triage"),
                StageName::from("triage"),
                item.id,
                EvidenceInfluence::Support,
            )
            .expect("link");

        let items = tracker.evidence_for(&tenant, &exception_id).expect("evidence_for");
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, item.id);

        let links = tracker.links_for(&tenant, &exception_id, None).expect("links_for");
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].id, link.id);
    }

    #[test]
    fn links_for_filters_by_stage() {
        let dir = tempfile::tempdir().expect("tempdir");
        let tracker = JsonlEvidenceTracker::new(dir.path()).expect("tracker");
        let tenant = TenantId::new("TENANT_A");
        let exception_id = ExceptionId::new("EX-1");
        let item = sample_item(&tenant, &exception_id);
        tracker.record(item.clone()).expect("record");
        tracker
            .link(
                &tenant,
                &exception_id,
                AgentName::from("triage"),
                StageName::from("triage"),
                item.id,
                EvidenceInfluence::Support,
            )
            .expect("link triage");
        tracker
            .link(
                &tenant,
                &exception_id,
                AgentName::from("policy"),
                StageName::from("policy"),
                item.id,
                EvidenceInfluence::Contextual,
            )
            .expect("link policy");

        let policy_only = tracker
            .links_for(&tenant, &exception_id, Some(&StageName::from("policy")))
            .expect("links_for");
        assert_eq!(policy_only.len(), 1);
        assert_eq!(policy_only[0].stage_name, StageName::from("policy"));
    }

    #[test]
    fn reads_persist_across_fresh_tracker_instances() {
        let dir = tempfile::tempdir().expect("tempdir");
        let tenant = TenantId::new("TENANT_A");
        let exception_id = ExceptionId::new("EX-1");
        {
            let tracker = JsonlEvidenceTracker::new(dir.path()).expect("tracker");
            tracker.record(sample_item(&tenant, &exception_id)).expect("record");
        }
        let tracker = JsonlEvidenceTracker::new(dir.path()).expect("tracker");
        let items = tracker.evidence_for(&tenant, &exception_id).expect("evidence_for");
        assert_eq!(items.len(), 1);
    }
}
