// crates/xgate-orchestrator/src/snapshot.rs
// ============================================================================
// Module: Snapshots
// Description: Informational, best-effort per-stage state dumps (spec
//              §4.11). Never read back as authoritative state.
// Dependencies: serde_json, std::fs
// ============================================================================

use std::fs;
use std::path::Path;
use std::path::PathBuf;

use serde_json::Value;
use xgate_core::ExceptionId;

/// Persists one stage's snapshot payload. Failures are advisory: the
/// orchestrator logs and continues rather than failing the pipeline.
pub trait SnapshotWriter: Send + Sync {
    /// Writes `snapshot` for `exception_id` at `stage_sequence` (the
    /// 0-indexed position of the stage that just completed).
    ///
    /// # Errors
    ///
    /// Returns an error message on any I/O or serialization failure.
    fn write(&self, exception_id: &ExceptionId, stage_sequence: usize, snapshot: &Value) -> Result<(), String>;
}

/// Writes one JSON file per `(exception_id, stage_sequence)` under a
/// configured directory.
pub struct FileSnapshotWriter {
    directory: PathBuf,
}

impl FileSnapshotWriter {
    /// Builds a writer rooted at `directory`, creating it if absent.
    ///
    /// # Errors
    ///
    /// Returns an error message when the directory cannot be created.
    pub fn new(directory: impl AsRef<Path>) -> Result<Self, String> {
        let directory = directory.as_ref().to_path_buf();
        fs::create_dir_all(&directory).map_err(|err| err.to_string())?;
        Ok(Self { directory })
    }
}

impl SnapshotWriter for FileSnapshotWriter {
    fn write(&self, exception_id: &ExceptionId, stage_sequence: usize, snapshot: &Value) -> Result<(), String> {
        let path = self.directory.join(format!("{exception_id}_{stage_sequence}.json"));
        let body = serde_json::to_vec_pretty(snapshot).map_err(|err| err.to_string())?;
        fs::write(path, body).map_err(|err| err.to_string())
    }
}

/// Discards every snapshot. Used when no snapshot directory is configured.
#[derive(Debug, Default)]
pub struct NoopSnapshotWriter;

impl SnapshotWriter for NoopSnapshotWriter {
    fn write(&self, _exception_id: &ExceptionId, _stage_sequence: usize, _snapshot: &Value) -> Result<(), String> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_one_file_per_stage_sequence() {
        let dir = tempfile::tempdir().expect("tempdir");
        let writer = FileSnapshotWriter::new(dir.path()).expect("writer");
        let exception_id = ExceptionId::new("EX-1");
        writer.write(&exception_id, 0, &serde_json::json!({"stage": "intake"})).expect("write");
        writer.write(&exception_id, 1, &serde_json::json!({"stage": "triage"})).expect("write");
        assert!(dir.path().join("EX-1_0.json").exists());
        assert!(dir.path().join("EX-1_1.json").exists());
    }
}
