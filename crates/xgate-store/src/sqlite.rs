// crates/xgate-store/src/sqlite.rs
// ============================================================================
// Module: SQLite Backend
// Description: A dedicated writer thread plus a round-robin read pool,
//              backing both EventLog and ExceptionStore on one database.
// Purpose: Serialize mutations through one writer (spec §5: "a short
//          critical section... release before any I/O that could block")
//          while keeping reads unblocked under WAL.
// Dependencies: rusqlite, serde_json, xgate-core, tracing
// ============================================================================

//! ## Overview
//! Generalizes the teacher's `decision-gate-store-sqlite` writer-thread
//! architecture (`mpsc::sync_channel` command queue, WAL pragmas, dedicated
//! writer connection) from single-row run-state persistence to two tables:
//! `exception_event` (append-only) and `exception` (current state). Writes
//! are serialized by sending a [`WriteCommand`] to the writer thread and
//! blocking on its reply channel; reads use a small round-robin pool of
//! read-only connections so they are never blocked behind a writer's
//! critical section.

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::mpsc;
use std::sync::mpsc::SyncSender;
use std::thread;
use std::thread::JoinHandle;

use rusqlite::Connection;
use rusqlite::OptionalExtension;
use rusqlite::params;
use xgate_core::Event;
use xgate_core::EventId;
use xgate_core::ExceptionId;
use xgate_core::ExceptionRecord;
use xgate_core::PipelineResult;
use xgate_core::TenantId;
use xgate_core::Timestamp;

use crate::error::StoreError;
use crate::event_log::EventFilter;
use crate::event_log::EventLog;
use crate::exception_store::ExceptionListFilter;
use crate::exception_store::ExceptionPage;
use crate::exception_store::ExceptionStore;

/// Configuration for [`SqliteBackend::open`].
#[derive(Debug, Clone)]
pub struct SqliteStoreConfig {
    /// Path to the `SQLite` database file. `:memory:` is accepted for tests,
    /// in which case the writer and read pool share one in-process
    /// connection set rather than a real file.
    pub path: PathBuf,
    /// Number of read-only connections in the round-robin pool.
    pub read_pool_size: usize,
}

impl SqliteStoreConfig {
    /// Builds a config pointing at `path` with the default read pool size.
    #[must_use]
    pub fn at_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            read_pool_size: 4,
        }
    }
}

/// Process-unique counter distinguishing concurrent in-memory databases.
static MEMORY_DB_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Builds a `SQLite` shared-cache URI naming a fresh in-memory database.
///
/// `:memory:` itself opens a private database per connection, so a writer
/// and a read pool opened against it would each see an empty, disconnected
/// database. A shared-cache URI (`file:<name>?mode=memory&cache=shared`)
/// makes every connection opened against the same name see the same
/// database for as long as at least one connection to it stays open.
fn memory_db_uri() -> String {
    let id = MEMORY_DB_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("file:xgate-store-mem-{id}?mode=memory&cache=shared")
}

/// A mutation sent to the writer thread, carrying its own reply channel.
enum WriteCommand {
    /// Appends or conditionally appends an event.
    AppendEvent {
        /// Scoping tenant; must equal `event.tenant_id`.
        tenant_id: TenantId,
        /// The event to insert.
        event: Event,
        /// When true, a duplicate id is a no-op (`Ok(false)`) rather than
        /// [`StoreError::AlreadyExists`].
        if_new: bool,
        /// Reply channel: `Ok(true)` if inserted, `Ok(false)` if a
        /// duplicate under `if_new`.
        reply: SyncSender<Result<bool, StoreError>>,
    },
    /// Overwrites the current exception state row.
    PutException {
        /// Scoping tenant; must equal `record.tenant_id`.
        tenant_id: TenantId,
        /// The exception record to store.
        record: ExceptionRecord,
        /// The last pipeline result to store alongside it, if any.
        pipeline_result: Option<PipelineResult>,
        /// Reply channel.
        reply: SyncSender<Result<(), StoreError>>,
    },
    /// Stops the writer thread loop.
    Shutdown,
}

/// `SQLite`-backed implementation of [`EventLog`] and [`ExceptionStore`].
///
/// # Invariants
/// - All mutations are serialized through one writer thread.
/// - Reads never block behind a writer's critical section (WAL mode).
#[derive(Clone)]
pub struct SqliteBackend {
    /// Sender half of the writer command queue.
    writer_tx: SyncSender<WriteCommand>,
    /// Writer thread handle, joined on [`SqliteBackend::shutdown`].
    writer_handle: Arc<Mutex<Option<JoinHandle<()>>>>,
    /// Round-robin pool of read-only connections.
    read_connections: Arc<Vec<Mutex<Connection>>>,
    /// Cursor into `read_connections` for round-robin selection.
    read_cursor: Arc<AtomicUsize>,
}

impl SqliteBackend {
    /// Opens (creating if necessary) a `SQLite`-backed store at
    /// `config.path`, migrates the schema, and starts the writer thread.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] when the database cannot be opened or
    /// migrated.
    pub fn open(config: &SqliteStoreConfig) -> Result<Self, StoreError> {
        // `:memory:` would otherwise hand the writer and each read-pool
        // connection its own private, disconnected database; route it
        // through a shared-cache URI instead so they all see one database.
        let connect_path = if config.path.as_os_str() == ":memory:" {
            PathBuf::from(memory_db_uri())
        } else {
            config.path.clone()
        };

        let write_conn = open_connection(&connect_path)?;
        migrate(&write_conn)?;

        let mut read_connections = Vec::with_capacity(config.read_pool_size.max(1));
        for _ in 0..config.read_pool_size.max(1) {
            let conn = open_connection(&connect_path)?;
            conn.pragma_update(None, "query_only", true)?;
            read_connections.push(Mutex::new(conn));
        }

        let (tx, rx) = mpsc::sync_channel::<WriteCommand>(1_024);
        let handle = thread::spawn(move || writer_loop(write_conn, &rx));

        tracing::info!(path = %config.path.display(), "xgate-store writer thread started");

        Ok(Self {
            writer_tx: tx,
            writer_handle: Arc::new(Mutex::new(Some(handle))),
            read_connections: Arc::new(read_connections),
            read_cursor: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Opens an in-memory store, for tests and embedded callers.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if the in-memory database cannot be
    /// created.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::open(&SqliteStoreConfig {
            path: PathBuf::from(":memory:"),
            read_pool_size: 1,
        })
    }

    /// Signals the writer thread to stop and joins it. Safe to call more
    /// than once.
    pub fn shutdown(&self) {
        let _ = self.writer_tx.send(WriteCommand::Shutdown);
        if let Ok(mut guard) = self.writer_handle.lock()
            && let Some(handle) = guard.take()
        {
            let _ = handle.join();
        }
    }

    /// Borrows the next read connection in round-robin order.
    fn read_conn(&self) -> &Mutex<Connection> {
        let index = self.read_cursor.fetch_add(1, Ordering::Relaxed) % self.read_connections.len();
        &self.read_connections[index]
    }
}

impl Drop for SqliteBackend {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn open_connection(path: &Path) -> Result<Connection, StoreError> {
    let path_str = path.to_string_lossy();
    let is_memory = path_str == ":memory:" || path_str.contains("mode=memory");
    let conn = if path_str == ":memory:" {
        Connection::open_in_memory()?
    } else {
        // `rusqlite::Connection::open` uses `OpenFlags::default()`, which
        // includes `SQLITE_OPEN_URI`, so a `file:...?mode=memory&cache=shared`
        // name is parsed as a shared-cache in-memory database rather than a
        // literal filename.
        Connection::open(path)?
    };
    conn.pragma_update(None, "journal_mode", "wal").or_else(|err| {
        // In-memory connections cannot use WAL; fall back silently.
        if is_memory { Ok(()) } else { Err(err) }
    })?;
    conn.pragma_update(None, "foreign_keys", true)?;
    conn.busy_timeout(std::time::Duration::from_millis(5_000))?;
    Ok(conn)
}

fn migrate(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        r"
        CREATE TABLE IF NOT EXISTS exception_event (
            tenant_id   TEXT NOT NULL,
            event_id    TEXT NOT NULL,
            exception_id TEXT NOT NULL,
            created_at  TEXT NOT NULL,
            payload_json TEXT NOT NULL,
            PRIMARY KEY (tenant_id, event_id)
        );
        CREATE INDEX IF NOT EXISTS idx_exception_event_by_exception
            ON exception_event (tenant_id, exception_id, created_at);
        CREATE INDEX IF NOT EXISTS idx_exception_event_by_tenant
            ON exception_event (tenant_id, created_at);

        CREATE TABLE IF NOT EXISTS exception (
            tenant_id      TEXT NOT NULL,
            exception_id   TEXT NOT NULL,
            created_at     TEXT NOT NULL,
            updated_at     TEXT NOT NULL,
            record_json    TEXT NOT NULL,
            result_json    TEXT,
            PRIMARY KEY (tenant_id, exception_id)
        );
        CREATE INDEX IF NOT EXISTS idx_exception_by_tenant
            ON exception (tenant_id, created_at);
        ",
    )?;
    Ok(())
}

fn writer_loop(conn: Connection, rx: &mpsc::Receiver<WriteCommand>) {
    while let Ok(command) = rx.recv() {
        match command {
            WriteCommand::AppendEvent {
                tenant_id,
                event,
                if_new,
                reply,
            } => {
                let outcome = write_event(&conn, &tenant_id, &event, if_new);
                let _ = reply.send(outcome);
            }
            WriteCommand::PutException {
                tenant_id,
                record,
                pipeline_result,
                reply,
            } => {
                let outcome = write_exception(&conn, &tenant_id, &record, pipeline_result.as_ref());
                let _ = reply.send(outcome);
            }
            WriteCommand::Shutdown => break,
        }
    }
    tracing::info!("xgate-store writer thread stopped");
}

fn write_event(conn: &Connection, tenant_id: &TenantId, event: &Event, if_new: bool) -> Result<bool, StoreError> {
    if &event.tenant_id != tenant_id {
        return Err(StoreError::TenantMismatch);
    }
    let payload_json = serde_json::to_string(event).map_err(|err| StoreError::Corrupt(err.to_string()))?;
    let result = conn.execute(
        "INSERT OR IGNORE INTO exception_event \
         (tenant_id, event_id, exception_id, created_at, payload_json) \
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            tenant_id.as_str(),
            event.event_id.to_string(),
            event.exception_id.as_str(),
            event.created_at.to_rfc3339(),
            payload_json,
        ],
    )?;
    let inserted = result > 0;
    if inserted {
        Ok(true)
    } else if if_new {
        Ok(false)
    } else {
        Err(StoreError::AlreadyExists(event.event_id.to_string()))
    }
}

fn write_exception(
    conn: &Connection,
    tenant_id: &TenantId,
    record: &ExceptionRecord,
    pipeline_result: Option<&PipelineResult>,
) -> Result<(), StoreError> {
    if &record.tenant_id != tenant_id {
        return Err(StoreError::TenantMismatch);
    }
    let record_json = serde_json::to_string(record).map_err(|err| StoreError::Corrupt(err.to_string()))?;
    let result_json = pipeline_result
        .map(serde_json::to_string)
        .transpose()
        .map_err(|err| StoreError::Corrupt(err.to_string()))?;
    conn.execute(
        "INSERT INTO exception \
         (tenant_id, exception_id, created_at, updated_at, record_json, result_json) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
         ON CONFLICT (tenant_id, exception_id) DO UPDATE SET \
            updated_at = excluded.updated_at, \
            record_json = excluded.record_json, \
            result_json = excluded.result_json",
        params![
            tenant_id.as_str(),
            record.exception_id.as_str(),
            record.created_at.to_rfc3339(),
            record.updated_at.to_rfc3339(),
            record_json,
            result_json,
        ],
    )?;
    Ok(())
}

impl EventLog for SqliteBackend {
    fn append(&self, tenant_id: &TenantId, event: Event) -> Result<(), StoreError> {
        match self.append_if_new(tenant_id, event.clone()) {
            Ok(true) => Ok(()),
            Ok(false) => Err(StoreError::AlreadyExists(event.event_id.to_string())),
            Err(err) => Err(err),
        }
    }

    fn append_if_new(&self, tenant_id: &TenantId, event: Event) -> Result<bool, StoreError> {
        if &event.tenant_id != tenant_id {
            return Err(StoreError::TenantMismatch);
        }
        let (reply_tx, reply_rx) = mpsc::sync_channel(1);
        self.writer_tx
            .send(WriteCommand::AppendEvent {
                tenant_id: tenant_id.clone(),
                event,
                if_new: true,
                reply: reply_tx,
            })
            .map_err(|_| StoreError::Io("writer thread is not running".to_string()))?;
        reply_rx.recv().map_err(|_| StoreError::Io("writer thread dropped reply".to_string()))?
    }

    fn exists(&self, tenant_id: &TenantId, event_id: EventId) -> Result<bool, StoreError> {
        let conn = self.read_conn().lock().map_err(|_| StoreError::Io("read pool poisoned".to_string()))?;
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM exception_event WHERE tenant_id = ?1 AND event_id = ?2",
                params![tenant_id.as_str(), event_id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn events_for_exception(
        &self,
        tenant_id: &TenantId,
        exception_id: &ExceptionId,
        filter: &EventFilter,
    ) -> Result<Vec<Event>, StoreError> {
        let conn = self.read_conn().lock().map_err(|_| StoreError::Io("read pool poisoned".to_string()))?;
        let mut stmt = conn.prepare(
            "SELECT payload_json FROM exception_event \
             WHERE tenant_id = ?1 AND exception_id = ?2 ORDER BY created_at ASC",
        )?;
        let rows = stmt.query_map(params![tenant_id.as_str(), exception_id.as_str()], |row| {
            row.get::<_, String>(0)
        })?;
        let mut events = Vec::new();
        for row in rows {
            let json = row?;
            let event: Event = serde_json::from_str(&json).map_err(|err| StoreError::Corrupt(err.to_string()))?;
            if filter.matches(&event) {
                events.push(event);
            }
        }
        Ok(events)
    }

    fn events_for_tenant(
        &self,
        tenant_id: &TenantId,
        from: Option<Timestamp>,
        to: Option<Timestamp>,
    ) -> Result<Vec<Event>, StoreError> {
        let conn = self.read_conn().lock().map_err(|_| StoreError::Io("read pool poisoned".to_string()))?;
        let mut stmt = conn.prepare(
            "SELECT payload_json FROM exception_event WHERE tenant_id = ?1 ORDER BY created_at DESC",
        )?;
        let rows = stmt.query_map(params![tenant_id.as_str()], |row| row.get::<_, String>(0))?;
        let mut events = Vec::new();
        for row in rows {
            let json = row?;
            let event: Event = serde_json::from_str(&json).map_err(|err| StoreError::Corrupt(err.to_string()))?;
            if from.is_some_and(|bound| event.created_at < bound) {
                continue;
            }
            if to.is_some_and(|bound| event.created_at > bound) {
                continue;
            }
            events.push(event);
        }
        Ok(events)
    }
}

impl ExceptionStore for SqliteBackend {
    fn put(
        &self,
        tenant_id: &TenantId,
        record: ExceptionRecord,
        pipeline_result: Option<PipelineResult>,
    ) -> Result<(), StoreError> {
        if &record.tenant_id != tenant_id {
            return Err(StoreError::TenantMismatch);
        }
        let (reply_tx, reply_rx) = mpsc::sync_channel(1);
        self.writer_tx
            .send(WriteCommand::PutException {
                tenant_id: tenant_id.clone(),
                record,
                pipeline_result,
                reply: reply_tx,
            })
            .map_err(|_| StoreError::Io("writer thread is not running".to_string()))?;
        reply_rx.recv().map_err(|_| StoreError::Io("writer thread dropped reply".to_string()))?
    }

    fn get(
        &self,
        tenant_id: &TenantId,
        exception_id: &ExceptionId,
    ) -> Result<Option<(ExceptionRecord, Option<PipelineResult>)>, StoreError> {
        let conn = self.read_conn().lock().map_err(|_| StoreError::Io("read pool poisoned".to_string()))?;
        let row: Option<(String, Option<String>)> = conn
            .query_row(
                "SELECT record_json, result_json FROM exception WHERE tenant_id = ?1 AND exception_id = ?2",
                params![tenant_id.as_str(), exception_id.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let Some((record_json, result_json)) = row else {
            return Ok(None);
        };
        let record: ExceptionRecord =
            serde_json::from_str(&record_json).map_err(|err| StoreError::Corrupt(err.to_string()))?;
        let result = result_json
            .map(|json| serde_json::from_str::<PipelineResult>(&json))
            .transpose()
            .map_err(|err| StoreError::Corrupt(err.to_string()))?;
        Ok(Some((record, result)))
    }

    fn list(
        &self,
        tenant_id: &TenantId,
        filter: &ExceptionListFilter,
        page: u32,
        page_size: u32,
    ) -> Result<ExceptionPage, StoreError> {
        let conn = self.read_conn().lock().map_err(|_| StoreError::Io("read pool poisoned".to_string()))?;
        let mut stmt = conn.prepare(
            "SELECT record_json, result_json FROM exception WHERE tenant_id = ?1 ORDER BY created_at DESC",
        )?;
        let rows = stmt.query_map(params![tenant_id.as_str()], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?))
        })?;

        let mut matching = Vec::new();
        for row in rows {
            let (record_json, result_json) = row?;
            let record: ExceptionRecord =
                serde_json::from_str(&record_json).map_err(|err| StoreError::Corrupt(err.to_string()))?;
            if !filter.matches(&record) {
                continue;
            }
            let result = result_json
                .map(|json| serde_json::from_str::<PipelineResult>(&json))
                .transpose()
                .map_err(|err| StoreError::Corrupt(err.to_string()))?;
            matching.push((record, result));
        }

        let total = matching.len() as u64;
        let page_size = page_size.max(1) as usize;
        let start = (page as usize) * page_size;
        let items = matching.into_iter().skip(start).take(page_size).collect();
        Ok(ExceptionPage {
            items,
            total,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xgate_core::ActorType;
    use xgate_core::ResolutionStatus;
    use xgate_core::SourceSystem;

    fn sample_event(tenant_id: &TenantId, exception_id: &ExceptionId) -> Event {
        Event {
            event_id: EventId::generate(),
            exception_id: exception_id.clone(),
            tenant_id: tenant_id.clone(),
            event_type: "PolicyEvaluated".to_string(),
            actor_type: ActorType::System,
            actor_id: None,
            payload: serde_json::json!({}),
            created_at: Timestamp::now_utc(),
        }
    }

    fn sample_record(tenant_id: &TenantId) -> ExceptionRecord {
        let now = Timestamp::now_utc();
        ExceptionRecord {
            exception_id: ExceptionId::new("EX-1"),
            tenant_id: tenant_id.clone(),
            source_system: SourceSystem::from("PaymentGateway"),
            exception_type: None,
            severity: None,
            resolution_status: ResolutionStatus::Open,
            raw_payload: serde_json::json!({}),
            normalized_context: serde_json::json!({}),
            current_playbook_id: None,
            current_step: None,
            timestamp: now,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn append_if_new_is_idempotent() {
        let store = SqliteBackend::open_in_memory().expect("open");
        let tenant = TenantId::new("TENANT_A");
        let exception_id = ExceptionId::new("EX-1");
        let event = sample_event(&tenant, &exception_id);

        assert!(store.append_if_new(&tenant, event.clone()).expect("first insert"));
        assert!(!store.append_if_new(&tenant, event).expect("duplicate insert"));

        let events = store
            .events_for_exception(&tenant, &exception_id, &EventFilter::default())
            .expect("read back");
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn append_rejects_duplicates() {
        let store = SqliteBackend::open_in_memory().expect("open");
        let tenant = TenantId::new("TENANT_A");
        let event = sample_event(&tenant, &ExceptionId::new("EX-1"));
        store.append(&tenant, event.clone()).expect("first insert");
        let err = store.append(&tenant, event).unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(_)));
    }

    #[test]
    fn tenant_isolation_hides_cross_tenant_records() {
        let store = SqliteBackend::open_in_memory().expect("open");
        let tenant_a = TenantId::new("TENANT_A");
        let tenant_b = TenantId::new("TENANT_B");
        let record = sample_record(&tenant_a);
        store.put(&tenant_a, record.clone(), None).expect("put");

        assert!(store.get(&tenant_b, &record.exception_id).expect("get").is_none());
        assert!(store.get(&tenant_a, &record.exception_id).expect("get").is_some());

        let page = store.list(&tenant_b, &ExceptionListFilter::default(), 0, 10).expect("list");
        assert_eq!(page.total, 0);

        let events = store
            .events_for_exception(&tenant_b, &record.exception_id, &EventFilter::default())
            .expect("events");
        assert!(events.is_empty());
    }

    #[test]
    fn put_rejects_tenant_mismatch() {
        let store = SqliteBackend::open_in_memory().expect("open");
        let tenant_a = TenantId::new("TENANT_A");
        let tenant_b = TenantId::new("TENANT_B");
        let record = sample_record(&tenant_a);
        let err = store.put(&tenant_b, record, None).unwrap_err();
        assert!(matches!(err, StoreError::TenantMismatch));
    }

    #[test]
    fn list_pages_results() {
        let store = SqliteBackend::open_in_memory().expect("open");
        let tenant = TenantId::new("TENANT_A");
        for i in 0..5 {
            let mut record = sample_record(&tenant);
            record.exception_id = ExceptionId::new(format!("EX-{i}"));
            store.put(&tenant, record, None).expect("put");
        }
        let page = store.list(&tenant, &ExceptionListFilter::default(), 0, 2).expect("list");
        assert_eq!(page.total, 5);
        assert_eq!(page.items.len(), 2);
    }
}
