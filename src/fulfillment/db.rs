use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, ErrorCode, OptionalExtension, Row, Transaction, TransactionBehavior, params, params_from_iter};

use super::models::*;

/// SQL literal list of statuses that hold a worker slot and claim an order.
/// Must stay in sync with `AssignmentStatus::NON_TERMINAL`.
pub(crate) const LIVE_STATUSES_SQL: &str = "('assigned', 'preparing', 'waiting', 'shipped')";

const ASSIGNMENT_COLUMNS: &str = "id, worker_id, merchant_id, order_id, order_number, snapshot, status, \
     upstream_status, upstream_sub_status, assigned_at, started_at, waiting_at, completed_at, \
     cancelled_at, last_status_update_at, notes";

const HISTORY_COLUMNS: &str = "id, assignment_id, worker_id, worker_name, merchant_id, order_id, order_number, \
     snapshot, final_status, assigned_at, started_at, finished_at, duration_minutes, \
     final_upstream_status, notes";

const WORKER_COLUMNS: &str = "id, name, merchant_id, role, active, policy, capacity, created_at";

/// Async-safe handle to the fulfillment database.
///
/// Wraps `FulfillmentDb` behind `Arc<Mutex>` and runs all access on tokio's
/// blocking thread pool via `spawn_blocking`, keeping synchronous SQLite I/O
/// off the async worker threads. The mutex only serializes this process's use
/// of one connection; ownership invariants are enforced by the schema.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<FulfillmentDb>>,
}

impl DbHandle {
    pub fn new(db: FulfillmentDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    /// Run a closure with access to the database on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&FulfillmentDb) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db.lock().map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
            f(&guard)
        })
        .await
        .context("DB task panicked")?
    }

    /// Acquire the database mutex synchronously. For startup, CLI commands and
    /// tests; never from a hot async path.
    pub fn lock_sync(&self) -> Result<std::sync::MutexGuard<'_, FulfillmentDb>> {
        self.inner
            .lock()
            .map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))
    }
}

pub struct FulfillmentDb {
    conn: Connection,
}

/// Outcome of the conditional claim insert.
#[derive(Debug, Clone, PartialEq)]
pub enum ClaimInsert {
    Inserted(Assignment),
    /// The worker reached capacity between the pre-check and the insert.
    SlotTaken,
    /// Another live assignment already holds this order.
    OrderTaken,
}

impl FulfillmentDb {
    /// Open (or create) a SQLite database at the given path and run migrations.
    /// File databases use WAL and a busy timeout so several processes can share
    /// them.
    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA busy_timeout = 5000;")
            .context("Failed to configure SQLite journal")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")?;
        self.run_migrations().context("Failed to run migrations")?;
        Ok(())
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn
            .execute_batch(&format!(
                "
                CREATE TABLE IF NOT EXISTS workers (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL,
                    merchant_id INTEGER NOT NULL,
                    role TEXT NOT NULL DEFAULT 'preparer',
                    active INTEGER NOT NULL DEFAULT 1,
                    policy TEXT NOT NULL DEFAULT '{{\"kind\":\"oldest-unfiltered\"}}',
                    capacity INTEGER NOT NULL DEFAULT 1 CHECK (capacity >= 1),
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS assignments (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    worker_id INTEGER NOT NULL REFERENCES workers(id),
                    merchant_id INTEGER NOT NULL,
                    order_id TEXT NOT NULL,
                    order_number TEXT NOT NULL,
                    snapshot TEXT NOT NULL DEFAULT '{{}}',
                    status TEXT NOT NULL DEFAULT 'assigned',
                    upstream_status TEXT,
                    upstream_sub_status TEXT,
                    assigned_at TEXT NOT NULL,
                    started_at TEXT,
                    waiting_at TEXT,
                    completed_at TEXT,
                    cancelled_at TEXT,
                    last_status_update_at TEXT NOT NULL,
                    notes TEXT NOT NULL DEFAULT ''
                );

                CREATE TABLE IF NOT EXISTS history (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    assignment_id INTEGER NOT NULL,
                    worker_id INTEGER NOT NULL,
                    worker_name TEXT NOT NULL,
                    merchant_id INTEGER NOT NULL,
                    order_id TEXT NOT NULL,
                    order_number TEXT NOT NULL,
                    snapshot TEXT NOT NULL,
                    final_status TEXT NOT NULL,
                    assigned_at TEXT NOT NULL,
                    started_at TEXT,
                    finished_at TEXT NOT NULL,
                    duration_minutes INTEGER,
                    final_upstream_status TEXT,
                    notes TEXT NOT NULL DEFAULT '',
                    UNIQUE(assignment_id, assigned_at)
                );

                CREATE UNIQUE INDEX IF NOT EXISTS idx_assignments_live_order
                    ON assignments(merchant_id, order_id)
                    WHERE status IN {live};
                CREATE INDEX IF NOT EXISTS idx_assignments_worker_status ON assignments(worker_id, status);
                CREATE INDEX IF NOT EXISTS idx_assignments_order_number ON assignments(order_number);
                CREATE INDEX IF NOT EXISTS idx_history_order_number ON history(order_number, finished_at);
                CREATE INDEX IF NOT EXISTS idx_history_worker ON history(worker_id, finished_at);
                CREATE INDEX IF NOT EXISTS idx_workers_merchant ON workers(merchant_id);
                ",
                live = LIVE_STATUSES_SQL
            ))
            .context("Failed to create tables")?;
        Ok(())
    }

    /// Run `f` inside a `BEGIN IMMEDIATE` transaction: the write lock is taken
    /// up front, so reads inside `f` cannot be invalidated by another
    /// connection before the writes land. Commits on `Ok`, rolls back on `Err`.
    pub fn immediate<R>(&self, f: impl FnOnce(&Transaction<'_>) -> Result<R>) -> Result<R> {
        let tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)
            .context("Failed to begin immediate transaction")?;
        let out = f(&tx)?;
        tx.commit().context("Failed to commit transaction")?;
        Ok(out)
    }

    // ── Workers ───────────────────────────────────────────────────────

    pub fn create_worker(&self, worker: &NewWorker, now: DateTime<Utc>) -> Result<Worker> {
        if worker.capacity == 0 {
            anyhow::bail!("Worker capacity must be at least 1");
        }
        let policy = serde_json::to_string(&worker.policy).context("Failed to serialize policy")?;
        self.conn
            .execute(
                "INSERT INTO workers (name, merchant_id, role, policy, capacity, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    worker.name,
                    worker.merchant_id,
                    worker.role.as_str(),
                    policy,
                    worker.capacity,
                    now
                ],
            )
            .context("Failed to insert worker")?;
        let id = self.conn.last_insert_rowid();
        self.get_worker(id)?.context("Worker not found after insert")
    }

    pub fn get_worker(&self, id: i64) -> Result<Option<Worker>> {
        fetch_worker(&self.conn, id)
    }

    pub fn list_workers(&self, merchant_id: Option<i64>) -> Result<Vec<Worker>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {WORKER_COLUMNS} FROM workers
                 WHERE ?1 IS NULL OR merchant_id = ?1 ORDER BY id"
            ))
            .context("Failed to prepare list_workers")?;
        let rows = stmt
            .query_map(params![merchant_id], read_worker)
            .context("Failed to query workers")?;
        let mut workers = Vec::new();
        for row in rows {
            workers.push(row.context("Failed to read worker row")?.into_worker()?);
        }
        Ok(workers)
    }

    pub fn set_worker_active(&self, id: i64, active: bool) -> Result<Worker> {
        self.conn
            .execute(
                "UPDATE workers SET active = ?1 WHERE id = ?2",
                params![active, id],
            )
            .context("Failed to update worker active flag")?;
        self.get_worker(id)?.context("Worker not found after update")
    }

    // ── Assignments ───────────────────────────────────────────────────

    pub fn get_assignment(&self, id: i64) -> Result<Option<Assignment>> {
        fetch_assignment(&self.conn, id)
    }

    pub fn count_live_assignments(&self, worker_id: i64) -> Result<u32> {
        count_live_for_worker(&self.conn, worker_id)
    }

    pub fn list_live_assignments(&self, worker_id: i64) -> Result<Vec<Assignment>> {
        query_assignments(
            &self.conn,
            &format!("WHERE worker_id = ?1 AND status IN {LIVE_STATUSES_SQL} ORDER BY assigned_at, id"),
            params![worker_id],
        )
    }

    /// Upstream ids of every order currently claimed by any worker of the
    /// merchant.
    pub fn live_order_ids(&self, merchant_id: i64) -> Result<HashSet<String>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT order_id FROM assignments WHERE merchant_id = ?1 AND status IN {LIVE_STATUSES_SQL}"
            ))
            .context("Failed to prepare live_order_ids")?;
        let rows = stmt
            .query_map(params![merchant_id], |row| row.get::<_, String>(0))
            .context("Failed to query live order ids")?;
        let mut ids = HashSet::new();
        for row in rows {
            ids.insert(row.context("Failed to read order id")?);
        }
        Ok(ids)
    }

    /// Insert a claim if, under the write lock, the worker still has a free
    /// slot and no live assignment holds the order.
    pub fn insert_claim(
        &self,
        claim: &NewAssignment,
        capacity: u32,
        now: DateTime<Utc>,
    ) -> Result<ClaimInsert> {
        let snapshot = serde_json::to_string(&claim.snapshot).context("Failed to serialize snapshot")?;
        self.immediate(|tx| {
            let inserted = tx.execute(
                &format!(
                    "INSERT INTO assignments (worker_id, merchant_id, order_id, order_number, snapshot, status,
                                              upstream_status, upstream_sub_status, assigned_at, last_status_update_at)
                     SELECT ?1, ?2, ?3, ?4, ?5, 'assigned', ?6, ?7, ?8, ?8
                     WHERE (SELECT COUNT(*) FROM assignments
                            WHERE worker_id = ?1 AND status IN {LIVE_STATUSES_SQL}) < ?9"
                ),
                params![
                    claim.worker_id,
                    claim.merchant_id,
                    claim.order_id,
                    claim.order_number,
                    snapshot,
                    claim.upstream_status,
                    claim.upstream_sub_status,
                    now,
                    capacity
                ],
            );
            match inserted {
                Ok(0) => Ok(ClaimInsert::SlotTaken),
                Ok(_) => {
                    let id = tx.last_insert_rowid();
                    let assignment =
                        fetch_assignment(tx, id)?.context("Assignment not found after insert")?;
                    Ok(ClaimInsert::Inserted(assignment))
                }
                Err(e) if is_constraint_violation(&e) => Ok(ClaimInsert::OrderTaken),
                Err(e) => Err(anyhow::Error::new(e).context("Failed to insert claim")),
            }
        })
    }

    /// Compare-and-set a lifecycle transition. Returns `None` when the row is
    /// gone or no longer in `from`.
    pub fn apply_transition(
        &self,
        id: i64,
        from: AssignmentStatus,
        to: AssignmentStatus,
        upstream_status: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Option<Assignment>> {
        let changed = self
            .conn
            .execute(
                "UPDATE assignments SET
                    status = ?1,
                    upstream_status = COALESCE(?2, upstream_status),
                    started_at = CASE WHEN ?1 = 'preparing' AND started_at IS NULL THEN ?3 ELSE started_at END,
                    waiting_at = CASE WHEN ?1 = 'waiting' THEN ?3 ELSE waiting_at END,
                    cancelled_at = CASE WHEN ?1 = 'removed' THEN ?3 ELSE cancelled_at END,
                    last_status_update_at = ?3
                 WHERE id = ?4 AND status = ?5",
                params![to.as_str(), upstream_status, now, id, from.as_str()],
            )
            .context("Failed to apply status transition")?;
        if changed == 0 {
            return Ok(None);
        }
        self.get_assignment(id)
    }

    pub fn set_upstream_status(&self, id: i64, status: &str) -> Result<()> {
        self.conn
            .execute(
                "UPDATE assignments SET upstream_status = ?1 WHERE id = ?2",
                params![status, id],
            )
            .context("Failed to update cached upstream status")?;
        Ok(())
    }

    /// Replace the cached snapshot and upstream status of a live row.
    pub fn refresh_snapshot(
        &self,
        id: i64,
        snapshot: &serde_json::Value,
        upstream_status: &str,
        upstream_sub_status: Option<&str>,
    ) -> Result<Option<Assignment>> {
        let snapshot = serde_json::to_string(snapshot).context("Failed to serialize snapshot")?;
        let changed = self
            .conn
            .execute(
                &format!(
                    "UPDATE assignments SET snapshot = ?1, upstream_status = ?2, upstream_sub_status = ?3
                     WHERE id = ?4 AND status IN {LIVE_STATUSES_SQL}"
                ),
                params![snapshot, upstream_status, upstream_sub_status, id],
            )
            .context("Failed to refresh assignment snapshot")?;
        if changed == 0 {
            return Ok(None);
        }
        self.get_assignment(id)
    }

    /// Hard-delete a live row whose order left the eligible set upstream.
    pub fn delete_live_assignment(&self, id: i64) -> Result<bool> {
        let count = self
            .conn
            .execute(
                &format!("DELETE FROM assignments WHERE id = ?1 AND status IN {LIVE_STATUSES_SQL}"),
                params![id],
            )
            .context("Failed to delete assignment")?;
        Ok(count > 0)
    }

    pub fn append_note(&self, id: i64, line: &str) -> Result<Option<Assignment>> {
        let changed = self
            .conn
            .execute(
                "UPDATE assignments
                 SET notes = CASE WHEN notes = '' THEN ?1 ELSE notes || char(10) || ?1 END
                 WHERE id = ?2",
                params![line, id],
            )
            .context("Failed to append assignment note")?;
        if changed == 0 {
            return Ok(None);
        }
        self.get_assignment(id)
    }

    // ── History ───────────────────────────────────────────────────────

    pub fn list_history_for_worker(&self, worker_id: i64, limit: u32) -> Result<Vec<HistoryRecord>> {
        query_history(
            &self.conn,
            "WHERE worker_id = ?1 ORDER BY finished_at DESC, id DESC LIMIT ?2",
            params![worker_id, limit],
        )
    }

    pub fn history_for_assignment(&self, assignment_id: i64) -> Result<Vec<HistoryRecord>> {
        query_history(
            &self.conn,
            "WHERE assignment_id = ?1 ORDER BY id",
            params![assignment_id],
        )
    }
}

// ── Row-level helpers shared by the composite operations ─────────────
//
// These take a plain `&Connection` so they work both on the bare
// connection and inside a `Transaction` (which derefs to one).

pub(crate) fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(e, rusqlite::Error::SqliteFailure(err, _) if err.code == ErrorCode::ConstraintViolation)
}

struct WorkerRow {
    id: i64,
    name: String,
    merchant_id: i64,
    role: String,
    active: bool,
    policy: String,
    capacity: u32,
    created_at: DateTime<Utc>,
}

impl WorkerRow {
    fn into_worker(self) -> Result<Worker> {
        Ok(Worker {
            id: self.id,
            name: self.name,
            merchant_id: self.merchant_id,
            role: self
                .role
                .parse()
                .map_err(|_| anyhow::anyhow!("invalid role in database: '{}'", self.role))?,
            active: self.active,
            policy: serde_json::from_str(&self.policy)
                .map_err(|e| anyhow::anyhow!("corrupt policy JSON '{}': {}", self.policy, e))?,
            capacity: self.capacity,
            created_at: self.created_at,
        })
    }
}

fn read_worker(row: &Row<'_>) -> rusqlite::Result<WorkerRow> {
    Ok(WorkerRow {
        id: row.get(0)?,
        name: row.get(1)?,
        merchant_id: row.get(2)?,
        role: row.get(3)?,
        active: row.get(4)?,
        policy: row.get(5)?,
        capacity: row.get(6)?,
        created_at: row.get(7)?,
    })
}

pub(crate) fn fetch_worker(conn: &Connection, id: i64) -> Result<Option<Worker>> {
    let row = conn
        .query_row(
            &format!("SELECT {WORKER_COLUMNS} FROM workers WHERE id = ?1"),
            params![id],
            read_worker,
        )
        .optional()
        .context("Failed to query worker")?;
    row.map(WorkerRow::into_worker).transpose()
}

struct AssignmentRow {
    id: i64,
    worker_id: i64,
    merchant_id: i64,
    order_id: String,
    order_number: String,
    snapshot: String,
    status: String,
    upstream_status: Option<String>,
    upstream_sub_status: Option<String>,
    assigned_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    waiting_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    cancelled_at: Option<DateTime<Utc>>,
    last_status_update_at: DateTime<Utc>,
    notes: String,
}

impl AssignmentRow {
    fn into_assignment(self) -> Result<Assignment> {
        Ok(Assignment {
            id: self.id,
            worker_id: self.worker_id,
            merchant_id: self.merchant_id,
            order_id: self.order_id,
            order_number: self.order_number,
            snapshot: serde_json::from_str(&self.snapshot)
                .map_err(|e| anyhow::anyhow!("corrupt snapshot JSON for assignment {}: {}", self.id, e))?,
            status: self
                .status
                .parse()
                .map_err(|_| anyhow::anyhow!("invalid status in database: '{}'", self.status))?,
            upstream_status: self.upstream_status,
            upstream_sub_status: self.upstream_sub_status,
            assigned_at: self.assigned_at,
            started_at: self.started_at,
            waiting_at: self.waiting_at,
            completed_at: self.completed_at,
            cancelled_at: self.cancelled_at,
            last_status_update_at: self.last_status_update_at,
            notes: self.notes,
        })
    }
}

fn read_assignment(row: &Row<'_>) -> rusqlite::Result<AssignmentRow> {
    Ok(AssignmentRow {
        id: row.get(0)?,
        worker_id: row.get(1)?,
        merchant_id: row.get(2)?,
        order_id: row.get(3)?,
        order_number: row.get(4)?,
        snapshot: row.get(5)?,
        status: row.get(6)?,
        upstream_status: row.get(7)?,
        upstream_sub_status: row.get(8)?,
        assigned_at: row.get(9)?,
        started_at: row.get(10)?,
        waiting_at: row.get(11)?,
        completed_at: row.get(12)?,
        cancelled_at: row.get(13)?,
        last_status_update_at: row.get(14)?,
        notes: row.get(15)?,
    })
}

pub(crate) fn query_assignments<P: rusqlite::Params>(
    conn: &Connection,
    clause: &str,
    params: P,
) -> Result<Vec<Assignment>> {
    let mut stmt = conn
        .prepare(&format!("SELECT {ASSIGNMENT_COLUMNS} FROM assignments {clause}"))
        .context("Failed to prepare assignment query")?;
    let rows = stmt
        .query_map(params, read_assignment)
        .context("Failed to query assignments")?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row.context("Failed to read assignment row")?.into_assignment()?);
    }
    Ok(out)
}

pub(crate) fn fetch_assignment(conn: &Connection, id: i64) -> Result<Option<Assignment>> {
    Ok(query_assignments(conn, "WHERE id = ?1", params![id])?.into_iter().next())
}

pub(crate) fn fetch_assignments_by_ids(conn: &Connection, ids: &[i64]) -> Result<Vec<Assignment>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    query_assignments(
        conn,
        &format!("WHERE id IN ({}) ORDER BY id", placeholders(ids.len(), 1)),
        params_from_iter(ids.iter()),
    )
}

pub(crate) fn count_live_for_worker(conn: &Connection, worker_id: i64) -> Result<u32> {
    conn.query_row(
        &format!("SELECT COUNT(*) FROM assignments WHERE worker_id = ?1 AND status IN {LIVE_STATUSES_SQL}"),
        params![worker_id],
        |row| row.get(0),
    )
    .context("Failed to count live assignments")
}

/// `?start, ?start+1, ...` for dynamically sized `IN (...)` lists.
pub(crate) fn placeholders(count: usize, start: usize) -> String {
    (start..start + count)
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Fields for a new history row; the id is assigned by the store.
pub(crate) struct NewHistory<'a> {
    pub assignment: &'a Assignment,
    pub worker_name: &'a str,
    pub finished_at: DateTime<Utc>,
    pub duration_minutes: Option<i64>,
}

pub(crate) fn insert_history(conn: &Connection, record: &NewHistory<'_>) -> Result<i64> {
    let a = record.assignment;
    let snapshot = serde_json::to_string(&a.snapshot).context("Failed to serialize snapshot")?;
    conn.execute(
        "INSERT INTO history (assignment_id, worker_id, worker_name, merchant_id, order_id, order_number,
                              snapshot, final_status, assigned_at, started_at, finished_at, duration_minutes,
                              final_upstream_status, notes)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'completed', ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            a.id,
            a.worker_id,
            record.worker_name,
            a.merchant_id,
            a.order_id,
            a.order_number,
            snapshot,
            a.assigned_at,
            a.started_at,
            record.finished_at,
            record.duration_minutes,
            a.upstream_status,
            a.notes
        ],
    )
    .context("Failed to insert history record")?;
    Ok(conn.last_insert_rowid())
}

struct HistoryRow {
    id: i64,
    assignment_id: i64,
    worker_id: i64,
    worker_name: String,
    merchant_id: i64,
    order_id: String,
    order_number: String,
    snapshot: String,
    final_status: String,
    assigned_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    finished_at: DateTime<Utc>,
    duration_minutes: Option<i64>,
    final_upstream_status: Option<String>,
    notes: String,
}

impl HistoryRow {
    fn into_record(self) -> Result<HistoryRecord> {
        Ok(HistoryRecord {
            id: self.id,
            assignment_id: self.assignment_id,
            worker_id: self.worker_id,
            worker_name: self.worker_name,
            merchant_id: self.merchant_id,
            order_id: self.order_id,
            order_number: self.order_number,
            snapshot: serde_json::from_str(&self.snapshot)
                .map_err(|e| anyhow::anyhow!("corrupt snapshot JSON for history {}: {}", self.id, e))?,
            final_status: self
                .final_status
                .parse()
                .map_err(|_| anyhow::anyhow!("invalid final_status in database: '{}'", self.final_status))?,
            assigned_at: self.assigned_at,
            started_at: self.started_at,
            finished_at: self.finished_at,
            duration_minutes: self.duration_minutes,
            final_upstream_status: self.final_upstream_status,
            notes: self.notes,
        })
    }
}

fn read_history(row: &Row<'_>) -> rusqlite::Result<HistoryRow> {
    Ok(HistoryRow {
        id: row.get(0)?,
        assignment_id: row.get(1)?,
        worker_id: row.get(2)?,
        worker_name: row.get(3)?,
        merchant_id: row.get(4)?,
        order_id: row.get(5)?,
        order_number: row.get(6)?,
        snapshot: row.get(7)?,
        final_status: row.get(8)?,
        assigned_at: row.get(9)?,
        started_at: row.get(10)?,
        finished_at: row.get(11)?,
        duration_minutes: row.get(12)?,
        final_upstream_status: row.get(13)?,
        notes: row.get(14)?,
    })
}

pub(crate) fn query_history<P: rusqlite::Params>(
    conn: &Connection,
    clause: &str,
    params: P,
) -> Result<Vec<HistoryRecord>> {
    let mut stmt = conn
        .prepare(&format!("SELECT {HISTORY_COLUMNS} FROM history {clause}"))
        .context("Failed to prepare history query")?;
    let rows = stmt
        .query_map(params, read_history)
        .context("Failed to query history")?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row.context("Failed to read history row")?.into_record()?);
    }
    Ok(out)
}
