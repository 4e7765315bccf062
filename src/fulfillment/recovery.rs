//! Supervisor tools: move, remove and reopen assignments.
//!
//! Each operation runs in one `BEGIN IMMEDIATE` transaction and touches its
//! target rows with a single statement.

use std::collections::{BTreeSet, HashSet};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, ToSql, params};

use super::db::{
    FulfillmentDb, LIVE_STATUSES_SQL, count_live_for_worker, fetch_assignment, fetch_assignments_by_ids,
    fetch_worker, is_constraint_violation, placeholders, query_assignments, query_history,
};
use super::extract::extract_payment_method;
use super::models::{Assignment, ReassignReport, RemovalReport, RemovalSelector, Worker};
use crate::errors::EngineError;

fn active_worker(conn: &Connection, worker_id: i64) -> Result<Worker, EngineError> {
    let worker = fetch_worker(conn, worker_id)?.ok_or(EngineError::WorkerNotFound { id: worker_id })?;
    if !worker.active {
        return Err(EngineError::Validation(format!("worker {worker_id} is inactive")));
    }
    Ok(worker)
}

/// Run a recovery body in an immediate transaction, keeping typed errors.
fn in_transaction<R>(
    db: &FulfillmentDb,
    body: impl FnOnce(&Connection) -> Result<R, EngineError>,
) -> Result<R, EngineError> {
    db.immediate(|tx| body(&**tx).map_err(anyhow::Error::from))
        .map_err(EngineError::from)
}

pub fn reassign(
    db: &FulfillmentDb,
    assignment_ids: &[i64],
    new_worker_id: i64,
    now: DateTime<Utc>,
) -> Result<ReassignReport, EngineError> {
    if assignment_ids.is_empty() {
        return Err(EngineError::Validation("no assignment ids given".to_string()));
    }
    let ids: Vec<i64> = assignment_ids.iter().copied().collect::<BTreeSet<_>>().into_iter().collect();

    in_transaction(db, |tx| {
        let worker = active_worker(tx, new_worker_id)?;
        let rows = fetch_assignments_by_ids(tx, &ids)?;
        let found: HashSet<i64> = rows.iter().map(|a| a.id).collect();

        let mut report = ReassignReport::default();
        report.skipped.extend(ids.iter().filter(|id| !found.contains(id)));
        let mut movable = Vec::new();
        for a in &rows {
            if a.status.is_terminal() {
                report.skipped.push(a.id);
            } else {
                movable.push(a);
            }
        }
        report.skipped.sort_unstable();
        if movable.is_empty() {
            return Ok(report);
        }

        for a in &movable {
            if a.merchant_id != worker.merchant_id {
                return Err(EngineError::Validation(format!(
                    "assignment {} belongs to merchant {}, worker {} to merchant {}",
                    a.id, a.merchant_id, worker.id, worker.merchant_id
                )));
            }
            if !worker.policy.accepts_payment_method(extract_payment_method(&a.snapshot).as_deref()) {
                return Err(EngineError::Validation(format!(
                    "order {} does not match worker {}'s payment-method filter",
                    a.order_number, worker.id
                )));
            }
        }
        let incoming = movable.iter().filter(|a| a.worker_id != worker.id).count() as u32;
        let held = count_live_for_worker(tx, worker.id)?;
        if held + incoming > worker.capacity {
            return Err(EngineError::Validation(format!(
                "worker {} holds {} of {} slots and cannot take {} more",
                worker.id, held, worker.capacity, incoming
            )));
        }

        let moved: Vec<i64> = movable.iter().map(|a| a.id).collect();
        let sql = format!(
            "UPDATE assignments SET worker_id = ?1, status = 'assigned', assigned_at = ?2,
                    started_at = NULL, waiting_at = NULL, completed_at = NULL, last_status_update_at = ?2
             WHERE id IN ({}) AND status IN {LIVE_STATUSES_SQL}",
            placeholders(moved.len(), 3)
        );
        let mut values: Vec<&dyn ToSql> = vec![&worker.id, &now];
        values.extend(moved.iter().map(|id| id as &dyn ToSql));
        tx.execute(&sql, values.as_slice())
            .map_err(|e| EngineError::Database(anyhow::Error::new(e).context("Failed to reassign assignments")))?;

        tracing::info!(worker_id = worker.id, moved = ?moved, skipped = ?report.skipped, "assignments reassigned");
        report.moved = moved;
        Ok(report)
    })
}

pub fn remove_assignments(
    db: &FulfillmentDb,
    selector: &RemovalSelector,
    now: DateTime<Utc>,
) -> Result<RemovalReport, EngineError> {
    in_transaction(db, |tx| {
        let mut report = RemovalReport::default();
        let mut targets: Vec<i64> = Vec::new();

        match selector {
            RemovalSelector::Ids(ids) => {
                if ids.is_empty() {
                    return Err(EngineError::Validation("no assignment ids given".to_string()));
                }
                let ids: Vec<i64> = ids.iter().copied().collect::<BTreeSet<_>>().into_iter().collect();
                let rows = fetch_assignments_by_ids(tx, &ids)?;
                let found: HashSet<i64> = rows.iter().map(|a| a.id).collect();
                report.skipped.extend(ids.iter().filter(|id| !found.contains(id)));

                let mut orders = BTreeSet::new();
                for a in &rows {
                    if a.status.is_terminal() {
                        report.skipped.push(a.id);
                    } else {
                        targets.push(a.id);
                        report.removed.push(a.id);
                        orders.insert((a.merchant_id, a.order_id.clone()));
                    }
                }
                for (merchant_id, order_id) in orders {
                    let live = query_assignments(
                        tx,
                        &format!("WHERE merchant_id = ?1 AND order_id = ?2 AND status IN {LIVE_STATUSES_SQL}"),
                        params![merchant_id, order_id],
                    )?;
                    for sibling in live.into_iter().filter(|a| !found.contains(&a.id)) {
                        targets.push(sibling.id);
                        report.siblings.push(sibling.id);
                    }
                }
            }
            RemovalSelector::OrderIds(order_ids) => {
                if order_ids.is_empty() {
                    return Err(EngineError::Validation("no order ids given".to_string()));
                }
                let rows = query_assignments(
                    tx,
                    &format!("WHERE order_id IN ({}) ORDER BY id", placeholders(order_ids.len(), 1)),
                    rusqlite::params_from_iter(order_ids.iter()),
                )?;
                for a in rows {
                    if a.status.is_terminal() {
                        report.skipped.push(a.id);
                    } else {
                        targets.push(a.id);
                        report.removed.push(a.id);
                    }
                }
            }
        }

        report.skipped.sort_unstable();
        if targets.is_empty() {
            return Ok(report);
        }
        let sql = format!(
            "UPDATE assignments SET status = 'removed', cancelled_at = ?1, last_status_update_at = ?1
             WHERE id IN ({}) AND status IN {LIVE_STATUSES_SQL}",
            placeholders(targets.len(), 2)
        );
        let mut values: Vec<&dyn ToSql> = vec![&now];
        values.extend(targets.iter().map(|id| id as &dyn ToSql));
        tx.execute(&sql, values.as_slice())
            .map_err(|e| EngineError::Database(anyhow::Error::new(e).context("Failed to remove assignments")))?;

        tracing::info!(
            removed = ?report.removed,
            siblings = ?report.siblings,
            skipped = ?report.skipped,
            "assignments removed"
        );
        Ok(report)
    })
}

/// Give an order back to a worker. An existing row for the order is reopened
/// in place (the live one if there is one, else the newest); otherwise a new
/// row is built from the latest history snapshot.
pub fn reopen_from_history(
    db: &FulfillmentDb,
    order_number: &str,
    worker_id: i64,
    now: DateTime<Utc>,
) -> Result<Assignment, EngineError> {
    let order_number = order_number.trim();
    if order_number.is_empty() {
        return Err(EngineError::Validation("order number is empty".to_string()));
    }

    in_transaction(db, |tx| {
        let worker = active_worker(tx, worker_id)?;
        let rows = query_assignments(
            tx,
            "WHERE merchant_id = ?1 AND order_number = ?2 ORDER BY id DESC",
            params![worker.merchant_id, order_number],
        )?;
        // A live row is reopened in place in preference to older terminal rows.
        let live = rows.iter().find(|a| !a.status.is_terminal());
        let already_owned = live.is_some_and(|a| a.worker_id == worker.id);
        if !already_owned {
            let held = count_live_for_worker(tx, worker.id)?;
            if held >= worker.capacity {
                return Err(EngineError::Validation(format!(
                    "worker {} has no free slot ({} of {})",
                    worker.id, held, worker.capacity
                )));
            }
        }

        let id = if let Some(existing) = live.or(rows.first()) {
            let changed = tx.execute(
                "UPDATE assignments SET worker_id = ?1, status = 'assigned', assigned_at = ?2,
                        started_at = NULL, waiting_at = NULL, completed_at = NULL, cancelled_at = NULL,
                        last_status_update_at = ?2
                 WHERE id = ?3",
                params![worker.id, now, existing.id],
            );
            match changed {
                Ok(_) => existing.id,
                Err(e) if is_constraint_violation(&e) => {
                    return Err(EngineError::Validation(format!("order {order_number} was claimed concurrently")));
                }
                Err(e) => return Err(EngineError::Database(anyhow::Error::new(e))),
            }
        } else {
            let history = query_history(
                tx,
                "WHERE merchant_id = ?1 AND order_number = ?2 ORDER BY finished_at DESC, id DESC LIMIT 1",
                params![worker.merchant_id, order_number],
            )?;
            let record = history.into_iter().next().ok_or_else(|| EngineError::OrderNotFound {
                order_number: order_number.to_string(),
            })?;
            let snapshot = serde_json::to_string(&record.snapshot)
                .map_err(|e| EngineError::Database(anyhow::Error::new(e)))?;
            let inserted = tx.execute(
                "INSERT INTO assignments (worker_id, merchant_id, order_id, order_number, snapshot, status,
                                          upstream_status, assigned_at, last_status_update_at, notes)
                 VALUES (?1, ?2, ?3, ?4, ?5, 'assigned', ?6, ?7, ?7, ?8)",
                params![
                    worker.id,
                    record.merchant_id,
                    record.order_id,
                    record.order_number,
                    snapshot,
                    record.final_upstream_status,
                    now,
                    record.notes
                ],
            );
            match inserted {
                Ok(_) => tx.last_insert_rowid(),
                Err(e) if is_constraint_violation(&e) => {
                    return Err(EngineError::Validation(format!("order {order_number} was claimed concurrently")));
                }
                Err(e) => return Err(EngineError::Database(anyhow::Error::new(e))),
            }
        };

        let reopened = fetch_assignment(tx, id)?.ok_or(EngineError::AssignmentNotFound { id })?;
        tracing::info!(assignment_id = id, worker_id = worker.id, order_number, "order reopened");
        Ok(reopened)
    })
}
