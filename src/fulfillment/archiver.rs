//! Completion path: turns a finished assignment into an immutable history row.

use chrono::{DateTime, Utc};
use rusqlite::params;

use super::db::{FulfillmentDb, NewHistory, fetch_assignment, fetch_worker, insert_history, query_history};
use super::models::{AssignmentStatus, HistoryRecord};
use crate::errors::EngineError;

#[derive(Debug, Clone, PartialEq)]
pub enum ArchiveOutcome {
    Archived(HistoryRecord),
    /// The assignment was already completed; its existing record is returned.
    AlreadyArchived(HistoryRecord),
}

impl ArchiveOutcome {
    pub fn record(&self) -> &HistoryRecord {
        match self {
            Self::Archived(r) | Self::AlreadyArchived(r) => r,
        }
    }

    pub fn into_record(self) -> HistoryRecord {
        match self {
            Self::Archived(r) | Self::AlreadyArchived(r) => r,
        }
    }
}

/// Whole minutes from `start` to `now`, floored. `None` without a start or
/// when the clock reads earlier than the start.
pub fn duration_minutes(start: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Option<i64> {
    let elapsed = now.signed_duration_since(start?);
    if elapsed < chrono::Duration::zero() {
        return None;
    }
    Some(elapsed.num_minutes())
}

/// Archive one assignment. The history insert and the status flip share one
/// `BEGIN IMMEDIATE` transaction, so a retry after any failure sees either
/// both or neither.
pub fn archive(db: &FulfillmentDb, assignment_id: i64, now: DateTime<Utc>) -> Result<ArchiveOutcome, EngineError> {
    db.immediate(|tx| {
        let assignment =
            fetch_assignment(tx, assignment_id)?.ok_or(EngineError::AssignmentNotFound { id: assignment_id })?;

        match assignment.status {
            AssignmentStatus::Removed => {
                return Err(EngineError::Validation(format!(
                    "assignment {assignment_id} was removed and cannot be completed"
                ))
                .into());
            }
            AssignmentStatus::Completed => {
                let existing = query_history(
                    tx,
                    "WHERE assignment_id = ?1 AND assigned_at = ?2 ORDER BY id DESC LIMIT 1",
                    params![assignment_id, assignment.assigned_at],
                )?;
                if let Some(record) = existing.into_iter().next() {
                    return Ok(ArchiveOutcome::AlreadyArchived(record));
                }
                tracing::warn!(assignment_id, "completed assignment has no history row, backfilling");
            }
            _ => {}
        }

        let worker_name = fetch_worker(tx, assignment.worker_id)?
            .map(|w| w.name)
            .unwrap_or_default();
        let finished_at = assignment.completed_at.unwrap_or(now);
        let history_id = insert_history(
            tx,
            &NewHistory {
                assignment: &assignment,
                worker_name: &worker_name,
                finished_at,
                duration_minutes: duration_minutes(assignment.started_at.or(Some(assignment.assigned_at)), finished_at),
            },
        )?;

        if assignment.status != AssignmentStatus::Completed {
            tx.execute(
                "UPDATE assignments SET status = 'completed', completed_at = ?1, last_status_update_at = ?1
                 WHERE id = ?2 AND status = ?3",
                params![finished_at, assignment_id, assignment.status.as_str()],
            )?;
        }

        let record = query_history(tx, "WHERE id = ?1", params![history_id])?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("history row {history_id} vanished inside its transaction"))?;
        Ok(ArchiveOutcome::Archived(record))
    })
    .map_err(|err| match err.downcast::<EngineError>() {
        Ok(typed) => typed,
        Err(source) => EngineError::DataIntegrity { assignment_id, source },
    })
}
