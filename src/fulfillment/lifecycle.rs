//! Lifecycle manager: guarded status transitions with upstream mirroring.
//!
//! Each local status maps to an optional upstream status and a requirement.
//! The mirror call happens before the local write; a failed `required` mirror
//! leaves the row untouched and surfaces as [`EngineError::Blocked`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::archiver::{self, ArchiveOutcome};
use super::db::DbHandle;
use super::gateway::OrderStatusGateway;
use super::models::{Actor, Assignment, AssignmentStatus, HistoryRecord, MirrorMode};
use crate::errors::EngineError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MirrorRequirement {
    Required,
    #[default]
    BestEffort,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct MirrorRule {
    /// Upstream status slug to set; `None` means the transition is local only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default)]
    pub mode: MirrorRequirement,
}

impl MirrorRule {
    fn best_effort(target: &str) -> Self {
        Self {
            target: Some(target.to_string()),
            mode: MirrorRequirement::BestEffort,
        }
    }
}

fn rule_assigned() -> MirrorRule {
    MirrorRule::best_effort("in_progress")
}
fn rule_preparing() -> MirrorRule {
    MirrorRule::best_effort("in_progress")
}
fn rule_shipped() -> MirrorRule {
    MirrorRule {
        target: Some("shipped".to_string()),
        mode: MirrorRequirement::Required,
    }
}
fn rule_completed() -> MirrorRule {
    MirrorRule::best_effort("completed")
}

/// Per-status mirror table, read from `[lifecycle.mirror.<status>]`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MirrorRules {
    #[serde(default = "rule_assigned")]
    pub assigned: MirrorRule,
    #[serde(default = "rule_preparing")]
    pub preparing: MirrorRule,
    #[serde(default)]
    pub waiting: MirrorRule,
    #[serde(default = "rule_shipped")]
    pub shipped: MirrorRule,
    #[serde(default = "rule_completed")]
    pub completed: MirrorRule,
    #[serde(default)]
    pub removed: MirrorRule,
}

impl Default for MirrorRules {
    fn default() -> Self {
        Self {
            assigned: rule_assigned(),
            preparing: rule_preparing(),
            waiting: MirrorRule::default(),
            shipped: rule_shipped(),
            completed: rule_completed(),
            removed: MirrorRule::default(),
        }
    }
}

impl MirrorRules {
    pub fn rule_for(&self, status: AssignmentStatus) -> &MirrorRule {
        match status {
            AssignmentStatus::Assigned => &self.assigned,
            AssignmentStatus::Preparing => &self.preparing,
            AssignmentStatus::Waiting => &self.waiting,
            AssignmentStatus::Shipped => &self.shipped,
            AssignmentStatus::Completed => &self.completed,
            AssignmentStatus::Removed => &self.removed,
        }
    }

    /// The upstream status this system writes when entering `status`.
    pub fn target_for(&self, status: AssignmentStatus) -> Option<&str> {
        self.rule_for(status).target.as_deref()
    }
}

/// Reject the request before any mutation when the actor may not make it.
pub fn authorize(actor: Actor, assignment: &Assignment, target: Option<AssignmentStatus>) -> Result<(), EngineError> {
    match actor {
        Actor::Supervisor => Ok(()),
        Actor::Preparer { worker_id } => {
            if assignment.worker_id != worker_id {
                return Err(EngineError::Forbidden(format!(
                    "assignment {} belongs to another worker",
                    assignment.id
                )));
            }
            if target == Some(AssignmentStatus::Removed) {
                return Err(EngineError::Forbidden(
                    "only a supervisor can remove an assignment".to_string(),
                ));
            }
            Ok(())
        }
    }
}

#[derive(Clone)]
pub struct LifecycleManager {
    db: DbHandle,
    gateway: OrderStatusGateway,
    rules: MirrorRules,
}

impl LifecycleManager {
    pub fn new(db: DbHandle, gateway: OrderStatusGateway, rules: MirrorRules) -> Self {
        Self { db, gateway, rules }
    }

    pub fn rules(&self) -> &MirrorRules {
        &self.rules
    }

    async fn load(&self, assignment_id: i64) -> Result<Assignment, EngineError> {
        self.db
            .call(move |db| db.get_assignment(assignment_id))
            .await?
            .ok_or(EngineError::AssignmentNotFound { id: assignment_id })
    }

    /// Validate the edge and run the mirror. Returns the upstream status that
    /// was written, if any.
    async fn prepare(
        &self,
        assignment: &Assignment,
        target: AssignmentStatus,
        mirror: MirrorMode,
    ) -> Result<Option<String>, EngineError> {
        if assignment.status.is_terminal() {
            return Err(EngineError::Validation(format!(
                "assignment {} is {} and accepts no further transitions",
                assignment.id, assignment.status
            )));
        }
        if !assignment.status.can_transition_to(target) {
            return Err(EngineError::Validation(format!(
                "cannot move assignment {} from {} to {}",
                assignment.id, assignment.status, target
            )));
        }
        if mirror == MirrorMode::Skip {
            return Ok(None);
        }
        let rule = self.rules.rule_for(target);
        let Some(upstream) = rule.target.as_deref() else {
            return Ok(None);
        };
        match self
            .gateway
            .set_order_status(assignment.merchant_id, &assignment.order_id, upstream)
            .await
        {
            Ok(()) => Ok(Some(upstream.to_string())),
            Err(err) if rule.mode == MirrorRequirement::Required => {
                tracing::warn!(
                    assignment_id = assignment.id,
                    order_id = %assignment.order_id,
                    target = %target,
                    error = %err,
                    "required upstream mirror failed, transition blocked"
                );
                Err(EngineError::Blocked {
                    target,
                    reason: err.to_string(),
                })
            }
            Err(err) => {
                tracing::warn!(
                    assignment_id = assignment.id,
                    order_id = %assignment.order_id,
                    target = %target,
                    error = %err,
                    "best-effort upstream mirror failed, continuing locally"
                );
                Ok(None)
            }
        }
    }

    /// Move an assignment to `target`. Same-status requests return the row
    /// unchanged; `completed` goes through the archiver.
    pub async fn advance(
        &self,
        actor: Actor,
        assignment_id: i64,
        target: AssignmentStatus,
        mirror: MirrorMode,
        now: DateTime<Utc>,
    ) -> Result<Assignment, EngineError> {
        let assignment = self.load(assignment_id).await?;
        authorize(actor, &assignment, Some(target))?;
        if assignment.status == target {
            return Ok(assignment);
        }
        if target == AssignmentStatus::Completed {
            self.finish(assignment, mirror, now).await?;
            return self.load(assignment_id).await;
        }

        let from = assignment.status;
        let mirrored = self.prepare(&assignment, target, mirror).await?;
        let updated = self
            .db
            .call(move |db| db.apply_transition(assignment_id, from, target, mirrored.as_deref(), now))
            .await?;
        match updated {
            Some(updated) => {
                tracing::info!(assignment_id, from = %from, to = %target, "assignment status changed");
                Ok(updated)
            }
            None => Err(EngineError::Validation(format!(
                "assignment {assignment_id} changed concurrently; reload and retry"
            ))),
        }
    }

    /// Complete an assignment and return its history record. Completing an
    /// already completed assignment returns the existing record.
    pub async fn complete(
        &self,
        actor: Actor,
        assignment_id: i64,
        mirror: MirrorMode,
        now: DateTime<Utc>,
    ) -> Result<HistoryRecord, EngineError> {
        let assignment = self.load(assignment_id).await?;
        authorize(actor, &assignment, Some(AssignmentStatus::Completed))?;
        self.finish(assignment, mirror, now).await
    }

    async fn finish(
        &self,
        assignment: Assignment,
        mirror: MirrorMode,
        now: DateTime<Utc>,
    ) -> Result<HistoryRecord, EngineError> {
        let assignment_id = assignment.id;
        let mirrored = if assignment.status == AssignmentStatus::Completed {
            None
        } else {
            self.prepare(&assignment, AssignmentStatus::Completed, mirror).await?
        };
        let outcome = self
            .db
            .call(move |db| {
                if let Some(status) = &mirrored {
                    db.set_upstream_status(assignment_id, status)?;
                }
                Ok(archiver::archive(db, assignment_id, now)?)
            })
            .await?;
        if let ArchiveOutcome::Archived(record) = &outcome {
            tracing::info!(
                assignment_id,
                history_id = record.id,
                duration_minutes = ?record.duration_minutes,
                "assignment completed and archived"
            );
        }
        Ok(outcome.into_record())
    }

    /// Append a timestamped line to the assignment's notes and, when asked,
    /// to the upstream order (best effort).
    pub async fn add_note(
        &self,
        actor: Actor,
        assignment_id: i64,
        text: &str,
        push_upstream: bool,
        now: DateTime<Utc>,
    ) -> Result<Assignment, EngineError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(EngineError::Validation("note text is empty".to_string()));
        }
        let assignment = self.load(assignment_id).await?;
        authorize(actor, &assignment, None)?;

        let line = format!("[{}] {}", now.format("%Y-%m-%d %H:%M"), text);
        let local_line = line.clone();
        let updated = self
            .db
            .call(move |db| db.append_note(assignment_id, &local_line))
            .await?
            .ok_or(EngineError::AssignmentNotFound { id: assignment_id })?;

        if push_upstream
            && let Err(err) = self
                .gateway
                .append_note(assignment.merchant_id, &assignment.order_id, &line)
                .await
        {
            tracing::warn!(assignment_id, error = %err, "failed to push note upstream");
        }
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::fulfillment::db::{ClaimInsert, FulfillmentDb};
    use crate::fulfillment::gateway::GatewayError;
    use crate::fulfillment::gateway::testing::ScriptedGateway;
    use crate::fulfillment::models::{NewAssignment, NewWorker};
    use chrono::TimeZone;
    use serde_json::json;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, h, m, 0).unwrap()
    }

    struct Fixture {
        fake: Arc<ScriptedGateway>,
        db: DbHandle,
        manager: LifecycleManager,
        worker_id: i64,
        other_worker_id: i64,
        assignment_id: i64,
    }

    fn fixture() -> Fixture {
        let fake = Arc::new(ScriptedGateway::new());
        fake.put_order(json!({"id": "100", "status": "under_review"}));
        let db = FulfillmentDb::new_in_memory().unwrap();
        let w = db.create_worker(&NewWorker::preparer("amal", 7), at(8, 0)).unwrap();
        let other = db.create_worker(&NewWorker::preparer("badr", 7), at(8, 0)).unwrap();
        let claim = NewAssignment {
            worker_id: w.id,
            merchant_id: 7,
            order_id: "100".into(),
            order_number: "N-100".into(),
            snapshot: json!({"id": "100"}),
            upstream_status: Some("under_review".into()),
            upstream_sub_status: None,
        };
        let assignment_id = match db.insert_claim(&claim, 1, at(10, 0)).unwrap() {
            ClaimInsert::Inserted(a) => a.id,
            other => panic!("unexpected {other:?}"),
        };
        let db = DbHandle::new(db);
        let gateway = OrderStatusGateway::new(fake.clone(), 50, 5);
        Fixture {
            manager: LifecycleManager::new(db.clone(), gateway, MirrorRules::default()),
            fake,
            db,
            worker_id: w.id,
            other_worker_id: other.id,
            assignment_id,
        }
    }

    fn owner(f: &Fixture) -> Actor {
        Actor::Preparer { worker_id: f.worker_id }
    }

    #[tokio::test]
    async fn test_preparing_mirrors_best_effort_and_sets_started_at() {
        let f = fixture();
        let a = f
            .manager
            .advance(owner(&f), f.assignment_id, AssignmentStatus::Preparing, MirrorMode::Auto, at(10, 5))
            .await
            .unwrap();
        assert_eq!(a.status, AssignmentStatus::Preparing);
        assert_eq!(a.started_at, Some(at(10, 5)));
        assert_eq!(a.upstream_status.as_deref(), Some("in_progress"));
        assert_eq!(f.fake.status_updates(), vec![("100".to_string(), "in_progress".to_string())]);
    }

    #[tokio::test]
    async fn test_best_effort_failure_still_transitions() {
        let f = fixture();
        f.fake.fail_status_updates(GatewayError::Timeout);
        let a = f
            .manager
            .advance(owner(&f), f.assignment_id, AssignmentStatus::Preparing, MirrorMode::Auto, at(10, 5))
            .await
            .unwrap();
        assert_eq!(a.status, AssignmentStatus::Preparing);
        assert_eq!(a.upstream_status.as_deref(), Some("under_review"));
    }

    #[tokio::test]
    async fn test_required_mirror_failure_blocks_and_leaves_row() {
        let f = fixture();
        f.fake.fail_status_updates(GatewayError::Server {
            status: 500,
            body: "down".into(),
        });
        let err = f
            .manager
            .advance(owner(&f), f.assignment_id, AssignmentStatus::Shipped, MirrorMode::Auto, at(10, 5))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Blocked { target: AssignmentStatus::Shipped, .. }));

        let id = f.assignment_id;
        let row = f.db.call(move |db| db.get_assignment(id)).await.unwrap().unwrap();
        assert_eq!(row.status, AssignmentStatus::Assigned);
        assert_eq!(row.last_status_update_at, at(10, 0));
    }

    #[tokio::test]
    async fn test_skip_mirror_makes_no_upstream_call() {
        let f = fixture();
        f.manager
            .advance(owner(&f), f.assignment_id, AssignmentStatus::Shipped, MirrorMode::Skip, at(10, 5))
            .await
            .unwrap();
        assert!(f.fake.status_updates().is_empty());
    }

    #[tokio::test]
    async fn test_same_status_is_noop() {
        let f = fixture();
        let a = f
            .manager
            .advance(owner(&f), f.assignment_id, AssignmentStatus::Assigned, MirrorMode::Auto, at(10, 5))
            .await
            .unwrap();
        assert_eq!(a.last_status_update_at, at(10, 0));
        assert!(f.fake.calls().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_edge_and_terminal_rows_are_rejected() {
        let f = fixture();
        let err = f
            .manager
            .advance(owner(&f), f.assignment_id, AssignmentStatus::Waiting, MirrorMode::Auto, at(10, 5))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));

        f.manager
            .advance(Actor::Supervisor, f.assignment_id, AssignmentStatus::Removed, MirrorMode::Auto, at(10, 6))
            .await
            .unwrap();
        let err = f
            .manager
            .advance(Actor::Supervisor, f.assignment_id, AssignmentStatus::Preparing, MirrorMode::Auto, at(10, 7))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[tokio::test]
    async fn test_authorization() {
        let f = fixture();
        let stranger = Actor::Preparer {
            worker_id: f.other_worker_id,
        };
        let err = f
            .manager
            .advance(stranger, f.assignment_id, AssignmentStatus::Preparing, MirrorMode::Auto, at(10, 5))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Forbidden(_)));

        let err = f
            .manager
            .advance(owner(&f), f.assignment_id, AssignmentStatus::Removed, MirrorMode::Auto, at(10, 5))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Forbidden(_)));
        assert!(f.fake.calls().is_empty());
    }

    #[tokio::test]
    async fn test_removed_sets_cancelled_at_without_mirror() {
        let f = fixture();
        let a = f
            .manager
            .advance(Actor::Supervisor, f.assignment_id, AssignmentStatus::Removed, MirrorMode::Auto, at(10, 9))
            .await
            .unwrap();
        assert_eq!(a.cancelled_at, Some(at(10, 9)));
        assert!(f.fake.status_updates().is_empty());
    }

    #[tokio::test]
    async fn test_complete_records_last_mirrored_status() {
        let f = fixture();
        f.manager
            .advance(owner(&f), f.assignment_id, AssignmentStatus::Preparing, MirrorMode::Auto, at(10, 5))
            .await
            .unwrap();
        let record = f
            .manager
            .complete(owner(&f), f.assignment_id, MirrorMode::Auto, at(10, 35))
            .await
            .unwrap();
        assert_eq!(record.final_upstream_status.as_deref(), Some("completed"));
        assert_eq!(record.duration_minutes, Some(30));

        let again = f
            .manager
            .complete(owner(&f), f.assignment_id, MirrorMode::Auto, at(11, 0))
            .await
            .unwrap();
        assert_eq!(again.id, record.id);
        assert_eq!(f.fake.status_updates().len(), 2);
    }

    #[tokio::test]
    async fn test_advance_to_completed_archives() {
        let f = fixture();
        let a = f
            .manager
            .advance(owner(&f), f.assignment_id, AssignmentStatus::Completed, MirrorMode::Skip, at(10, 20))
            .await
            .unwrap();
        assert_eq!(a.status, AssignmentStatus::Completed);
        assert_eq!(a.completed_at, Some(at(10, 20)));
        let id = f.assignment_id;
        let history = f.db.call(move |db| db.history_for_assignment(id)).await.unwrap();
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn test_add_note_local_and_upstream() {
        let f = fixture();
        let a = f
            .manager
            .add_note(owner(&f), f.assignment_id, "  box damaged  ", true, at(10, 12))
            .await
            .unwrap();
        assert_eq!(a.notes, "[2024-05-01 10:12] box damaged");
        assert_eq!(f.fake.notes(), vec![("100".to_string(), "[2024-05-01 10:12] box damaged".to_string())]);

        let err = f
            .manager
            .add_note(owner(&f), f.assignment_id, "   ", false, at(10, 13))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[test]
    fn test_mirror_rules_parse_partial_toml() {
        let rules: MirrorRules = toml::from_str(
            r#"
            [waiting]
            target = "on_hold"
            mode = "required"
            "#,
        )
        .unwrap();
        assert_eq!(rules.target_for(AssignmentStatus::Waiting), Some("on_hold"));
        assert_eq!(rules.waiting.mode, MirrorRequirement::Required);
        assert_eq!(rules.shipped, rule_shipped());
        assert_eq!(rules.target_for(AssignmentStatus::Removed), None);
    }
}
