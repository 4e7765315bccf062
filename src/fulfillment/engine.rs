use std::time::Duration;

use chrono::Utc;

use super::allocator::Allocator;
use super::db::DbHandle;
use super::eligibility::EligibilityPolicy;
use super::gateway::OrderStatusGateway;
use super::lifecycle::{LifecycleManager, MirrorRules};
use super::models::*;
use super::recovery;
use super::revalidator::Revalidator;
use crate::errors::EngineError;

/// Knobs the engine reads from configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    pub queue_statuses: Vec<String>,
    pub eligibility: EligibilityPolicy,
    pub mirror: MirrorRules,
    pub request_deadline: Duration,
    pub auto_complete_on_label_presence: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            // Pre-claim statuses only; a claim moves the order out of this set.
            queue_statuses: vec!["under_review".to_string()],
            eligibility: EligibilityPolicy::default(),
            mirror: MirrorRules::default(),
            request_deadline: Duration::from_secs(8),
            auto_complete_on_label_presence: false,
        }
    }
}

/// Entry point for every fulfillment operation. Cheap to clone; all state
/// lives in the store.
#[derive(Clone)]
pub struct FulfillmentEngine {
    db: DbHandle,
    allocator: Allocator,
    lifecycle: LifecycleManager,
    revalidator: Revalidator,
}

impl FulfillmentEngine {
    pub fn new(db: DbHandle, gateway: OrderStatusGateway, settings: EngineSettings) -> Self {
        let allocator = Allocator::new(
            db.clone(),
            gateway.clone(),
            settings.eligibility.clone(),
            settings.queue_statuses.clone(),
            settings.mirror.assigned.clone(),
        );
        let revalidator = Revalidator::new(
            db.clone(),
            gateway.clone(),
            settings.eligibility,
            settings.mirror.clone(),
            settings.request_deadline,
            settings.auto_complete_on_label_presence,
        );
        let lifecycle = LifecycleManager::new(db.clone(), gateway, settings.mirror);
        Self {
            db,
            allocator,
            lifecycle,
            revalidator,
        }
    }

    pub fn db(&self) -> &DbHandle {
        &self.db
    }

    pub async fn claim_next_order(&self, worker_id: i64) -> Result<ClaimOutcome, EngineError> {
        self.allocator.claim_next_order(worker_id, Utc::now()).await
    }

    pub async fn list_active_assignments(&self, worker_id: i64) -> Result<ActiveAssignments, EngineError> {
        self.revalidator.list_active(worker_id, Utc::now()).await
    }

    pub async fn advance_status(
        &self,
        actor: Actor,
        assignment_id: i64,
        target: AssignmentStatus,
        mirror: MirrorMode,
    ) -> Result<Assignment, EngineError> {
        self.lifecycle
            .advance(actor, assignment_id, target, mirror, Utc::now())
            .await
    }

    pub async fn complete_assignment(&self, actor: Actor, assignment_id: i64) -> Result<HistoryRecord, EngineError> {
        self.lifecycle
            .complete(actor, assignment_id, MirrorMode::Auto, Utc::now())
            .await
    }

    pub async fn add_note(
        &self,
        actor: Actor,
        assignment_id: i64,
        text: &str,
        push_upstream: bool,
    ) -> Result<Assignment, EngineError> {
        self.lifecycle
            .add_note(actor, assignment_id, text, push_upstream, Utc::now())
            .await
    }

    pub async fn reassign(&self, assignment_ids: Vec<i64>, new_worker_id: i64) -> Result<ReassignReport, EngineError> {
        let now = Utc::now();
        Ok(self
            .db
            .call(move |db| Ok(recovery::reassign(db, &assignment_ids, new_worker_id, now)?))
            .await?)
    }

    pub async fn remove_assignments(&self, selector: RemovalSelector) -> Result<RemovalReport, EngineError> {
        let now = Utc::now();
        Ok(self
            .db
            .call(move |db| Ok(recovery::remove_assignments(db, &selector, now)?))
            .await?)
    }

    pub async fn reopen_from_history(&self, order_number: &str, worker_id: i64) -> Result<Assignment, EngineError> {
        let now = Utc::now();
        let order_number = order_number.to_string();
        Ok(self
            .db
            .call(move |db| Ok(recovery::reopen_from_history(db, &order_number, worker_id, now)?))
            .await?)
    }

    /// Most recent history rows for a worker, newest first.
    pub async fn list_history(&self, worker_id: i64, limit: u32) -> Result<Vec<HistoryRecord>, EngineError> {
        Ok(self
            .db
            .call(move |db| {
                db.get_worker(worker_id)?
                    .ok_or(EngineError::WorkerNotFound { id: worker_id })?;
                db.list_history_for_worker(worker_id, limit)
            })
            .await?)
    }

    pub async fn create_worker(&self, worker: NewWorker) -> Result<Worker, EngineError> {
        if worker.name.trim().is_empty() {
            return Err(EngineError::Validation("worker name is empty".to_string()));
        }
        if worker.capacity == 0 {
            return Err(EngineError::Validation("worker capacity must be at least 1".to_string()));
        }
        Ok(self.db.call(move |db| db.create_worker(&worker, Utc::now())).await?)
    }

    pub async fn list_workers(&self, merchant_id: Option<i64>) -> Result<Vec<Worker>, EngineError> {
        Ok(self.db.call(move |db| db.list_workers(merchant_id)).await?)
    }

    pub async fn set_worker_active(&self, worker_id: i64, active: bool) -> Result<Worker, EngineError> {
        Ok(self
            .db
            .call(move |db| {
                db.get_worker(worker_id)?
                    .ok_or(EngineError::WorkerNotFound { id: worker_id })?;
                db.set_worker_active(worker_id, active)
            })
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::fulfillment::db::FulfillmentDb;
    use crate::fulfillment::gateway::testing::ScriptedGateway;
    use serde_json::json;

    fn engine(fake: &Arc<ScriptedGateway>) -> FulfillmentEngine {
        FulfillmentEngine::new(
            DbHandle::new(FulfillmentDb::new_in_memory().unwrap()),
            OrderStatusGateway::new(fake.clone(), 50, 5),
            EngineSettings::default(),
        )
    }

    fn claimed(outcome: ClaimOutcome) -> Assignment {
        match outcome {
            ClaimOutcome::Claimed { assignment } => assignment,
            other => panic!("expected Claimed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_claim_prepare_complete_round() {
        let fake = Arc::new(ScriptedGateway::new());
        fake.put_order(json!({"id": "O1", "reference_id": "1001", "status": "under_review", "created_at": "2024-05-01T10:00:00Z"}));
        fake.put_order(json!({"id": "O2", "reference_id": "1002", "status": "under_review", "created_at": "2024-05-01T10:05:00Z"}));
        let engine = engine(&fake);
        let w = engine.create_worker(NewWorker::preparer("amal", 7)).await.unwrap();
        let me = Actor::Preparer { worker_id: w.id };

        let a = claimed(engine.claim_next_order(w.id).await.unwrap());
        assert_eq!(a.order_number, "1001");
        assert!(matches!(
            engine.claim_next_order(w.id).await.unwrap(),
            ClaimOutcome::NoWork {
                reason: NoWorkReason::SlotOccupied
            }
        ));

        let active = engine.list_active_assignments(w.id).await.unwrap();
        assert_eq!(active.assignments.len(), 1);
        assert!(active.retired.is_empty());

        engine
            .advance_status(me, a.id, AssignmentStatus::Preparing, MirrorMode::Auto)
            .await
            .unwrap();
        let record = engine.complete_assignment(me, a.id).await.unwrap();
        assert_eq!(record.final_upstream_status.as_deref(), Some("completed"));
        assert_eq!(record.order_number, "1001");

        let history = engine.list_history(w.id, 10).await.unwrap();
        assert_eq!(history.len(), 1);

        // Slot is free again: the next oldest order comes out.
        let b = claimed(engine.claim_next_order(w.id).await.unwrap());
        assert_eq!(b.order_number, "1002");
    }

    #[tokio::test]
    async fn test_claimed_order_leaves_the_default_queue_listing() {
        let fake = Arc::new(ScriptedGateway::new());
        fake.put_order(json!({"id": "O1", "status": "under_review"}));
        let engine = engine(&fake);
        let w = engine.create_worker(NewWorker::preparer("amal", 7)).await.unwrap();
        claimed(engine.claim_next_order(w.id).await.unwrap());
        assert_eq!(fake.order("O1").unwrap()["status"]["slug"], "in_progress");

        let listing = OrderStatusGateway::new(fake.clone(), 50, 5)
            .list_eligible_orders(7, &EngineSettings::default().queue_statuses)
            .await
            .unwrap();
        assert!(listing.orders.is_empty());

        // Still held and still consistent on revalidation.
        let active = engine.list_active_assignments(w.id).await.unwrap();
        assert_eq!(active.assignments.len(), 1);
        assert!(active.retired.is_empty());
    }

    #[tokio::test]
    async fn test_drifted_order_disappears_from_active_list() {
        let fake = Arc::new(ScriptedGateway::new());
        fake.put_order(json!({"id": "O1", "status": "under_review"}));
        let engine = engine(&fake);
        let w = engine.create_worker(NewWorker::preparer("amal", 7)).await.unwrap();
        let a = claimed(engine.claim_next_order(w.id).await.unwrap());

        fake.set_status_slug("O1", "canceled");
        let active = engine.list_active_assignments(w.id).await.unwrap();
        assert!(active.assignments.is_empty());
        assert_eq!(active.retired, vec![a.id]);

        // The freed slot can claim again, but nothing eligible is left.
        assert!(matches!(
            engine.claim_next_order(w.id).await.unwrap(),
            ClaimOutcome::NoWork {
                reason: NoWorkReason::QueueEmpty
            }
        ));
    }

    #[tokio::test]
    async fn test_supervisor_removal_and_reopen() {
        let fake = Arc::new(ScriptedGateway::new());
        fake.put_order(json!({"id": "O1", "reference_id": "1001", "status": "under_review"}));
        let engine = engine(&fake);
        let a = engine.create_worker(NewWorker::preparer("amal", 7)).await.unwrap();
        let b = engine.create_worker(NewWorker::preparer("badr", 7)).await.unwrap();
        let x = claimed(engine.claim_next_order(a.id).await.unwrap());

        let report = engine.remove_assignments(RemovalSelector::Ids(vec![x.id])).await.unwrap();
        assert_eq!(report.removed, vec![x.id]);

        let reopened = engine.reopen_from_history("1001", b.id).await.unwrap();
        assert_eq!(reopened.id, x.id);
        assert_eq!(reopened.worker_id, b.id);

        let moved = engine.reassign(vec![x.id], a.id).await.unwrap();
        assert_eq!(moved.moved, vec![x.id]);
    }

    #[tokio::test]
    async fn test_worker_admin() {
        let fake = Arc::new(ScriptedGateway::new());
        let engine = engine(&fake);
        assert!(matches!(
            engine.create_worker(NewWorker::preparer("  ", 7)).await,
            Err(EngineError::Validation(_))
        ));
        let w = engine.create_worker(NewWorker::preparer("amal", 7)).await.unwrap();
        let off = engine.set_worker_active(w.id, false).await.unwrap();
        assert!(!off.active);
        assert_eq!(engine.list_workers(Some(7)).await.unwrap().len(), 1);
        assert!(matches!(
            engine.set_worker_active(77, false).await,
            Err(EngineError::WorkerNotFound { id: 77 })
        ));
        assert!(matches!(
            engine.list_history(77, 5).await,
            Err(EngineError::WorkerNotFound { id: 77 })
        ));
    }
}
