//! Allocator: hands an idle worker the oldest eligible order nobody holds.

use chrono::{DateTime, Utc};

use super::db::{ClaimInsert, DbHandle};
use super::eligibility::EligibilityPolicy;
use super::gateway::OrderStatusGateway;
use super::lifecycle::MirrorRule;
use super::models::{Assignment, ClaimOutcome, NewAssignment, NoWorkReason, Worker};
use crate::errors::EngineError;

#[derive(Clone)]
pub struct Allocator {
    db: DbHandle,
    gateway: OrderStatusGateway,
    eligibility: EligibilityPolicy,
    queue_statuses: Vec<String>,
    claim_mirror: MirrorRule,
}

impl Allocator {
    pub fn new(
        db: DbHandle,
        gateway: OrderStatusGateway,
        eligibility: EligibilityPolicy,
        queue_statuses: Vec<String>,
        claim_mirror: MirrorRule,
    ) -> Self {
        Self {
            db,
            gateway,
            eligibility,
            queue_statuses,
            claim_mirror,
        }
    }

    pub async fn claim_next_order(&self, worker_id: i64, now: DateTime<Utc>) -> Result<ClaimOutcome, EngineError> {
        let (worker, held) = self
            .db
            .call(move |db| {
                let worker = db
                    .get_worker(worker_id)?
                    .ok_or(EngineError::WorkerNotFound { id: worker_id })?;
                let held = db.count_live_assignments(worker_id)?;
                Ok((worker, held))
            })
            .await?;
        if !worker.active {
            return Err(EngineError::Validation(format!("worker {worker_id} is inactive")));
        }
        if held >= worker.capacity {
            tracing::debug!(worker_id, held, capacity = worker.capacity, "worker slot occupied");
            return Ok(ClaimOutcome::NoWork {
                reason: NoWorkReason::SlotOccupied,
            });
        }

        let filters = worker.policy.status_filters(&self.queue_statuses);
        let listing = self.gateway.list_eligible_orders(worker.merchant_id, &filters).await?;
        if !listing.failed_filters.is_empty() {
            tracing::warn!(worker_id, failed = ?listing.failed_filters, "claiming from a partial order listing");
        }

        let merchant_id = worker.merchant_id;
        let taken = self.db.call(move |db| db.live_order_ids(merchant_id)).await?;
        let candidate = listing.orders.into_iter().find(|order| {
            !taken.contains(&order.id)
                && self.eligibility.is_eligible(&order.status, order.sub_status.as_deref())
                && worker.policy.accepts_payment_method(order.payment_method.as_deref())
        });
        let Some(candidate) = candidate else {
            tracing::debug!(worker_id, policy = worker.policy.kind(), "no eligible order waiting");
            return Ok(ClaimOutcome::NoWork {
                reason: NoWorkReason::QueueEmpty,
            });
        };

        let detail = self.gateway.fetch_order_detail(merchant_id, &candidate.id).await?;
        let claim = NewAssignment {
            worker_id,
            merchant_id,
            order_id: detail.id.clone(),
            order_number: detail.number.clone(),
            upstream_status: Some(detail.status.clone()),
            upstream_sub_status: detail.sub_status.clone(),
            snapshot: detail.payload,
        };
        let capacity = worker.capacity;
        let inserted = self
            .db
            .call(move |db| db.insert_claim(&claim, capacity, now))
            .await?;
        let assignment = match inserted {
            ClaimInsert::Inserted(assignment) => assignment,
            ClaimInsert::SlotTaken | ClaimInsert::OrderTaken => {
                tracing::info!(worker_id, order_id = %candidate.id, "lost claim race");
                return Ok(ClaimOutcome::NoWork {
                    reason: NoWorkReason::LostRace,
                });
            }
        };
        tracing::info!(
            worker_id,
            assignment_id = assignment.id,
            order_id = %assignment.order_id,
            order_number = %assignment.order_number,
            "order claimed"
        );

        let assignment = self.mirror_claim(&worker, assignment).await;
        Ok(ClaimOutcome::Claimed { assignment })
    }

    /// Tell upstream the order is taken. Failures never undo the claim.
    async fn mirror_claim(&self, worker: &Worker, mut assignment: Assignment) -> Assignment {
        if let Some(target) = self.claim_mirror.target.clone() {
            match self
                .gateway
                .set_order_status(assignment.merchant_id, &assignment.order_id, &target)
                .await
            {
                Ok(()) => {
                    let id = assignment.id;
                    let status = target.clone();
                    match self.db.call(move |db| db.set_upstream_status(id, &status)).await {
                        Ok(()) => assignment.upstream_status = Some(target),
                        Err(e) => tracing::warn!(assignment_id = id, error = %e, "failed to cache mirrored status"),
                    }
                }
                Err(e) => tracing::warn!(
                    assignment_id = assignment.id,
                    order_id = %assignment.order_id,
                    error = %e,
                    "failed to mirror claim upstream"
                ),
            }
        }

        let note = format!("Claimed for preparation by {}", worker.name);
        if let Err(e) = self
            .gateway
            .append_note(assignment.merchant_id, &assignment.order_id, &note)
            .await
        {
            tracing::warn!(assignment_id = assignment.id, error = %e, "failed to append claim note upstream");
        }
        assignment
    }
}
