//! Read-path reconciliation of a worker's live assignments against upstream.

use std::time::Duration;

use chrono::{DateTime, Utc};

use super::archiver;
use super::db::DbHandle;
use super::eligibility::EligibilityPolicy;
use super::extract::RemoteOrder;
use super::gateway::{GatewayError, OrderStatusGateway};
use super::lifecycle::MirrorRules;
use super::models::{ActiveAssignments, Assignment};
use crate::errors::EngineError;

#[derive(Clone)]
pub struct Revalidator {
    db: DbHandle,
    gateway: OrderStatusGateway,
    eligibility: EligibilityPolicy,
    mirror: MirrorRules,
    request_deadline: Duration,
    auto_complete_on_label_presence: bool,
}

enum Verdict {
    Keep(Assignment),
    Stale(Assignment),
    Retired(i64),
    AutoCompleted(i64),
    /// The row left the live set while we were looking at it.
    Gone,
}

impl Revalidator {
    pub fn new(
        db: DbHandle,
        gateway: OrderStatusGateway,
        eligibility: EligibilityPolicy,
        mirror: MirrorRules,
        request_deadline: Duration,
        auto_complete_on_label_presence: bool,
    ) -> Self {
        Self {
            db,
            gateway,
            eligibility,
            mirror,
            request_deadline,
            auto_complete_on_label_presence,
        }
    }

    /// Whether the upstream order is still one this worker should hold.
    /// An upstream status equal to what we mirrored for the local status
    /// counts, so our own writes never retire a row.
    fn is_consistent(&self, assignment: &Assignment, order: &RemoteOrder) -> bool {
        self.eligibility.is_eligible(&order.status, order.sub_status.as_deref())
            || self
                .mirror
                .target_for(assignment.status)
                .is_some_and(|mirrored| mirrored.eq_ignore_ascii_case(&order.status))
    }

    pub async fn list_active(&self, worker_id: i64, now: DateTime<Utc>) -> Result<ActiveAssignments, EngineError> {
        let rows = self
            .db
            .call(move |db| {
                db.get_worker(worker_id)?
                    .ok_or(EngineError::WorkerNotFound { id: worker_id })?;
                db.list_live_assignments(worker_id)
            })
            .await?;

        let deadline = tokio::time::Instant::now() + self.request_deadline;
        let verdicts =
            futures::future::join_all(rows.into_iter().map(|a| self.revalidate_one(a, deadline, now))).await;

        let mut out = ActiveAssignments::default();
        for verdict in verdicts {
            match verdict? {
                Verdict::Keep(a) => out.assignments.push(a),
                Verdict::Stale(a) => {
                    out.stale.push(a.id);
                    out.assignments.push(a);
                }
                Verdict::Retired(id) => out.retired.push(id),
                Verdict::AutoCompleted(id) => out.auto_completed.push(id),
                Verdict::Gone => {}
            }
        }
        Ok(out)
    }

    async fn revalidate_one(
        &self,
        assignment: Assignment,
        deadline: tokio::time::Instant,
        now: DateTime<Utc>,
    ) -> Result<Verdict, EngineError> {
        let fetch = self.gateway.fetch_order(assignment.merchant_id, &assignment.order_id);
        let id = assignment.id;
        let order = match tokio::time::timeout_at(deadline, fetch).await {
            Ok(Ok(order)) => order,
            Ok(Err(GatewayError::NotFound { .. })) => {
                let deleted = self.db.call(move |db| db.delete_live_assignment(id)).await?;
                tracing::info!(
                    assignment_id = id,
                    order_id = %assignment.order_id,
                    "retired assignment whose order no longer exists upstream"
                );
                return Ok(if deleted { Verdict::Retired(id) } else { Verdict::Gone });
            }
            Ok(Err(err)) => {
                tracing::warn!(assignment_id = assignment.id, error = %err, "revalidation fetch failed, serving cached row");
                return Ok(Verdict::Stale(assignment));
            }
            Err(_) => {
                tracing::warn!(assignment_id = assignment.id, "revalidation fetch hit the request deadline");
                return Ok(Verdict::Stale(assignment));
            }
        };

        if !self.is_consistent(&assignment, &order) {
            let deleted = self.db.call(move |db| db.delete_live_assignment(id)).await?;
            tracing::info!(
                assignment_id = id,
                order_id = %assignment.order_id,
                upstream_status = %order.status,
                local_status = %assignment.status,
                "retired assignment whose order drifted upstream"
            );
            return Ok(if deleted { Verdict::Retired(id) } else { Verdict::Gone });
        }

        let order = match assignment.snapshot.get("items") {
            Some(items) => order.with_items(items.clone()),
            None => order,
        };
        let auto_complete = self.auto_complete_on_label_presence && order.has_shipping_label;
        let refreshed = self
            .db
            .call(move |db| {
                let refreshed =
                    db.refresh_snapshot(id, &order.payload, &order.status, order.sub_status.as_deref())?;
                if refreshed.is_some() && auto_complete {
                    archiver::archive(db, id, now)?;
                }
                Ok(refreshed)
            })
            .await?;
        Ok(match refreshed {
            Some(_) if auto_complete => {
                tracing::info!(assignment_id = id, "shipping label present upstream, assignment auto-completed");
                Verdict::AutoCompleted(id)
            }
            Some(updated) => Verdict::Keep(updated),
            None => Verdict::Gone,
        })
    }
}
