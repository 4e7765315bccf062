use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WorkerRole {
    Preparer,
    Supervisor,
}

impl WorkerRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Preparer => "preparer",
            Self::Supervisor => "supervisor",
        }
    }
}

impl std::fmt::Display for WorkerRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkerRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "preparer" => Ok(Self::Preparer),
            "supervisor" => Ok(Self::Supervisor),
            _ => Err(format!("Invalid worker role: {}", s)),
        }
    }
}

/// How the allocator picks candidates for a worker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum AllocationPolicy {
    /// Oldest order matching the queue's default status filters.
    #[default]
    OldestUnfiltered,
    /// Oldest order whose payment method is one of `methods`.
    FilteredByPaymentMethod { methods: Vec<String> },
    /// Oldest order in exactly this upstream status.
    FilteredBySpecificStatus { status: String },
}

impl AllocationPolicy {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::OldestUnfiltered => "oldest-unfiltered",
            Self::FilteredByPaymentMethod { .. } => "filtered-by-payment-method",
            Self::FilteredBySpecificStatus { .. } => "filtered-by-specific-status",
        }
    }

    /// Upstream status filters to list candidates with.
    pub fn status_filters(&self, queue_defaults: &[String]) -> Vec<String> {
        match self {
            Self::FilteredBySpecificStatus { status } => vec![status.trim().to_lowercase()],
            _ => queue_defaults.to_vec(),
        }
    }

    /// Whether an order with this payment method may be handed to the worker.
    pub fn accepts_payment_method(&self, payment_method: Option<&str>) -> bool {
        match self {
            Self::FilteredByPaymentMethod { methods } => payment_method
                .map(|pm| methods.iter().any(|m| m.trim().eq_ignore_ascii_case(pm.trim())))
                .unwrap_or(false),
            _ => true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Worker {
    pub id: i64,
    pub name: String,
    pub merchant_id: i64,
    pub role: WorkerRole,
    pub active: bool,
    pub policy: AllocationPolicy,
    pub capacity: u32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewWorker {
    pub name: String,
    pub merchant_id: i64,
    #[serde(default = "default_role")]
    pub role: WorkerRole,
    #[serde(default)]
    pub policy: AllocationPolicy,
    #[serde(default = "default_capacity")]
    pub capacity: u32,
}

fn default_role() -> WorkerRole {
    WorkerRole::Preparer
}

fn default_capacity() -> u32 {
    1
}

impl NewWorker {
    pub fn preparer(name: &str, merchant_id: i64) -> Self {
        Self {
            name: name.to_string(),
            merchant_id,
            role: WorkerRole::Preparer,
            policy: AllocationPolicy::OldestUnfiltered,
            capacity: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStatus {
    Assigned,
    Preparing,
    Waiting,
    Shipped,
    Completed,
    Removed,
}

impl AssignmentStatus {
    /// Statuses that occupy a worker slot and claim the order.
    pub const NON_TERMINAL: [AssignmentStatus; 4] =
        [Self::Assigned, Self::Preparing, Self::Waiting, Self::Shipped];

    /// Statuses `remove_assignments` leaves untouched.
    pub const NON_REMOVABLE: [AssignmentStatus; 2] = [Self::Completed, Self::Removed];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Assigned => "assigned",
            Self::Preparing => "preparing",
            Self::Waiting => "waiting",
            Self::Shipped => "shipped",
            Self::Completed => "completed",
            Self::Removed => "removed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Removed)
    }

    /// Allowed edges of the lifecycle graph. Same-status requests are handled
    /// by the caller as no-ops and are not edges.
    pub fn can_transition_to(&self, target: AssignmentStatus) -> bool {
        use AssignmentStatus::*;
        match (self, target) {
            (Completed | Removed, _) => false,
            (_, Completed | Removed) => true,
            (Assigned | Preparing | Waiting, Shipped) => true,
            (Assigned, Preparing) | (Preparing, Waiting) | (Waiting, Preparing) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for AssignmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AssignmentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "assigned" => Ok(Self::Assigned),
            "preparing" => Ok(Self::Preparing),
            "waiting" => Ok(Self::Waiting),
            "shipped" => Ok(Self::Shipped),
            "completed" => Ok(Self::Completed),
            // Older rows used "released" for administrative removal.
            "removed" | "released" => Ok(Self::Removed),
            _ => Err(format!("Invalid assignment status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Assignment {
    pub id: i64,
    pub worker_id: i64,
    pub merchant_id: i64,
    pub order_id: String,
    pub order_number: String,
    pub snapshot: serde_json::Value,
    pub status: AssignmentStatus,
    pub upstream_status: Option<String>,
    pub upstream_sub_status: Option<String>,
    pub assigned_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub waiting_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub last_status_update_at: DateTime<Utc>,
    pub notes: String,
}

/// Fields for a fresh claim.
#[derive(Debug, Clone)]
pub struct NewAssignment {
    pub worker_id: i64,
    pub merchant_id: i64,
    pub order_id: String,
    pub order_number: String,
    pub snapshot: serde_json::Value,
    pub upstream_status: Option<String>,
    pub upstream_sub_status: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryRecord {
    pub id: i64,
    pub assignment_id: i64,
    pub worker_id: i64,
    pub worker_name: String,
    pub merchant_id: i64,
    pub order_id: String,
    pub order_number: String,
    pub snapshot: serde_json::Value,
    pub final_status: AssignmentStatus,
    pub assigned_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: DateTime<Utc>,
    pub duration_minutes: Option<i64>,
    pub final_upstream_status: Option<String>,
    pub notes: String,
}

/// Why a claim produced no assignment. None of these are failures.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NoWorkReason {
    /// The worker already holds as many orders as their capacity allows.
    SlotOccupied,
    /// No eligible, unclaimed order is waiting upstream.
    QueueEmpty,
    /// A concurrent claim took the slot or the order first.
    LostRace,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ClaimOutcome {
    Claimed { assignment: Assignment },
    NoWork { reason: NoWorkReason },
}

impl ClaimOutcome {
    pub fn assignment(&self) -> Option<&Assignment> {
        match self {
            Self::Claimed { assignment } => Some(assignment),
            Self::NoWork { .. } => None,
        }
    }
}

/// Result of reading a worker's active assignments through revalidation.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ActiveAssignments {
    pub assignments: Vec<Assignment>,
    /// Deleted because the upstream order left the eligible set.
    pub retired: Vec<i64>,
    /// Completed by the label-presence hook.
    pub auto_completed: Vec<i64>,
    /// Returned from cache because the upstream fetch failed or timed out.
    pub stale: Vec<i64>,
}

/// Who is asking for a lifecycle change. Authentication happens upstream of
/// the engine; this only carries the result.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Actor {
    Preparer { worker_id: i64 },
    Supervisor,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MirrorMode {
    /// Mirror according to the configured rule for the target status.
    #[default]
    Auto,
    /// Purely local bookkeeping.
    Skip,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum RemovalSelector {
    Ids(Vec<i64>),
    OrderIds(Vec<String>),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RemovalReport {
    pub removed: Vec<i64>,
    /// Already completed or removed; left untouched.
    pub skipped: Vec<i64>,
    /// Non-terminal rows for the same orders removed alongside.
    pub siblings: Vec<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ReassignReport {
    pub moved: Vec<i64>,
    /// Missing or terminal ids.
    pub skipped: Vec<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trips_through_str() {
        for status in [
            AssignmentStatus::Assigned,
            AssignmentStatus::Preparing,
            AssignmentStatus::Waiting,
            AssignmentStatus::Shipped,
            AssignmentStatus::Completed,
            AssignmentStatus::Removed,
        ] {
            assert_eq!(status.as_str().parse::<AssignmentStatus>(), Ok(status));
        }
        assert_eq!("released".parse::<AssignmentStatus>(), Ok(AssignmentStatus::Removed));
        assert!("cancelled".parse::<AssignmentStatus>().is_err());
    }

    #[test]
    fn test_lifecycle_edges() {
        use AssignmentStatus::*;
        assert!(Assigned.can_transition_to(Preparing));
        assert!(Preparing.can_transition_to(Waiting));
        assert!(Waiting.can_transition_to(Preparing));
        assert!(Assigned.can_transition_to(Completed));
        assert!(Waiting.can_transition_to(Shipped));
        assert!(Shipped.can_transition_to(Completed));
        assert!(Shipped.can_transition_to(Removed));

        assert!(!Assigned.can_transition_to(Waiting));
        assert!(!Shipped.can_transition_to(Preparing));
        assert!(!Preparing.can_transition_to(Assigned));
        assert!(!Completed.can_transition_to(Removed));
        assert!(!Removed.can_transition_to(Preparing));
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(AssignmentStatus::Completed.is_terminal());
        assert!(AssignmentStatus::Removed.is_terminal());
        assert!(AssignmentStatus::NON_TERMINAL.iter().all(|s| !s.is_terminal()));
    }

    #[test]
    fn test_policy_status_filters() {
        let defaults = vec!["under_review".to_string()];
        assert_eq!(AllocationPolicy::OldestUnfiltered.status_filters(&defaults), defaults);
        let specific = AllocationPolicy::FilteredBySpecificStatus {
            status: " Payment_Pending ".to_string(),
        };
        assert_eq!(specific.status_filters(&defaults), vec!["payment_pending".to_string()]);
    }

    #[test]
    fn test_policy_payment_filter() {
        let policy = AllocationPolicy::FilteredByPaymentMethod {
            methods: vec!["cod".to_string()],
        };
        assert!(policy.accepts_payment_method(Some("COD")));
        assert!(!policy.accepts_payment_method(Some("credit_card")));
        assert!(!policy.accepts_payment_method(None));
        assert!(AllocationPolicy::OldestUnfiltered.accepts_payment_method(None));
    }

    #[test]
    fn test_policy_serde_shape() {
        let policy = AllocationPolicy::FilteredByPaymentMethod {
            methods: vec!["cod".to_string()],
        };
        let json = serde_json::to_value(&policy).unwrap();
        assert_eq!(json["kind"], "filtered-by-payment-method");
        let back: AllocationPolicy = serde_json::from_value(json).unwrap();
        assert_eq!(back, policy);
    }
}
