//! Upstream status allow-list for orders still awaiting or under preparation.

use serde::{Deserialize, Serialize};

/// Pure mapping from (status, sub-status) to eligibility.
///
/// An order is eligible when its status is in `statuses` and its sub-status is
/// either absent or in `sub_statuses`. Matching ignores case and surrounding
/// whitespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EligibilityPolicy {
    #[serde(default = "default_statuses")]
    pub statuses: Vec<String>,
    #[serde(default = "default_sub_statuses")]
    pub sub_statuses: Vec<String>,
}

fn default_statuses() -> Vec<String> {
    vec!["under_review".to_string(), "in_progress".to_string()]
}

fn default_sub_statuses() -> Vec<String> {
    ["new", "awaiting_review", "payment_review", "address_review", "preparing"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Default for EligibilityPolicy {
    fn default() -> Self {
        Self {
            statuses: default_statuses(),
            sub_statuses: default_sub_statuses(),
        }
    }
}

fn contains_normalized(list: &[String], value: &str) -> bool {
    let needle = value.trim();
    list.iter().any(|item| item.trim().eq_ignore_ascii_case(needle))
}

impl EligibilityPolicy {
    pub fn is_eligible(&self, status: &str, sub_status: Option<&str>) -> bool {
        if !contains_normalized(&self.statuses, status) {
            return false;
        }
        match sub_status.map(str::trim) {
            None | Some("") => true,
            Some(sub) => contains_normalized(&self.sub_statuses, sub),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy_matrix() {
        let policy = EligibilityPolicy::default();
        let cases: &[(&str, Option<&str>, bool)] = &[
            ("under_review", None, true),
            ("under_review", Some("new"), true),
            ("under_review", Some("payment_review"), true),
            ("under_review", Some("address_review"), true),
            ("in_progress", None, true),
            ("in_progress", Some("preparing"), true),
            ("under_review", Some("on_hold_for_fraud"), false),
            ("shipped", None, false),
            ("delivering", None, false),
            ("delivered", None, false),
            ("completed", None, false),
            ("canceled", None, false),
            ("restored", None, false),
            ("", None, false),
        ];
        for (status, sub, expected) in cases {
            assert_eq!(
                policy.is_eligible(status, *sub),
                *expected,
                "status={status:?} sub={sub:?}"
            );
        }
    }

    #[test]
    fn test_matching_ignores_case_and_whitespace() {
        let policy = EligibilityPolicy::default();
        assert!(policy.is_eligible(" Under_Review ", Some("NEW")));
        assert!(policy.is_eligible("under_review", Some("  ")));
    }

    #[test]
    fn test_custom_allow_list() {
        let policy = EligibilityPolicy {
            statuses: vec!["pending".to_string()],
            sub_statuses: vec![],
        };
        assert!(policy.is_eligible("pending", None));
        assert!(!policy.is_eligible("pending", Some("anything")));
        assert!(!policy.is_eligible("under_review", None));
    }
}
