//! Narrow extraction layer over upstream order payloads.
//!
//! Upstream orders arrive as loosely-typed JSON whose field names have drifted
//! across API versions. Every read goes through one of the `extract_*`
//! functions below; each documents the ordered list of paths it consults and
//! returns the first non-empty match. Nothing else in the crate indexes into a
//! raw payload.

use std::cmp::Ordering;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Paths consulted for the upstream order id, in priority order.
pub const ORDER_ID_PATHS: &[&str] = &["id", "order_id", "orderId"];

/// Paths consulted for the human-facing order number.
/// Falls back to the order id when none is present.
pub const ORDER_NUMBER_PATHS: &[&str] = &["reference_id", "order_number", "orderNumber", "number"];

/// Paths consulted for the status slug. A bare string under `status` is
/// accepted last, for payloads that predate the status object.
pub const STATUS_PATHS: &[&str] = &["status.slug", "status.code", "order_status", "status"];

/// Paths consulted for the merchant-customized sub-status.
pub const SUB_STATUS_PATHS: &[&str] = &["status.customized.slug", "sub_status", "status.customized.name"];

/// Paths consulted for the creation timestamp.
pub const CREATED_AT_PATHS: &[&str] = &["date.date", "created_at", "createdAt", "date"];

/// Paths consulted for the payment method.
pub const PAYMENT_METHOD_PATHS: &[&str] = &["payment_method", "payment.method", "paymentMethod"];

/// Paths whose presence indicates a shipping label was already issued.
pub const SHIPPING_LABEL_PATHS: &[&str] = &[
    "shipping.shipment.label.url",
    "shipping.shipment.label",
    "shipment.label_url",
    "label_url",
];

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExtractError {
    #[error("payload has no order id (looked at {0:?})")]
    MissingOrderId(&'static [&'static str]),
    #[error("order {order_id} has no status (looked at {paths:?})")]
    MissingStatus {
        order_id: String,
        paths: &'static [&'static str],
    },
}

/// The fields the engine needs from an upstream order, plus the raw payload
/// kept as an opaque snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RemoteOrder {
    pub id: String,
    pub number: String,
    pub status: String,
    pub sub_status: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub payment_method: Option<String>,
    pub has_shipping_label: bool,
    pub payload: Value,
}

impl RemoteOrder {
    pub fn from_payload(payload: Value) -> Result<Self, ExtractError> {
        let id = extract_order_id(&payload).ok_or(ExtractError::MissingOrderId(ORDER_ID_PATHS))?;
        let status = extract_status(&payload).ok_or_else(|| ExtractError::MissingStatus {
            order_id: id.clone(),
            paths: STATUS_PATHS,
        })?;
        Ok(Self {
            number: extract_order_number(&payload).unwrap_or_else(|| id.clone()),
            sub_status: extract_sub_status(&payload),
            created_at: extract_created_at(&payload),
            payment_method: extract_payment_method(&payload),
            has_shipping_label: extract_has_shipping_label(&payload),
            id,
            status,
            payload,
        })
    }

    /// Attach line items to the snapshot under `items`.
    pub fn with_items(mut self, items: Value) -> Self {
        if let Value::Object(map) = &mut self.payload {
            map.insert("items".to_string(), items);
        } else {
            self.payload = serde_json::json!({ "order": self.payload, "items": items });
        }
        self
    }
}

/// Walk a dotted path (`status.customized.slug`) through nested objects.
fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(value, |current, key| current.get(key))
}

/// Render a scalar as a trimmed string; objects, arrays, nulls and empty
/// strings count as absent.
fn scalar_to_string(value: &Value) -> Option<String> {
    let s = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    if s.is_empty() { None } else { Some(s) }
}

fn first_scalar(value: &Value, paths: &[&str]) -> Option<String> {
    paths
        .iter()
        .filter_map(|path| lookup(value, path))
        .find_map(scalar_to_string)
}

pub fn extract_order_id(payload: &Value) -> Option<String> {
    first_scalar(payload, ORDER_ID_PATHS)
}

pub fn extract_order_number(payload: &Value) -> Option<String> {
    first_scalar(payload, ORDER_NUMBER_PATHS)
}

/// Status slugs are normalized to lowercase.
pub fn extract_status(payload: &Value) -> Option<String> {
    first_scalar(payload, STATUS_PATHS).map(|s| s.to_lowercase())
}

pub fn extract_sub_status(payload: &Value) -> Option<String> {
    first_scalar(payload, SUB_STATUS_PATHS).map(|s| s.to_lowercase())
}

pub fn extract_created_at(payload: &Value) -> Option<DateTime<Utc>> {
    CREATED_AT_PATHS
        .iter()
        .filter_map(|path| lookup(payload, path))
        .filter_map(scalar_to_string)
        .find_map(|raw| parse_timestamp(&raw))
}

pub fn extract_payment_method(payload: &Value) -> Option<String> {
    first_scalar(payload, PAYMENT_METHOD_PATHS).map(|s| s.to_lowercase())
}

/// A label counts as present when any label path holds a non-empty string or
/// a non-empty object.
pub fn extract_has_shipping_label(payload: &Value) -> bool {
    SHIPPING_LABEL_PATHS
        .iter()
        .filter_map(|path| lookup(payload, path))
        .any(|v| match v {
            Value::String(s) => !s.trim().is_empty(),
            Value::Object(map) => !map.is_empty(),
            _ => false,
        })
}

/// Accepts RFC 3339, or naive `YYYY-MM-DD HH:MM:SS[.ffffff]` interpreted as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// Compare upstream ids numerically when both parse as integers, otherwise
/// lexicographically.
pub fn compare_order_ids(a: &str, b: &str) -> Ordering {
    match (a.parse::<i128>(), b.parse::<i128>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        _ => a.cmp(b),
    }
}

/// FIFO queue order: oldest creation time first, unknown times last, ties by id.
pub fn fifo_order(a: &RemoteOrder, b: &RemoteOrder) -> Ordering {
    let by_time = match (a.created_at, b.created_at) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    by_time.then_with(|| compare_order_ids(&a.id, &b.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_order_id_prefers_id_over_legacy_fields() {
        let payload = json!({"id": 42, "order_id": "99"});
        assert_eq!(extract_order_id(&payload), Some("42".to_string()));

        let legacy = json!({"orderId": "abc-7"});
        assert_eq!(extract_order_id(&legacy), Some("abc-7".to_string()));
    }

    #[test]
    fn test_empty_strings_fall_through_to_next_path() {
        let payload = json!({"id": "  ", "order_id": 17});
        assert_eq!(extract_order_id(&payload), Some("17".to_string()));
    }

    #[test]
    fn test_status_object_and_bare_string() {
        let modern = json!({"status": {"slug": "Under_Review", "customized": {"slug": "payment_review"}}});
        assert_eq!(extract_status(&modern), Some("under_review".to_string()));
        assert_eq!(extract_sub_status(&modern), Some("payment_review".to_string()));

        let legacy = json!({"status": "in_progress"});
        assert_eq!(extract_status(&legacy), Some("in_progress".to_string()));
        assert_eq!(extract_sub_status(&legacy), None);
    }

    #[test]
    fn test_created_at_formats() {
        let naive = json!({"date": {"date": "2024-03-01 10:05:00.000000", "timezone": "UTC"}});
        assert_eq!(
            extract_created_at(&naive),
            Some(Utc.with_ymd_and_hms(2024, 3, 1, 10, 5, 0).unwrap())
        );

        let rfc = json!({"created_at": "2024-03-01T12:00:00+02:00"});
        assert_eq!(
            extract_created_at(&rfc),
            Some(Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap())
        );

        let garbage = json!({"created_at": "yesterday"});
        assert_eq!(extract_created_at(&garbage), None);
    }

    #[test]
    fn test_shipping_label_presence() {
        assert!(extract_has_shipping_label(
            &json!({"shipping": {"shipment": {"label": {"url": "https://labels/1.pdf"}}}})
        ));
        assert!(extract_has_shipping_label(&json!({"label_url": "https://labels/2.pdf"})));
        assert!(!extract_has_shipping_label(&json!({"shipping": {"shipment": {"label": null}}})));
        assert!(!extract_has_shipping_label(&json!({"label_url": ""})));
    }

    #[test]
    fn test_from_payload_requires_id_and_status() {
        let err = RemoteOrder::from_payload(json!({"status": "under_review"})).unwrap_err();
        assert!(matches!(err, ExtractError::MissingOrderId(_)));

        let err = RemoteOrder::from_payload(json!({"id": 5})).unwrap_err();
        assert!(matches!(err, ExtractError::MissingStatus { ref order_id, .. } if order_id == "5"));
    }

    #[test]
    fn test_from_payload_number_falls_back_to_id() {
        let order = RemoteOrder::from_payload(json!({"id": 5, "status": "under_review"})).unwrap();
        assert_eq!(order.number, "5");

        let order = RemoteOrder::from_payload(
            json!({"id": 5, "reference_id": 100234, "status": "under_review", "payment_method": "COD"}),
        )
        .unwrap();
        assert_eq!(order.number, "100234");
        assert_eq!(order.payment_method.as_deref(), Some("cod"));
    }

    #[test]
    fn test_with_items_merges_into_snapshot() {
        let order = RemoteOrder::from_payload(json!({"id": 1, "status": "under_review"}))
            .unwrap()
            .with_items(json!([{"sku": "A-1", "quantity": 2}]));
        assert_eq!(order.payload["items"][0]["sku"], "A-1");
        assert_eq!(order.payload["id"], 1);
    }

    #[test]
    fn test_compare_order_ids_is_numeric_aware() {
        assert_eq!(compare_order_ids("9", "10"), Ordering::Less);
        assert_eq!(compare_order_ids("b", "a"), Ordering::Greater);
    }

    #[test]
    fn test_fifo_order_oldest_first_then_id() {
        let mk = |id: &str, created: Option<&str>| {
            let mut payload = json!({"id": id, "status": "under_review"});
            if let Some(c) = created {
                payload["created_at"] = json!(c);
            }
            RemoteOrder::from_payload(payload).unwrap()
        };
        let mut orders = vec![
            mk("3", None),
            mk("20", Some("2024-01-01T10:05:00Z")),
            mk("11", Some("2024-01-01T10:00:00Z")),
            mk("10", Some("2024-01-01T10:00:00Z")),
        ];
        orders.sort_by(fifo_order);
        let ids: Vec<&str> = orders.iter().map(|o| o.id.as_str()).collect();
        assert_eq!(ids, vec!["10", "11", "20", "3"]);
    }
}
