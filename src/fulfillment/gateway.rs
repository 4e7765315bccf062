//! Upstream order-status API.
//!
//! Layers, innermost first:
//! - [`HttpOrderGateway`]: one HTTP request per call, raw JSON out.
//! - [`RetryingGateway`]: the single retry/backoff/timeout decorator.
//! - [`OrderStatusGateway`]: typed facade used by the engine; pages listings,
//!   de-duplicates, sorts FIFO and extracts [`RemoteOrder`]s.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use super::extract::{RemoteOrder, fifo_order};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GatewayError {
    #[error("connection to upstream failed: {0}")]
    Connect(String),
    #[error("upstream call timed out")]
    Timeout,
    #[error("upstream transport error: {0}")]
    Transport(String),
    #[error("upstream rate limited the request")]
    RateLimited,
    #[error("upstream server error {status}: {body}")]
    Server { status: u16, body: String },
    #[error("upstream rejected the request ({status}): {body}")]
    Rejected { status: u16, body: String },
    #[error("{what} not found upstream")]
    NotFound { what: String },
    #[error("malformed upstream response: {0}")]
    Malformed(String),
    #[error("upstream unavailable after {attempts} attempt(s): {last}")]
    Unavailable {
        attempts: u32,
        last: Box<GatewayError>,
    },
}

impl GatewayError {
    /// Failures where the outcome is unknown or temporary. Anything else is a
    /// definite answer from upstream and is never retried.
    fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Connect(_) | Self::Timeout | Self::Transport(_) | Self::RateLimited | Self::Server { .. }
        )
    }

    /// Failures where upstream certainly did not apply a mutation.
    fn is_unapplied(&self) -> bool {
        matches!(self, Self::Connect(_) | Self::RateLimited)
    }
}

/// One page of raw upstream orders.
#[derive(Debug, Clone, Default)]
pub struct OrderPage {
    pub orders: Vec<Value>,
    pub has_more: bool,
}

/// Raw access to the upstream order system. Implementations make exactly one
/// attempt per call; retry lives in [`RetryingGateway`].
#[async_trait]
pub trait OrderGateway: Send + Sync {
    async fn list_orders_by_status(
        &self,
        merchant_id: i64,
        status: &str,
        page: u32,
        page_size: u32,
    ) -> Result<OrderPage, GatewayError>;

    async fn fetch_order(&self, merchant_id: i64, order_id: &str) -> Result<Value, GatewayError>;

    async fn fetch_order_items(&self, merchant_id: i64, order_id: &str) -> Result<Value, GatewayError>;

    async fn set_order_status(&self, merchant_id: i64, order_id: &str, status: &str) -> Result<(), GatewayError>;

    async fn append_note(&self, merchant_id: i64, order_id: &str, note: &str) -> Result<(), GatewayError>;
}

// ── HTTP implementation ──────────────────────────────────────────────

pub struct HttpOrderGateway {
    client: reqwest::Client,
    base_url: String,
    access_token: Option<String>,
}

/// Listing and detail responses either wrap the payload in `data` or return
/// it bare.
#[derive(Deserialize)]
#[serde(untagged)]
enum Envelope {
    Wrapped { data: Value },
    Bare(Value),
}

impl Envelope {
    fn into_inner(self) -> Value {
        match self {
            Self::Wrapped { data } => data,
            Self::Bare(v) => v,
        }
    }
}

impl HttpOrderGateway {
    pub fn new(base_url: &str, access_token: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            access_token,
        }
    }

    fn order_url(&self, merchant_id: i64, order_id: &str) -> String {
        format!("{}/merchants/{}/orders/{}", self.base_url, merchant_id, order_id)
    }

    fn authorized(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let req = req.header("Accept", "application/json");
        match &self.access_token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn send(&self, req: reqwest::RequestBuilder, what: &str) -> Result<reqwest::Response, GatewayError> {
        let resp = self.authorized(req).send().await.map_err(transport_error)?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(match status.as_u16() {
            404 => GatewayError::NotFound { what: what.to_string() },
            429 => GatewayError::RateLimited,
            code if status.is_server_error() => GatewayError::Server { status: code, body },
            code => GatewayError::Rejected { status: code, body },
        })
    }

    async fn get_json(&self, url: String, what: &str) -> Result<Value, GatewayError> {
        let resp = self.send(self.client.get(url), what).await?;
        let envelope: Envelope = resp
            .json()
            .await
            .map_err(|e| GatewayError::Malformed(e.to_string()))?;
        Ok(envelope.into_inner())
    }
}

fn transport_error(err: reqwest::Error) -> GatewayError {
    if err.is_connect() {
        GatewayError::Connect(err.to_string())
    } else if err.is_timeout() {
        GatewayError::Timeout
    } else {
        GatewayError::Transport(err.to_string())
    }
}

#[async_trait]
impl OrderGateway for HttpOrderGateway {
    async fn list_orders_by_status(
        &self,
        merchant_id: i64,
        status: &str,
        page: u32,
        page_size: u32,
    ) -> Result<OrderPage, GatewayError> {
        let url = format!("{}/merchants/{}/orders", self.base_url, merchant_id);
        let req = self.client.get(url).query(&[
            ("status", status.to_string()),
            ("page", page.to_string()),
            ("per_page", page_size.to_string()),
        ]);
        let resp = self.send(req, "order listing").await?;
        let envelope: Envelope = resp
            .json()
            .await
            .map_err(|e| GatewayError::Malformed(e.to_string()))?;
        match envelope.into_inner() {
            Value::Array(orders) => Ok(OrderPage {
                has_more: orders.len() as u32 >= page_size,
                orders,
            }),
            other => Err(GatewayError::Malformed(format!(
                "expected an order array, got {}",
                type_name(&other)
            ))),
        }
    }

    async fn fetch_order(&self, merchant_id: i64, order_id: &str) -> Result<Value, GatewayError> {
        self.get_json(self.order_url(merchant_id, order_id), &format!("order {order_id}"))
            .await
    }

    async fn fetch_order_items(&self, merchant_id: i64, order_id: &str) -> Result<Value, GatewayError> {
        let url = format!("{}/items", self.order_url(merchant_id, order_id));
        self.get_json(url, &format!("items of order {order_id}")).await
    }

    async fn set_order_status(&self, merchant_id: i64, order_id: &str, status: &str) -> Result<(), GatewayError> {
        let url = format!("{}/status", self.order_url(merchant_id, order_id));
        self.send(self.client.post(url).json(&json!({ "status": status })), &format!("order {order_id}"))
            .await?;
        Ok(())
    }

    async fn append_note(&self, merchant_id: i64, order_id: &str, note: &str) -> Result<(), GatewayError> {
        let url = format!("{}/notes", self.order_url(merchant_id, order_id));
        self.send(self.client.post(url).json(&json!({ "note": note })), &format!("order {order_id}"))
            .await?;
        Ok(())
    }
}

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ── Retry decorator ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
            attempt_timeout: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based): base, 2×base, 4×base, …
    /// capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CallKind {
    Read,
    Mutation,
}

impl CallKind {
    fn may_retry(self, err: &GatewayError) -> bool {
        match self {
            Self::Read => err.is_transient(),
            Self::Mutation => err.is_unapplied(),
        }
    }
}

pub struct RetryingGateway<G> {
    inner: G,
    policy: RetryPolicy,
}

impl<G: OrderGateway> RetryingGateway<G> {
    pub fn new(inner: G, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    async fn run<T, F, Fut>(&self, op: &'static str, kind: CallKind, mut call: F) -> Result<T, GatewayError>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<T, GatewayError>> + Send,
        T: Send,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = match tokio::time::timeout(self.policy.attempt_timeout, call()).await {
                Ok(result) => result,
                Err(_) => Err(GatewayError::Timeout),
            };
            let err = match result {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };
            if !err.is_transient() {
                return Err(err);
            }
            if !kind.may_retry(&err) || attempt >= max_attempts {
                tracing::warn!(op, attempt, error = %err, "upstream call failed, giving up");
                return Err(GatewayError::Unavailable {
                    attempts: attempt,
                    last: Box::new(err),
                });
            }
            let delay = self.policy.delay_for(attempt);
            tracing::debug!(op, attempt, delay_ms = delay.as_millis() as u64, error = %err, "retrying upstream call");
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl<G: OrderGateway> OrderGateway for RetryingGateway<G> {
    async fn list_orders_by_status(
        &self,
        merchant_id: i64,
        status: &str,
        page: u32,
        page_size: u32,
    ) -> Result<OrderPage, GatewayError> {
        self.run("list_orders_by_status", CallKind::Read, move || {
            self.inner.list_orders_by_status(merchant_id, status, page, page_size)
        })
        .await
    }

    async fn fetch_order(&self, merchant_id: i64, order_id: &str) -> Result<Value, GatewayError> {
        self.run("fetch_order", CallKind::Read, move || self.inner.fetch_order(merchant_id, order_id))
            .await
    }

    async fn fetch_order_items(&self, merchant_id: i64, order_id: &str) -> Result<Value, GatewayError> {
        self.run("fetch_order_items", CallKind::Read, move || {
            self.inner.fetch_order_items(merchant_id, order_id)
        })
        .await
    }

    async fn set_order_status(&self, merchant_id: i64, order_id: &str, status: &str) -> Result<(), GatewayError> {
        self.run("set_order_status", CallKind::Mutation, move || {
            self.inner.set_order_status(merchant_id, order_id, status)
        })
        .await
    }

    async fn append_note(&self, merchant_id: i64, order_id: &str, note: &str) -> Result<(), GatewayError> {
        self.run("append_note", CallKind::Mutation, move || {
            self.inner.append_note(merchant_id, order_id, note)
        })
        .await
    }
}

// ── Typed facade ─────────────────────────────────────────────────────

/// Eligible-order listing. `failed_filters` names the status filters whose
/// pages could not all be read; their orders may be missing.
#[derive(Debug, Clone, Default)]
pub struct Listing {
    pub orders: Vec<RemoteOrder>,
    pub failed_filters: Vec<String>,
}

#[derive(Clone)]
pub struct OrderStatusGateway {
    inner: Arc<dyn OrderGateway>,
    page_size: u32,
    max_pages: u32,
}

impl OrderStatusGateway {
    pub fn new(inner: Arc<dyn OrderGateway>, page_size: u32, max_pages: u32) -> Self {
        Self {
            inner,
            page_size: page_size.max(1),
            max_pages: max_pages.max(1),
        }
    }

    /// Page through every filter, merge by upstream id and sort FIFO.
    /// Fails only when every filter failed.
    pub async fn list_eligible_orders(&self, merchant_id: i64, filters: &[String]) -> Result<Listing, GatewayError> {
        let per_filter =
            futures::future::join_all(filters.iter().map(|f| self.list_one_filter(merchant_id, f))).await;

        let mut seen = HashSet::new();
        let mut listing = Listing::default();
        let mut last_err = None;
        for (filter, (orders, err)) in filters.iter().zip(per_filter) {
            if let Some(err) = err {
                tracing::warn!(merchant_id, filter = %filter, error = %err, "order listing failed for filter");
                listing.failed_filters.push(filter.clone());
                last_err = Some(err);
            }
            for order in orders {
                if seen.insert(order.id.clone()) {
                    listing.orders.push(order);
                }
            }
        }
        if !filters.is_empty()
            && listing.failed_filters.len() == filters.len()
            && let Some(err) = last_err
        {
            return Err(err);
        }
        listing.orders.sort_by(fifo_order);
        Ok(listing)
    }

    /// Orders read before a failure are kept alongside the error.
    async fn list_one_filter(&self, merchant_id: i64, status: &str) -> (Vec<RemoteOrder>, Option<GatewayError>) {
        let mut orders = Vec::new();
        for page in 1..=self.max_pages {
            let result = self
                .inner
                .list_orders_by_status(merchant_id, status, page, self.page_size)
                .await;
            let page = match result {
                Ok(page) => page,
                Err(err) => return (orders, Some(err)),
            };
            for payload in page.orders {
                match RemoteOrder::from_payload(payload) {
                    Ok(order) => orders.push(order),
                    Err(e) => tracing::warn!(merchant_id, status, error = %e, "skipping unreadable order in listing"),
                }
            }
            if !page.has_more {
                break;
            }
        }
        (orders, None)
    }

    pub async fn fetch_order(&self, merchant_id: i64, order_id: &str) -> Result<RemoteOrder, GatewayError> {
        let payload = self.inner.fetch_order(merchant_id, order_id).await?;
        RemoteOrder::from_payload(payload).map_err(|e| GatewayError::Malformed(e.to_string()))
    }

    /// Order plus line items; fails if either part fails.
    pub async fn fetch_order_detail(&self, merchant_id: i64, order_id: &str) -> Result<RemoteOrder, GatewayError> {
        let (order, items) = futures::try_join!(
            self.fetch_order(merchant_id, order_id),
            self.inner.fetch_order_items(merchant_id, order_id)
        )?;
        Ok(order.with_items(items))
    }

    pub async fn set_order_status(&self, merchant_id: i64, order_id: &str, status: &str) -> Result<(), GatewayError> {
        self.inner.set_order_status(merchant_id, order_id, status).await
    }

    pub async fn append_note(&self, merchant_id: i64, order_id: &str, note: &str) -> Result<(), GatewayError> {
        self.inner.append_note(merchant_id, order_id, note).await
    }
}
