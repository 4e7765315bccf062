//! Order assignment and fulfillment lifecycle.
//!
//! ## Overview
//!
//! Preparers claim orders from the upstream store one (or `capacity`) at a
//! time. Every claim is recorded locally as an *assignment*; the assignment
//! moves through a small lifecycle, its transitions are mirrored to the
//! upstream order, and finished assignments are archived into history.
//!
//! ## Module Map
//!
//! ```text
//! ┌──────────┐   HTTP   ┌──────────────────────────────────────────────────┐
//! │  Client  │ ───────> │  server.rs  (ServerConfig, build_engine)         │
//! │          │ <─────── │    └─ api.rs  (route handlers, AppState)         │
//! └──────────┘          │         │                                        │
//!                       │         v                                        │
//!                       │  engine.rs  (FulfillmentEngine)                  │
//!                       │    ├─ allocator.rs    claim_next_order           │
//!                       │    ├─ revalidator.rs  list_active                │
//!                       │    ├─ lifecycle.rs    advance / complete / notes │
//!                       │    └─ recovery.rs     reassign / remove / reopen │
//!                       │         │                     │                  │
//!                       │         v                     v                  │
//!                       │  gateway.rs (upstream)   db.rs + archiver.rs     │
//!                       └──────────────────────────────────────────────────┘
//! ```
//!
//! ## Supporting Modules
//!
//! | Module        | Responsibility                                          |
//! |---------------|---------------------------------------------------------|
//! | `models`      | `Worker`, `Assignment`, `HistoryRecord`, outcomes       |
//! | `eligibility` | Upstream (status, sub-status) allow-list                |
//! | `extract`     | Field lookup over loosely-typed upstream payloads       |
//!
//! ## Claim Flow
//!
//! 1. `POST /api/workers/{id}/claim` → `Allocator::claim_next_order()`
//! 2. Free slot check, then the eligible upstream listing is fetched per
//!    status filter and merged oldest first.
//! 3. Orders already held locally are skipped; the first remaining candidate
//!    is fetched in detail and inserted with a conditional write that
//!    re-checks both the worker's capacity and the order's live uniqueness.
//! 4. The upstream order is moved to the configured claimed status and a
//!    note is appended, both best-effort.

pub mod allocator;
pub mod api;
pub mod archiver;
pub mod db;
pub mod eligibility;
pub mod engine;
pub mod extract;
pub mod gateway;
pub mod lifecycle;
pub mod models;
pub mod recovery;
pub mod revalidator;
pub mod server;
