//! Webhook Ingest & Delivery Pipeline
//!
//! Accepts authenticated webhook calls, durably records them with
//! idempotency, and asynchronously delivers each event to a downstream
//! HTTP endpoint with bounded concurrency, exponential-backoff retries,
//! and permanent-failure classification.
//!
//! # Architecture
//!
//! ```text
//! Publisher ──► Authenticator ──► Ingestor ──► store + ready queue
//!                                                      │
//!                        ┌─────────────────────────────┘
//!                        ▼
//!                 Delivery workers ── claim ── POST ── classify
//!                        │                                │
//!                DELIVERED / FAILED_PERMANENTLY    FAILED_TEMPORARILY
//!                                                         │
//!                 ready queue ◄── retry scheduler ◄── retry set
//! ```
//!
//! The durable store (PostgreSQL) owns canonical event state; the broker
//! (Redis) holds only id references, so lost queue entries are recoverable
//! by re-scanning the store. Delivery is at-least-once: the claim lease
//! guarantees at most one in-flight attempt per event, never exactly-once
//! delivery.
//!
//! # Modules
//!
//! - [`auth`] - HMAC-SHA256 request authentication
//! - [`config`] - Environment-driven settings
//! - [`delivery`] - Worker pool and outcome classification
//! - [`handlers`] - REST API endpoints
//! - [`queue`] - Ready queue and delayed-retry set on the broker
//! - [`rate_limit`] - Atomic token bucket
//! - [`scheduler`] - Delayed-retry migration and scan fallback
//! - [`store`] - Durable event store and claim protocol

pub mod auth;
pub mod config;
pub mod delivery;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod models;
pub mod queue;
pub mod rate_limit;
pub mod router;
pub mod scheduler;
pub mod state;
pub mod store;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
