//! # courier-gateway
//!
//! Idempotent HTTP submission API for the courier notification pipeline.
//!
//! The gateway validates a submission, replays cached responses for
//! duplicate idempotency keys, enriches the request from the profile and
//! template services (each behind a circuit breaker), and publishes a
//! delivery envelope on the ingress queue.

pub mod breaker;
pub mod http;
pub mod idempotency;
pub mod profile;
pub mod template;
pub mod upstream;

pub use breaker::{BreakerConfig, BreakerState, CircuitBreaker};
pub use http::{app, AppState, SubmissionRequest};
pub use idempotency::{
    IdempotencyRecord, MemorySnapshotStore, RedisSnapshotStore, SnapshotStore,
};
pub use profile::{ProfileClient, RecipientProfile};
pub use template::TemplateClient;
