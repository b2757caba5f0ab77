//! # courier-delivery
//!
//! Routing, channel workers, retry sweeping, and delivery audit for the
//! courier notification pipeline.
//!
//! Each worker is an independent long-lived consumer with prefetch 1;
//! multiple worker processes compete on the same queue. The sweeper runs
//! once per deployment on its own connection.

pub mod audit;
pub mod email;
pub mod provider;
pub mod push;
pub mod router;
pub mod sweeper;

mod worker;

pub use audit::{
    connect_audit_pool, record_best_effort, AttemptStatus, AuditLog, DeliveryAttempt,
    MemoryAuditLog, PgAuditLog,
};
pub use email::{process_email, EmailWorker};
pub use provider::{
    email_provider_from_config, push_provider_from_config, EmailProvider, HttpEmailProvider,
    HttpPushProvider, ProviderReceipt, PushProvider, SimulatedEmailProvider, SimulatedPushProvider,
};
pub use push::{process_push, PushWorker};
pub use router::{plan_fanout, RouterWorker};
pub use sweeper::{decide, RetrySweeper, SweepDecision, SweepStats};
