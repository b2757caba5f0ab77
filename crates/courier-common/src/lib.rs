//! # courier-common
//!
//! Shared types and utilities for the courier notification pipeline.
//!
//! This crate provides the foundation used by all pipeline components:
//! - `courier-broker`: broker topology and publishing
//! - `courier-gateway`: idempotent HTTP submission
//! - `courier-delivery`: routing, channel workers, retry sweeping, audit

pub mod config;
pub mod error;
pub mod health;
pub mod messages;
pub mod telemetry;
pub mod types;

pub use config::{
    load_config, load_courier_config, BrokerConfig, CourierConfig, DatabaseConfig,
    EmailProviderConfig, ObservabilityConfig, PushProviderConfig, RedisConfig, SweeperConfig,
    UpstreamConfig,
};
pub use error::{CourierError, CourierResult};
pub use health::{health_check, HealthResponse};
pub use messages::{
    ChannelMessage, DeliveryTargets, EmailMessage, Envelope, EnvelopeMetadata, PushMessage,
    RenderedContent,
};
pub use telemetry::init_tracing;
pub use types::{ChannelKind, SubmissionId};
