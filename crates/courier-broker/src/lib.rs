//! # courier-broker
//!
//! Broker topology and publishing for the courier notification pipeline.
//!
//! This crate owns everything AMQP-shaped:
//! - the wire-exact topology (exchanges, queues, dead-letter bindings)
//! - retry metadata carried in message headers
//! - the publisher pool the gateway enqueues envelopes through

pub mod connection;
pub mod headers;
pub mod publish;
pub mod topology;

pub use connection::connect;
pub use headers::{
    RetryHeaders, FAILED_TIME_HEADER, FINAL_FAILURE_TIME_HEADER, LAST_ERROR_HEADER,
    MAX_ERROR_LEN, RETRY_COUNT_HEADER,
};
pub use publish::{
    persistent_json_properties, publish_dead_letter, publish_persistent, EnvelopePublisher,
    PublisherPool,
};
pub use topology::{
    declare_topology, EXCHANGE_DIRECT, EXCHANGE_DLX, FAILED_QUEUE, INGRESS_QUEUE,
};
