//! Run the submission API locally without a broker.
//!
//! Envelopes are printed instead of published, and idempotency lives in
//! memory. The profile and template services are still expected on their
//! default local ports (8001 and 8002).

use std::sync::Arc;

use async_trait::async_trait;
use courier_broker::EnvelopePublisher;
use courier_common::{init_tracing, CourierConfig, CourierResult, Envelope};
use courier_gateway::{app, AppState, MemorySnapshotStore, ProfileClient, TemplateClient};

struct LogPublisher;

#[async_trait]
impl EnvelopePublisher for LogPublisher {
    async fn publish_envelope(&self, envelope: &Envelope) -> CourierResult<()> {
        println!(
            "would publish envelope: {}",
            serde_json::to_string_pretty(envelope)?
        );
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = CourierConfig::default();
    init_tracing(&config.observability)?;

    let state = AppState {
        profile: Arc::new(ProfileClient::new(&config.upstreams)?),
        template: Arc::new(TemplateClient::new(&config.upstreams)?),
        idempotency: Arc::new(MemorySnapshotStore::with_default_ttl()),
        publisher: Arc::new(LogPublisher),
    };

    let listener = tokio::net::TcpListener::bind("127.0.0.1:8000").await?;
    println!("submission API listening on http://127.0.0.1:8000");
    axum::serve(listener, app(state)).await?;

    Ok(())
}
