//! Publishing helpers and the gateway-facing publisher pool.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use lapin::options::BasicPublishOptions;
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection};
use tracing::{debug, warn};

use courier_common::{BrokerConfig, ChannelKind, CourierError, CourierResult, Envelope};

use crate::connection;
use crate::headers::RetryHeaders;
use crate::topology::{self, EXCHANGE_DLX, INGRESS_QUEUE};

/// Properties for a durable JSON message (persistent delivery mode).
pub fn persistent_json_properties() -> BasicProperties {
    BasicProperties::default()
        .with_delivery_mode(2)
        .with_content_type("application/json".into())
}

/// Properties for a durable JSON message carrying headers.
pub fn persistent_json_properties_with_headers(headers: FieldTable) -> BasicProperties {
    persistent_json_properties().with_headers(headers)
}

/// Publish a persistent JSON payload on an existing channel.
pub async fn publish_persistent(
    channel: &Channel,
    exchange: &str,
    routing_key: &str,
    payload: &[u8],
    headers: Option<FieldTable>,
) -> CourierResult<()> {
    let properties = match headers {
        Some(headers) => persistent_json_properties_with_headers(headers),
        None => persistent_json_properties(),
    };

    channel
        .basic_publish(
            exchange,
            routing_key,
            BasicPublishOptions::default(),
            payload,
            properties,
        )
        .await
        .map_err(|e| CourierError::BrokerUnavailable(e.to_string()))?
        .await
        .map_err(|e| CourierError::BrokerUnavailable(e.to_string()))?;
    Ok(())
}

/// Dead-letter a channel message: republish the original body to the DLX
/// under the channel's dead-letter routing key, carrying retry headers.
///
/// The caller acks the original delivery afterwards; rejecting through the
/// broker would lose the retry count.
pub async fn publish_dead_letter(
    channel: &Channel,
    kind: ChannelKind,
    payload: &[u8],
    headers: &RetryHeaders,
) -> CourierResult<()> {
    publish_persistent(
        channel,
        EXCHANGE_DLX,
        kind.dead_letter_key(),
        payload,
        Some(headers.to_table()),
    )
    .await
}

/// Ingress-publish capability consumed by the submission API.
#[async_trait]
pub trait EnvelopePublisher: Send + Sync {
    /// Publish an envelope durably on the ingress queue.
    async fn publish_envelope(&self, envelope: &Envelope) -> CourierResult<()>;
}

/// A pool of publisher channels over one broker connection.
///
/// Each submission acquires a channel, publishes, and returns it; a channel
/// that saw a publish error is discarded instead of being reused. The guard
/// returns the channel on every exit path.
pub struct PublisherPool {
    connection: Connection,
    idle: Mutex<Vec<Channel>>,
    publish_timeout: Duration,
}

impl PublisherPool {
    /// Connect to the broker, declare the topology, and pre-open the
    /// configured number of channels.
    pub async fn new(config: &BrokerConfig) -> CourierResult<Self> {
        let connection = connection::connect(&config.url).await?;
        topology::declare_topology(&connection).await?;

        let mut channels = Vec::with_capacity(config.publisher_pool_size);
        for _ in 0..config.publisher_pool_size {
            let channel = connection
                .create_channel()
                .await
                .map_err(|e| CourierError::BrokerUnavailable(e.to_string()))?;
            channels.push(channel);
        }

        Ok(Self {
            connection,
            idle: Mutex::new(channels),
            publish_timeout: Duration::from_secs(config.publish_timeout_secs),
        })
    }

    /// Take a channel from the pool, opening a new one when none is idle.
    pub async fn acquire(&self) -> CourierResult<PooledChannel<'_>> {
        let existing = {
            let mut idle = self.idle.lock().expect("publisher pool lock poisoned");
            idle.pop()
        };

        let channel = match existing {
            Some(channel) if channel.status().connected() => channel,
            _ => self
                .connection
                .create_channel()
                .await
                .map_err(|e| CourierError::BrokerUnavailable(e.to_string()))?,
        };

        Ok(PooledChannel {
            channel: Some(channel),
            pool: self,
        })
    }

    fn release(&self, channel: Channel) {
        let mut idle = self.idle.lock().expect("publisher pool lock poisoned");
        idle.push(channel);
    }

    /// Publish a persistent JSON payload through a pooled channel.
    pub async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
    ) -> CourierResult<()> {
        let guard = self.acquire().await?;

        let outcome = tokio::time::timeout(
            self.publish_timeout,
            publish_persistent(guard.channel(), exchange, routing_key, payload, None),
        )
        .await;

        match outcome {
            Ok(Ok(())) => {
                debug!(exchange, routing_key, "message published");
                Ok(())
            }
            Ok(Err(err)) => {
                warn!(exchange, routing_key, error = %err, "publish failed");
                guard.discard();
                Err(err)
            }
            Err(_) => {
                warn!(exchange, routing_key, "publish timed out");
                guard.discard();
                Err(CourierError::BrokerUnavailable(
                    "publish timed out".to_string(),
                ))
            }
        }
    }

    /// Close the connection and all pooled channels.
    pub async fn close(&self) {
        {
            let mut idle = self.idle.lock().expect("publisher pool lock poisoned");
            idle.clear();
        }
        connection::close(&self.connection).await;
    }
}

#[async_trait]
impl EnvelopePublisher for PublisherPool {
    async fn publish_envelope(&self, envelope: &Envelope) -> CourierResult<()> {
        let payload = envelope.to_bytes()?;
        // Ingress publishes go through the default exchange straight to the
        // queue, as the gateway has no routing decision to make yet.
        self.publish("", INGRESS_QUEUE, &payload).await
    }
}

/// RAII guard over a pooled channel.
pub struct PooledChannel<'a> {
    channel: Option<Channel>,
    pool: &'a PublisherPool,
}

impl PooledChannel<'_> {
    /// The underlying channel.
    pub fn channel(&self) -> &Channel {
        self.channel
            .as_ref()
            .expect("pooled channel already released")
    }

    /// Drop the channel without returning it to the pool.
    pub fn discard(mut self) {
        self.channel.take();
    }
}

impl Drop for PooledChannel<'_> {
    fn drop(&mut self) {
        if let Some(channel) = self.channel.take() {
            self.pool.release(channel);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_persistent_properties() {
        let properties = persistent_json_properties();
        assert_eq!(properties.delivery_mode(), &Some(2));
        assert_eq!(
            properties.content_type().as_ref().map(|c| c.as_str()),
            Some("application/json")
        );
    }

    #[test]
    fn test_properties_carry_headers() {
        let headers = RetryHeaders::failure(1, "boom").to_table();
        let properties = persistent_json_properties_with_headers(headers);
        let table = properties.headers().as_ref().unwrap();
        assert!(table.inner().contains_key("x-retry-count"));
        assert_eq!(properties.delivery_mode(), &Some(2));
    }
}
