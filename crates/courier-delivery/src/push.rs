//! Push channel worker.
//!
//! Mirror of the email worker over `push.queue` and the push provider.

use std::sync::Arc;

use futures::StreamExt;
use lapin::message::Delivery;
use lapin::{Channel, Connection};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use courier_broker::{declare_topology, RetryHeaders};
use courier_common::{ChannelKind, CourierError, CourierResult, PushMessage};

use crate::audit::{record_best_effort, AuditLog, DeliveryAttempt};
use crate::provider::{ProviderReceipt, PushProvider};
use crate::worker::{dead_letter_and_ack, open_consumer};

/// Long-lived consumer on the push queue.
pub struct PushWorker<A> {
    provider: Arc<dyn PushProvider>,
    audit: A,
}

impl<A: AuditLog + Sync> PushWorker<A> {
    /// Create a worker over a provider and an audit log.
    pub fn new(provider: Arc<dyn PushProvider>, audit: A) -> Self {
        Self { provider, audit }
    }

    /// Consume push messages until the token is cancelled or the broker
    /// connection drops.
    pub async fn run(
        &self,
        connection: &Connection,
        shutdown: CancellationToken,
    ) -> CourierResult<()> {
        declare_topology(connection).await?;
        let (channel, mut consumer) =
            open_consumer(connection, ChannelKind::Push.queue(), "courier-push").await?;
        info!(queue = ChannelKind::Push.queue(), "push worker started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("push worker shutting down");
                    break;
                }
                delivery = consumer.next() => match delivery {
                    Some(Ok(delivery)) => self.handle_delivery(&channel, delivery).await,
                    Some(Err(err)) => {
                        return Err(CourierError::BrokerUnavailable(err.to_string()));
                    }
                    None => break,
                }
            }
        }
        Ok(())
    }

    #[instrument(skip_all)]
    async fn handle_delivery(&self, channel: &Channel, delivery: Delivery) {
        let retry = RetryHeaders::from_table(delivery.properties.headers().as_ref());

        let message = match PushMessage::from_bytes(&delivery.data) {
            Ok(message) => message,
            Err(err) => {
                warn!(error = %err, "malformed push message, dead-lettering");
                let headers =
                    RetryHeaders::failure(retry.retry_count, &format!("malformed message: {err}"));
                dead_letter_and_ack(channel, ChannelKind::Push, &delivery, &headers).await;
                return;
            }
        };

        match process_push(self.provider.as_ref(), &self.audit, &message, retry.retry_count).await {
            Ok(_) => {
                if let Err(err) = delivery.ack(Default::default()).await {
                    warn!(error = %err, "failed to ack push delivery");
                }
            }
            Err(err) => {
                let headers = RetryHeaders::failure(retry.retry_count, &err.to_string());
                dead_letter_and_ack(channel, ChannelKind::Push, &delivery, &headers).await;
            }
        }
    }
}

/// Call the provider for one push message and audit the attempt.
pub async fn process_push(
    provider: &dyn PushProvider,
    audit: &impl AuditLog,
    message: &PushMessage,
    retry_count: u32,
) -> CourierResult<ProviderReceipt> {
    match provider.send(message).await {
        Ok(receipt) => {
            info!(
                notification_id = %message.notification_id,
                provider_message_id = ?receipt.message_id,
                "push sent"
            );
            record_best_effort(audit, &DeliveryAttempt::push_sent(message, &receipt, retry_count))
                .await;
            Ok(receipt)
        }
        Err(err) => {
            warn!(
                notification_id = %message.notification_id,
                retry_count,
                error = %err,
                "push send failed"
            );
            record_best_effort(audit, &DeliveryAttempt::push_failed(message, &err, retry_count))
                .await;
            Err(err)
        }
    }
}
