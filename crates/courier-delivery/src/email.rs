//! Email channel worker.
//!
//! Consumes `email.queue` one message at a time. A successful provider call
//! acks the delivery and audits a sent attempt; any provider failure
//! dead-letters the original body with retry headers and audits a failed
//! attempt. In-process retries are deliberately absent: redelivery belongs
//! to the sweeper alone.

use std::sync::Arc;

use futures::StreamExt;
use lapin::message::Delivery;
use lapin::{Channel, Connection};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use courier_broker::{declare_topology, RetryHeaders};
use courier_common::{ChannelKind, CourierError, CourierResult, EmailMessage};

use crate::audit::{record_best_effort, AuditLog, DeliveryAttempt};
use crate::provider::{EmailProvider, ProviderReceipt};
use crate::worker::{dead_letter_and_ack, open_consumer};

/// Long-lived consumer on the email queue.
pub struct EmailWorker<A> {
    provider: Arc<dyn EmailProvider>,
    audit: A,
}

impl<A: AuditLog + Sync> EmailWorker<A> {
    /// Create a worker over a provider and an audit log.
    pub fn new(provider: Arc<dyn EmailProvider>, audit: A) -> Self {
        Self { provider, audit }
    }

    /// Consume email messages until the token is cancelled or the broker
    /// connection drops.
    pub async fn run(
        &self,
        connection: &Connection,
        shutdown: CancellationToken,
    ) -> CourierResult<()> {
        declare_topology(connection).await?;
        let (channel, mut consumer) =
            open_consumer(connection, ChannelKind::Email.queue(), "courier-email").await?;
        info!(queue = ChannelKind::Email.queue(), "email worker started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("email worker shutting down");
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

        let message = match EmailMessage::from_bytes(&delivery.data) {
            Ok(message) => message,
            Err(err) => {
                warn!(error = %err, "malformed email message, dead-lettering");
                let headers =
                    RetryHeaders::failure(retry.retry_count, &format!("malformed message: {err}"));
                dead_letter_and_ack(channel, ChannelKind::Email, &delivery, &headers).await;
                return;
            }
        };

        match process_email(self.provider.as_ref(), &self.audit, &message, retry.retry_count).await
        {
            Ok(_) => {
                if let Err(err) = delivery.ack(Default::default()).await {
                    warn!(error = %err, "failed to ack email delivery");
                }
            }
            Err(err) => {
                let headers = RetryHeaders::failure(retry.retry_count, &err.to_string());
                dead_letter_and_ack(channel, ChannelKind::Email, &delivery, &headers).await;
            }
        }
    }
}

/// Call the provider for one email message and audit the attempt.
///
/// Split out from the consumer loop so it can be exercised without a
/// broker.
pub async fn process_email(
    provider: &dyn EmailProvider,
    audit: &impl AuditLog,
    message: &EmailMessage,
    retry_count: u32,
) -> CourierResult<ProviderReceipt> {
    match provider.send(message).await {
        Ok(receipt) => {
            info!(
                notification_id = %message.notification_id,
                to = %message.to,
                provider_message_id = ?receipt.message_id,
                "email sent"
            );
            record_best_effort(audit, &DeliveryAttempt::email_sent(message, &receipt, retry_count))
                .await;
            Ok(receipt)
        }
        Err(err) => {
            warn!(
                notification_id = %message.notification_id,
                to = %message.to,
                retry_count,
                error = %err,
                "email send failed"
            );
            record_best_effort(audit, &DeliveryAttempt::email_failed(message, &err, retry_count))
                .await;
            Err(err)
        }
    }
}
