//! Router worker: fans ingress envelopes out into per-channel messages.
//!
//! Consumes the ingress queue one envelope at a time, narrows each envelope
//! into at most one message per applicable channel, and acks only after
//! every channel publish succeeded. A partial publish failure nacks without
//! requeue: requeueing would double-deliver on the side that already
//! published, so the envelope is lost and replayed from the audit log by an
//! operator instead.

use futures::StreamExt;
use lapin::message::Delivery;
use lapin::options::BasicNackOptions;
use lapin::{Channel, Connection};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use courier_broker::{declare_topology, publish_persistent, EXCHANGE_DIRECT, INGRESS_QUEUE};
use courier_common::{
    ChannelMessage, CourierError, CourierResult, EmailMessage, Envelope, PushMessage,
};

use crate::worker::open_consumer;

/// Narrow an envelope into its per-channel messages.
///
/// At most one message per channel: email when an email target is present,
/// push when a push token or phone number is present (token preferred).
pub fn plan_fanout(envelope: &Envelope) -> Vec<ChannelMessage> {
    let mut messages = Vec::new();
    let metadata = &envelope.metadata;

    let mut data = Map::new();
    data.insert(
        "template_key".to_string(),
        Value::String(metadata.template_key.clone()),
    );
    data.insert(
        "language".to_string(),
        Value::String(metadata.language.clone()),
    );

    if let Some(email) = envelope.delivery_targets.email() {
        messages.push(ChannelMessage::Email(EmailMessage {
            notification_id: metadata.submission_id.to_string(),
            user_id: envelope.recipient_id.clone(),
            to: email.to_string(),
            subject: envelope.rendered.subject.clone(),
            content: envelope.rendered.email_content().to_string(),
            template_id: None,
            data: data.clone(),
        }));
    }

    if let Some(target) = envelope.delivery_targets.push_target() {
        let mut push_data = data.clone();
        push_data.insert(
            "user_id".to_string(),
            Value::String(envelope.recipient_id.clone()),
        );
        messages.push(ChannelMessage::Push(PushMessage {
            notification_id: metadata.submission_id.to_string(),
            user_id: envelope.recipient_id.clone(),
            target: target.to_string(),
            title: envelope.rendered.subject.clone(),
            body: envelope.rendered.body_text.clone(),
            data: push_data,
        }));
    }

    messages
}

/// Long-lived consumer on the ingress queue.
pub struct RouterWorker;

impl RouterWorker {
    /// Consume envelopes until the token is cancelled or the broker
    /// connection drops.
    pub async fn run(connection: &Connection, shutdown: CancellationToken) -> CourierResult<()> {
        declare_topology(connection).await?;
        let (channel, mut consumer) =
            open_consumer(connection, INGRESS_QUEUE, "courier-router").await?;
        info!(queue = INGRESS_QUEUE, "router worker started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("router worker shutting down");
                    break;
                }
                delivery = consumer.next() => match delivery {
                    Some(Ok(delivery)) => handle_delivery(&channel, delivery).await,
                    Some(Err(err)) => {
                        return Err(CourierError::BrokerUnavailable(err.to_string()));
                    }
                    None => break,
                }
            }
        }
        Ok(())
    }
}

#[instrument(skip_all)]
async fn handle_delivery(channel: &Channel, delivery: Delivery) {
    let envelope = match Envelope::from_bytes(&delivery.data) {
        Ok(envelope) => envelope,
        Err(err) => {
            // A malformed envelope can never route; drop it from the queue.
            warn!(error = %err, "discarding malformed envelope");
            ack_or_warn(&delivery).await;
            return;
        }
    };

    let submission_id = envelope.metadata.submission_id;
    let plan = plan_fanout(&envelope);

    if plan.is_empty() {
        info!(%submission_id, "no applicable channels for envelope");
        ack_or_warn(&delivery).await;
        return;
    }

    for message in &plan {
        let publish = async {
            let payload = message.to_bytes()?;
            publish_persistent(
                channel,
                EXCHANGE_DIRECT,
                message.routing_key(),
                &payload,
                None,
            )
            .await
        };

        if let Err(err) = publish.await {
            warn!(
                %submission_id,
                routing_key = message.routing_key(),
                error = %err,
                "channel publish failed, dropping envelope"
            );
            let nack = delivery
                .nack(BasicNackOptions {
                    requeue: false,
                    ..Default::default()
                })
                .await;
            if let Err(nack_err) = nack {
                warn!(error = %nack_err, "failed to nack envelope");
            }
            return;
        }
    }

    info!(
        %submission_id,
        channels = plan.len(),
        "envelope routed"
    );
    ack_or_warn(&delivery).await;
}

async fn ack_or_warn(delivery: &Delivery) {
    if let Err(err) = delivery.ack(Default::default()).await {
        warn!(error = %err, "failed to ack envelope");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_common::{
        ChannelKind, DeliveryTargets, EnvelopeMetadata, RenderedContent, SubmissionId,
    };

    fn envelope_with_targets(targets: DeliveryTargets) -> Envelope {
        Envelope {
            recipient_id: "user-123".to_string(),
            delivery_targets: targets,
            preferences: Map::new(),
            rendered: RenderedContent {
                subject: "Your Order ODR-745 is Confirmed!".to_string(),
                body_text: "Hi Alice".to_string(),
                body_html: "<h1>Order Confirmed!</h1>".to_string(),
            },
            metadata: EnvelopeMetadata {
                template_key: "ORDER_CONFIRMATION".to_string(),
                language: "en".to_string(),
                submission_id: SubmissionId::new(),
                idempotency_key: None,
            },
        }
    }

    #[test]
    fn test_email_only_envelope_fans_out_to_email() {
        let envelope = envelope_with_targets(DeliveryTargets {
            email: Some("alice@example.com".to_string()),
            phone: None,
            push_token: None,
        });

        let plan = plan_fanout(&envelope);
        assert_eq!(plan.len(), 1);

        let ChannelMessage::Email(ref message) = plan[0] else {
            panic!("expected an email message");
        };
        assert_eq!(message.to, "alice@example.com");
        assert_eq!(message.subject, "Your Order ODR-745 is Confirmed!");
        assert_eq!(message.content, "<h1>Order Confirmed!</h1>");
        assert_eq!(
            message.notification_id,
            envelope.metadata.submission_id.to_string()
        );
        assert_eq!(message.data["template_key"], "ORDER_CONFIRMATION");
    }

    #[test]
    fn test_both_targets_fan_out_once_per_channel() {
        let envelope = envelope_with_targets(DeliveryTargets {
            email: Some("alice@example.com".to_string()),
            phone: Some("+14155550001".to_string()),
            push_token: Some("fcm-token-1".to_string()),
        });

        let plan = plan_fanout(&envelope);
        assert_eq!(plan.len(), 2);

        let channels: Vec<ChannelKind> = plan.iter().map(ChannelMessage::channel).collect();
        assert_eq!(channels, vec![ChannelKind::Email, ChannelKind::Push]);
    }

    #[test]
    fn test_push_target_prefers_token() {
        let envelope = envelope_with_targets(DeliveryTargets {
            email: None,
            phone: Some("+14155550001".to_string()),
            push_token: Some("fcm-token-1".to_string()),
        });

        let plan = plan_fanout(&envelope);
        let ChannelMessage::Push(ref message) = plan[0] else {
            panic!("expected a push message");
        };
        assert_eq!(message.target, "fcm-token-1");
        assert_eq!(message.title, "Your Order ODR-745 is Confirmed!");
        assert_eq!(message.body, "Hi Alice");
        assert_eq!(message.data["user_id"], "user-123");
    }

    #[test]
    fn test_phone_only_envelope_routes_to_push() {
        let envelope = envelope_with_targets(DeliveryTargets {
            email: None,
            phone: Some("+14155550001".to_string()),
            push_token: None,
        });

        let plan = plan_fanout(&envelope);
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].channel(), ChannelKind::Push);
    }

    #[test]
    fn test_no_targets_yields_empty_plan() {
        let envelope = envelope_with_targets(DeliveryTargets::default());
        assert!(plan_fanout(&envelope).is_empty());
    }

    #[test]
    fn test_empty_string_targets_are_ignored() {
        let envelope = envelope_with_targets(DeliveryTargets {
            email: Some(String::new()),
            phone: Some(String::new()),
            push_token: None,
        });
        assert!(plan_fanout(&envelope).is_empty());
    }
}
