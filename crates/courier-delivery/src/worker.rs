//! Shared consumer plumbing for the delivery workers.

use lapin::message::Delivery;
use lapin::options::{BasicConsumeOptions, BasicNackOptions, BasicQosOptions};
use lapin::types::FieldTable;
use lapin::{Channel, Connection, Consumer};
use tracing::{error, warn};

use courier_broker::{publish_dead_letter, RetryHeaders};
use courier_common::{ChannelKind, CourierError, CourierResult};

/// Open a channel with prefetch 1 and start a consumer on the given queue.
///
/// Prefetch 1 keeps acknowledgement semantics straightforward: a worker has
/// at most one message in flight, and a slow provider backpressures the
/// queue instead of piling up deliveries.
pub(crate) async fn open_consumer(
    connection: &Connection,
    queue: &str,
    consumer_tag: &str,
) -> CourierResult<(Channel, Consumer)> {
    let channel = connection
        .create_channel()
        .await
        .map_err(|e| CourierError::BrokerUnavailable(e.to_string()))?;

    channel
        .basic_qos(1, BasicQosOptions::default())
        .await
        .map_err(|e| CourierError::BrokerUnavailable(e.to_string()))?;

    let consumer = channel
        .basic_consume(
            queue,
            consumer_tag,
            BasicConsumeOptions::default(),
            FieldTable::default(),
        )
        .await
        .map_err(|e| CourierError::BrokerUnavailable(e.to_string()))?;

    Ok((channel, consumer))
}

/// Dead-letter a delivery and ack the original.
///
/// Falls back to a nack without requeue when the dead-letter publish itself
/// fails; the message is then lost to this worker and must be replayed from
/// the audit log.
pub(crate) async fn dead_letter_and_ack(
    channel: &Channel,
    kind: ChannelKind,
    delivery: &Delivery,
    headers: &RetryHeaders,
) {
    match publish_dead_letter(channel, kind, &delivery.data, headers).await {
        Ok(()) => {
            if let Err(err) = delivery.ack(Default::default()).await {
                warn!(channel_kind = %kind, error = %err, "failed to ack dead-lettered delivery");
            }
        }
        Err(err) => {
            error!(channel_kind = %kind, error = %err, "failed to dead-letter message");
            let nack = delivery
                .nack(BasicNackOptions {
                    requeue: false,
                    ..Default::default()
                })
                .await;
            if let Err(nack_err) = nack {
                warn!(channel_kind = %kind, error = %nack_err, "failed to nack delivery");
            }
        }
    }
}
