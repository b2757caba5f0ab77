//! Broker topology declaration.
//!
//! Declares the exchanges, queues, and bindings the pipeline runs on.
//! `declare_topology` is idempotent: every component calls it on startup,
//! and a queue that already exists with divergent arguments is accepted
//! as-is (the broker would reject a re-declare) and logged.

use lapin::options::{ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions};
use lapin::types::{AMQPValue, FieldTable};
use lapin::{Channel, Connection, ExchangeKind};
use tracing::{debug, warn};

use courier_common::{ChannelKind, CourierError, CourierResult};

/// Direct exchange carrying routed channel messages.
pub const EXCHANGE_DIRECT: &str = "notifications.direct";

/// Fanout dead-letter exchange feeding the shared fail queue.
pub const EXCHANGE_DLX: &str = "notifications.dlx";

/// Ingress queue the gateway publishes envelopes to.
pub const INGRESS_QUEUE: &str = "notifications";

/// Shared fail queue the sweeper drains.
pub const FAILED_QUEUE: &str = "failed.queue";

/// Message TTL on the fail queue, in milliseconds (24 hours).
pub const FAILED_QUEUE_TTL_MS: i64 = 86_400_000;

/// Maximum number of messages retained on the fail queue.
pub const FAILED_QUEUE_MAX_LENGTH: i64 = 10_000;

fn durable() -> QueueDeclareOptions {
    QueueDeclareOptions {
        durable: true,
        ..Default::default()
    }
}

/// Arguments for a channel work queue: dead-letter into the DLX under the
/// channel's dead-letter routing key.
pub fn channel_queue_args(channel: ChannelKind) -> FieldTable {
    let mut args = FieldTable::default();
    args.insert(
        "x-dead-letter-exchange".into(),
        AMQPValue::LongString(EXCHANGE_DLX.into()),
    );
    args.insert(
        "x-dead-letter-routing-key".into(),
        AMQPValue::LongString(channel.dead_letter_key().into()),
    );
    args
}

/// Arguments for the shared fail queue: bounded in both age and length.
pub fn failed_queue_args() -> FieldTable {
    let mut args = FieldTable::default();
    args.insert(
        "x-message-ttl".into(),
        AMQPValue::LongLongInt(FAILED_QUEUE_TTL_MS),
    );
    args.insert(
        "x-max-length".into(),
        AMQPValue::LongLongInt(FAILED_QUEUE_MAX_LENGTH),
    );
    args
}

/// Declare a durable queue, falling back to a passive declare when the
/// queue already exists with different arguments.
///
/// A rejected declare closes the AMQP channel, so the fallback runs on a
/// fresh one. Returns the channel that is still usable afterwards.
async fn declare_queue_accepting_existing(
    conn: &Connection,
    channel: Channel,
    name: &str,
    args: FieldTable,
) -> CourierResult<Channel> {
    match channel.queue_declare(name, durable(), args).await {
        Ok(_) => {
            debug!(queue = name, "queue declared");
            Ok(channel)
        }
        Err(err) => {
            warn!(
                queue = name,
                error = %err,
                "queue exists with divergent arguments, accepting as-is"
            );
            let channel = conn
                .create_channel()
                .await
                .map_err(|e| CourierError::BrokerUnavailable(e.to_string()))?;
            channel
                .queue_declare(
                    name,
                    QueueDeclareOptions {
                        passive: true,
                        ..Default::default()
                    },
                    FieldTable::default(),
                )
                .await
                .map_err(|e| CourierError::BrokerUnavailable(e.to_string()))?;
            Ok(channel)
        }
    }
}

/// Ensure the full pipeline topology exists.
///
/// Safe to run any number of times against a live broker.
pub async fn declare_topology(conn: &Connection) -> CourierResult<()> {
    let mut channel = conn
        .create_channel()
        .await
        .map_err(|e| CourierError::BrokerUnavailable(e.to_string()))?;

    channel
        .exchange_declare(
            EXCHANGE_DIRECT,
            ExchangeKind::Direct,
            ExchangeDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
        .map_err(|e| CourierError::BrokerUnavailable(e.to_string()))?;

    channel
        .exchange_declare(
            EXCHANGE_DLX,
            ExchangeKind::Fanout,
            ExchangeDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
        .map_err(|e| CourierError::BrokerUnavailable(e.to_string()))?;

    channel =
        declare_queue_accepting_existing(conn, channel, INGRESS_QUEUE, FieldTable::default())
            .await?;

    for kind in [ChannelKind::Email, ChannelKind::Push] {
        channel =
            declare_queue_accepting_existing(conn, channel, kind.queue(), channel_queue_args(kind))
                .await?;
        channel = declare_queue_accepting_existing(
            conn,
            channel,
            kind.terminal_queue(),
            FieldTable::default(),
        )
        .await?;
    }

    channel =
        declare_queue_accepting_existing(conn, channel, FAILED_QUEUE, failed_queue_args()).await?;

    for kind in [ChannelKind::Email, ChannelKind::Push] {
        channel
            .queue_bind(
                kind.queue(),
                EXCHANGE_DIRECT,
                kind.routing_key(),
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| CourierError::BrokerUnavailable(e.to_string()))?;
    }

    channel
        .queue_bind(
            FAILED_QUEUE,
            EXCHANGE_DLX,
            "",
            QueueBindOptions::default(),
            FieldTable::default(),
        )
        .await
        .map_err(|e| CourierError::BrokerUnavailable(e.to_string()))?;

    debug!("broker topology declared");
    Ok(())
}
