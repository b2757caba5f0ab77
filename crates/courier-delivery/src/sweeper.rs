//! Retry sweeper.
//!
//! A single periodic task per deployment, on its own broker connection.
//! Each tick drains one snapshot of the shared fail queue: messages below
//! the retry budget are re-injected into their channel queue with an
//! incremented retry count; exhausted messages are promoted to the
//! channel's terminal DLQ and never re-injected again.

use std::time::Duration;

use lapin::message::Delivery;
use lapin::options::{BasicGetOptions, BasicNackOptions};
use lapin::{Channel, Connection};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use courier_broker::{
    declare_topology, publish_persistent, RetryHeaders, EXCHANGE_DIRECT, FAILED_QUEUE,
};
use courier_common::{ChannelKind, CourierError, CourierResult, SweeperConfig};

/// What to do with a failed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepDecision {
    /// Re-inject into the channel queue with an incremented retry count.
    Reinject,
    /// Promote to the channel's terminal DLQ.
    Promote,
}

/// Decide a failed message's fate from its retry count.
pub fn decide(retry_count: u32, max_retries: u32) -> SweepDecision {
    if retry_count < max_retries {
        SweepDecision::Reinject
    } else {
        SweepDecision::Promote
    }
}

/// Counters for one sweep pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    /// Messages re-injected into channel queues.
    pub reinjected: u32,
    /// Messages promoted to terminal DLQs.
    pub promoted: u32,
    /// Messages whose channel could not be determined.
    pub unroutable: u32,
}

/// The periodic fail-queue sweeper.
pub struct RetrySweeper {
    config: SweeperConfig,
}

impl RetrySweeper {
    /// Create a sweeper with the given configuration.
    pub fn new(config: SweeperConfig) -> Self {
        Self { config }
    }

    /// Tick forever until the token is cancelled.
    ///
    /// Overlapping ticks are tolerated; the broker serializes deliveries,
    /// so two sweepers at worst split the snapshot between them.
    pub async fn run(
        &self,
        connection: &Connection,
        shutdown: CancellationToken,
    ) -> CourierResult<()> {
        declare_topology(connection).await?;
        let mut interval = tokio::time::interval(Duration::from_secs(self.config.interval_secs));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(
            interval_secs = self.config.interval_secs,
            max_retries = self.config.max_retries,
            "retry sweeper started"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("retry sweeper shutting down");
                    break;
                }
                _ = interval.tick() => {
                    match self.sweep(connection).await {
                        Ok(stats) if stats != SweepStats::default() => {
                            info!(
                                reinjected = stats.reinjected,
                                promoted = stats.promoted,
                                unroutable = stats.unroutable,
                                "sweep complete"
                            );
                        }
                        Ok(_) => {}
                        Err(err) => warn!(error = %err, "sweep failed"),
                    }
                }
            }
        }
        Ok(())
    }

    /// Drain one snapshot of the fail queue.
    #[instrument(skip_all)]
    pub async fn sweep(&self, connection: &Connection) -> CourierResult<SweepStats> {
        let channel = connection
            .create_channel()
            .await
            .map_err(|e| CourierError::BrokerUnavailable(e.to_string()))?;

        let mut stats = SweepStats::default();
        let mut budget: Option<u64> = None;

        loop {
            if let Some(0) = budget {
                break;
            }

            let message = channel
                .basic_get(FAILED_QUEUE, BasicGetOptions::default())
                .await
                .map_err(|e| CourierError::BrokerUnavailable(e.to_string()))?;

            let Some(message) = message else { break };

            // Bound the pass to the snapshot observed on the first get, so a
            // message nacked back onto the queue is not re-fetched this tick.
            let remaining = u64::from(message.message_count);
            budget = Some(match budget {
                None => remaining,
                Some(left) => left.saturating_sub(1),
            });

            let delivery = message.delivery;
            if let Err(err) = self.handle_failed(&channel, &delivery, &mut stats).await {
                warn!(error = %err, "failed to sweep message, requeueing for next tick");
                let nack = delivery
                    .nack(BasicNackOptions {
                        requeue: true,
                        ..Default::default()
                    })
                    .await;
                if let Err(nack_err) = nack {
                    warn!(error = %nack_err, "failed to requeue swept message");
                }
            }
        }

        Ok(stats)
    }

    async fn handle_failed(
        &self,
        channel: &Channel,
        delivery: &Delivery,
        stats: &mut SweepStats,
    ) -> CourierResult<()> {
        let retry = RetryHeaders::from_table(delivery.properties.headers().as_ref());

        let Some(kind) = ChannelKind::from_dead_letter_key(delivery.routing_key.as_str()) else {
            // Without a channel there is nowhere safe to re-inject; drop the
            // message and leave recovery to the audit log.
            error!(
                routing_key = %delivery.routing_key,
                "failed message has no recognizable channel, discarding"
            );
            delivery
                .ack(Default::default())
                .await
                .map_err(|e| CourierError::BrokerUnavailable(e.to_string()))?;
            stats.unroutable += 1;
            return Ok(());
        };

        match decide(retry.retry_count, self.config.max_retries) {
            SweepDecision::Reinject => {
                let next = retry.incremented();
                publish_persistent(
                    channel,
                    EXCHANGE_DIRECT,
                    kind.routing_key(),
                    &delivery.data,
                    Some(next.to_table()),
                )
                .await?;
                delivery
                    .ack(Default::default())
                    .await
                    .map_err(|e| CourierError::BrokerUnavailable(e.to_string()))?;
                info!(
                    channel_kind = %kind,
                    attempt = next.retry_count,
                    max_retries = self.config.max_retries,
                    "re-injected failed message"
                );
                stats.reinjected += 1;
            }
            SweepDecision::Promote => {
                publish_persistent(
                    channel,
                    "",
                    kind.terminal_queue(),
                    &delivery.data,
                    Some(retry.to_final_table()),
                )
                .await?;
                delivery
                    .ack(Default::default())
                    .await
                    .map_err(|e| CourierError::BrokerUnavailable(e.to_string()))?;
                warn!(
                    channel_kind = %kind,
                    retry_count = retry.retry_count,
                    last_error = retry.last_error.as_deref().unwrap_or("unknown"),
                    "retry budget exhausted, promoted to terminal DLQ"
                );
                stats.promoted += 1;
            }
        }

        Ok(())
    }
}
