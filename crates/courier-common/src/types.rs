//! Identifier and channel types used across the pipeline.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for an accepted submission.
///
/// Minted by the gateway when a submission is enqueued; every downstream
/// message and audit row carries it.
///
/// # Example
/// ```
/// use courier_common::SubmissionId;
///
/// let id = SubmissionId::new();
/// println!("Submission: {}", id);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubmissionId(Uuid);

impl SubmissionId {
    /// Create a new random submission ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a submission ID from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for SubmissionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SubmissionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for SubmissionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Delivery channel kinds supported by the pipeline.
///
/// Each channel owns a routing key on the direct exchange, a dead-letter
/// routing key on the DLX, and a terminal queue for messages that exhaust
/// their retry budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    /// Email delivery.
    Email,
    /// Mobile push delivery.
    Push,
}

impl ChannelKind {
    /// Routing key on the direct exchange that reaches this channel's queue.
    pub fn routing_key(&self) -> &'static str {
        match self {
            ChannelKind::Email => "notify.email",
            ChannelKind::Push => "notify.push",
        }
    }

    /// Routing key used when dead-lettering a message of this channel.
    pub fn dead_letter_key(&self) -> &'static str {
        match self {
            ChannelKind::Email => "email",
            ChannelKind::Push => "push",
        }
    }

    /// Work queue this channel's worker consumes.
    pub fn queue(&self) -> &'static str {
        match self {
            ChannelKind::Email => "email.queue",
            ChannelKind::Push => "push.queue",
        }
    }

    /// Terminal dead-letter queue for this channel.
    pub fn terminal_queue(&self) -> &'static str {
        match self {
            ChannelKind::Email => "email.dlq",
            ChannelKind::Push => "push.dlq",
        }
    }

    /// Recover the channel from a dead-letter routing key.
    pub fn from_dead_letter_key(key: &str) -> Option<Self> {
        match key {
            "email" => Some(ChannelKind::Email),
            "push" => Some(ChannelKind::Push),
            _ => None,
        }
    }

    /// Stable lowercase name used in audit rows.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::Email => "email",
            ChannelKind::Push => "push",
        }
    }
}

impl std::fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
