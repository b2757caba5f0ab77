//! Append-only audit log of delivery attempts.
//!
//! Every provider call writes exactly one row, sent or failed. A failure to
//! persist never fails the worker; the attempt is logged and the message
//! flow continues.
//!
//! Uses runtime SQL queries to avoid requiring DATABASE_URL at compile time.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tokio::sync::Mutex;
use tracing::warn;

use courier_common::{ChannelKind, CourierError, DatabaseConfig, EmailMessage, PushMessage};

use crate::provider::ProviderReceipt;

/// Outcome of a single provider call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptStatus {
    /// The provider accepted the message.
    Sent,
    /// The provider rejected the message or was unreachable.
    Failed,
}

impl AttemptStatus {
    /// Convert to database string representation.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            AttemptStatus::Sent => "sent",
            AttemptStatus::Failed => "failed",
        }
    }
}

/// One delivery attempt, as persisted to the per-channel audit table.
#[derive(Debug, Clone)]
pub struct DeliveryAttempt {
    /// Submission the attempt belongs to.
    pub notification_id: String,
    /// Target recipient.
    pub user_id: String,
    /// Channel the attempt was made on.
    pub channel: ChannelKind,
    /// Destination address or device token.
    pub recipient: String,
    /// Subject (email) or title (push).
    pub subject: String,
    /// Template the content was rendered from.
    pub template_key: Option<String>,
    /// Sent or failed.
    pub status: AttemptStatus,
    /// Provider-assigned message id, when the send succeeded.
    pub provider_message_id: Option<String>,
    /// Provider HTTP status, when one was returned.
    pub provider_status_code: Option<u16>,
    /// Sweeper re-injections before this attempt.
    pub retry_count: u32,
    /// Failure description, when the send failed.
    pub error_message: Option<String>,
    /// Auxiliary message data.
    pub metadata: Option<Value>,
    /// When the attempt was made.
    pub attempt_at: DateTime<Utc>,
    /// When the provider accepted the message.
    pub sent_at: Option<DateTime<Utc>>,
    /// When the provider call failed.
    pub failed_at: Option<DateTime<Utc>>,
}

fn template_key_of(data: &serde_json::Map<String, Value>) -> Option<String> {
    data.get("template_key")
        .and_then(Value::as_str)
        .map(ToString::to_string)
}

impl DeliveryAttempt {
    /// Row for a successful email send.
    pub fn email_sent(message: &EmailMessage, receipt: &ProviderReceipt, retry_count: u32) -> Self {
        let now = Utc::now();
        Self {
            notification_id: message.notification_id.clone(),
            user_id: message.user_id.clone(),
            channel: ChannelKind::Email,
            recipient: message.to.clone(),
            subject: message.subject.clone(),
            template_key: template_key_of(&message.data),
            status: AttemptStatus::Sent,
            provider_message_id: receipt.message_id.clone(),
            provider_status_code: receipt.status_code,
            retry_count,
            error_message: None,
            metadata: Some(Value::Object(message.data.clone())),
            attempt_at: now,
            sent_at: Some(now),
            failed_at: None,
        }
    }

    /// Row for a failed email send.
    pub fn email_failed(message: &EmailMessage, error: &CourierError, retry_count: u32) -> Self {
        let now = Utc::now();
        Self {
            notification_id: message.notification_id.clone(),
            user_id: message.user_id.clone(),
            channel: ChannelKind::Email,
            recipient: message.to.clone(),
            subject: message.subject.clone(),
            template_key: template_key_of(&message.data),
            status: AttemptStatus::Failed,
            provider_message_id: None,
            provider_status_code: provider_status(error),
            retry_count,
            error_message: Some(error.to_string()),
            metadata: Some(Value::Object(message.data.clone())),
            attempt_at: now,
            sent_at: None,
            failed_at: Some(now),
        }
    }

    /// Row for a successful push send.
    pub fn push_sent(message: &PushMessage, receipt: &ProviderReceipt, retry_count: u32) -> Self {
        let now = Utc::now();
        Self {
            notification_id: message.notification_id.clone(),
            user_id: message.user_id.clone(),
            channel: ChannelKind::Push,
            recipient: message.target.clone(),
            subject: message.title.clone(),
            template_key: template_key_of(&message.data),
            status: AttemptStatus::Sent,
            provider_message_id: receipt.message_id.clone(),
            provider_status_code: receipt.status_code,
            retry_count,
            error_message: None,
            metadata: Some(Value::Object(message.data.clone())),
            attempt_at: now,
            sent_at: Some(now),
            failed_at: None,
        }
    }

    /// Row for a failed push send.
    pub fn push_failed(message: &PushMessage, error: &CourierError, retry_count: u32) -> Self {
        let now = Utc::now();
        Self {
            notification_id: message.notification_id.clone(),
            user_id: message.user_id.clone(),
            channel: ChannelKind::Push,
            recipient: message.target.clone(),
            subject: message.title.clone(),
            template_key: template_key_of(&message.data),
            status: AttemptStatus::Failed,
            provider_message_id: None,
            provider_status_code: provider_status(error),
            retry_count,
            error_message: Some(error.to_string()),
            metadata: Some(Value::Object(message.data.clone())),
            attempt_at: now,
            sent_at: None,
            failed_at: Some(now),
        }
    }
}

fn provider_status(error: &CourierError) -> Option<u16> {
    match error {
        CourierError::Provider { status_code, .. } => *status_code,
        _ => None,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Audit Repository
// ─────────────────────────────────────────────────────────────────────────────

/// Repository for delivery attempt persistence.
#[trait_variant::make(AuditLog: Send)]
pub trait LocalAuditLog {
    /// Append one attempt row.
    async fn record(&self, attempt: &DeliveryAttempt) -> Result<(), CourierError>;
}

/// Record an attempt, absorbing persistence failures.
pub async fn record_best_effort(audit: &impl AuditLog, attempt: &DeliveryAttempt) {
    if let Err(err) = audit.record(attempt).await {
        warn!(
            notification_id = %attempt.notification_id,
            channel = %attempt.channel,
            error = %err,
            "failed to persist delivery attempt"
        );
    }
}

/// Open the audit database pool from configuration.
pub async fn connect_audit_pool(config: &DatabaseConfig) -> Result<PgPool, CourierError> {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
        .connect(&config.url)
        .await
        .map_err(|e| CourierError::Database(e.to_string()))
}

/// PostgreSQL implementation of AuditLog.
pub struct PgAuditLog {
    pool: PgPool,
}

impl PgAuditLog {
    /// Create a new audit log with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl AuditLog for PgAuditLog {
    async fn record(&self, attempt: &DeliveryAttempt) -> Result<(), CourierError> {
        let query = match attempt.channel {
            ChannelKind::Email => {
                r#"
                INSERT INTO email_notifications_log (
                    notification_id, user_id, recipient, subject, template_key,
                    status, provider_message_id, provider_status_code,
                    retry_count, error_message, metadata,
                    created_at, sent_at, failed_at
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
                "#
            }
            ChannelKind::Push => {
                r#"
                INSERT INTO push_notifications_log (
                    notification_id, user_id, recipient, title, template_key,
                    status, provider_message_id, provider_status_code,
                    retry_count, error_message, metadata,
                    created_at, sent_at, failed_at
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
                "#
            }
        };

        sqlx::query(query)
            .bind(&attempt.notification_id)
            .bind(&attempt.user_id)
            .bind(&attempt.recipient)
            .bind(&attempt.subject)
            .bind(&attempt.template_key)
            .bind(attempt.status.as_db_str())
            .bind(&attempt.provider_message_id)
            .bind(attempt.provider_status_code.map(|c| c as i32))
            .bind(attempt.retry_count as i32)
            .bind(&attempt.error_message)
            .bind(&attempt.metadata)
            .bind(attempt.attempt_at)
            .bind(attempt.sent_at)
            .bind(attempt.failed_at)
            .execute(&self.pool)
            .await
            .map_err(|e| CourierError::Database(e.to_string()))?;

        Ok(())
    }
}

/// In-memory audit log for tests.
#[derive(Clone, Default)]
pub struct MemoryAuditLog {
    rows: Arc<Mutex<Vec<DeliveryAttempt>>>,
}

impl MemoryAuditLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// All rows recorded so far.
    pub async fn recorded(&self) -> Vec<DeliveryAttempt> {
        self.rows.lock().await.clone()
    }
}

impl AuditLog for MemoryAuditLog {
    async fn record(&self, attempt: &DeliveryAttempt) -> Result<(), CourierError> {
        self.rows.lock().await.push(attempt.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    fn email_message() -> EmailMessage {
        let mut data = Map::new();
        data.insert(
            "template_key".to_string(),
            Value::String("ORDER_CONFIRMATION".to_string()),
        );
        EmailMessage {
            notification_id: "n-1".to_string(),
            user_id: "user-1".to_string(),
            to: "alice@example.com".to_string(),
            subject: "Your Order ODR-745 is Confirmed!".to_string(),
            content: "<h1>Order Confirmed!</h1>".to_string(),
            template_id: None,
            data,
        }
    }

    #[test]
    fn test_sent_row_shape() {
        let receipt = ProviderReceipt {
            message_id: Some("msg-abc".to_string()),
            status_code: Some(202),
        };
        let attempt = DeliveryAttempt::email_sent(&email_message(), &receipt, 0);

        assert_eq!(attempt.status, AttemptStatus::Sent);
        assert_eq!(attempt.channel, ChannelKind::Email);
        assert_eq!(attempt.provider_message_id.as_deref(), Some("msg-abc"));
        assert_eq!(attempt.template_key.as_deref(), Some("ORDER_CONFIRMATION"));
        assert!(attempt.sent_at.is_some());
        assert!(attempt.failed_at.is_none());
        assert!(attempt.error_message.is_none());
    }

    #[test]
    fn test_failed_row_carries_provider_status() {
        let error = CourierError::Provider {
            message: "mail api returned 500".to_string(),
            status_code: Some(500),
        };
        let attempt = DeliveryAttempt::email_failed(&email_message(), &error, 2);

        assert_eq!(attempt.status, AttemptStatus::Failed);
        assert_eq!(attempt.provider_status_code, Some(500));
        assert_eq!(attempt.retry_count, 2);
        assert!(attempt.failed_at.is_some());
        assert!(attempt.sent_at.is_none());
        assert!(attempt
            .error_message
            .as_deref()
            .unwrap()
            .contains("mail api returned 500"));
    }

    #[tokio::test]
    async fn test_memory_log_appends() {
        let log = MemoryAuditLog::new();
        let receipt = ProviderReceipt::default();

        AuditLog::record(&log, &DeliveryAttempt::email_sent(&email_message(), &receipt, 0))
            .await
            .unwrap();
        AuditLog::record(
            &log,
            &DeliveryAttempt::email_failed(
                &email_message(),
                &CourierError::provider("boom"),
                1,
            ),
        )
        .await
        .unwrap();

        let rows = log.recorded().await;
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].status, AttemptStatus::Sent);
        assert_eq!(rows[1].status, AttemptStatus::Failed);
    }

    #[test]
    fn test_status_db_strings() {
        assert_eq!(AttemptStatus::Sent.as_db_str(), "sent");
        assert_eq!(AttemptStatus::Failed.as_db_str(), "failed");
    }
}
