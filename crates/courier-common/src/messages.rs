//! Wire message types carried over the broker.
//!
//! The gateway publishes an [`Envelope`] on the ingress queue; the router
//! narrows it into per-channel messages ([`EmailMessage`], [`PushMessage`]).
//! All payloads are JSON, UTF-8, persistent delivery mode.
//!
//! Deserialization tolerates the field names used by earlier producers
//! (`user_id`, `rendered_content`, `body`/`html_body`) for one migration
//! window; serialization always emits the canonical names.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::CourierResult;
use crate::types::{ChannelKind, SubmissionId};

/// Addresses a notification can be delivered to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryTargets {
    /// Email address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    /// Phone number (E.164).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,

    /// Device push token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub push_token: Option<String>,
}

impl DeliveryTargets {
    /// Email target, if present and non-empty.
    pub fn email(&self) -> Option<&str> {
        self.email.as_deref().filter(|e| !e.is_empty())
    }

    /// Push target: the device token when present, otherwise the phone number.
    pub fn push_target(&self) -> Option<&str> {
        self.push_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .or_else(|| self.phone.as_deref().filter(|p| !p.is_empty()))
    }

    /// Whether any target at all is present.
    pub fn is_empty(&self) -> bool {
        self.email().is_none() && self.push_target().is_none()
    }
}

/// Rendered template content carried by an envelope.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedContent {
    /// Final subject line.
    pub subject: String,

    /// Plain text body.
    #[serde(default, alias = "body")]
    pub body_text: String,

    /// HTML body.
    #[serde(default, alias = "html_body", alias = "html", alias = "content")]
    pub body_html: String,
}

impl RenderedContent {
    /// Best body for an email: HTML when available, plain text otherwise.
    pub fn email_content(&self) -> &str {
        if self.body_html.is_empty() {
            &self.body_text
        } else {
            &self.body_html
        }
    }
}

/// Submission metadata threaded through the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvelopeMetadata {
    /// Template the content was rendered from.
    pub template_key: String,

    /// Recipient's preferred language.
    #[serde(default = "default_language", alias = "preferred_language")]
    pub language: String,

    /// Submission that produced this envelope.
    pub submission_id: SubmissionId,

    /// Client idempotency key, when one was supplied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

fn default_language() -> String {
    "en".to_string()
}

/// The single broker message produced per accepted submission.
///
/// Contains everything needed to deliver to any number of channels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Target recipient.
    #[serde(alias = "user_id")]
    pub recipient_id: String,

    /// Channel addresses for the recipient.
    pub delivery_targets: DeliveryTargets,

    /// Recipient notification preferences, passed through unmodified.
    #[serde(default, alias = "user_preferences")]
    pub preferences: Map<String, Value>,

    /// Rendered template content.
    #[serde(alias = "rendered_content")]
    pub rendered: RenderedContent,

    /// Submission metadata.
    pub metadata: EnvelopeMetadata,
}

impl Envelope {
    /// Serialize to bytes.
    pub fn to_bytes(&self) -> CourierResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Deserialize from bytes.
    pub fn from_bytes(bytes: &[u8]) -> CourierResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Per-channel message consumed by the email worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailMessage {
    /// Submission this message belongs to.
    pub notification_id: String,

    /// Target recipient.
    pub user_id: String,

    /// Destination address.
    pub to: String,

    /// Subject line.
    pub subject: String,

    /// Email content (HTML when available).
    pub content: String,

    /// Provider-side template, unused when content is pre-rendered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_id: Option<String>,

    /// Auxiliary data (template key, language).
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl EmailMessage {
    /// Serialize to bytes.
    pub fn to_bytes(&self) -> CourierResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Deserialize from bytes.
    pub fn from_bytes(bytes: &[u8]) -> CourierResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Per-channel message consumed by the push worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushMessage {
    /// Submission this message belongs to.
    pub notification_id: String,

    /// Target recipient.
    pub user_id: String,

    /// Device token or phone number.
    pub target: String,

    /// Notification title.
    pub title: String,

    /// Notification body.
    pub body: String,

    /// Auxiliary data (template key, language, user id).
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl PushMessage {
    /// Serialize to bytes.
    pub fn to_bytes(&self) -> CourierResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Deserialize from bytes.
    pub fn from_bytes(bytes: &[u8]) -> CourierResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// A channel message together with the channel it belongs to.
#[derive(Debug, Clone)]
pub enum ChannelMessage {
    /// Message bound for the email queue.
    Email(EmailMessage),
    /// Message bound for the push queue.
    Push(PushMessage),
}

impl ChannelMessage {
    /// The channel this message is narrowed to.
    pub fn channel(&self) -> ChannelKind {
        match self {
            ChannelMessage::Email(_) => ChannelKind::Email,
            ChannelMessage::Push(_) => ChannelKind::Push,
        }
    }

    /// Routing key on the direct exchange.
    pub fn routing_key(&self) -> &'static str {
        self.channel().routing_key()
    }

    /// Serialize the inner message to bytes.
    pub fn to_bytes(&self) -> CourierResult<Vec<u8>> {
        match self {
            ChannelMessage::Email(m) => m.to_bytes(),
            ChannelMessage::Push(m) => m.to_bytes(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_envelope() -> Envelope {
        Envelope {
            recipient_id: "user-123".to_string(),
            delivery_targets: DeliveryTargets {
                email: Some("alice@example.com".to_string()),
                phone: Some("+14155550001".to_string()),
                push_token: None,
            },
            preferences: Map::new(),
            rendered: RenderedContent {
                subject: "Your Order ODR-745 is Confirmed!".to_string(),
                body_text: "Hi Alice".to_string(),
                body_html: "<p>Hi Alice</p>".to_string(),
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
    fn test_envelope_roundtrip() {
        let envelope = sample_envelope();
        let bytes = envelope.to_bytes().unwrap();
        let decoded = Envelope::from_bytes(&bytes).unwrap();

        assert_eq!(decoded.recipient_id, envelope.recipient_id);
        assert_eq!(decoded.rendered.subject, envelope.rendered.subject);
        assert_eq!(
            decoded.metadata.submission_id,
            envelope.metadata.submission_id
        );
    }

    #[test]
    fn test_envelope_accepts_legacy_field_names() {
        let legacy = serde_json::json!({
            "user_id": "user-9",
            "delivery_targets": { "email": "bob@example.com", "phone": "" },
            "user_preferences": { "email_enabled": true },
            "rendered_content": {
                "subject": "Hello",
                "body": "plain",
                "html_body": "<b>rich</b>"
            },
            "metadata": {
                "template_key": "WELCOME",
                "preferred_language": "fr-FR",
                "submission_id": uuid::Uuid::new_v4()
            }
        });

        let envelope: Envelope = serde_json::from_value(legacy).unwrap();
        assert_eq!(envelope.recipient_id, "user-9");
        assert_eq!(envelope.rendered.body_text, "plain");
        assert_eq!(envelope.rendered.body_html, "<b>rich</b>");
        assert_eq!(envelope.metadata.language, "fr-FR");
        assert!(envelope.preferences.contains_key("email_enabled"));
    }

    #[test]
    fn test_rendered_content_accepts_content_alias() {
        let json = serde_json::json!({
            "subject": "S",
            "content": "<p>only html</p>"
        });
        let rendered: RenderedContent = serde_json::from_value(json).unwrap();
        assert_eq!(rendered.body_html, "<p>only html</p>");
        assert_eq!(rendered.body_text, "");
        assert_eq!(rendered.email_content(), "<p>only html</p>");
    }

    #[test]
    fn test_language_defaults_to_en() {
        let json = serde_json::json!({
            "template_key": "WELCOME",
            "submission_id": uuid::Uuid::new_v4()
        });
        let metadata: EnvelopeMetadata = serde_json::from_value(json).unwrap();
        assert_eq!(metadata.language, "en");
    }

    #[test]
    fn test_push_target_prefers_token_over_phone() {
        let targets = DeliveryTargets {
            email: None,
            phone: Some("+15550000000".to_string()),
            push_token: Some("fcm-token-1".to_string()),
        };
        assert_eq!(targets.push_target(), Some("fcm-token-1"));

        let phone_only = DeliveryTargets {
            email: None,
            phone: Some("+15550000000".to_string()),
            push_token: None,
        };
        assert_eq!(phone_only.push_target(), Some("+15550000000"));
    }

    #[test]
    fn test_empty_strings_are_not_targets() {
        let targets = DeliveryTargets {
            email: Some(String::new()),
            phone: Some(String::new()),
            push_token: None,
        };
        assert!(targets.is_empty());
        assert!(targets.email().is_none());
        assert!(targets.push_target().is_none());
    }

    #[test]
    fn test_channel_message_routing() {
        let email = ChannelMessage::Email(EmailMessage {
            notification_id: "n-1".to_string(),
            user_id: "user-1".to_string(),
            to: "a@b.c".to_string(),
            subject: "S".to_string(),
            content: "C".to_string(),
            template_id: None,
            data: Map::new(),
        });
        assert_eq!(email.channel(), ChannelKind::Email);
        assert_eq!(email.routing_key(), "notify.email");
    }

    #[test]
    fn test_email_message_wire_shape() {
        let message = EmailMessage {
            notification_id: "n-1".to_string(),
            user_id: "user-1".to_string(),
            to: "a@b.c".to_string(),
            subject: "S".to_string(),
            content: "C".to_string(),
            template_id: None,
            data: Map::new(),
        };
        let value = serde_json::to_value(&message).unwrap();
        let obj = value.as_object().unwrap();
        assert!(obj.contains_key("notification_id"));
        assert!(obj.contains_key("to"));
        assert!(obj.contains_key("content"));
        // absent optional fields stay off the wire
        assert!(!obj.contains_key("template_id"));
    }
}
