//! Test fixtures shared across the integration suite.

use serde_json::Map;

use courier_common::{
    DeliveryTargets, Envelope, EnvelopeMetadata, RenderedContent, SubmissionId,
};

/// A submission captured mid-pipeline, ready to be routed and delivered.
pub struct TestFixture {
    /// The submission the envelope belongs to.
    pub submission_id: SubmissionId,
    /// The envelope as the gateway would publish it.
    pub envelope: Envelope,
}

impl TestFixture {
    /// An order-confirmation envelope with both email and push targets.
    pub fn order_confirmation() -> Self {
        let submission_id = SubmissionId::new();
        let envelope = Envelope {
            recipient_id: "user-123".to_string(),
            delivery_targets: DeliveryTargets {
                email: Some("alice@example.com".to_string()),
                phone: Some("+14155550001".to_string()),
                push_token: Some("fcm-token-1".to_string()),
            },
            preferences: Map::new(),
            rendered: RenderedContent {
                subject: "Your Order ODR-745 is Confirmed!".to_string(),
                body_text: "Hi Alice,\n\nThanks for your purchase.".to_string(),
                body_html: "<h1>Order Confirmed!</h1>".to_string(),
            },
            metadata: EnvelopeMetadata {
                template_key: "ORDER_CONFIRMATION".to_string(),
                language: "en".to_string(),
                submission_id,
                idempotency_key: None,
            },
        };
        Self {
            submission_id,
            envelope,
        }
    }

    /// An envelope with only an email target.
    pub fn email_only() -> Self {
        let mut fixture = Self::order_confirmation();
        fixture.envelope.delivery_targets.phone = None;
        fixture.envelope.delivery_targets.push_token = None;
        fixture
    }
}
