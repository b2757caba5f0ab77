//! Cross-crate pipeline tests over in-memory capability implementations.
//!
//! These exercise the component seams the broker normally sits between:
//! envelope serialization at the gateway/router boundary, fan-out planning,
//! and provider calls with audit rows.

use courier_delivery::{
    plan_fanout, process_email, process_push, AttemptStatus, MemoryAuditLog,
    SimulatedEmailProvider, SimulatedPushProvider,
};
use courier_integration_tests::common::TestFixture;

use courier_common::{ChannelKind, ChannelMessage, Envelope};

#[tokio::test]
async fn envelope_flows_from_fanout_to_audited_delivery() -> anyhow::Result<()> {
    let fixture = TestFixture::order_confirmation();
    let audit = MemoryAuditLog::new();

    // The gateway serializes the envelope; the router decodes it.
    let bytes = fixture.envelope.to_bytes()?;
    let decoded = Envelope::from_bytes(&bytes)?;

    let plan = plan_fanout(&decoded);
    assert_eq!(plan.len(), 2);

    for message in &plan {
        match message {
            ChannelMessage::Email(email) => {
                process_email(&SimulatedEmailProvider, &audit, email, 0).await?;
            }
            ChannelMessage::Push(push) => {
                process_push(&SimulatedPushProvider, &audit, push, 0).await?;
            }
        }
    }

    let rows = audit.recorded().await;
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|r| r.status == AttemptStatus::Sent));
    assert!(rows
        .iter()
        .all(|r| r.notification_id == fixture.submission_id.to_string()));

    let channels: Vec<ChannelKind> = rows.iter().map(|r| r.channel).collect();
    assert!(channels.contains(&ChannelKind::Email));
    assert!(channels.contains(&ChannelKind::Push));

    Ok(())
}

#[tokio::test]
async fn email_only_envelope_produces_single_channel_attempt() {
    let fixture = TestFixture::email_only();
    let audit = MemoryAuditLog::new();

    let plan = plan_fanout(&fixture.envelope);
    assert_eq!(plan.len(), 1);
    assert_eq!(plan[0].channel(), ChannelKind::Email);

    let ChannelMessage::Email(ref email) = plan[0] else {
        panic!("expected an email message");
    };
    process_email(&SimulatedEmailProvider, &audit, email, 0)
        .await
        .unwrap();

    let rows = audit.recorded().await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].recipient, "alice@example.com");
    assert_eq!(rows[0].subject, "Your Order ODR-745 is Confirmed!");
    assert_eq!(
        rows[0].template_key.as_deref(),
        Some("ORDER_CONFIRMATION")
    );
}

#[tokio::test]
async fn transient_failure_then_success_leaves_failed_and_sent_rows() {
    use async_trait::async_trait;
    use courier_common::{CourierError, CourierResult, EmailMessage};
    use courier_delivery::{EmailProvider, ProviderReceipt};

    struct FlakyOnce {
        failed: std::sync::Mutex<bool>,
    }

    #[async_trait]
    impl EmailProvider for FlakyOnce {
        async fn send(&self, _message: &EmailMessage) -> CourierResult<ProviderReceipt> {
            let mut failed = self.failed.lock().unwrap();
            if !*failed {
                *failed = true;
                return Err(CourierError::Provider {
                    message: "mail api returned 500".to_string(),
                    status_code: Some(500),
                });
            }
            Ok(ProviderReceipt {
                message_id: Some("msg-retry-ok".to_string()),
                status_code: Some(202),
            })
        }
    }

    let fixture = TestFixture::email_only();
    let audit = MemoryAuditLog::new();
    let provider = FlakyOnce {
        failed: std::sync::Mutex::new(false),
    };

    let plan = plan_fanout(&fixture.envelope);
    let ChannelMessage::Email(ref email) = plan[0] else {
        panic!("expected an email message");
    };

    // First attempt fails and would dead-letter with x-retry-count 0.
    assert!(process_email(&provider, &audit, email, 0).await.is_err());

    // The sweeper re-injects with x-retry-count 1; the retry succeeds.
    process_email(&provider, &audit, email, 1).await.unwrap();

    let rows = audit.recorded().await;
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].status, AttemptStatus::Failed);
    assert_eq!(rows[0].retry_count, 0);
    assert_eq!(rows[1].status, AttemptStatus::Sent);
    assert_eq!(rows[1].retry_count, 1);
    assert_eq!(rows[1].provider_message_id.as_deref(), Some("msg-retry-ok"));
}

#[test]
fn channel_message_bodies_survive_the_wire_unchanged() {
    let fixture = TestFixture::order_confirmation();
    let plan = plan_fanout(&fixture.envelope);

    for message in &plan {
        // A dead-lettered body is republished verbatim; the only transform a
        // message ever goes through is this serialize/deserialize pair.
        let bytes = message.to_bytes().unwrap();
        match message {
            ChannelMessage::Email(email) => {
                let decoded = courier_common::EmailMessage::from_bytes(&bytes).unwrap();
                assert_eq!(decoded.to, email.to);
                assert_eq!(decoded.subject, email.subject);
                assert_eq!(decoded.content, email.content);
                assert_eq!(bytes, decoded.to_bytes().unwrap());
            }
            ChannelMessage::Push(push) => {
                let decoded = courier_common::PushMessage::from_bytes(&bytes).unwrap();
                assert_eq!(decoded.target, push.target);
                assert_eq!(bytes, decoded.to_bytes().unwrap());
            }
        }
    }
}
