//! Provider capability traits and implementations.
//!
//! One interface per channel, two implementations each: an HTTP client for
//! the real provider and a simulated provider selected at startup when no
//! API key is configured.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, Secret};
use serde_json::{json, Value};
use tracing::{info, instrument};
use uuid::Uuid;

use courier_common::{
    CourierError, CourierResult, EmailMessage, EmailProviderConfig, PushMessage,
    PushProviderConfig,
};

/// Provider acknowledgement of an accepted message.
#[derive(Debug, Clone, Default)]
pub struct ProviderReceipt {
    /// Provider-assigned message id.
    pub message_id: Option<String>,
    /// HTTP status the provider answered with.
    pub status_code: Option<u16>,
}

/// Send-one-email capability.
#[async_trait]
pub trait EmailProvider: Send + Sync {
    /// Deliver one email. Success is a 2xx provider response.
    async fn send(&self, message: &EmailMessage) -> CourierResult<ProviderReceipt>;
}

/// Send-one-push capability.
#[async_trait]
pub trait PushProvider: Send + Sync {
    /// Deliver one push notification. Success is a normal return with an
    /// assigned message id.
    async fn send(&self, message: &PushMessage) -> CourierResult<ProviderReceipt>;
}

/// Select the email provider implementation from configuration.
pub fn email_provider_from_config(
    config: &EmailProviderConfig,
) -> CourierResult<Arc<dyn EmailProvider>> {
    match config.api_key {
        Some(_) => Ok(Arc::new(HttpEmailProvider::new(config)?)),
        None => {
            info!("no email API key configured, email sending will be simulated");
            Ok(Arc::new(SimulatedEmailProvider))
        }
    }
}

/// Select the push provider implementation from configuration.
pub fn push_provider_from_config(
    config: &PushProviderConfig,
) -> CourierResult<Arc<dyn PushProvider>> {
    match config.api_key {
        Some(_) => Ok(Arc::new(HttpPushProvider::new(config)?)),
        None => {
            info!("no push API key configured, push sending will be simulated");
            Ok(Arc::new(SimulatedPushProvider))
        }
    }
}

/// HTTP client for a third-party mail API.
pub struct HttpEmailProvider {
    http: reqwest::Client,
    api_url: String,
    api_key: Secret<String>,
    from_email: String,
}

impl HttpEmailProvider {
    /// Build a provider from configuration; requires an API key.
    pub fn new(config: &EmailProviderConfig) -> CourierResult<Self> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| CourierError::Configuration("email provider API key missing".into()))?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| CourierError::Internal(e.to_string()))?;

        Ok(Self {
            http,
            api_url: config.api_url.clone(),
            api_key: Secret::new(api_key),
            from_email: config.from_email.clone(),
        })
    }
}

#[async_trait]
impl EmailProvider for HttpEmailProvider {
    #[instrument(skip_all, fields(to = %message.to))]
    async fn send(&self, message: &EmailMessage) -> CourierResult<ProviderReceipt> {
        let body = json!({
            "personalizations": [{ "to": [{ "email": message.to }] }],
            "from": { "email": self.from_email },
            "subject": message.subject,
            "content": [{ "type": "text/html", "value": message.content }],
        });

        let response = self
            .http
            .post(&self.api_url)
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| CourierError::provider(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            let message_id = response
                .headers()
                .get("X-Message-Id")
                .and_then(|v| v.to_str().ok())
                .map(ToString::to_string);
            info!(status = %status, "email accepted by provider");
            Ok(ProviderReceipt {
                message_id,
                status_code: Some(status.as_u16()),
            })
        } else {
            let detail = response.text().await.unwrap_or_default();
            Err(CourierError::Provider {
                message: format!("mail api returned {status}: {detail}"),
                status_code: Some(status.as_u16()),
            })
        }
    }
}

/// HTTP client for a push messaging API.
pub struct HttpPushProvider {
    http: reqwest::Client,
    api_url: String,
    api_key: Secret<String>,
}

impl HttpPushProvider {
    /// Build a provider from configuration; requires an API key.
    pub fn new(config: &PushProviderConfig) -> CourierResult<Self> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| CourierError::Configuration("push provider API key missing".into()))?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| CourierError::Internal(e.to_string()))?;

        Ok(Self {
            http,
            api_url: config.api_url.clone(),
            api_key: Secret::new(api_key),
        })
    }
}

#[async_trait]
impl PushProvider for HttpPushProvider {
    #[instrument(skip_all, fields(notification_id = %message.notification_id))]
    async fn send(&self, message: &PushMessage) -> CourierResult<ProviderReceipt> {
        let body = json!({
            "token": message.target,
            "notification": {
                "title": message.title,
                "body": message.body,
            },
            "data": message.data,
        });

        let response = self
            .http
            .post(&self.api_url)
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| CourierError::provider(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            let payload: Value = response.json().await.unwrap_or(Value::Null);
            let message_id = payload
                .get("message_id")
                .or_else(|| payload.get("name"))
                .and_then(Value::as_str)
                .map(ToString::to_string);
            info!(status = %status, "push accepted by provider");
            Ok(ProviderReceipt {
                message_id,
                status_code: Some(status.as_u16()),
            })
        } else {
            let detail = response.text().await.unwrap_or_default();
            Err(CourierError::Provider {
                message: format!("push api returned {status}: {detail}"),
                status_code: Some(status.as_u16()),
            })
        }
    }
}

/// Email provider that logs instead of sending.
pub struct SimulatedEmailProvider;

#[async_trait]
impl EmailProvider for SimulatedEmailProvider {
    async fn send(&self, message: &EmailMessage) -> CourierResult<ProviderReceipt> {
        info!(
            to = %message.to,
            subject = %message.subject,
            "[simulated] email send"
        );
        Ok(ProviderReceipt {
            message_id: Some(format!("simulated-{}", Uuid::new_v4())),
            status_code: Some(202),
        })
    }
}

/// Push provider that logs instead of sending.
pub struct SimulatedPushProvider;

#[async_trait]
impl PushProvider for SimulatedPushProvider {
    async fn send(&self, message: &PushMessage) -> CourierResult<ProviderReceipt> {
        info!(
            target = %message.target,
            title = %message.title,
            "[simulated] push send"
        );
        Ok(ProviderReceipt {
            message_id: Some(format!("simulated-{}", Uuid::new_v4())),
            status_code: Some(200),
        })
    }
}
