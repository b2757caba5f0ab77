//! Profile service client.
//!
//! Fetches recipient delivery targets and preferences, protected by a
//! circuit breaker. Field names tolerate the drift between profile service
//! versions (`email` vs `email_address`, `phone` vs `phone_number`).

use std::time::Duration;

use reqwest::StatusCode;
use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::instrument;

use courier_common::{CourierError, CourierResult, UpstreamConfig};

use crate::breaker::CircuitBreaker;
use crate::upstream::{transport_error, unwrap_reply, INTERNAL_SECRET_HEADER};

const SERVICE: &str = "profile-service";

/// A recipient's delivery targets and preferences.
#[derive(Debug, Clone, Deserialize)]
pub struct RecipientProfile {
    /// Recipient identifier.
    #[serde(alias = "user_id")]
    pub recipient_id: String,

    /// Primary email address.
    #[serde(default, alias = "email_address")]
    pub email: Option<String>,

    /// Primary phone number.
    #[serde(default, alias = "phone_number")]
    pub phone: Option<String>,

    /// Device push token.
    #[serde(default)]
    pub push_token: Option<String>,

    /// Preferred language code.
    #[serde(default = "default_language", alias = "preferred_language")]
    pub language: String,

    /// Notification preferences, passed through to the envelope.
    #[serde(default)]
    pub preferences: Map<String, Value>,
}

fn default_language() -> String {
    "en".to_string()
}

impl RecipientProfile {
    /// Push token for the recipient. Older profile versions keep the FCM
    /// token inside preferences rather than as a first-class field.
    pub fn push_token(&self) -> Option<String> {
        self.push_token
            .clone()
            .filter(|t| !t.is_empty())
            .or_else(|| {
                self.preferences
                    .get("fcm_token")
                    .and_then(Value::as_str)
                    .filter(|t| !t.is_empty())
                    .map(ToString::to_string)
            })
    }
}

/// Breaker-protected client for the profile service.
pub struct ProfileClient {
    http: reqwest::Client,
    base_url: String,
    internal_secret: Secret<String>,
    breaker: CircuitBreaker,
}

impl ProfileClient {
    /// Build a client from upstream configuration.
    pub fn new(config: &UpstreamConfig) -> CourierResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| CourierError::Internal(e.to_string()))?;

        Ok(Self {
            http,
            base_url: config.profile_url.trim_end_matches('/').to_string(),
            internal_secret: Secret::new(config.internal_secret.clone()),
            breaker: CircuitBreaker::with_defaults(SERVICE),
        })
    }

    /// The breaker guarding this client.
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Fetch a recipient profile by id.
    #[instrument(skip(self), fields(service = SERVICE))]
    pub async fn get_profile(&self, recipient_id: &str) -> CourierResult<RecipientProfile> {
        self.breaker.check()?;

        let url = format!("{}/v1/users/{}", self.base_url, recipient_id);
        let response = self
            .http
            .get(&url)
            .header(INTERNAL_SECRET_HEADER, self.internal_secret.expose_secret())
            .send()
            .await;

        let response = match response {
            Ok(response) => {
                // A well-formed response of any status is excluded from the
                // breaker's failure budget.
                self.breaker.record_success();
                response
            }
            Err(err) => {
                self.breaker.record_failure();
                return Err(transport_error(SERVICE, &err));
            }
        };

        match response.status() {
            StatusCode::NOT_FOUND => Err(CourierError::RecipientNotFound(
                recipient_id.to_string(),
            )),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(CourierError::Unauthorized {
                service: SERVICE.to_string(),
            }),
            status if status.is_success() => {
                let body: Value = response
                    .json()
                    .await
                    .map_err(|e| CourierError::Internal(format!("profile response: {e}")))?;
                let profile: RecipientProfile = serde_json::from_value(unwrap_reply(body))
                    .map_err(|e| CourierError::Internal(format!("profile response: {e}")))?;
                Ok(profile)
            }
            status => Err(CourierError::UpstreamUnavailable {
                service: SERVICE.to_string(),
                reason: format!("unexpected status {status}"),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_accepts_legacy_field_names() {
        let json = serde_json::json!({
            "user_id": "user-123",
            "email_address": "alice@example.com",
            "phone_number": "+14155550001",
            "preferred_language": "en-US",
            "preferences": { "email_enabled": true }
        });

        let profile: RecipientProfile = serde_json::from_value(json).unwrap();
        assert_eq!(profile.recipient_id, "user-123");
        assert_eq!(profile.email.as_deref(), Some("alice@example.com"));
        assert_eq!(profile.phone.as_deref(), Some("+14155550001"));
        assert_eq!(profile.language, "en-US");
    }

    #[test]
    fn test_push_token_falls_back_to_preferences() {
        let json = serde_json::json!({
            "recipient_id": "user-1",
            "preferences": { "fcm_token": "fcm-abc" }
        });
        let profile: RecipientProfile = serde_json::from_value(json).unwrap();
        assert_eq!(profile.push_token(), Some("fcm-abc".to_string()));
    }

    #[test]
    fn test_language_defaults_to_en() {
        let json = serde_json::json!({ "recipient_id": "user-1" });
        let profile: RecipientProfile = serde_json::from_value(json).unwrap();
        assert_eq!(profile.language, "en");
        assert!(profile.push_token().is_none());
    }
}
