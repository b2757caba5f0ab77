//! Template service client.
//!
//! Renders a content template by key with submission data, protected by a
//! circuit breaker identical in policy to the profile client's. An
//! unresolved placeholder is an upstream 400, surfaced as missing template
//! data, never a silent blank.

use std::time::Duration;

use reqwest::StatusCode;
use secrecy::{ExposeSecret, Secret};
use serde_json::{json, Map, Value};
use tracing::instrument;

use courier_common::{CourierError, CourierResult, RenderedContent, UpstreamConfig};

use crate::breaker::CircuitBreaker;
use crate::upstream::{error_detail, transport_error, unwrap_reply, INTERNAL_SECRET_HEADER};

const SERVICE: &str = "template-service";

/// Breaker-protected client for the template service.
pub struct TemplateClient {
    http: reqwest::Client,
    base_url: String,
    internal_secret: Secret<String>,
    breaker: CircuitBreaker,
}

impl TemplateClient {
    /// Build a client from upstream configuration.
    pub fn new(config: &UpstreamConfig) -> CourierResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| CourierError::Internal(e.to_string()))?;

        Ok(Self {
            http,
            base_url: config.template_url.trim_end_matches('/').to_string(),
            internal_secret: Secret::new(config.internal_secret.clone()),
            breaker: CircuitBreaker::with_defaults(SERVICE),
        })
    }

    /// The breaker guarding this client.
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Render a template with the given data.
    #[instrument(skip(self, data), fields(service = SERVICE))]
    pub async fn render(
        &self,
        template_key: &str,
        data: &Map<String, Value>,
    ) -> CourierResult<RenderedContent> {
        self.breaker.check()?;

        let url = format!("{}/v1/templates/render", self.base_url);
        let response = self
            .http
            .post(&url)
            .header(INTERNAL_SECRET_HEADER, self.internal_secret.expose_secret())
            .json(&json!({
                "template_key": template_key,
                "message_data": data,
            }))
            .send()
            .await;

        let response = match response {
            Ok(response) => {
                self.breaker.record_success();
                response
            }
            Err(err) => {
                self.breaker.record_failure();
                return Err(transport_error(SERVICE, &err));
            }
        };

        match response.status() {
            StatusCode::NOT_FOUND => Err(CourierError::TemplateNotFound(template_key.to_string())),
            StatusCode::BAD_REQUEST => {
                let detail = response
                    .json::<Value>()
                    .await
                    .ok()
                    .as_ref()
                    .and_then(error_detail)
                    .unwrap_or_else(|| {
                        format!("template '{template_key}' could not be rendered")
                    });
                Err(CourierError::MissingTemplateData(detail))
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(CourierError::Unauthorized {
                service: SERVICE.to_string(),
            }),
            status if status.is_success() => {
                let body: Value = response
                    .json()
                    .await
                    .map_err(|e| CourierError::Internal(format!("template response: {e}")))?;
                let rendered: RenderedContent = serde_json::from_value(unwrap_reply(body))
                    .map_err(|e| CourierError::Internal(format!("template response: {e}")))?;
                Ok(rendered)
            }
            status => Err(CourierError::UpstreamUnavailable {
                service: SERVICE.to_string(),
                reason: format!("unexpected status {status}"),
            }),
        }
    }
}
