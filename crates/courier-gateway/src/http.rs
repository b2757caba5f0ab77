//! HTTP submission API.
//!
//! The single ingress surface of the pipeline. This module is also the only
//! place error kinds are translated into HTTP status codes; every layer
//! below it returns `CourierError` values untouched.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tower_http::trace::TraceLayer;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use courier_broker::EnvelopePublisher;
use courier_common::{
    health_check, CourierError, CourierResult, DeliveryTargets, Envelope, EnvelopeMetadata,
    SubmissionId,
};

use crate::idempotency::{IdempotencyRecord, SnapshotStore};
use crate::profile::ProfileClient;
use crate::template::TemplateClient;
use crate::upstream::{IDEMPOTENCY_KEY_HEADER, REQUEST_ID_HEADER};

/// Subject substituted when a template renders an empty one.
const FALLBACK_SUBJECT: &str = "Notification";

/// Everything a submission handler needs, built once at startup and
/// threaded through the router.
#[derive(Clone)]
pub struct AppState {
    /// Profile lookup capability.
    pub profile: Arc<ProfileClient>,
    /// Template render capability.
    pub template: Arc<TemplateClient>,
    /// Idempotency snapshot store.
    pub idempotency: Arc<dyn SnapshotStore>,
    /// Ingress queue publisher.
    pub publisher: Arc<dyn EnvelopePublisher>,
}

impl AppState {
    /// Wire up the full state from configuration: upstream clients, the
    /// Redis idempotency store, and a broker publisher pool.
    pub async fn from_config(config: &courier_common::CourierConfig) -> CourierResult<Self> {
        let idempotency = crate::idempotency::RedisSnapshotStore::new(&config.redis).await?;
        let publisher = courier_broker::PublisherPool::new(&config.broker).await?;

        Ok(Self {
            profile: Arc::new(ProfileClient::new(&config.upstreams)?),
            template: Arc::new(TemplateClient::new(&config.upstreams)?),
            idempotency: Arc::new(idempotency),
            publisher: Arc::new(publisher),
        })
    }
}

/// Build the gateway router.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/v1/notifications", post(submit_notification))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// A client notification submission.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SubmissionRequest {
    /// Target recipient id.
    #[serde(alias = "user_id")]
    #[validate(length(min = 1, message = "recipient_id must not be empty"))]
    pub recipient_id: String,

    /// Template to render.
    #[validate(length(min = 1, message = "template_key must not be empty"))]
    pub template_key: String,

    /// Data for template interpolation.
    #[serde(default, alias = "message_data")]
    pub data: Map<String, Value>,
}

/// Body returned for an accepted submission.
#[derive(Debug, Serialize)]
struct SubmissionAccepted {
    submission_id: SubmissionId,
    recipient_id: String,
    template_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    idempotency_key: Option<String>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

async fn health() -> impl IntoResponse {
    Json(health_check())
}

#[instrument(
    skip_all,
    fields(
        recipient_id = %request.recipient_id,
        template_key = %request.template_key,
        request_id = tracing::field::Empty,
    )
)]
async fn submit_notification(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<SubmissionRequest>,
) -> Response {
    let request_id = headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(ToString::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    tracing::Span::current().record("request_id", tracing::field::display(&request_id));

    let idempotency_key = headers
        .get(IDEMPOTENCY_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(ToString::to_string);

    match handle_submission(&state, request, idempotency_key.as_deref()).await {
        Ok(body) => (
            StatusCode::ACCEPTED,
            [(REQUEST_ID_HEADER, request_id)],
            Json(body),
        )
            .into_response(),
        Err(err) => {
            warn!(error = %err, "submission rejected");
            (
                status_for(&err),
                [(REQUEST_ID_HEADER, request_id)],
                Json(ErrorBody {
                    error: error_code(&err),
                    message: err.to_string(),
                }),
            )
                .into_response()
        }
    }
}

/// The submission flow: validate, replay, enrich, render, enqueue.
///
/// Profile lookup runs before template rendering so an unknown recipient
/// short-circuits the render. The gateway never retries upstream calls (the
/// breakers are the only resilience at this layer) and retries a failed
/// publish exactly once.
async fn handle_submission(
    state: &AppState,
    request: SubmissionRequest,
    idempotency_key: Option<&str>,
) -> CourierResult<Value> {
    request
        .validate()
        .map_err(|e| CourierError::Validation(e.to_string()))?;

    if let Some(key) = idempotency_key {
        match state.idempotency.get(key).await {
            Ok(Some(record)) => {
                info!(key, "replaying cached submission response");
                return Ok(record.response_snapshot);
            }
            Ok(None) => {}
            Err(err) => {
                // Fail open: an unreachable idempotency backend must not
                // block submissions; the worst case is a duplicate enqueue.
                warn!(key, error = %err, "idempotency lookup failed, proceeding");
            }
        }
    }

    let profile = state.profile.get_profile(&request.recipient_id).await?;
    let mut rendered = state
        .template
        .render(&request.template_key, &request.data)
        .await?;

    if rendered.subject.is_empty() {
        warn!("template rendered an empty subject, using fallback");
        rendered.subject = FALLBACK_SUBJECT.to_string();
    }

    let delivery_targets = DeliveryTargets {
        email: profile.email.clone(),
        phone: profile.phone.clone(),
        push_token: profile.push_token(),
    };
    if delivery_targets.is_empty() {
        warn!(
            recipient_id = %request.recipient_id,
            "no delivery targets on profile, enqueueing anyway"
        );
    }

    let submission_id = SubmissionId::new();
    let envelope = Envelope {
        recipient_id: profile.recipient_id.clone(),
        delivery_targets,
        preferences: profile.preferences.clone(),
        rendered,
        metadata: EnvelopeMetadata {
            template_key: request.template_key.clone(),
            language: profile.language.clone(),
            submission_id,
            idempotency_key: idempotency_key.map(ToString::to_string),
        },
    };

    if let Err(first) = state.publisher.publish_envelope(&envelope).await {
        warn!(error = %first, "ingress publish failed, retrying once");
        state.publisher.publish_envelope(&envelope).await?;
    }

    let body = serde_json::to_value(SubmissionAccepted {
        submission_id,
        recipient_id: request.recipient_id,
        template_key: request.template_key,
        idempotency_key: idempotency_key.map(ToString::to_string),
    })?;

    if let Some(key) = idempotency_key {
        let record = IdempotencyRecord::new(body.clone());
        if let Err(err) = state.idempotency.put(key, &record).await {
            // The enqueue already happened; a lost cache entry only
            // degrades to a duplicate enqueue on resubmission.
            warn!(key, error = %err, "failed to store idempotency record");
        }
    }

    info!(%submission_id, "notification queued for delivery");
    Ok(body)
}

fn status_for(err: &CourierError) -> StatusCode {
    match err {
        CourierError::Validation(_) | CourierError::MissingTemplateData(_) => {
            StatusCode::BAD_REQUEST
        }
        CourierError::RecipientNotFound(_) | CourierError::TemplateNotFound(_) => {
            StatusCode::NOT_FOUND
        }
        CourierError::CircuitOpen { .. }
        | CourierError::UpstreamUnavailable { .. }
        | CourierError::BrokerUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_code(err: &CourierError) -> &'static str {
    match err {
        CourierError::Validation(_) => "validation_failed",
        CourierError::MissingTemplateData(_) => "missing_template_data",
        CourierError::RecipientNotFound(_) => "recipient_not_found",
        CourierError::TemplateNotFound(_) => "template_not_found",
        CourierError::CircuitOpen { .. } => "circuit_open",
        CourierError::UpstreamUnavailable { .. } => "upstream_unavailable",
        CourierError::BrokerUnavailable(_) => "broker_unavailable",
        CourierError::Unauthorized { .. } => "internal_misconfiguration",
        _ => "internal_error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            status_for(&CourierError::Validation("bad".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(&CourierError::MissingTemplateData("order_id".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(&CourierError::RecipientNotFound("user-1".into())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_for(&CourierError::TemplateNotFound("X".into())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_for(&CourierError::CircuitOpen {
                service: "profile-service".into()
            }),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_for(&CourierError::BrokerUnavailable("down".into())),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_for(&CourierError::Unauthorized {
                service: "profile-service".into()
            }),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_request_validation() {
        let request = SubmissionRequest {
            recipient_id: String::new(),
            template_key: "WELCOME".into(),
            data: Map::new(),
        };
        assert!(request.validate().is_err());

        let request = SubmissionRequest {
            recipient_id: "user-1".into(),
            template_key: "WELCOME".into(),
            data: Map::new(),
        };
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_request_accepts_legacy_field_names() {
        let json = serde_json::json!({
            "user_id": "user-1",
            "template_key": "WELCOME",
            "message_data": { "customer_name": "Alice" }
        });
        let request: SubmissionRequest = serde_json::from_value(json).unwrap();
        assert_eq!(request.recipient_id, "user-1");
        assert!(request.data.contains_key("customer_name"));
    }
}
