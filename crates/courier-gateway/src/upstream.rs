//! Shared plumbing for upstream service clients.

use serde_json::Value;

use courier_common::CourierError;

/// Header carrying the shared internal secret on upstream calls.
pub const INTERNAL_SECRET_HEADER: &str = "X-Internal-Secret";

/// Header propagating the request id through the pipeline.
pub const REQUEST_ID_HEADER: &str = "X-Request-ID";

/// Header carrying the client idempotency key.
pub const IDEMPOTENCY_KEY_HEADER: &str = "X-Idempotency-Key";

/// Peel the `{success, data, message}` reply envelope some upstream
/// versions wrap their payloads in; bare payloads pass through unchanged.
pub(crate) fn unwrap_reply(value: Value) -> Value {
    if let Value::Object(ref obj) = value {
        let looks_wrapped =
            obj.contains_key("data") && (obj.contains_key("success") || obj.contains_key("message"));
        if looks_wrapped {
            if let Some(data) = obj.get("data") {
                return data.clone();
            }
        }
    }
    value
}

/// Classify a reqwest failure as a connection-class upstream error.
pub(crate) fn transport_error(service: &str, err: &reqwest::Error) -> CourierError {
    let reason = if err.is_timeout() {
        "timeout".to_string()
    } else if err.is_connect() {
        "connect failed".to_string()
    } else {
        err.to_string()
    };
    CourierError::UpstreamUnavailable {
        service: service.to_string(),
        reason,
    }
}

/// Pull a human-readable detail out of an upstream error body.
pub(crate) fn error_detail(body: &Value) -> Option<String> {
    body.get("detail")
        .or_else(|| body.get("message"))
        .and_then(Value::as_str)
        .map(ToString::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_unwrap_wrapped_reply() {
        let wrapped = json!({
            "success": true,
            "data": { "subject": "S" },
            "message": "ok"
        });
        assert_eq!(unwrap_reply(wrapped), json!({ "subject": "S" }));
    }

    #[test]
    fn test_bare_reply_passes_through() {
        let bare = json!({ "subject": "S", "body": "B" });
        assert_eq!(unwrap_reply(bare.clone()), bare);
    }

    #[test]
    fn test_object_with_incidental_data_key_is_not_unwrapped() {
        let bare = json!({ "data": { "order_id": "1" }, "subject": "S" });
        assert_eq!(unwrap_reply(bare.clone()), bare);
    }

    #[test]
    fn test_error_detail_extraction() {
        assert_eq!(
            error_detail(&json!({ "detail": "Missing data key 'order_id'" })),
            Some("Missing data key 'order_id'".to_string())
        );
        assert_eq!(
            error_detail(&json!({ "message": "not found" })),
            Some("not found".to_string())
        );
        assert_eq!(error_detail(&json!({ "other": 1 })), None);
    }
}
