use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use lw_protocol::ErrorEnvelope;
use std::time::Duration;

fn json_error(status: StatusCode, error: impl Into<String>, message: Option<String>) -> Response {
    (
        status,
        Json(ErrorEnvelope {
            error: error.into(),
            message,
            retry_after: None,
        }),
    )
        .into_response()
}

/// 400 with the reason as the `error` text, matching the wire contract for
/// missing parameters (`{"error":"Channel parameter is required"}`).
pub fn bad_request(error: impl Into<String>) -> Response {
    json_error(StatusCode::BAD_REQUEST, error, None)
}

pub fn invalid_json() -> Response {
    json_error(StatusCode::BAD_REQUEST, "Invalid JSON", None)
}

pub fn payload_too_large(message: impl Into<String>) -> Response {
    json_error(
        StatusCode::PAYLOAD_TOO_LARGE,
        "Payload Too Large",
        Some(message.into()),
    )
}

pub fn unauthorized(message: impl Into<String>) -> Response {
    json_error(
        StatusCode::UNAUTHORIZED,
        "Unauthorized",
        Some(message.into()),
    )
}

/// 503 with a `Retry-After` hint; the message distinguishes which cap or
/// precondition refused the request.
pub fn service_unavailable(message: impl Into<String>, retry_after_secs: u64) -> Response {
    let mut response = json_error(
        StatusCode::SERVICE_UNAVAILABLE,
        "Service Unavailable",
        Some(message.into()),
    );
    if let Ok(value) = HeaderValue::from_str(&retry_after_secs.to_string()) {
        response.headers_mut().insert(header::RETRY_AFTER, value);
    }
    response
}

/// 429 carrying the standard rate-limit headers.  `retry_after` is surfaced
/// in milliseconds in the body and rounded up to whole seconds (minimum 1)
/// for the `Retry-After` header.
pub fn too_many_requests(retry_after: Duration, limit: u32) -> Response {
    let retry_secs = retry_after.as_secs() + u64::from(retry_after.subsec_millis() > 0);
    let retry_secs = retry_secs.max(1);
    let mut response = (
        StatusCode::TOO_MANY_REQUESTS,
        Json(ErrorEnvelope {
            error: "Too Many Requests".to_owned(),
            message: None,
            retry_after: Some(retry_after.as_millis() as u64),
        }),
    )
        .into_response();
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&retry_secs.to_string()) {
        headers.insert(header::RETRY_AFTER, value);
    }
    if let Ok(value) = HeaderValue::from_str(&limit.to_string()) {
        headers.insert("x-ratelimit-limit", value);
    }
    headers.insert("x-ratelimit-remaining", HeaderValue::from_static("0"));
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn read_envelope(response: Response) -> (StatusCode, ErrorEnvelope) {
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body should be readable");
        let envelope: ErrorEnvelope =
            serde_json::from_slice(&body).expect("body should be an error envelope");
        (status, envelope)
    }

    #[tokio::test]
    async fn bad_request_puts_reason_in_error_field() {
        let (status, envelope) = read_envelope(bad_request("Channel parameter is required")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(envelope.error, "Channel parameter is required");
        assert_eq!(envelope.message, None);
    }

    #[tokio::test]
    async fn invalid_json_matches_contract() {
        let (status, envelope) = read_envelope(invalid_json()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(envelope.error, "Invalid JSON");
    }

    #[tokio::test]
    async fn payload_too_large_carries_detail() {
        let (status, envelope) =
            read_envelope(payload_too_large("Batch size exceeds maximum of 3 entries")).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(envelope.error, "Payload Too Large");
        assert!(envelope.message.unwrap().contains("Batch size"));
    }

    #[tokio::test]
    async fn service_unavailable_sets_retry_after_header() {
        let response = service_unavailable("Maximum connection limit reached", 5);
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            response.headers().get(header::RETRY_AFTER).unwrap(),
            &HeaderValue::from_static("5")
        );
    }

    #[tokio::test]
    async fn too_many_requests_sets_rate_limit_headers() {
        let response = too_many_requests(Duration::from_millis(31_500), 1000);
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        let headers = response.headers().clone();
        assert_eq!(headers.get(header::RETRY_AFTER).unwrap(), "32");
        assert_eq!(headers.get("x-ratelimit-limit").unwrap(), "1000");
        assert_eq!(headers.get("x-ratelimit-remaining").unwrap(), "0");

        let (_, envelope) = read_envelope(response).await;
        assert_eq!(envelope.retry_after, Some(31_500));
    }

    #[tokio::test]
    async fn retry_after_is_at_least_one_second() {
        let response = too_many_requests(Duration::from_millis(10), 100);
        assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "1");
    }
}
