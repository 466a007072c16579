//! HTTP route handlers.
//!
//! Handlers take already-extracted inputs (request source, body bytes) so
//! they can be driven directly in tests without a socket.

pub mod health;
pub mod vanity;
pub mod vault;

use std::time::Duration;

use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{
    HeaderValue, ACCESS_CONTROL_ALLOW_ORIGIN, CACHE_CONTROL, CONTENT_TYPE, RETRY_AFTER,
};
use hyper::{Response, StatusCode};
use serde_json::{json, Value};

pub type JsonResponse = Response<Full<Bytes>>;

/// JSON response with the headers every route shares.
pub fn json_response(status: StatusCode, body: Value) -> JsonResponse {
    let mut response = Response::new(Full::new(Bytes::from(body.to_string())));
    *response.status_mut() = status;
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}

pub fn error_response(status: StatusCode, code: &str, message: impl Into<String>) -> JsonResponse {
    json_response(status, json!({ "error": code, "message": message.into() }))
}

pub fn bad_request(message: impl Into<String>) -> JsonResponse {
    error_response(StatusCode::BAD_REQUEST, "bad_request", message)
}

pub fn rate_limited(wait: Duration) -> JsonResponse {
    // Round up so clients never retry a moment too early
    let retry_after = wait.as_secs() + u64::from(wait.subsec_nanos() > 0);
    let mut response = json_response(
        StatusCode::TOO_MANY_REQUESTS,
        json!({ "error": "rate_limited", "retryAfterSeconds": retry_after }),
    );
    response
        .headers_mut()
        .insert(RETRY_AFTER, HeaderValue::from(retry_after));
    response
}
