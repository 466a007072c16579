use hyper::StatusCode;
use serde_json::json;

use super::{json_response, JsonResponse};

/// Liveness probe.
pub fn health_check() -> JsonResponse {
    json_response(
        StatusCode::OK,
        json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }),
    )
}
