//! hyper http1 accept loop and request routing.

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::{BodyExt, Full, Limited};
use hyper::body::Incoming;
use hyper::header::{
    HeaderMap, HeaderValue, ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS,
    ACCESS_CONTROL_ALLOW_ORIGIN,
};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

use super::AppState;
use crate::routes::{self, bad_request, error_response, JsonResponse};

/// Largest request body accepted. A signed Solana transaction is at most
/// 1232 bytes, so this leaves ample room for base64 and JSON framing.
const MAX_BODY_BYTES: usize = 64 * 1024;

/// Serves until `shutdown` resolves. In-flight connections are left to
/// finish on their own tasks.
pub async fn run<F>(
    state: Arc<AppState>,
    listener: TcpListener,
    shutdown: F,
) -> std::io::Result<()>
where
    F: Future<Output = ()>,
{
    info!("Listening on {}", listener.local_addr()?);
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutdown requested, no longer accepting connections");
                return Ok(());
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    let state = Arc::clone(&state);
                    tokio::spawn(async move {
                        let io = TokioIo::new(stream);
                        let service = service_fn(move |req| {
                            let state = Arc::clone(&state);
                            async move {
                                Ok::<_, Infallible>(handle_request(&state, addr, req).await)
                            }
                        });

                        if let Err(err) = http1::Builder::new()
                            .serve_connection(io, service)
                            .await
                        {
                            debug!("Error serving connection from {}: {:?}", addr, err);
                        }
                    });
                }
                Err(e) => {
                    error!("Error accepting connection: {:?}", e);
                }
            }
        }
    }
}

async fn handle_request(
    state: &AppState,
    addr: SocketAddr,
    req: Request<Incoming>,
) -> JsonResponse {
    let method = req.method().clone();
    let path = req.uri().path().trim_end_matches('/').to_string();
    let source = request_source(req.headers(), addr, state.trust_forwarded_for);

    debug!("[{}] {} {}", source, method, path);

    match (&method, path.as_str()) {
        (&Method::OPTIONS, _) => preflight(),
        (&Method::GET, "/health") => routes::health::health_check(),
        (&Method::GET, "/vanity/dispense") => routes::vanity::dispense(state, &source),
        (&Method::GET, "/vanity/status") => routes::vanity::status(state),
        (&Method::GET, "/vault/status") => routes::vault::status(state),
        (&Method::POST, "/vanity/custom") => match read_body(req).await {
            Ok(body) => routes::vanity::custom(state, &source, &body).await,
            Err(response) => response,
        },
        (&Method::POST, "/vault/sign") => match read_body(req).await {
            Ok(body) => routes::vault::sign(state, &body),
            Err(response) => response,
        },
        (&Method::POST, "/vault/sign-and-send") => match read_body(req).await {
            Ok(body) => routes::vault::sign_and_send(state, &body).await,
            Err(response) => response,
        },
        _ => error_response(
            StatusCode::NOT_FOUND,
            "not_found_route",
            format!("no route for {} {}", method, path),
        ),
    }
}

async fn read_body(req: Request<Incoming>) -> Result<Bytes, JsonResponse> {
    match Limited::new(req.into_body(), MAX_BODY_BYTES).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(e) => Err(bad_request(format!("could not read request body: {e}"))),
    }
}

fn preflight() -> JsonResponse {
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = StatusCode::NO_CONTENT;
    let headers = response.headers_mut();
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(
        ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST, OPTIONS"),
    );
    headers.insert(
        ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type"),
    );
    response
}

/// Key used for per-source cool-downs.
///
/// Behind a trusted proxy the rightmost `X-Forwarded-For` entry is the one
/// that proxy appended. Everything to its left came from the client and
/// can be forged.
fn request_source(headers: &HeaderMap, addr: SocketAddr, trust_forwarded_for: bool) -> String {
    if trust_forwarded_for {
        let forwarded = headers
            .get_all("x-forwarded-for")
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(','))
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .last();
        if let Some(client) = forwarded {
            return client.to_string();
        }
    }
    addr.ip().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> SocketAddr {
        "192.0.2.7:40000".parse().unwrap()
    }

    #[test]
    fn source_is_peer_ip_by_default() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.9"));
        assert_eq!(request_source(&headers, addr(), false), "192.0.2.7");
    }

    #[test]
    fn source_uses_hop_appended_by_proxy_when_trusted() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.9, 198.51.100.1"),
        );
        assert_eq!(request_source(&headers, addr(), true), "198.51.100.1");
        assert_eq!(request_source(&HeaderMap::new(), addr(), true), "192.0.2.7");
    }

    #[test]
    fn forged_leading_hops_share_one_source() {
        let forged = |value: &'static str| {
            let mut headers = HeaderMap::new();
            headers.insert("x-forwarded-for", HeaderValue::from_static(value));
            request_source(&headers, addr(), true)
        };
        assert_eq!(
            forged("1.1.1.1, 198.51.100.1"),
            forged("2.2.2.2, 198.51.100.1")
        );
    }

    #[test]
    fn preflight_allows_cross_origin_posts() {
        let response = preflight();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(response.headers()[ACCESS_CONTROL_ALLOW_ORIGIN], "*");
    }
}
