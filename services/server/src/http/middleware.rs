use crate::config::Config;
use crate::http::response::{service_unavailable, unauthorized};
use crate::state::AppState;
use axum::{
    extract::{Request, State},
    http::{HeaderMap, HeaderValue},
    middleware::Next,
    response::Response,
};
use sha2::{Digest, Sha256};
use std::net::SocketAddr;

/// Gate `/api/*` behind the shared key.
///
/// The key may arrive as an `X-API-KEY` header or an `apiKey` query
/// parameter.  With no key configured the gate is open, unless the operator
/// demanded one via `REQUIRE_API_KEY` (then everything is refused until a
/// key is set).
pub async fn require_api_key(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let Some(expected) = state.config.api_key.as_deref() else {
        if state.config.require_api_key {
            return service_unavailable("API key required but not configured", 60);
        }
        return next.run(request).await;
    };

    let presented = header_value(request.headers(), "x-api-key")
        .or_else(|| query_param(request.uri().query(), "apiKey"));
    match presented {
        Some(key) if key == expected => next.run(request).await,
        _ => unauthorized("A valid API key is required"),
    }
}

/// Baseline security headers on every response, CSP in production and HSTS
/// behind an HTTPS-terminating proxy.
pub async fn security_headers(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let https = header_value(request.headers(), "x-forwarded-proto") == Some("https".to_owned());
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert("x-content-type-options", HeaderValue::from_static("nosniff"));
    headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
    headers.insert(
        "referrer-policy",
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );
    if state.config.production {
        headers.insert(
            "content-security-policy",
            HeaderValue::from_static(
                "default-src 'self'; script-src 'self'; object-src 'none'; base-uri 'none'",
            ),
        );
    }
    if https {
        headers.insert(
            "strict-transport-security",
            HeaderValue::from_static("max-age=31536000; includeSubDomains"),
        );
    }
    response
}

/// Derive the rate-limit / admission key for a request.
///
/// The forwarded-for chain is client-controlled, so its first hop is used
/// only when the operator explicitly declared a trusted proxy.  Otherwise
/// the key is a digest of the peer address and a few stable request headers.
pub fn client_key(config: &Config, headers: &HeaderMap, peer: SocketAddr) -> String {
    if config.trust_proxy {
        if let Some(forwarded) = header_value(headers, "x-forwarded-for") {
            if let Some(first_hop) = forwarded.split(',').next().map(str::trim) {
                if !first_hop.is_empty() {
                    return first_hop.to_owned();
                }
            }
        }
    }
    let mut hasher = Sha256::new();
    hasher.update(peer.ip().to_string().as_bytes());
    for name in ["user-agent", "accept-language", "accept-encoding"] {
        if let Some(value) = headers.get(name) {
            hasher.update(value.as_bytes());
        }
    }
    hex::encode(&hasher.finalize()[..8])
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(ToOwned::to_owned)
}

fn query_param(query: Option<&str>, name: &str) -> Option<String> {
    query?
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(address: &str) -> SocketAddr {
        address.parse().unwrap()
    }

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(
                axum::http::HeaderName::from_bytes(name.as_bytes()).unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        map
    }

    #[test]
    fn forwarded_for_is_ignored_without_opt_in() {
        let config = Config::default();
        let spoofed = headers(&[("x-forwarded-for", "1.2.3.4")]);
        let clean = HeaderMap::new();
        assert_eq!(
            client_key(&config, &spoofed, peer("10.0.0.1:5000")),
            client_key(&config, &clean, peer("10.0.0.1:5000")),
            "header must not influence the key without TRUST_PROXY"
        );
    }

    #[test]
    fn forwarded_for_first_hop_wins_with_trusted_proxy() {
        let config = Config {
            trust_proxy: true,
            ..Config::default()
        };
        let map = headers(&[("x-forwarded-for", "1.2.3.4, 10.0.0.9")]);
        assert_eq!(client_key(&config, &map, peer("10.0.0.1:5000")), "1.2.3.4");
    }

    #[test]
    fn trusted_proxy_without_header_falls_back_to_digest() {
        let config = Config {
            trust_proxy: true,
            ..Config::default()
        };
        let key = client_key(&config, &HeaderMap::new(), peer("10.0.0.1:5000"));
        assert_eq!(key.len(), 16, "truncated hex digest");
    }

    #[test]
    fn fallback_key_is_stable_per_peer_and_differs_across_peers() {
        let config = Config::default();
        let map = headers(&[("user-agent", "curl/8")]);
        let first = client_key(&config, &map, peer("10.0.0.1:5000"));
        let again = client_key(&config, &map, peer("10.0.0.1:6000"));
        assert_eq!(first, again, "port must not change the key");

        let other = client_key(&config, &map, peer("10.0.0.2:5000"));
        assert_ne!(first, other);
    }

    #[test]
    fn query_param_finds_api_key() {
        assert_eq!(
            query_param(Some("channel=x&apiKey=s3cret"), "apiKey"),
            Some("s3cret".to_owned())
        );
        assert_eq!(query_param(Some("channel=x"), "apiKey"), None);
        assert_eq!(query_param(None, "apiKey"), None);
    }
}
