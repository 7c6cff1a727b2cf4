use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Request};
use axum::http::header::{
    HeaderMap, HeaderValue, ACCESS_CONTROL_ALLOW_CREDENTIALS, ACCESS_CONTROL_ALLOW_HEADERS,
    ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN, ACCESS_CONTROL_REQUEST_HEADERS,
    ACCESS_CONTROL_REQUEST_METHOD, ORIGIN, VARY,
};
use axum::http::{Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::origin::{self, OriginRejection};

/// Advertised when the preflight does not name the headers it wants.
pub const DEFAULT_ALLOW_HEADERS: &str = "Content-Type, Authorization";

/// Advertised when the preflight does not name the method it wants.
pub const DEFAULT_ALLOW_METHODS: &str = "GET, HEAD, PUT, PATCH, POST, DELETE";

/// Result of checking a plain HTTP request's `Origin`.
#[derive(Debug)]
pub enum CorsDecision {
    /// No `Origin` header; serve the request without CORS headers.
    SameOrigin,
    /// Loopback origin; these headers must be added to the response.
    Allowed(HeaderMap),
    /// Origin present but refused.
    Rejected(OriginRejection),
}

/// Decide how to answer a request carrying `headers`.
pub fn evaluate(headers: &HeaderMap) -> CorsDecision {
    let Some(raw) = headers.get(ORIGIN) else {
        return CorsDecision::SameOrigin;
    };
    let Ok(origin) = raw.to_str() else {
        return CorsDecision::Rejected(OriginRejection::Malformed);
    };

    match origin::validate_origin(Some(origin)) {
        Ok(()) => CorsDecision::Allowed(allow_headers(raw, headers)),
        Err(rejection) => CorsDecision::Rejected(rejection),
    }
}

/// Middleware applying the loopback origin rule to every request on the
/// relay port, WebSocket upgrades included.
///
/// A refused origin gets `403` and none of the CORS headers. An `OPTIONS`
/// preflight is answered with `204` here and never reaches a route.
pub async fn guard(request: Request, next: Next) -> Response {
    let cors_headers = match evaluate(request.headers()) {
        CorsDecision::SameOrigin => None,
        CorsDecision::Allowed(headers) => Some(headers),
        CorsDecision::Rejected(rejection) => {
            let remote_addr = request
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|info| info.0);
            tracing::warn!(
                ?remote_addr,
                ?rejection,
                method = %request.method(),
                path = request.uri().path(),
                "origin rejected"
            );
            return (
                StatusCode::FORBIDDEN,
                Json(serde_json::json!({"error": "Origin not allowed"})),
            )
                .into_response();
        }
    };

    let mut response = if request.method() == Method::OPTIONS {
        StatusCode::NO_CONTENT.into_response()
    } else {
        next.run(request).await
    };

    if let Some(headers) = cors_headers {
        response.headers_mut().extend(headers);
    }
    response
}

/// Build the CORS response headers for an accepted `origin`.
///
/// The origin is echoed back verbatim; a wildcard is never used because
/// credentials are allowed.
fn allow_headers(origin: &HeaderValue, request: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::new();
    out.insert(ACCESS_CONTROL_ALLOW_ORIGIN, origin.clone());
    out.insert(VARY, HeaderValue::from_static("Origin"));
    out.insert(
        ACCESS_CONTROL_ALLOW_CREDENTIALS,
        HeaderValue::from_static("true"),
    );

    let allow_headers = request
        .get(ACCESS_CONTROL_REQUEST_HEADERS)
        .cloned()
        .unwrap_or_else(|| HeaderValue::from_static(DEFAULT_ALLOW_HEADERS));
    out.insert(ACCESS_CONTROL_ALLOW_HEADERS, allow_headers);

    let allow_methods = request
        .get(ACCESS_CONTROL_REQUEST_METHOD)
        .cloned()
        .unwrap_or_else(|| HeaderValue::from_static(DEFAULT_ALLOW_METHODS));
    out.insert(ACCESS_CONTROL_ALLOW_METHODS, allow_methods);

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn no_origin_is_same_origin() {
        assert!(matches!(
            evaluate(&HeaderMap::new()),
            CorsDecision::SameOrigin
        ));
    }

    #[test]
    fn loopback_origin_is_reflected_with_defaults() {
        let req = headers(&[("origin", "http://localhost:5173")]);
        let CorsDecision::Allowed(out) = evaluate(&req) else {
            panic!("expected Allowed");
        };
        assert_eq!(out[ACCESS_CONTROL_ALLOW_ORIGIN], "http://localhost:5173");
        assert_eq!(out[VARY], "Origin");
        assert_eq!(out[ACCESS_CONTROL_ALLOW_CREDENTIALS], "true");
        assert_eq!(out[ACCESS_CONTROL_ALLOW_HEADERS], DEFAULT_ALLOW_HEADERS);
        assert_eq!(out[ACCESS_CONTROL_ALLOW_METHODS], DEFAULT_ALLOW_METHODS);
    }

    #[test]
    fn requested_headers_and_method_are_reflected() {
        let req = headers(&[
            ("origin", "http://127.0.0.1:3000"),
            ("access-control-request-headers", "x-custom, content-type"),
            ("access-control-request-method", "PUT"),
        ]);
        let CorsDecision::Allowed(out) = evaluate(&req) else {
            panic!("expected Allowed");
        };
        assert_eq!(out[ACCESS_CONTROL_ALLOW_HEADERS], "x-custom, content-type");
        assert_eq!(out[ACCESS_CONTROL_ALLOW_METHODS], "PUT");
    }

    #[test]
    fn remote_origin_is_rejected() {
        let req = headers(&[("origin", "https://example.com")]);
        assert!(matches!(
            evaluate(&req),
            CorsDecision::Rejected(OriginRejection::NotLoopback { .. })
        ));
    }

    #[test]
    fn non_utf8_origin_is_malformed() {
        let mut req = HeaderMap::new();
        req.insert(ORIGIN, HeaderValue::from_bytes(b"http://\xfflocalhost").unwrap());
        assert!(matches!(
            evaluate(&req),
            CorsDecision::Rejected(OriginRejection::Malformed)
        ));
    }
}
