//! HTTP Basic authentication for the gated action routes.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use base64::Engine;

use crate::config::BasicCredentials;

/// Credentials plus the realm advertised when they are missing or wrong.
#[derive(Debug, Clone)]
pub struct BasicAuthGate {
    /// `None` when no credentials are configured: every request is refused.
    pub credentials: Option<Arc<BasicCredentials>>,
    pub realm: &'static str,
}

impl BasicAuthGate {
    pub fn new(credentials: Option<Arc<BasicCredentials>>, realm: &'static str) -> Self {
        Self { credentials, realm }
    }

    /// Whether the `Authorization` header carries the configured credentials.
    pub fn allows(&self, headers: &HeaderMap) -> bool {
        let expected = match &self.credentials {
            Some(expected) => expected,
            None => return false,
        };
        match decode_basic(headers) {
            Some((username, password)) => {
                username == expected.username && password == expected.password
            }
            None => false,
        }
    }

    fn challenge(&self) -> Response {
        let mut response = (StatusCode::UNAUTHORIZED, "Authentication required").into_response();
        if let Ok(value) = HeaderValue::from_str(&format!("Basic realm={}", self.realm)) {
            response.headers_mut().insert(header::WWW_AUTHENTICATE, value);
        }
        response
    }
}

/// Split a `Basic` authorization header into username and password.
fn decode_basic(headers: &HeaderMap) -> Option<(String, String)> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, encoded) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (username, password) = decoded.split_once(':')?;
    Some((username.to_string(), password.to_string()))
}

/// Middleware rejecting requests without valid Basic credentials.
pub async fn require_basic_auth(
    State(gate): State<BasicAuthGate>,
    request: Request,
    next: Next,
) -> Response {
    if gate.allows(request.headers()) {
        return next.run(request).await;
    }
    log::info!("Rejected unauthenticated request to {}", request.uri().path());
    gate.challenge()
}
