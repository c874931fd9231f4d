// ABOUTME: Optional HTTP basic auth middleware with constant-time comparison
// ABOUTME: Guards every endpoint except the health check
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

use crate::server::GatewayState;
use axum::extract::{Request, State};
use axum::http::header::{AUTHORIZATION, WWW_AUTHENTICATE};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use std::sync::Arc;
use subtle::ConstantTimeEq;

/// Reject requests whose basic credentials do not match the configured pair.
/// A no-op when auth is not configured.
pub async fn require_basic_auth(
    State(state): State<Arc<GatewayState>>,
    request: Request,
    next: Next,
) -> Response {
    let Some((user, pass)) = state.config.basic_auth() else {
        return next.run(request).await;
    };

    let provided = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(decode_basic);

    match provided {
        Some((u, p)) if constant_time_eq(&u, user) && constant_time_eq(&p, pass) => {
            next.run(request).await
        }
        _ => (
            StatusCode::UNAUTHORIZED,
            [(WWW_AUTHENTICATE, "Basic realm=\"sqlgateway\"")],
            "authentication required",
        )
            .into_response(),
    }
}

fn decode_basic(header: &str) -> Option<(String, String)> {
    let encoded = header.strip_prefix("Basic ")?;
    let decoded = BASE64.decode(encoded).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, pass) = decoded.split_once(':')?;
    Some((user.to_owned(), pass.to_owned()))
}

// Length is not secret; the comparison of equal-length strings is.
fn constant_time_eq(a: &str, b: &str) -> bool {
    a.len() == b.len() && a.as_bytes().ct_eq(b.as_bytes()).into()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_basic() {
        let header = format!("Basic {}", BASE64.encode("admin:hunter2"));
        assert_eq!(
            decode_basic(&header),
            Some(("admin".to_owned(), "hunter2".to_owned()))
        );
        assert_eq!(decode_basic("Bearer abc"), None);
        assert_eq!(decode_basic("Basic not-base64!!"), None);
    }

    #[test]
    fn test_password_with_colon() {
        let header = format!("Basic {}", BASE64.encode("admin:a:b:c"));
        assert_eq!(
            decode_basic(&header),
            Some(("admin".to_owned(), "a:b:c".to_owned()))
        );
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq("secret", "secret"));
        assert!(!constant_time_eq("secret", "secret2"));
        assert!(!constant_time_eq("secret", "secreT"));
    }
}
