//! Security headers middleware
//!
//! Adds security-related HTTP headers to responses:
//! - Content-Security-Policy (same-origin page and script)
//! - X-Content-Type-Options: nosniff
//! - X-Frame-Options: DENY
//! - Referrer-Policy: strict-origin-when-cross-origin

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderValue, Request, Response},
    middleware::Next,
};
use std::sync::Arc;

/// Security headers configuration
#[derive(Debug, Clone)]
pub struct SecurityHeadersConfig {
    /// Content-Security-Policy header value; empty disables the header
    pub csp: String,
    pub frame_options: String,
    pub content_type_options: String,
    pub referrer_policy: String,
}

impl Default for SecurityHeadersConfig {
    fn default() -> Self {
        SecurityHeadersConfig {
            // The page fetches /generate and /clear_cache from its own origin
            csp: concat!(
                "default-src 'self'; ",
                "script-src 'self'; ",
                "style-src 'self' 'unsafe-inline'; ",
                "img-src 'self' data:; ",
                "connect-src 'self'; ",
                "frame-ancestors 'none'; ",
                "base-uri 'self'; ",
                "form-action 'self'"
            )
            .to_string(),
            frame_options: "DENY".to_string(),
            content_type_options: "nosniff".to_string(),
            referrer_policy: "strict-origin-when-cross-origin".to_string(),
        }
    }
}

/// Security headers middleware function
///
/// Use with `axum::middleware::from_fn_with_state`.
pub async fn security_headers_middleware(
    State(config): State<Arc<SecurityHeadersConfig>>,
    request: Request<Body>,
    next: Next,
) -> Response<Body> {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();

    if !config.csp.is_empty() {
        if let Ok(value) = HeaderValue::from_str(&config.csp) {
            headers.insert(header::CONTENT_SECURITY_POLICY, value);
        }
    }
    if let Ok(value) = HeaderValue::from_str(&config.content_type_options) {
        headers.insert(header::X_CONTENT_TYPE_OPTIONS, value);
    }
    if let Ok(value) = HeaderValue::from_str(&config.frame_options) {
        headers.insert(header::X_FRAME_OPTIONS, value);
    }
    if let Ok(value) = HeaderValue::from_str(&config.referrer_policy) {
        headers.insert(header::REFERRER_POLICY, value);
    }

    response
}
