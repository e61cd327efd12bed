//! Request handling.
//!
//! # Responsibilities
//! - Generate unique request ID (UUID v4) and propagate it to the response
//! - Turn an HTTP request into an [`Environment`] for the tree
//!
//! # Design Decisions
//! - Request ID added as early as possible for tracing
//! - Form bodies are merged into the request parameters, query string first

use axum::body::{to_bytes, Body};
use axum::http::{header, HeaderName, Request};
use tower_http::request_id::{MakeRequestId, RequestId};

use crate::invoke::Environment;

pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Largest form body read into request parameters.
pub const MAX_FORM_BYTES: usize = 1024 * 1024;

/// Issues a fresh UUID per request.
#[derive(Debug, Clone, Copy, Default)]
pub struct MakeRequestUuid;

impl MakeRequestId for MakeRequestUuid {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        uuid::Uuid::new_v4()
            .to_string()
            .parse()
            .ok()
            .map(RequestId::new)
    }
}

pub fn request_id<B>(request: &Request<B>) -> String {
    request
        .headers()
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string()
}

/// Build the environment for `request`: path without its leading `/`,
/// method, headers, and parameters from the query string and form body.
pub async fn environment_from(request: Request<Body>) -> Environment {
    let (parts, body) = request.into_parts();
    let mut env = Environment::new(parts.uri.path()).with_method(parts.method.as_str());

    if let Some(query) = parts.uri.query() {
        for (name, value) in url::form_urlencoded::parse(query.as_bytes()) {
            env = env.with_parameter(name, value);
        }
    }
    for (name, value) in &parts.headers {
        if let Ok(value) = value.to_str() {
            env = env.with_header(name.as_str(), value);
        }
    }

    let is_form = parts
        .headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("application/x-www-form-urlencoded"));
    if is_form {
        match to_bytes(body, MAX_FORM_BYTES).await {
            Ok(bytes) => {
                for (name, value) in url::form_urlencoded::parse(&bytes) {
                    if env.parameter(&name).is_none() {
                        env = env.with_parameter(name, value);
                    }
                }
            }
            Err(e) => tracing::warn!(error = %e, "Form body not read"),
        }
    }
    env
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_environment_from_request() {
        let request = Request::builder()
            .method("POST")
            .uri("/docs/intro?lang=en")
            .header("Accept", "text/xml")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from("lang=fr&user=ada"))
            .unwrap();
        let env = environment_from(request).await;
        assert_eq!(env.uri(), "docs/intro");
        assert_eq!(env.method(), "POST");
        assert_eq!(env.parameter("lang"), Some("en"));
        assert_eq!(env.parameter("user"), Some("ada"));
        assert_eq!(env.header("accept"), Some("text/xml"));
    }

    #[test]
    fn test_request_ids_are_unique() {
        let request = Request::new(());
        let mut make = MakeRequestUuid;
        let a = make.make_request_id(&request).unwrap();
        let b = make.make_request_id(&request).unwrap();
        assert_ne!(a.header_value(), b.header_value());
    }
}
