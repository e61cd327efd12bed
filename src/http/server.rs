//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with the sitemap handler
//! - Wire up middleware (tracing, timeout, request ID)
//! - Bind server to listener
//! - Run each request through the root TreeProcessor on a blocking thread
//! - Map the processor outcome onto an HTTP response

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderName, HeaderValue, Request, StatusCode},
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use tokio::net::TcpListener;
use tower_http::{
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::ServerConfig;
use crate::error::SitemapError;
use crate::http::request::{environment_from, request_id, MakeRequestUuid, X_REQUEST_ID};
use crate::invoke::{self, Redirect};
use crate::lifecycle::Shutdown;
use crate::treeprocessor::TreeProcessor;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub processor: Arc<TreeProcessor>,
}

/// HTTP front end of the sitemap processor.
pub struct HttpServer {
    router: Router,
    config: ServerConfig,
    processor: Arc<TreeProcessor>,
}

impl HttpServer {
    pub fn new(config: ServerConfig, processor: Arc<TreeProcessor>) -> Self {
        let state = AppState {
            processor: Arc::clone(&processor),
        };
        let router = build_router(Duration::from_secs(config.listener.request_timeout_secs), state);
        Self {
            router,
            config,
            processor,
        }
    }

    /// Serve until `shutdown` fires, then dispose the root processor.
    pub async fn run(self, listener: TcpListener, shutdown: Shutdown) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, sitemap = %self.processor.uri(), "HTTP server starting");

        let signal = shutdown.clone();
        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move { signal.wait().await })
            .await?;

        let processor = Arc::clone(&self.processor);
        let grace = Duration::from_secs(self.config.listener.request_timeout_secs);
        // Dispose waits for a rebuild in progress, so keep it off the reactor.
        let drained = tokio::task::spawn_blocking(move || {
            processor.dispose();
            processor.wait_idle(grace)
        })
        .await
        .unwrap_or(false);
        tracing::info!(drained, "HTTP server stopped");
        Ok(())
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

/// Build the Axum router with all middleware layers.
#[allow(deprecated)]
pub fn build_router(request_timeout: Duration, state: AppState) -> Router {
    Router::new()
        .route("/{*path}", any(sitemap_handler))
        .route("/", any(sitemap_handler))
        .with_state(state)
        .layer(TimeoutLayer::new(request_timeout))
        .layer(PropagateRequestIdLayer::new(X_REQUEST_ID))
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::new(X_REQUEST_ID, MakeRequestUuid))
}

async fn sitemap_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let request_id = request_id(&request);
    let env = environment_from(request).await;
    tracing::debug!(request_id = %request_id, method = %env.method(), uri = %env.uri(), "Processing request");

    let processor = Arc::clone(&state.processor);
    let outcome = tokio::task::spawn_blocking(move || {
        let mut env = env;
        let result = processor.process(&mut env);
        (env, result)
    })
    .await;

    match outcome {
        Ok((env, Ok(true))) => into_http(env.into_response()),
        Ok((env, Ok(false))) => {
            tracing::debug!(request_id = %request_id, uri = %env.uri(), "No pipeline matched");
            (StatusCode::NOT_FOUND, "No matching pipeline").into_response()
        }
        Ok((_, Err(SitemapError::ResourceNotFound { uri }))) => {
            (StatusCode::NOT_FOUND, format!("Resource not found: {}", uri)).into_response()
        }
        Ok((_, Err(e))) => {
            tracing::error!(request_id = %request_id, kind = e.kind(), error = %e, "Request failed");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
        Err(e) => {
            tracing::error!(request_id = %request_id, error = %e, "Request task failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

fn into_http(response: invoke::Response) -> Response {
    if let Some(Redirect::External { uri, permanent }) = &response.redirect {
        let status = if *permanent {
            StatusCode::MOVED_PERMANENTLY
        } else {
            StatusCode::FOUND
        };
        return match HeaderValue::from_str(uri) {
            Ok(location) => (status, [(header::LOCATION, location)]).into_response(),
            Err(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Invalid redirect target").into_response(),
        };
    }

    let status = StatusCode::from_u16(response.status()).unwrap_or(StatusCode::OK);
    let mut http = Response::new(Body::from(response.body));
    *http.status_mut() = status;
    let headers = http.headers_mut();
    if let Some(value) = response.mime_type.and_then(|m| HeaderValue::from_str(&m).ok()) {
        headers.insert(header::CONTENT_TYPE, value);
    }
    for (name, value) in response.headers {
        match (HeaderName::try_from(name.as_str()), HeaderValue::from_str(&value)) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => tracing::warn!(header = %name, "Dropping invalid response header"),
        }
    }
    http
}
