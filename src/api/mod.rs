use anyhow::{Context, Result, anyhow};
use axum::{
    Extension, Router,
    body::Body,
    extract::MatchedPath,
    http::{
        HeaderName, HeaderValue, Method, Request,
        header::{AUTHORIZATION, CONTENT_TYPE},
    },
    middleware::from_fn_with_state,
    routing::options,
};
use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{Span, info, info_span, warn};
use ulid::Ulid;
use url::Url;
use utoipa_axum::router::OpenApiRouter;

use crate::auth::AuthState;

pub(crate) mod error;
pub(crate) mod handlers;
pub mod middleware;
mod openapi;

pub use middleware::HttpConfig;
pub use openapi::openapi;

const REQUEST_ID: &str = "x-request-id";

/// Build the API router with all documented routes registered.
#[must_use]
pub fn router() -> OpenApiRouter {
    openapi::api_router()
}

/// Assemble the full application: documented routes, tenant and origin gates,
/// request ids, tracing and CORS.
#[must_use]
pub fn app(auth_state: Arc<AuthState>, http: HttpConfig) -> Router {
    let cors = cors_layer(&http);
    let gate = Arc::new(middleware::Gate {
        state: auth_state.clone(),
        http,
    });

    let (health, _) = openapi::health_router().split_for_parts();
    let (auth, _) = openapi::auth_router().split_for_parts();
    // Layers run bottom-up: tenant resolution happens after the origin check.
    let auth = auth
        .layer(from_fn_with_state(gate.clone(), middleware::resolve_request))
        .layer(from_fn_with_state(gate, middleware::check_origin));

    health
        .route("/health", options(handlers::health::health))
        .merge(auth)
        .fallback(error::not_found)
        .method_not_allowed_fallback(error::method_not_allowed)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static(REQUEST_ID),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    REQUEST_ID,
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(cors)
                .layer(Extension(auth_state)),
        )
}

fn cors_layer(http: &HttpConfig) -> CorsLayer {
    if http.cors_permissive() {
        return CorsLayer::permissive();
    }
    CorsLayer::new()
        .allow_headers([
            CONTENT_TYPE,
            AUTHORIZATION,
            HeaderName::from_static(handlers::auth::utils::CSRF_HEADER),
        ])
        .allow_methods([Method::GET, Method::POST])
        .allow_origin(AllowOrigin::list(http.allowed_origins().iter().cloned()))
        .allow_credentials(true)
}

/// Start the server
/// # Errors
/// Return error if failed to bind or serve
pub async fn new(port: u16, auth_state: Arc<AuthState>, http: HttpConfig) -> Result<()> {
    if http.cors_permissive() {
        warn!("Permissive CORS enabled: origin checks are disabled, do not use in production");
    }
    let app = app(auth_state, http);

    let listener = TcpListener::bind(format!("::0:{port}"))
        .await
        .with_context(|| format!("Failed to bind port {port}"))?;

    info!("Listening on [::]:{}", port);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for shutdown signal: {err}");
        }
        info!("Gracefully shutdown");
    })
    .await?;

    Ok(())
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get(REQUEST_ID)
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}

/// Normalize a URL into the `scheme://host[:port]` form browsers send in `Origin`.
///
/// # Errors
/// Returns an error for unparsable URLs or URLs without a host.
pub fn origin_of(url: &str) -> Result<HeaderValue> {
    let parsed = Url::parse(url).with_context(|| format!("Invalid origin URL: {url}"))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| anyhow!("Origin URL must include a host: {url}"))?;
    let port = parsed
        .port()
        .map_or_else(String::new, |port| format!(":{port}"));
    let origin = format!("{}://{}{}", parsed.scheme(), host, port);
    HeaderValue::from_str(&origin).context("Failed to build origin header")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn origin_of_strips_paths_and_default_ports() -> Result<()> {
        assert_eq!(origin_of("https://app.example.com/login")?, "https://app.example.com");
        assert_eq!(origin_of("https://app.example.com:443/")?, "https://app.example.com");
        assert_eq!(origin_of("http://localhost:5173")?, "http://localhost:5173");
        assert!(origin_of("not a url").is_err());
        Ok(())
    }
}
