//! Request gates that run before any auth handler.
//!
//! `resolve_request` derives the tenant from `Host` and the rate-limit client
//! key, and stores both as a [`RequestContext`] extension. `check_origin`
//! rejects cross-site state-changing requests.

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{
        HeaderMap, HeaderValue, Method,
        header::{HOST, ORIGIN},
    },
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::{net::SocketAddr, sync::Arc};
use tracing::debug;

use crate::{
    auth::{AuthError, AuthState},
    tenant::Tenant,
};

const FORWARDED_FOR: &str = "x-forwarded-for";
const UNKNOWN_CLIENT: &str = "unknown";

/// Per-request values resolved at the boundary.
#[derive(Clone, Debug)]
pub struct RequestContext {
    pub tenant: Tenant,
    pub client_key: String,
}

/// Settings shared by the request gates.
#[derive(Clone, Debug)]
pub struct HttpConfig {
    allowed_origins: Vec<HeaderValue>,
    cors_permissive: bool,
    trust_forwarded_for: bool,
}

impl HttpConfig {
    #[must_use]
    pub fn new(allowed_origins: Vec<HeaderValue>) -> Self {
        Self {
            allowed_origins,
            cors_permissive: false,
            trust_forwarded_for: false,
        }
    }

    #[must_use]
    pub fn with_cors_permissive(mut self, permissive: bool) -> Self {
        self.cors_permissive = permissive;
        self
    }

    #[must_use]
    pub fn with_trust_forwarded_for(mut self, trust: bool) -> Self {
        self.trust_forwarded_for = trust;
        self
    }

    #[must_use]
    pub fn allowed_origins(&self) -> &[HeaderValue] {
        &self.allowed_origins
    }

    #[must_use]
    pub fn cors_permissive(&self) -> bool {
        self.cors_permissive
    }

    #[must_use]
    pub fn trust_forwarded_for(&self) -> bool {
        self.trust_forwarded_for
    }
}

pub(crate) struct Gate {
    pub state: Arc<AuthState>,
    pub http: HttpConfig,
}

fn request_host(request: &Request) -> Option<&str> {
    request
        .headers()
        .get(HOST)
        .and_then(|value| value.to_str().ok())
        .or_else(|| request.uri().host())
}

/// Client identity used for rate limiting.
///
/// `X-Forwarded-For` is only honored behind a trusted proxy; otherwise the
/// socket peer is used.
pub(crate) fn client_key(
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
    trust_forwarded_for: bool,
) -> String {
    if trust_forwarded_for
        && let Some(forwarded) = headers
            .get(FORWARDED_FOR)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(',').next())
            .map(str::trim)
            .filter(|value| !value.is_empty())
    {
        return forwarded.to_string();
    }
    peer.map_or_else(|| UNKNOWN_CLIENT.to_string(), |addr| addr.ip().to_string())
}

pub(crate) async fn resolve_request(
    State(gate): State<Arc<Gate>>,
    mut request: Request,
    next: Next,
) -> Response {
    let tenant = match request_host(&request).map(Tenant::from_host) {
        Some(Ok(tenant)) => tenant,
        Some(Err(err)) => {
            debug!("Rejecting request with unusable host: {err}");
            return AuthError::UnknownTenant.into_response();
        }
        None => {
            return AuthError::Validation("Missing Host header".to_string()).into_response();
        }
    };
    if !gate.state.config().serves(&tenant) {
        debug!(tenant = %tenant, "Rejecting request for unknown tenant");
        return AuthError::UnknownTenant.into_response();
    }

    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let client_key = client_key(request.headers(), peer, gate.http.trust_forwarded_for());
    request
        .extensions_mut()
        .insert(RequestContext { tenant, client_key });
    next.run(request).await
}

fn is_state_changing(method: &Method) -> bool {
    !matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS)
}

pub(crate) async fn check_origin(
    State(gate): State<Arc<Gate>>,
    request: Request,
    next: Next,
) -> Response {
    if !gate.http.cors_permissive()
        && is_state_changing(request.method())
        && let Some(origin) = request.headers().get(ORIGIN)
        && !gate.http.allowed_origins().contains(origin)
    {
        debug!(origin = ?origin, "Rejecting request from disallowed origin");
        return AuthError::OriginNotAllowed.into_response();
    }
    next.run(request).await
}
