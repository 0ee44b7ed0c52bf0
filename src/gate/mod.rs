//! Admission control: authentication and per-caller rate limiting.
//!
//! The gate runs before any URL handling, so a rejected request never reaches the extractor
//! or spawns a transcoder.

use axum::http::{header, HeaderMap};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

pub mod credentials;
pub mod rate_limit;

pub use credentials::{CredentialStore, Identity, StaticCredentialStore};
pub use rate_limit::{RateLimit, RateLimiter};

use crate::{AuthFailure, GatewayError};

/// How callers prove who they are
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthScheme {
    /// Everyone is admitted and limited per IP
    None,
    /// A token in a named header, rejected with 403
    ApiKey,
    /// `Authorization: Bearer <token>`, rejected with 401
    Bearer,
}

impl fmt::Display for AuthScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthScheme::None => write!(f, "none"),
            AuthScheme::ApiKey => write!(f, "api_key"),
            AuthScheme::Bearer => write!(f, "bearer"),
        }
    }
}

/// Endpoints with separate rate budgets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Analyze,
    Stream,
}

/// Scheme required on each route.
///
/// A public catalog with authenticated streaming is `analyze: None, stream: Bearer`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthPolicy {
    pub analyze: AuthScheme,
    pub stream: AuthScheme,
}

impl AuthPolicy {
    /// Same scheme on every route
    pub fn uniform(scheme: AuthScheme) -> Self {
        Self {
            analyze: scheme,
            stream: scheme,
        }
    }

    pub fn for_route(&self, route: Route) -> AuthScheme {
        match route {
            Route::Analyze => self.analyze,
            Route::Stream => self.stream,
        }
    }

    /// Whether any route uses `scheme`
    pub fn uses(&self, scheme: AuthScheme) -> bool {
        self.analyze == scheme || self.stream == scheme
    }

    /// Whether any route needs a credential store
    pub fn requires_credentials(&self) -> bool {
        self.analyze != AuthScheme::None || self.stream != AuthScheme::None
    }
}

/// A request that passed the gate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    /// Authenticated caller, if the scheme requires one
    pub identity: Option<Identity>,
    /// Key the request was counted under
    pub rate_key: String,
}

/// Authentication + rate limiting decision point
pub struct RequestGate {
    policy: AuthPolicy,
    api_key_header: String,
    credentials: Arc<dyn CredentialStore>,
    analyze_limiter: RateLimiter,
    stream_limiter: RateLimiter,
}

impl RequestGate {
    pub fn new(
        policy: AuthPolicy,
        api_key_header: impl Into<String>,
        credentials: Arc<dyn CredentialStore>,
        analyze_limit: RateLimit,
        stream_limit: RateLimit,
    ) -> Self {
        Self {
            policy,
            api_key_header: api_key_header.into(),
            credentials,
            analyze_limiter: RateLimiter::new(analyze_limit),
            stream_limiter: RateLimiter::new(stream_limit),
        }
    }

    /// Scheme enforced on `route`
    pub fn scheme(&self, route: Route) -> AuthScheme {
        self.policy.for_route(route)
    }

    /// Budget applied to each caller on `route`
    pub fn limit(&self, route: Route) -> RateLimit {
        self.limiter(route).limit()
    }

    fn limiter(&self, route: Route) -> &RateLimiter {
        match route {
            Route::Analyze => &self.analyze_limiter,
            Route::Stream => &self.stream_limiter,
        }
    }

    /// Authenticate the caller, then count the request against its budget
    pub async fn admit(
        &self,
        route: Route,
        headers: &HeaderMap,
        peer: Option<SocketAddr>,
    ) -> Result<Admission, GatewayError> {
        let identity = self.authenticate(route, headers).await?;

        // Authenticated callers share a budget across IPs
        let rate_key = match &identity {
            Some(identity) => format!("user:{}", identity.as_str()),
            None => match peer {
                Some(addr) => format!("ip:{}", addr.ip()),
                None => "ip:unknown".to_string(),
            },
        };

        self.limiter(route).check(&rate_key).await?;

        Ok(Admission { identity, rate_key })
    }

    async fn authenticate(
        &self,
        route: Route,
        headers: &HeaderMap,
    ) -> Result<Option<Identity>, GatewayError> {
        match self.scheme(route) {
            AuthScheme::None => Ok(None),
            AuthScheme::ApiKey => {
                let key = headers
                    .get(self.api_key_header.as_str())
                    .and_then(|value| value.to_str().ok())
                    .ok_or(GatewayError::AuthRejected(AuthFailure::InvalidApiKey))?;

                self.credentials
                    .lookup(key)
                    .await
                    .map(Some)
                    .ok_or(GatewayError::AuthRejected(AuthFailure::InvalidApiKey))
            }
            AuthScheme::Bearer => {
                let token = headers
                    .get(header::AUTHORIZATION)
                    .and_then(|value| value.to_str().ok())
                    .and_then(|value| value.strip_prefix("Bearer "))
                    .map(str::trim)
                    .filter(|token| !token.is_empty())
                    .ok_or(GatewayError::AuthRejected(AuthFailure::MissingBearer))?;

                self.credentials
                    .lookup(token)
                    .await
                    .map(Some)
                    .ok_or(GatewayError::AuthRejected(AuthFailure::InvalidToken))
            }
        }
    }
}
