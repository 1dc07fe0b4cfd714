use std::convert::Infallible;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use axum::{
    extract::{ConnectInfo, FromRequestParts, Request, State},
    http::{header, request::Parts},
    middleware::Next,
    response::Response,
};
use social_core::{AuthContext, CoreError, Id, SecurityError};
use tracing::debug;

use crate::{ApiError, AppState};

fn bearer_token(req: &Request) -> Option<Result<String, ApiError>> {
    let value = req.headers().get(header::AUTHORIZATION)?;
    let token = value
        .to_str()
        .ok()
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .ok_or_else(|| CoreError::from(SecurityError::InvalidToken).into());
    Some(token)
}

/// Rejects the request unless it carries a live session token.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = bearer_token(&req)
        .unwrap_or_else(|| Err(CoreError::from(SecurityError::InvalidToken).into()))?;
    let ctx = state.accounts.authenticate(&token)?;
    req.extensions_mut().insert(ctx);
    Ok(next.run(req).await)
}

/// Lets anonymous requests through. A token that is present must still be valid.
pub async fn optional_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if let Some(token) = bearer_token(&req) {
        let ctx = state.accounts.authenticate(&token?)?;
        req.extensions_mut().insert(ctx);
    }
    Ok(next.run(req).await)
}

/// Client address used as the rate limit key. Falls back to the
/// unspecified address when the server runs without connect info.
fn client_ip(req: &Request, trust_forwarded_for: bool) -> IpAddr {
    if trust_forwarded_for {
        let forwarded = req
            .headers()
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .and_then(|ip| ip.trim().parse().ok());
        if let Some(ip) = forwarded {
            return ip;
        }
    }
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
}

pub async fn auth_rate_limit(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let ip = client_ip(&req, state.settings.rate_limit.trust_forwarded_for);
    if state.auth_limiter.check_key(&ip).is_err() {
        debug!(%ip, path = %req.uri().path(), "Auth rate limit hit");
        return Err(ApiError::RateLimited);
    }
    Ok(next.run(req).await)
}

/// The signed-in user, if any, as set by the auth middleware.
#[derive(Debug, Clone, Copy)]
pub struct Viewer(pub Option<Id>);

impl<S: Send + Sync> FromRequestParts<S> for Viewer {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Viewer(
            parts.extensions.get::<AuthContext>().map(|ctx| ctx.user_id),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    fn request(forwarded: Option<&str>) -> Request {
        let mut builder = axum::http::Request::builder().uri("/api/auth/login");
        if let Some(value) = forwarded {
            builder = builder.header("x-forwarded-for", value);
        }
        let mut req = builder.body(Body::empty()).unwrap();
        req.extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([192, 168, 1, 7], 40000))));
        req
    }

    #[test]
    fn test_client_ip_uses_peer_address() {
        let req = request(Some("10.0.0.1"));
        assert_eq!(client_ip(&req, false), IpAddr::from([192, 168, 1, 7]));
    }

    #[test]
    fn test_client_ip_trusts_first_forwarded_hop() {
        let req = request(Some("10.0.0.1, 172.16.0.1"));
        assert_eq!(client_ip(&req, true), IpAddr::from([10, 0, 0, 1]));
        let garbled = request(Some("not-an-ip"));
        assert_eq!(client_ip(&garbled, true), IpAddr::from([192, 168, 1, 7]));
    }

    #[test]
    fn test_client_ip_without_connect_info() {
        let req = axum::http::Request::builder().body(Body::empty()).unwrap();
        assert_eq!(client_ip(&req, false), IpAddr::V4(Ipv4Addr::UNSPECIFIED));
    }
}
