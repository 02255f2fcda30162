use crate::auth::claims::AuthUser;
use axum::{
    body::Body,
    extract::{ConnectInfo, FromRequestParts},
    http::{Method, Request},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::TypedHeader;
use headers::UserAgent;
use std::net::SocketAddr;
use std::time::Instant;
use tracing::info;

/// Access log for every request: method, path, client IP, caller ID when a
/// valid token is attached, user agent, response status and latency. CORS
/// preflight `OPTIONS` requests pass through unlogged.
///
/// Applied globally in `main`:
///
/// ```ignore
/// let app = Router::new().layer(from_fn(log_request));
/// ```
pub async fn log_request(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    req: Request<Body>,
    next: Next,
) -> Response {
    if req.method() == Method::OPTIONS {
        return next.run(req).await;
    }

    let (mut parts, body) = req.into_parts();
    let method = parts.method.clone();
    let path = parts.uri.path().to_owned();

    // Anonymous callers log as user 0. The token is decoded here without
    // touching the database; the role guards do their own checks later.
    let user = AuthUser::from_request_parts(&mut parts, &())
        .await
        .map(|AuthUser(claims)| claims.sub)
        .unwrap_or(0);
    let user_agent = TypedHeader::<UserAgent>::from_request_parts(&mut parts, &())
        .await
        .map(|TypedHeader(ua)| ua.to_string())
        .unwrap_or_else(|_| "unknown".into());

    let started = Instant::now();
    let response = next.run(Request::from_parts(parts, body)).await;

    info!(
        %method,
        %path,
        ip = %addr.ip(),
        user,
        user_agent,
        status = response.status().as_u16(),
        latency_ms = started.elapsed().as_millis() as u64,
        "request"
    );

    response
}
