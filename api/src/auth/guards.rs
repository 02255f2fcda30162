use crate::auth::claims::AuthUser;
use crate::response::ApiResponse;
use axum::{
    Json,
    body::Body,
    extract::{FromRequestParts, State},
    http::{Request, StatusCode},
    middleware::Next,
    response::Response,
};
use db::models::user;
use util::state::AppState;

// --- Role Based Access Guards ---

#[derive(serde::Serialize, Default)]
pub struct Empty;

/// Validates the bearer token and re-inserts the resulting `AuthUser` into
/// the request extensions so handlers can read it without re-decoding.
async fn extract_and_insert_authuser(
    req: Request<Body>,
) -> Result<(Request<Body>, AuthUser), (StatusCode, Json<ApiResponse<Empty>>)> {
    let (mut parts, body) = req.into_parts();
    let user = AuthUser::from_request_parts(&mut parts, &())
        .await
        .map_err(|_| {
            (
                StatusCode::UNAUTHORIZED,
                Json(ApiResponse::error("Authentication required")),
            )
        })?;

    let mut req = Request::from_parts(parts, body);
    req.extensions_mut().insert(user.clone());
    Ok((req, user))
}

/// Guard for routes any signed-in user may call, such as marking attendance.
pub async fn allow_authenticated(
    req: Request<Body>,
    next: Next,
) -> Result<Response, (StatusCode, Json<ApiResponse<Empty>>)> {
    let (req, _user) = extract_and_insert_authuser(req).await?;

    Ok(next.run(req).await)
}

/// Staff guard: the caller must hold the teacher or admin role.
///
/// The admin claim is trusted as-is; everyone else is checked against the
/// users table. A lookup failure denies access (fail-safe).
pub async fn allow_staff(
    State(app_state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, (StatusCode, Json<ApiResponse<Empty>>)> {
    let (req, user) = extract_and_insert_authuser(req).await?;

    if user.0.admin {
        return Ok(next.run(req).await);
    }

    match user::Model::get_by_id(app_state.db(), user.0.sub).await {
        Ok(Some(row)) if row.is_staff() => Ok(next.run(req).await),
        Ok(_) => Err((
            StatusCode::FORBIDDEN,
            Json(ApiResponse::error("Teacher or admin access required")),
        )),
        Err(e) => {
            tracing::warn!(
                error = %e,
                user_id = user.0.sub,
                "DB error while checking role; denying access"
            );
            Err((
                StatusCode::FORBIDDEN,
                Json(ApiResponse::error("Teacher or admin access required")),
            ))
        }
    }
}

/// Admin-only guard.
pub async fn allow_admin(
    req: Request<Body>,
    next: Next,
) -> Result<Response, (StatusCode, Json<ApiResponse<Empty>>)> {
    let (req, user) = extract_and_insert_authuser(req).await?;

    if !user.0.admin {
        return Err((
            StatusCode::FORBIDDEN,
            Json(ApiResponse::error("Admin access required")),
        ));
    }

    Ok(next.run(req).await)
}
