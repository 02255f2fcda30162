//! Helpers shared by the route groups.

use crate::auth::guards::Empty;
use crate::response::ApiResponse;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use db::models::user;
use sea_orm::DatabaseConnection;
use services::session::SessionError;

/// Resolves the calling user's row from their claims subject.
///
/// Tokens can outlive accounts, so a missing row is a 401, not a 500.
pub async fn require_user(db: &DatabaseConnection, user_id: i64) -> Result<user::Model, Response> {
    match user::Model::get_by_id(db, user_id).await {
        Ok(Some(row)) => Ok(row),
        Ok(None) => Err((
            StatusCode::UNAUTHORIZED,
            Json(ApiResponse::<Empty>::error("Account no longer exists")),
        )
            .into_response()),
        Err(e) => Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiResponse::<Empty>::error(format!("Database error: {e}"))),
        )
            .into_response()),
    }
}

/// Maps a session service error onto the HTTP envelope.
pub fn session_error_response(err: SessionError) -> Response {
    let status = match &err {
        SessionError::NotFound | SessionError::CourseNotFound | SessionError::ClassroomNotFound => {
            StatusCode::NOT_FOUND
        }
        SessionError::NotAuthorized => StatusCode::FORBIDDEN,
        SessionError::Inactive | SessionError::MissingClassroom => StatusCode::BAD_REQUEST,
        SessionError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(ApiResponse::<Empty>::error(err.to_string()))).into_response()
}
