//! Attendance: mutating routes (create session, end, cancel, mark).

use axum::{
    Extension, Json,
    extract::{ConnectInfo, Path, State},
    http::{HeaderMap, StatusCode, header::USER_AGENT},
    response::IntoResponse,
};
use std::net::SocketAddr;
use validator::Validate;

use crate::auth::guards::Empty;
use crate::routes::common::{require_user, session_error_response};
use crate::{auth::AuthUser, response::ApiResponse};

use super::common::{AttendanceSessionResponse, CreateSessionReq, mark_error_response};
use services::attendance::{self, ClientMeta, MarkAttendanceRequest};
use services::session::{self, CreateSession};
use util::state::AppState;

/// POST `/api/attendance/sessions`
///
/// Create a session owned by the caller, active immediately.
///
/// **Auth**: teacher or admin.
///
/// ### Request Body
/// ```json
/// {
///   "course_id": 1,
///   "classroom_location_id": 2,
///   "time_window_minutes": 30,
///   "qr_rotation_seconds": 30,
///   "require_gps": true,
///   "require_selfie": false
/// }
/// ```
///
/// ### Errors:
/// - `400 Bad Request` (validation failure, or GPS required without a classroom)
/// - `404 Not Found` (unknown course or classroom)
pub async fn create_session(
    State(state): State<AppState>,
    Extension(AuthUser(claims)): Extension<AuthUser>,
    Json(req): Json<CreateSessionReq>,
) -> impl IntoResponse {
    if let Err(e) = req.validate() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::<Empty>::error(format!("Validation failed: {e}"))),
        )
            .into_response();
    }

    let db = state.db();
    let caller = match require_user(db, claims.sub).await {
        Ok(row) => row,
        Err(resp) => return resp,
    };

    match session::create_session(
        db,
        &caller,
        CreateSession {
            course_id: req.course_id,
            classroom_location_id: req.classroom_location_id,
            start_time: req.start_time,
            time_window_minutes: req.time_window_minutes,
            qr_rotation_seconds: req.qr_rotation_seconds,
            require_gps: req.require_gps.unwrap_or(false),
            require_selfie: req.require_selfie.unwrap_or(false),
        },
    )
    .await
    {
        Ok(row) => (
            StatusCode::CREATED,
            Json(ApiResponse::success(
                AttendanceSessionResponse::from(row),
                "Attendance session created",
            )),
        )
            .into_response(),
        Err(e) => session_error_response(e),
    }
}

/// POST `/api/attendance/sessions/{session_id}/end`
///
/// Transition the session to `ended`. Terminal.
///
/// **Auth**: teacher owning the session, or admin.
pub async fn end_session(
    State(state): State<AppState>,
    Path(session_id): Path<i64>,
    Extension(AuthUser(claims)): Extension<AuthUser>,
) -> impl IntoResponse {
    let db = state.db();
    let caller = match require_user(db, claims.sub).await {
        Ok(row) => row,
        Err(resp) => return resp,
    };

    match session::end_session(db, session_id, &caller).await {
        Ok(row) => (
            StatusCode::OK,
            Json(ApiResponse::success(
                AttendanceSessionResponse::from(row),
                "Attendance session ended",
            )),
        )
            .into_response(),
        Err(e) => session_error_response(e),
    }
}

/// POST `/api/attendance/sessions/{session_id}/cancel`
///
/// Transition the session to `cancelled`. Terminal, like `end`.
///
/// **Auth**: teacher owning the session, or admin.
pub async fn cancel_session(
    State(state): State<AppState>,
    Path(session_id): Path<i64>,
    Extension(AuthUser(claims)): Extension<AuthUser>,
) -> impl IntoResponse {
    let db = state.db();
    let caller = match require_user(db, claims.sub).await {
        Ok(row) => row,
        Err(resp) => return resp,
    };

    match session::cancel_session(db, session_id, &caller).await {
        Ok(row) => (
            StatusCode::OK,
            Json(ApiResponse::success(
                AttendanceSessionResponse::from(row),
                "Attendance session cancelled",
            )),
        )
            .into_response(),
        Err(e) => session_error_response(e),
    }
}

/// POST `/api/attendance/sessions/{session_id}/mark`
///
/// Run the validation pipeline for one attendance attempt by the calling
/// student. Every rejection carries a stable `code` in the response data
/// and is appended to the proxy attempt log.
///
/// **Auth**: any authenticated user; non-students are rejected by the
/// pipeline itself with `NOT_STUDENT`.
///
/// ### Status codes
/// - `200 OK`: attendance recorded
/// - `403 Forbidden`: `NOT_STUDENT`, `UNREGISTERED_DEVICE`
/// - `404 Not Found`: `INVALID_SESSION`
/// - `409 Conflict`: `ALREADY_MARKED`
/// - `400 Bad Request`: every other rejection
/// - `500 Internal Server Error`: `INSERT_FAILED` / `SERVER_ERROR`
pub async fn mark_attendance(
    State(state): State<AppState>,
    Path(session_id): Path<i64>,
    Extension(AuthUser(claims)): Extension<AuthUser>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(body): Json<MarkAttendanceRequest>,
) -> impl IntoResponse {
    let db = state.db();
    let meta = ClientMeta {
        ip_address: Some(addr.ip().to_string()),
        user_agent: headers
            .get(USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned),
    };

    match attendance::mark_attendance(db, claims.sub, session_id, body, meta).await {
        Ok(success) => (
            StatusCode::OK,
            Json(ApiResponse::success(success, "Attendance recorded")),
        )
            .into_response(),
        Err(err) => mark_error_response(err),
    }
}
