//! Attendance: read-only routes (get session, fetch current QR token,
//! list records).

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use sea_orm::{ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder};
use std::collections::HashMap;
use util::state::AppState;

use crate::routes::common::{require_user, session_error_response};
use crate::{auth::AuthUser, response::ApiResponse};

use super::common::{
    AttendanceRecordDto, AttendanceSessionResponse, RecordsListQuery, RecordsListResponse,
};
use db::models::attendance_record::{Column as RecordCol, Entity as RecordEntity};
use db::models::user::{Column as UserCol, Entity as UserEntity};
use services::session;

/// GET `/api/attendance/sessions/{session_id}`
///
/// Fetch a single attendance session.
///
/// **Auth**: teacher owning the session, or admin.
///
/// **Response**: `AttendanceSessionResponse`. The rotating-token secret is
/// never part of any response.
pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<i64>,
    Extension(AuthUser(claims)): Extension<AuthUser>,
) -> impl IntoResponse {
    let db = state.db();
    let caller = match require_user(db, claims.sub).await {
        Ok(row) => row,
        Err(resp) => return resp,
    };

    match session::get_session(db, session_id, &caller).await {
        Ok(row) => (
            StatusCode::OK,
            Json(ApiResponse::success(
                AttendanceSessionResponse::from(row),
                "Attendance session retrieved",
            )),
        )
            .into_response(),
        Err(e) => session_error_response(e),
    }
}

/// GET `/api/attendance/sessions/{session_id}/qr`
///
/// Issue the **current rotating token** for an active session, for display
/// as a QR code. The token is recomputed from the session secret and cached
/// alongside its expiry.
///
/// **Auth**: teacher owning the session, or admin.
///
/// **Notes**:
/// - Returns `400` if the session is not active.
pub async fn get_session_qr(
    State(state): State<AppState>,
    Path(session_id): Path<i64>,
    Extension(AuthUser(claims)): Extension<AuthUser>,
) -> impl IntoResponse {
    let db = state.db();
    let caller = match require_user(db, claims.sub).await {
        Ok(row) => row,
        Err(resp) => return resp,
    };

    match session::generate_token(db, session_id, &caller).await {
        Ok(issue) => (
            StatusCode::OK,
            Json(ApiResponse::success(issue, "Current QR token issued")),
        )
            .into_response(),
        Err(e) => session_error_response(e),
    }
}

/// GET `/api/attendance/sessions/{session_id}/records`
///
/// List verified attendance records for a session, newest first.
///
/// **Auth**: teacher owning the session, or admin.
///
/// **Query**:
/// - `page` *(default 1)*
/// - `per_page` *(default 20, max 200)*
///
/// **Response**: `RecordsListResponse` with usernames resolved per record.
pub async fn list_session_records(
    State(state): State<AppState>,
    Path(session_id): Path<i64>,
    Extension(AuthUser(claims)): Extension<AuthUser>,
    Query(q): Query<RecordsListQuery>,
) -> impl IntoResponse {
    let db = state.db();
    let caller = match require_user(db, claims.sub).await {
        Ok(row) => row,
        Err(resp) => return resp,
    };
    if let Err(e) = session::get_session(db, session_id, &caller).await {
        return session_error_response(e);
    }

    let page = q.page.unwrap_or(1).max(1) as u64;
    let per_page = q.per_page.unwrap_or(20).clamp(1, 200) as u64;

    let paginator = RecordEntity::find()
        .filter(RecordCol::SessionId.eq(session_id))
        .order_by_desc(RecordCol::MarkedAt)
        .paginate(db, per_page);
    let total = paginator.num_items().await.unwrap_or(0) as i32;
    let rows = paginator
        .fetch_page(page.saturating_sub(1))
        .await
        .unwrap_or_default();

    // One lookup for all usernames on the page.
    let student_ids: Vec<i64> = rows.iter().map(|r| r.student_id).collect();
    let usernames: HashMap<i64, String> = if student_ids.is_empty() {
        HashMap::new()
    } else {
        UserEntity::find()
            .filter(UserCol::Id.is_in(student_ids))
            .all(db)
            .await
            .unwrap_or_default()
            .into_iter()
            .map(|u| (u.id, u.username))
            .collect()
    };

    let records = rows
        .into_iter()
        .map(|r| AttendanceRecordDto {
            id: r.id,
            session_id: r.session_id,
            student_id: r.student_id,
            username: usernames.get(&r.student_id).cloned(),
            latitude: r.latitude,
            longitude: r.longitude,
            gps_accuracy_meters: r.gps_accuracy_meters,
            distance_from_classroom_meters: r.distance_from_classroom_meters,
            selfie_url: r.selfie_url,
            token_used: r.token_used,
            verification_status: r.verification_status,
            marked_at: r.marked_at.to_rfc3339(),
        })
        .collect();

    let resp = RecordsListResponse {
        records,
        page: page as i32,
        per_page: per_page as i32,
        total,
    };

    (
        StatusCode::OK,
        Json(ApiResponse::success(resp, "Attendance records retrieved")),
    )
        .into_response()
}
