use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::response::ApiResponse;
use services::attendance::{MarkError, MarkRejection};

#[derive(Debug, Serialize)]
pub struct AttendanceSessionResponse {
    pub id: i64,
    pub course_id: i64,
    pub teacher_id: i64,
    pub classroom_location_id: Option<i64>,
    pub status: String,
    pub start_time: String,
    pub time_window_minutes: i32,
    pub qr_rotation_seconds: i32,
    pub require_gps: bool,
    pub require_selfie: bool,
    pub attendance_count: i32,
    pub created_at: String,
    pub updated_at: String,
}

impl From<db::models::attendance_session::Model> for AttendanceSessionResponse {
    fn from(m: db::models::attendance_session::Model) -> Self {
        Self {
            id: m.id,
            course_id: m.course_id,
            teacher_id: m.teacher_id,
            classroom_location_id: m.classroom_location_id,
            status: m.status.to_string(),
            start_time: m.start_time.to_rfc3339(),
            time_window_minutes: m.time_window_minutes,
            qr_rotation_seconds: m.qr_rotation_seconds,
            require_gps: m.require_gps,
            require_selfie: m.require_selfie,
            attendance_count: m.attendance_count,
            created_at: m.created_at.to_rfc3339(),
            updated_at: m.updated_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateSessionReq {
    pub course_id: i64,
    pub classroom_location_id: Option<i64>,
    pub start_time: Option<DateTime<Utc>>,
    #[validate(range(min = 1, max = 1440))]
    pub time_window_minutes: Option<i32>,
    pub qr_rotation_seconds: Option<i32>,
    pub require_gps: Option<bool>,
    pub require_selfie: Option<bool>,
}

/// Query params for listing session records.
#[derive(Debug, Deserialize)]
pub struct RecordsListQuery {
    /// 1-based page index (default 1).
    pub page: Option<i32>,
    /// Items per page (default 20, max 200).
    pub per_page: Option<i32>,
}

/// A single attendance record (DTO) for API responses.
#[derive(Debug, Serialize)]
pub struct AttendanceRecordDto {
    pub id: i64,
    pub session_id: i64,
    pub student_id: i64,
    pub username: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub gps_accuracy_meters: Option<f64>,
    pub distance_from_classroom_meters: Option<f64>,
    pub selfie_url: Option<String>,
    pub token_used: String,
    pub verification_status: String,
    pub marked_at: String,
}

/// Paged response for records list.
#[derive(Debug, Serialize)]
pub struct RecordsListResponse {
    pub records: Vec<AttendanceRecordDto>,
    pub page: i32,
    pub per_page: i32,
    pub total: i32,
}

/// Error payload carrying the stable rejection code. Geofence rejections
/// also disclose the two distances the decision used; every other code
/// keeps the payload to the code alone.
#[derive(Debug, Serialize)]
pub struct RejectionData {
    pub code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance_meters: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_radius_meters: Option<f64>,
}

/// Maps a pipeline error onto the HTTP envelope.
pub fn mark_error_response(err: MarkError) -> Response {
    let status = match &err {
        MarkError::Rejected(rejection) => match rejection {
            MarkRejection::NotStudent | MarkRejection::UnregisteredDevice => StatusCode::FORBIDDEN,
            MarkRejection::InvalidSession => StatusCode::NOT_FOUND,
            MarkRejection::AlreadyMarked => StatusCode::CONFLICT,
            _ => StatusCode::BAD_REQUEST,
        },
        MarkError::InsertFailed(_) | MarkError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };

    let mut data = RejectionData {
        code: err.code(),
        distance_meters: None,
        allowed_radius_meters: None,
    };
    if let MarkError::Rejected(MarkRejection::OutsideRadius {
        distance_meters,
        allowed_radius_meters,
    }) = &err
    {
        data.distance_meters = Some(*distance_meters);
        data.allowed_radius_meters = Some(*allowed_radius_meters);
    }

    let message = err.to_string();
    (status, Json(ApiResponse::error_with(data, message))).into_response()
}
