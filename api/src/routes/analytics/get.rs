//! Analytics: proxy attempt inspection.

use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{Duration, Utc};
use serde::Deserialize;
use std::str::FromStr;
use util::state::AppState;

use crate::auth::guards::Empty;
use crate::response::ApiResponse;
use db::models::proxy_attempt::AttemptType;
use services::analysis::{self, AnalysisFilter};

#[derive(Debug, Deserialize)]
pub struct ProxyAttemptsQuery {
    pub days: Option<i64>,
    pub attempt_type: Option<String>,
    pub limit: Option<u64>,
}

/// GET `/api/analytics/proxy-attempts`
///
/// Summarize rejected attendance attempts and surface suspicious patterns.
///
/// **Auth**: teacher or admin.
///
/// **Query**:
/// - `days` *(default 7, clamped to 1..=90)*: how far back to look
/// - `attempt_type` *(optional)*: narrow to one rejection code, e.g. `INVALID_QR`
/// - `limit` *(optional)*: cap the echoed attempt rows; statistics always
///   cover the whole window
///
/// **Response**: attempts, aggregate stats, and detected patterns
/// (`high_frequency`, `multiple_devices`, `ip_sharing`, `device_sharing`).
pub async fn get_proxy_attempts(
    State(state): State<AppState>,
    Query(q): Query<ProxyAttemptsQuery>,
) -> impl IntoResponse {
    let attempt_type = match q.attempt_type.as_deref() {
        None => None,
        Some(raw) => match AttemptType::from_str(raw) {
            Ok(t) => Some(t),
            Err(_) => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(ApiResponse::<Empty>::error(format!(
                        "Unknown attempt type: {raw}"
                    ))),
                )
                    .into_response();
            }
        },
    };

    let days = q.days.unwrap_or(7).clamp(1, 90);
    let to = Utc::now();
    let filter = AnalysisFilter {
        from: to - Duration::days(days),
        to,
        attempt_type,
        limit: q.limit,
    };

    match analysis::analyze(state.db(), filter).await {
        Ok(report) => (
            StatusCode::OK,
            Json(ApiResponse::success(
                report,
                "Proxy attempt analysis generated",
            )),
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiResponse::<Empty>::error(format!("Database error: {e}"))),
        )
            .into_response(),
    }
}
