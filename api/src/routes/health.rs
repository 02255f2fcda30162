use crate::response::ApiResponse;
use axum::{Json, Router, response::IntoResponse, routing::get};
use serde::Serialize;
use util::state::AppState;

/// Builds the `/health` route group: one unauthenticated probe endpoint for
/// load balancers and deployment checks.
pub fn health_routes() -> Router<AppState> {
    Router::new().route("/", get(health_check))
}

#[derive(Serialize)]
struct HealthInfo {
    status: &'static str,
    version: &'static str,
}

/// GET /health
///
/// Liveness probe. Reports the crate version so deployments can verify what
/// is actually running.
///
/// ### Response
/// - `200 OK`
///
/// ```json
/// {
///   "success": true,
///   "data": { "status": "ok", "version": "0.1.0" },
///   "message": "Service is healthy"
/// }
/// ```
async fn health_check() -> impl IntoResponse {
    let info = HealthInfo {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    };
    Json(ApiResponse::success(info, "Service is healthy"))
}

#[cfg(test)]
mod tests {
    use super::health_check;
    use axum::body::to_bytes;
    use axum::response::IntoResponse;
    use serde_json::Value;

    #[tokio::test]
    async fn health_check_reports_status_and_version() {
        let response = health_check().await.into_response();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: Value = serde_json::from_slice(&body).unwrap();

        assert_eq!(json["success"], true);
        assert_eq!(json["data"]["status"], "ok");
        assert_eq!(json["data"]["version"], env!("CARGO_PKG_VERSION"));
        assert_eq!(json["message"], "Service is healthy");
    }
}
