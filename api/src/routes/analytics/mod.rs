use axum::{Router, middleware::from_fn_with_state, routing::get};
use util::state::AppState;

mod get;

pub use get::get_proxy_attempts;

use crate::auth::guards::allow_staff;

/// `/api/analytics/...`: read-only fraud analysis, staff only.
pub fn analytics_routes(app_state: AppState) -> Router<AppState> {
    Router::new().route(
        "/proxy-attempts",
        get(get_proxy_attempts).route_layer(from_fn_with_state(app_state, allow_staff)),
    )
}
