use axum::{
    Router,
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
};
use util::state::AppState;

mod common;
mod get;
mod post;

pub use get::{get_session, get_session_qr, list_session_records};
pub use post::{cancel_session, create_session, end_session, mark_attendance};

use crate::auth::guards::{allow_authenticated, allow_staff};

/// `/api/attendance/...`: session lifecycle for staff, marking for students.
///
/// Session management routes sit behind `allow_staff`; ownership of the
/// specific session is checked again in the service layer. Marking only
/// requires authentication so the pipeline can log non-student attempts.
pub fn attendance_routes(app_state: AppState) -> Router<AppState> {
    Router::new()
        .route(
            "/sessions",
            post(create_session)
                .route_layer(from_fn_with_state(app_state.clone(), allow_staff)),
        )
        .route(
            "/sessions/{session_id}",
            get(get_session).route_layer(from_fn_with_state(app_state.clone(), allow_staff)),
        )
        .route(
            "/sessions/{session_id}/qr",
            get(get_session_qr).route_layer(from_fn_with_state(app_state.clone(), allow_staff)),
        )
        .route(
            "/sessions/{session_id}/end",
            post(end_session).route_layer(from_fn_with_state(app_state.clone(), allow_staff)),
        )
        .route(
            "/sessions/{session_id}/cancel",
            post(cancel_session).route_layer(from_fn_with_state(app_state.clone(), allow_staff)),
        )
        .route(
            "/sessions/{session_id}/mark",
            post(mark_attendance).route_layer(from_fn(allow_authenticated)),
        )
        .route(
            "/sessions/{session_id}/records",
            get(list_session_records).route_layer(from_fn_with_state(app_state, allow_staff)),
        )
}
