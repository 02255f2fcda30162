//! HTTP route entry point for `/api/...`.
//!
//! This module defines all HTTP entry points under the `/api` namespace.
//! Routes are organized by domain, each protected via appropriate access
//! control middleware.
//!
//! Route groups include:
//! - `/health` → Health check endpoint (public)
//! - `/attendance` → Session management and attendance marking (authenticated users)
//! - `/analytics` → Proxy attempt analysis (teacher/admin only)

use crate::routes::{
    analytics::analytics_routes, attendance::attendance_routes, health::health_routes,
};
use axum::Router;
use util::state::AppState;

pub mod analytics;
pub mod attendance;
pub mod common;
pub mod health;

/// Builds the complete application router for all HTTP endpoints.
///
/// The returned router has its state applied and mounts all core API routes
/// under their respective base paths. Each group wires its own access
/// control, so this function stays a plain table of contents.
///
/// # Route Structure:
/// - `/health` → Health check endpoint (no authentication required).
/// - `/attendance` → Session lifecycle, QR issuance, marking, and records.
/// - `/analytics` → Proxy attempt analysis (restricted to staff).
pub fn routes(app_state: AppState) -> Router {
    Router::new()
        .nest("/health", health_routes())
        .nest("/attendance", attendance_routes(app_state.clone()))
        .nest("/analytics", analytics_routes(app_state.clone()))
        .with_state(app_state)
}
