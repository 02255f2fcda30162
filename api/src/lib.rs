//! HTTP layer of the attendance engine.
//!
//! Exposes the router, auth plumbing, and the response envelope so the
//! binary and the integration tests share one definition of the API.

pub mod auth;
pub mod response;
pub mod routes;
