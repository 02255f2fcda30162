//! Shared harness for the HTTP integration tests.
//!
//! Every test gets its own in-memory database with migrations applied and a
//! router mounted under `/api`, the same shape the binary serves. Requests
//! are built with a bearer token and the connection-info extension the mark
//! handler reads the client IP from.

use std::net::SocketAddr;

use api::auth::generate_jwt;
use api::routes::routes;
use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{header, Request},
    response::Response,
    Router,
};
use db::models::course;
use db::models::user::{Model as User, Role};
use db::test_utils::setup_test_db;
use sea_orm::DatabaseConnection;
use util::state::AppState;

/// One user per role plus a course to hang sessions off.
pub struct Seed {
    pub student: User,
    pub teacher: User,
    pub admin: User,
    pub course: course::Model,
}

pub async fn make_test_app() -> (Router, DatabaseConnection) {
    let db = setup_test_db().await;
    let app = Router::new().nest("/api", routes(AppState::new(db.clone())));
    (app, db)
}

pub async fn seed_users(db: &DatabaseConnection) -> Seed {
    let student = User::create(db, "u04200001", "student@uni.test", Role::Student)
        .await
        .unwrap();
    let teacher = User::create(db, "lect001", "lecturer@uni.test", Role::Teacher)
        .await
        .unwrap();
    let admin = User::create(db, "admin001", "admin@uni.test", Role::Admin)
        .await
        .unwrap();
    let course = course::Model::create(db, "COS332", "Computer Networks")
        .await
        .unwrap();
    Seed {
        student,
        teacher,
        admin,
        course,
    }
}

/// Bearer token for an existing user row, minted the way the login flow would.
pub fn token_for(user: &User) -> String {
    let (token, _) = generate_jwt(user.id, user.role == Role::Admin);
    token
}

fn connect_info() -> ConnectInfo<SocketAddr> {
    ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 8080)))
}

/// Body-less request with auth and connection info attached.
pub fn authed_request(method: &str, uri: &str, token: &str) -> Request<Body> {
    let mut req = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap();
    req.extensions_mut().insert(connect_info());
    req
}

/// JSON request with auth and connection info attached.
pub fn authed_json_request(
    method: &str,
    uri: &str,
    token: &str,
    body: serde_json::Value,
) -> Request<Body> {
    let mut req = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    req.extensions_mut().insert(connect_info());
    req
}

pub async fn read_json(response: Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}
