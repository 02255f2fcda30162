//! The student-facing mark endpoint: the success path, every rejection code
//! it surfaces over HTTP, and the duplicate race at the unique index.

mod helpers;

use axum::http::StatusCode;
use chrono::Utc;
use db::models::attendance_session::Model as Session;
use db::models::{classroom_location, student_device};
use helpers::{authed_json_request, authed_request, make_test_app, read_json, seed_users, token_for, Seed};
use sea_orm::DatabaseConnection;
use serde_json::json;
use tower::ServiceExt;

const SECRET: &str = "9f2c4a6e8b0d1f3a5c7e9b2d4f6a8c0e1a3b5c7d9e0f2a4b6c8d0e1f3a5b7c9d";

/// Active session with a slow rotation so the window cannot flip mid-test.
async fn active_session(db: &DatabaseConnection, seed: &Seed) -> Session {
    Session::create(
        db,
        seed.course.id,
        seed.teacher.id,
        None,
        Utc::now(),
        30,
        300,
        false,
        false,
        Some(SECRET),
    )
    .await
    .unwrap()
}

fn mark_uri(session_id: i64) -> String {
    format!("/api/attendance/sessions/{session_id}/mark")
}

#[tokio::test]
async fn student_marks_attendance_over_http() {
    let (app, db) = make_test_app().await;
    let seed = seed_users(&db).await;
    let session = active_session(&db, &seed).await;
    let qr = session.current_token_at(Utc::now());

    let req = authed_json_request(
        "POST",
        &mark_uri(session.id),
        &token_for(&seed.student),
        json!({ "qr_token": qr, "device_fingerprint": "pixel-8-a1b2c3" }),
    );
    let response = app.clone().oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = read_json(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["message"], "Attendance recorded");
    assert!(body["data"]["record_id"].as_i64().unwrap() > 0);
    assert!(body["data"]["marked_at"].as_str().is_some());

    // The mark bound the device and bumped the counter.
    let device = student_device::Model::active_for_student(&db, seed.student.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(device.fingerprint, "pixel-8-a1b2c3");
    let session = Session::get_by_id(&db, session.id).await.unwrap().unwrap();
    assert_eq!(session.attendance_count, 1);
}

#[tokio::test]
async fn second_mark_is_a_conflict() {
    let (app, db) = make_test_app().await;
    let seed = seed_users(&db).await;
    let session = active_session(&db, &seed).await;
    let qr = session.current_token_at(Utc::now());
    let token = token_for(&seed.student);

    let req = authed_json_request("POST", &mark_uri(session.id), &token, json!({ "qr_token": qr }));
    let response = app.clone().oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let req = authed_json_request("POST", &mark_uri(session.id), &token, json!({ "qr_token": qr }));
    let response = app.oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let body = read_json(response).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["data"]["code"], "ALREADY_MARKED");
    assert_eq!(body["message"], "Attendance already recorded");
}

#[tokio::test]
async fn concurrent_marks_yield_one_success_and_one_conflict() {
    let (app, db) = make_test_app().await;
    let seed = seed_users(&db).await;
    let session = active_session(&db, &seed).await;
    let qr = session.current_token_at(Utc::now());
    let token = token_for(&seed.student);

    let first = app.clone().oneshot(authed_json_request(
        "POST",
        &mark_uri(session.id),
        &token,
        json!({ "qr_token": qr }),
    ));
    let second = app.clone().oneshot(authed_json_request(
        "POST",
        &mark_uri(session.id),
        &token,
        json!({ "qr_token": qr }),
    ));
    let (first, second) = tokio::join!(first, second);

    let mut statuses = vec![first.unwrap().status(), second.unwrap().status()];
    statuses.sort();
    assert_eq!(statuses, vec![StatusCode::OK, StatusCode::CONFLICT]);

    let session = Session::get_by_id(&db, session.id).await.unwrap().unwrap();
    assert_eq!(session.attendance_count, 1);
}

#[tokio::test]
async fn non_students_get_not_student() {
    let (app, db) = make_test_app().await;
    let seed = seed_users(&db).await;
    let session = active_session(&db, &seed).await;
    let qr = session.current_token_at(Utc::now());

    let req = authed_json_request(
        "POST",
        &mark_uri(session.id),
        &token_for(&seed.teacher),
        json!({ "qr_token": qr }),
    );
    let response = app.oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let body = read_json(response).await;
    assert_eq!(body["data"]["code"], "NOT_STUDENT");
}

#[tokio::test]
async fn unknown_session_maps_to_invalid_session() {
    let (app, db) = make_test_app().await;
    let seed = seed_users(&db).await;

    let req = authed_json_request(
        "POST",
        &mark_uri(424242),
        &token_for(&seed.student),
        json!({ "qr_token": "deadbeefdeadbeef" }),
    );
    let response = app.oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let body = read_json(response).await;
    assert_eq!(body["data"]["code"], "INVALID_SESSION");
}

#[tokio::test]
async fn stale_token_maps_to_invalid_qr() {
    let (app, db) = make_test_app().await;
    let seed = seed_users(&db).await;
    let session = active_session(&db, &seed).await;
    let stale = session.token_for_window(session.window(Utc::now()) - 3);

    let req = authed_json_request(
        "POST",
        &mark_uri(session.id),
        &token_for(&seed.student),
        json!({ "qr_token": stale }),
    );
    let response = app.oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = read_json(response).await;
    assert_eq!(body["data"]["code"], "INVALID_QR");
    assert_eq!(body["message"], "Invalid or expired QR token");
}

#[tokio::test]
async fn ended_session_maps_to_session_ended() {
    let (app, db) = make_test_app().await;
    let seed = seed_users(&db).await;
    let session = active_session(&db, &seed).await;
    let qr = session.current_token_at(Utc::now());
    services::session::end_session(&db, session.id, &seed.teacher)
        .await
        .unwrap();

    let req = authed_json_request(
        "POST",
        &mark_uri(session.id),
        &token_for(&seed.student),
        json!({ "qr_token": qr }),
    );
    let response = app.oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = read_json(response).await;
    assert_eq!(body["data"]["code"], "SESSION_ENDED");
}

#[tokio::test]
async fn geofence_rejection_reports_the_distances() {
    let (app, db) = make_test_app().await;
    let seed = seed_users(&db).await;
    let room = classroom_location::Model::create(&db, "Equator Lab", 0.0, 0.0, Some(50.0))
        .await
        .unwrap();
    let session = Session::create(
        &db,
        seed.course.id,
        seed.teacher.id,
        Some(room.id),
        Utc::now(),
        30,
        300,
        true,
        false,
        Some(SECRET),
    )
    .await
    .unwrap();
    let qr = session.current_token_at(Utc::now());
    let token = token_for(&seed.student);

    // No coordinates at all fails before the geofence.
    let req = authed_json_request("POST", &mark_uri(session.id), &token, json!({ "qr_token": qr }));
    let response = app.clone().oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = read_json(response).await;
    assert_eq!(body["data"]["code"], "GPS_REQUIRED");

    // 0.00046 degrees of longitude on the equator is roughly 51 metres.
    let req = authed_json_request(
        "POST",
        &mark_uri(session.id),
        &token,
        json!({ "qr_token": qr, "latitude": 0.0, "longitude": 0.00046 }),
    );
    let response = app.oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = read_json(response).await;
    assert_eq!(body["data"]["code"], "OUTSIDE_RADIUS");
    let distance = body["data"]["distance_meters"].as_f64().unwrap();
    assert!(distance > 50.0 && distance < 53.0);
    assert_eq!(body["data"]["allowed_radius_meters"].as_f64(), Some(50.0));
}

#[tokio::test]
async fn device_swap_maps_to_unregistered_device() {
    let (app, db) = make_test_app().await;
    let seed = seed_users(&db).await;
    let session = active_session(&db, &seed).await;
    let qr = session.current_token_at(Utc::now());
    student_device::Model::bind_if_absent(&db, seed.student.id, "device-a")
        .await
        .unwrap();

    let req = authed_json_request(
        "POST",
        &mark_uri(session.id),
        &token_for(&seed.student),
        json!({ "qr_token": qr, "device_fingerprint": "device-b" }),
    );
    let response = app.oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let body = read_json(response).await;
    assert_eq!(body["data"]["code"], "UNREGISTERED_DEVICE");
}

#[tokio::test]
async fn selfie_requirement_maps_to_selfie_required() {
    let (app, db) = make_test_app().await;
    let seed = seed_users(&db).await;
    let session = Session::create(
        &db,
        seed.course.id,
        seed.teacher.id,
        None,
        Utc::now(),
        30,
        300,
        false,
        true,
        Some(SECRET),
    )
    .await
    .unwrap();
    let qr = session.current_token_at(Utc::now());
    let token = token_for(&seed.student);

    let req = authed_json_request("POST", &mark_uri(session.id), &token, json!({ "qr_token": qr }));
    let response = app.clone().oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = read_json(response).await;
    assert_eq!(body["data"]["code"], "SELFIE_REQUIRED");

    let req = authed_json_request(
        "POST",
        &mark_uri(session.id),
        &token,
        json!({ "qr_token": qr, "selfie_url": "https://cdn.uni.test/selfies/1.jpg" }),
    );
    let response = app.oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn records_listing_shows_the_mark_to_staff_only() {
    let (app, db) = make_test_app().await;
    let seed = seed_users(&db).await;
    let session = active_session(&db, &seed).await;
    let qr = session.current_token_at(Utc::now());

    let req = authed_json_request(
        "POST",
        &mark_uri(session.id),
        &token_for(&seed.student),
        json!({ "qr_token": qr, "latitude": -25.7545, "longitude": 28.2314 }),
    );
    let response = app.clone().oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let uri = format!("/api/attendance/sessions/{}/records", session.id);
    let response = app
        .clone()
        .oneshot(authed_request("GET", &uri, &token_for(&seed.teacher)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = read_json(response).await;
    assert_eq!(body["data"]["total"].as_i64(), Some(1));
    let record = &body["data"]["records"][0];
    assert_eq!(record["student_id"].as_i64(), Some(seed.student.id));
    assert_eq!(record["username"], "u04200001");
    assert_eq!(record["token_used"].as_str(), Some(qr.as_str()));
    assert_eq!(record["latitude"].as_f64(), Some(-25.7545));

    let response = app
        .oneshot(authed_request("GET", &uri, &token_for(&seed.student)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}
