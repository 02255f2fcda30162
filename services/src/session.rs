//! Attendance session lifecycle: creation, token issue, and termination.
//!
//! Sessions are created already active and end either explicitly (end /
//! cancel) or implicitly when their time window lapses, which the validation
//! pipeline enforces at mark time. `ended` and `cancelled` are terminal.

use chrono::{DateTime, Utc};
use db::models::attendance_session::{Model as Session, Status};
use db::models::classroom_location;
use db::models::course;
use db::models::user::{Model as User, Role};
use sea_orm::{DatabaseConnection, DbErr};
use serde::Serialize;

/// Parameters for creating a session. Optional fields fall back to the
/// documented defaults.
#[derive(Debug, Clone)]
pub struct CreateSession {
    pub course_id: i64,
    pub classroom_location_id: Option<i64>,
    pub start_time: Option<DateTime<Utc>>,
    pub time_window_minutes: Option<i32>,
    pub qr_rotation_seconds: Option<i32>,
    pub require_gps: bool,
    pub require_selfie: bool,
}

/// A freshly issued display token for one rotation window.
#[derive(Debug, Clone, Serialize)]
pub struct TokenIssue {
    pub session_id: i64,
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub rotation_seconds: i32,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Attendance session not found")]
    NotFound,
    #[error("Caller may not manage this session")]
    NotAuthorized,
    #[error("Attendance session is not active")]
    Inactive,
    #[error("Course not found")]
    CourseNotFound,
    #[error("Classroom location not found")]
    ClassroomNotFound,
    #[error("A session requiring GPS needs a classroom location")]
    MissingClassroom,
    #[error("Database error: {0}")]
    Database(#[from] DbErr),
}

/// Creates a session owned by `caller`, active immediately. The rotation
/// interval is clamped to 5..=300 seconds; a GPS-required session must
/// reference an existing classroom so the geofence check has a center.
pub async fn create_session(
    db: &DatabaseConnection,
    caller: &User,
    params: CreateSession,
) -> Result<Session, SessionError> {
    if course::Model::get_by_id(db, params.course_id).await?.is_none() {
        return Err(SessionError::CourseNotFound);
    }

    match params.classroom_location_id {
        Some(classroom_id) => {
            if classroom_location::Model::get_by_id(db, classroom_id).await?.is_none() {
                return Err(SessionError::ClassroomNotFound);
            }
        }
        None if params.require_gps => return Err(SessionError::MissingClassroom),
        None => {}
    }

    let rotation = params.qr_rotation_seconds.unwrap_or(30).clamp(5, 300);
    let window_minutes = params.time_window_minutes.unwrap_or(30).max(1);
    let start_time = params.start_time.unwrap_or_else(Utc::now);

    let session = Session::create(
        db,
        params.course_id,
        caller.id,
        params.classroom_location_id,
        start_time,
        window_minutes,
        rotation,
        params.require_gps,
        params.require_selfie,
        None, // generate random secret
    )
    .await?;

    tracing::info!(
        session_id = session.id,
        course_id = session.course_id,
        teacher_id = session.teacher_id,
        "attendance session created"
    );
    Ok(session)
}

/// Loads a session for a caller allowed to manage it: its teacher or an
/// admin. Everyone else gets `NotAuthorized` regardless of session state.
pub async fn get_session(
    db: &DatabaseConnection,
    session_id: i64,
    caller: &User,
) -> Result<Session, SessionError> {
    let Some(session) = Session::get_by_id(db, session_id).await? else {
        return Err(SessionError::NotFound);
    };
    authorize(&session, caller)?;
    Ok(session)
}

/// Issues the current-window token for display. The persisted
/// `current_token` is a cache for the QR surface; verification recomputes
/// from the secret and never reads it back.
pub async fn generate_token(
    db: &DatabaseConnection,
    session_id: i64,
    caller: &User,
) -> Result<TokenIssue, SessionError> {
    let session = get_session(db, session_id, caller).await?;
    if !session.is_active() {
        return Err(SessionError::Inactive);
    }

    let now = Utc::now();
    let (token, expires_at) = session.cache_current_token(db, now).await?;

    Ok(TokenIssue {
        session_id: session.id,
        token,
        expires_at,
        rotation_seconds: session.qr_rotation_seconds,
    })
}

/// Transitions the session to `ended`. Terminal; no further attendance is
/// accepted afterwards regardless of the time window.
pub async fn end_session(
    db: &DatabaseConnection,
    session_id: i64,
    caller: &User,
) -> Result<Session, SessionError> {
    finalize(db, session_id, caller, Status::Ended).await
}

/// Transitions the session to `cancelled`. Terminal, like `ended`.
pub async fn cancel_session(
    db: &DatabaseConnection,
    session_id: i64,
    caller: &User,
) -> Result<Session, SessionError> {
    finalize(db, session_id, caller, Status::Cancelled).await
}

async fn finalize(
    db: &DatabaseConnection,
    session_id: i64,
    caller: &User,
    status: Status,
) -> Result<Session, SessionError> {
    let session = get_session(db, session_id, caller).await?;
    // Terminal states never transition, not even to another terminal state.
    if session.is_terminal() {
        return Err(SessionError::Inactive);
    }

    let updated = session.set_status(db, status).await?;
    tracing::info!(session_id = updated.id, status = %updated.status, "attendance session closed");
    Ok(updated)
}

fn authorize(session: &Session, caller: &User) -> Result<(), SessionError> {
    if caller.id == session.teacher_id || caller.role == Role::Admin {
        Ok(())
    } else {
        Err(SessionError::NotAuthorized)
    }
}
