//! The attendance validation pipeline.
//!
//! One call per student attempt, running the full ordered check sequence:
//! identity, session, lifecycle, time window, rotating token, geofence,
//! device binding, selfie evidence, duplicate guard. The first failing check
//! short-circuits; every rejection is appended to the proxy attempt log on a
//! detached task before the error is returned. Nothing is written until the
//! record insert itself succeeds, so a failed attempt leaves no attendance
//! state behind.

use chrono::{DateTime, Utc};
use db::models::attendance_record::{self, NewAttendanceRecord};
use db::models::attendance_session;
use db::models::classroom_location;
use db::models::proxy_attempt::{AttemptType, NewProxyAttempt};
use db::models::student_device::{self, BindingStatus};
use db::models::user;
use sea_orm::{DatabaseConnection, DbErr, SqlErr};
use serde::{Deserialize, Serialize};
use util::config::AppConfig;
use util::geo;

use crate::proxy_log;

/// Everything a student submits when scanning the QR code.
#[derive(Debug, Clone, Deserialize)]
pub struct MarkAttendanceRequest {
    pub qr_token: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub gps_accuracy: Option<f64>,
    pub device_fingerprint: Option<String>,
    pub selfie_url: Option<String>,
}

/// Transport-level facts about the caller, captured by the HTTP layer.
#[derive(Debug, Clone, Default)]
pub struct ClientMeta {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MarkSuccess {
    pub record_id: i64,
    pub marked_at: DateTime<Utc>,
}

/// One rejected check. The message is what the caller (and the proxy log)
/// sees; everything else deliberately stays vague enough not to help an
/// attacker iterate.
#[derive(Debug, thiserror::Error)]
pub enum MarkRejection {
    #[error("Only students may mark attendance")]
    NotStudent,
    #[error("Attendance session not found")]
    InvalidSession,
    #[error("Attendance session is no longer active")]
    SessionEnded,
    #[error("The attendance window has closed")]
    TimeExpired,
    #[error("Invalid or expired QR token")]
    InvalidQr,
    #[error("GPS coordinates are required for this session")]
    GpsRequired,
    #[error("Too far from the classroom: {distance_meters:.1}m away, allowed {allowed_radius_meters:.1}m")]
    OutsideRadius {
        distance_meters: f64,
        allowed_radius_meters: f64,
    },
    #[error("This device is registered to a different student profile")]
    UnregisteredDevice,
    #[error("Selfie evidence is required for this session")]
    SelfieRequired,
    #[error("Attendance already recorded")]
    AlreadyMarked,
}

impl MarkRejection {
    /// Stable machine-readable code, as surfaced to callers.
    pub fn code(&self) -> &'static str {
        match self {
            MarkRejection::NotStudent => "NOT_STUDENT",
            MarkRejection::InvalidSession => "INVALID_SESSION",
            MarkRejection::SessionEnded => "SESSION_ENDED",
            MarkRejection::TimeExpired => "TIME_EXPIRED",
            MarkRejection::InvalidQr => "INVALID_QR",
            MarkRejection::GpsRequired => "GPS_REQUIRED",
            MarkRejection::OutsideRadius { .. } => "OUTSIDE_RADIUS",
            MarkRejection::UnregisteredDevice => "UNREGISTERED_DEVICE",
            MarkRejection::SelfieRequired => "SELFIE_REQUIRED",
            MarkRejection::AlreadyMarked => "ALREADY_MARKED",
        }
    }

    fn attempt_type(&self) -> AttemptType {
        match self {
            MarkRejection::NotStudent => AttemptType::NoStudentRecord,
            MarkRejection::InvalidSession => AttemptType::InvalidSession,
            MarkRejection::SessionEnded => AttemptType::SessionEnded,
            MarkRejection::TimeExpired => AttemptType::TimeExpired,
            MarkRejection::InvalidQr => AttemptType::InvalidQr,
            MarkRejection::GpsRequired => AttemptType::GpsRequired,
            MarkRejection::OutsideRadius { .. } => AttemptType::OutsideRadius,
            MarkRejection::UnregisteredDevice => AttemptType::UnregisteredDevice,
            MarkRejection::SelfieRequired => AttemptType::SelfieRequired,
            MarkRejection::AlreadyMarked => AttemptType::AlreadyMarked,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MarkError {
    #[error(transparent)]
    Rejected(MarkRejection),
    /// The record insert itself failed for a reason other than the
    /// duplicate guard. A storage fault, not a fraud signal.
    #[error("Failed to record attendance")]
    InsertFailed(#[source] DbErr),
    /// Any other storage failure along the pipeline.
    #[error("Database error: {0}")]
    Database(#[from] DbErr),
}

impl MarkError {
    pub fn code(&self) -> &'static str {
        match self {
            MarkError::Rejected(r) => r.code(),
            MarkError::InsertFailed(_) => "INSERT_FAILED",
            MarkError::Database(_) => "SERVER_ERROR",
        }
    }
}

/// Runs the ordered validation pipeline for one attendance attempt.
///
/// Checks run strictly in sequence and the first failure wins; a request
/// failing the geofence never reaches the device-binding check, so the
/// caller learns exactly one rejection per attempt. Side effects are
/// equally strict: the verified record is inserted first (the unique index
/// on (session, student) settles concurrent duplicates), and only then is
/// the device bound and the session counter bumped.
pub async fn mark_attendance(
    db: &DatabaseConnection,
    caller_id: i64,
    session_id: i64,
    req: MarkAttendanceRequest,
    meta: ClientMeta,
) -> Result<MarkSuccess, MarkError> {
    let now = Utc::now();
    let (tolerance, default_radius) = {
        let cfg = AppConfig::global();
        (cfg.token_window_tolerance, cfg.default_geofence_radius_m)
    };

    // 0. The caller must resolve to a student record.
    let student = match user::Model::get_by_id(db, caller_id).await? {
        Some(u) if u.is_student() => u,
        other => {
            let known_id = other.map(|u| u.id);
            return Err(reject(db, MarkRejection::NotStudent, None, known_id, &req, &meta));
        }
    };

    // 1. The session must exist; pull its classroom alongside.
    let Some(session) = attendance_session::Model::get_by_id(db, session_id).await? else {
        return Err(reject(
            db,
            MarkRejection::InvalidSession,
            None,
            Some(student.id),
            &req,
            &meta,
        ));
    };
    let classroom = match session.classroom_location_id {
        Some(id) => classroom_location::Model::get_by_id(db, id).await?,
        None => None,
    };

    let refs = (Some(session.id), Some(student.id));

    // 2. Only active sessions accept marks.
    if !session.is_active() {
        return Err(reject(db, MarkRejection::SessionEnded, refs.0, refs.1, &req, &meta));
    }

    // 3. The marking window must still be open.
    if !session.within_time_window(now) {
        return Err(reject(db, MarkRejection::TimeExpired, refs.0, refs.1, &req, &meta));
    }

    // 4. Token check, recomputed from the secret; the cached display token
    //    is never consulted.
    if !session.verify_token(&req.qr_token, tolerance, now) {
        return Err(reject(db, MarkRejection::InvalidQr, refs.0, refs.1, &req, &meta));
    }

    // 5. Geofence, when the session demands one.
    let mut distance_from_classroom = None;
    if session.require_gps {
        let (Some(lat), Some(lon)) = (req.latitude, req.longitude) else {
            return Err(reject(db, MarkRejection::GpsRequired, refs.0, refs.1, &req, &meta));
        };
        // A GPS session without a classroom row predates the creation-time
        // rule; coordinates are still recorded, the radius check is moot.
        if let Some(room) = &classroom {
            let distance = geo::haversine_distance_meters(lat, lon, room.latitude, room.longitude);
            let allowed = room.radius_meters.unwrap_or(default_radius);
            if distance > allowed {
                return Err(reject(
                    db,
                    MarkRejection::OutsideRadius {
                        distance_meters: distance,
                        allowed_radius_meters: allowed,
                    },
                    refs.0,
                    refs.1,
                    &req,
                    &meta,
                ));
            }
            distance_from_classroom = Some(distance);
        }
    }

    // 6. Device binding. Absent fingerprints skip enforcement; binding is
    //    best effort by policy.
    if let Some(fp) = req.device_fingerprint.as_deref() {
        match student_device::Model::check_binding(db, student.id, fp).await? {
            BindingStatus::Mismatch => {
                return Err(reject(
                    db,
                    MarkRejection::UnregisteredDevice,
                    refs.0,
                    refs.1,
                    &req,
                    &meta,
                ));
            }
            BindingStatus::Match | BindingStatus::NotBound => {}
        }
    }

    // 7. Selfie evidence, when the session demands it.
    if session.require_selfie && req.selfie_url.is_none() {
        return Err(reject(db, MarkRejection::SelfieRequired, refs.0, refs.1, &req, &meta));
    }

    // 8. Advisory duplicate check; cheap early exit for the common retry.
    if attendance_record::Model::exists_for(db, session.id, student.id).await? {
        return Err(reject(db, MarkRejection::AlreadyMarked, refs.0, refs.1, &req, &meta));
    }

    // 9. Insert. Two racing attempts can both pass step 8; whoever loses
    //    here gets the same ALREADY_MARKED as a plain retry would.
    let record = match attendance_record::Model::insert_verified(
        db,
        NewAttendanceRecord {
            session_id: session.id,
            student_id: student.id,
            latitude: req.latitude,
            longitude: req.longitude,
            gps_accuracy_meters: req.gps_accuracy,
            distance_from_classroom_meters: distance_from_classroom,
            selfie_url: req.selfie_url.clone(),
            token_used: req.qr_token.clone(),
            marked_at: now,
        },
    )
    .await
    {
        Ok(record) => record,
        Err(err) if matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => {
            return Err(reject(db, MarkRejection::AlreadyMarked, refs.0, refs.1, &req, &meta));
        }
        Err(err) => return Err(MarkError::InsertFailed(err)),
    };

    // 10. Post-success effects: establish or refresh the device binding,
    //     bump the counter relative in the database.
    if let Some(fp) = req.device_fingerprint.as_deref() {
        student_device::Model::bind_if_absent(db, student.id, fp).await?;
    }
    attendance_session::Model::increment_attendance_count(db, session.id).await?;

    tracing::info!(
        session_id = session.id,
        student_id = student.id,
        "attendance recorded"
    );

    Ok(MarkSuccess {
        record_id: record.id,
        marked_at: record.marked_at,
    })
}

/// Queues the proxy-log append for a rejection and hands the rejection back
/// as the pipeline error. The append rides a detached task; see
/// [`proxy_log::record_rejection`].
fn reject(
    db: &DatabaseConnection,
    rejection: MarkRejection,
    session_id: Option<i64>,
    student_id: Option<i64>,
    req: &MarkAttendanceRequest,
    meta: &ClientMeta,
) -> MarkError {
    proxy_log::record_rejection(
        db.clone(),
        NewProxyAttempt {
            session_id,
            student_id,
            attempt_type: rejection.attempt_type(),
            failure_reason: rejection.to_string(),
            device_fingerprint: req.device_fingerprint.clone(),
            ip_address: meta.ip_address.clone(),
            user_agent: meta.user_agent.clone(),
            latitude: req.latitude,
            longitude: req.longitude,
            token_attempted: Some(req.qr_token.clone()),
        },
    );
    MarkError::Rejected(rejection)
}
