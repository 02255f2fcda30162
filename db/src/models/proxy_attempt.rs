use chrono::{DateTime, Utc};
use sea_orm::ActiveValue::Set;
use sea_orm::entity::prelude::*;
use sea_orm::{QueryFilter, QueryOrder, QuerySelect};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Append-only record of a rejected attendance attempt. The engine never
/// updates or deletes rows here; retention is an external policy.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize)]
#[sea_orm(table_name = "proxy_attempts")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Null when the session lookup itself failed.
    pub session_id: Option<i64>,
    /// Null when the caller could not be resolved to a student.
    pub student_id: Option<i64>,
    pub attempt_type: AttemptType,
    pub failure_reason: String,
    pub device_fingerprint: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub token_attempted: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Why an attempt was rejected. Stored verbatim as the rejection code so
/// investigators see the same vocabulary the caller saw.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Display, EnumString,
    Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sea_orm(rs_type = "String", db_type = "Enum", enum_name = "proxy_attempt_type")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum AttemptType {
    #[sea_orm(string_value = "NO_STUDENT_RECORD")]
    NoStudentRecord,

    #[sea_orm(string_value = "INVALID_SESSION")]
    InvalidSession,

    #[sea_orm(string_value = "SESSION_ENDED")]
    SessionEnded,

    #[sea_orm(string_value = "TIME_EXPIRED")]
    TimeExpired,

    #[sea_orm(string_value = "INVALID_QR")]
    InvalidQr,

    #[sea_orm(string_value = "GPS_REQUIRED")]
    GpsRequired,

    #[sea_orm(string_value = "OUTSIDE_RADIUS")]
    OutsideRadius,

    #[sea_orm(string_value = "UNREGISTERED_DEVICE")]
    UnregisteredDevice,

    #[sea_orm(string_value = "SELFIE_REQUIRED")]
    SelfieRequired,

    #[sea_orm(string_value = "ALREADY_MARKED")]
    AlreadyMarked,
}

/// Insert payload for one rejected attempt.
#[derive(Debug, Clone)]
pub struct NewProxyAttempt {
    pub session_id: Option<i64>,
    pub student_id: Option<i64>,
    pub attempt_type: AttemptType,
    pub failure_reason: String,
    pub device_fingerprint: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub token_attempted: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::attendance_session::Entity",
        from = "Column::SessionId",
        to = "super::attendance_session::Column::Id"
    )]
    Session,
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::StudentId",
        to = "super::user::Column::Id"
    )]
    Student,
}

impl Related<super::attendance_session::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Session.def()
    }
    fn via() -> Option<RelationDef> {
        None
    }
}
impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Student.def()
    }
    fn via() -> Option<RelationDef> {
        None
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub async fn log(db: &DatabaseConnection, new: NewProxyAttempt) -> Result<Self, DbErr> {
        let row = ActiveModel {
            session_id: Set(new.session_id),
            student_id: Set(new.student_id),
            attempt_type: Set(new.attempt_type),
            failure_reason: Set(new.failure_reason),
            device_fingerprint: Set(new.device_fingerprint),
            ip_address: Set(new.ip_address),
            user_agent: Set(new.user_agent),
            latitude: Set(new.latitude),
            longitude: Set(new.longitude),
            token_attempted: Set(new.token_attempted),
            created_at: Set(Utc::now()),
            ..Default::default()
        };
        row.insert(db).await
    }

    /// Attempts inside `[from, to]`, newest first, optionally narrowed to
    /// one attempt type and capped at `limit` rows.
    pub async fn in_range(
        db: &DatabaseConnection,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        attempt_type: Option<AttemptType>,
        limit: Option<u64>,
    ) -> Result<Vec<Self>, DbErr> {
        let mut query = Entity::find()
            .filter(Column::CreatedAt.gte(from))
            .filter(Column::CreatedAt.lte(to))
            .order_by_desc(Column::CreatedAt);
        if let Some(t) = attempt_type {
            query = query.filter(Column::AttemptType.eq(t));
        }
        if let Some(n) = limit {
            query = query.limit(n);
        }
        query.all(db).await
    }
}
