use chrono::{DateTime, Duration, Utc};
use sea_orm::ActiveValue::Set;
use sea_orm::entity::prelude::*;
use sea_orm::sea_query::Expr;
use sea_orm::{IntoActiveModel, QueryFilter};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::token;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize)]
#[sea_orm(table_name = "attendance_sessions")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub course_id: i64,
    pub teacher_id: i64,
    pub classroom_location_id: Option<i64>,
    pub status: Status,
    pub start_time: DateTime<Utc>,
    pub time_window_minutes: i32,
    pub qr_rotation_seconds: i32,
    /// Server-only HMAC key material. Never serialized.
    #[serde(skip_serializing)]
    pub secret: String,
    /// Display cache of the most recently issued token. Verification always
    /// recomputes from `secret`; this is never consulted for acceptance.
    pub current_token: Option<String>,
    pub current_token_expires_at: Option<DateTime<Utc>>,
    pub require_gps: bool,
    pub require_selfie: bool,
    pub attendance_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Session lifecycle state. `ended` and `cancelled` are terminal.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Display, EnumString, Serialize,
    Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[sea_orm(rs_type = "String", db_type = "Enum", enum_name = "attendance_session_status")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Status {
    #[sea_orm(string_value = "scheduled")]
    Scheduled,

    #[sea_orm(string_value = "active")]
    Active,

    #[sea_orm(string_value = "ended")]
    Ended,

    #[sea_orm(string_value = "cancelled")]
    Cancelled,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::course::Entity",
        from = "Column::CourseId",
        to = "super::course::Column::Id"
    )]
    Course,
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::TeacherId",
        to = "super::user::Column::Id"
    )]
    Teacher,
    #[sea_orm(
        belongs_to = "super::classroom_location::Entity",
        from = "Column::ClassroomLocationId",
        to = "super::classroom_location::Column::Id"
    )]
    Classroom,
    #[sea_orm(has_many = "super::attendance_record::Entity")]
    Records,
}

impl Related<super::course::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Course.def()
    }
    fn via() -> Option<RelationDef> {
        None
    }
}

impl Related<super::classroom_location::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Classroom.def()
    }
    fn via() -> Option<RelationDef> {
        None
    }
}

impl Related<super::attendance_record::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Records.def()
    }
    fn via() -> Option<RelationDef> {
        None
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Creates a session, already `active`. When `secret_hex` is `None` a
    /// random 32-byte secret is generated.
    pub async fn create(
        db: &DatabaseConnection,
        course_id: i64,
        teacher_id: i64,
        classroom_location_id: Option<i64>,
        start_time: DateTime<Utc>,
        time_window_minutes: i32,
        qr_rotation_seconds: i32,
        require_gps: bool,
        require_selfie: bool,
        secret_hex: Option<&str>,
    ) -> Result<Self, DbErr> {
        let secret = match secret_hex {
            Some(s) => s.to_owned(),
            None => {
                use rand::RngCore;
                let mut buf = [0u8; 32];
                rand::rngs::OsRng.fill_bytes(&mut buf);
                hex::encode(buf)
            }
        };

        let now = Utc::now();
        let session = ActiveModel {
            course_id: Set(course_id),
            teacher_id: Set(teacher_id),
            classroom_location_id: Set(classroom_location_id),
            status: Set(Status::Active),
            start_time: Set(start_time),
            time_window_minutes: Set(time_window_minutes),
            qr_rotation_seconds: Set(qr_rotation_seconds),
            secret: Set(secret),
            require_gps: Set(require_gps),
            require_selfie: Set(require_selfie),
            attendance_count: Set(0),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        };
        session.insert(db).await
    }

    pub async fn get_by_id(db: &DatabaseConnection, id: i64) -> Result<Option<Self>, DbErr> {
        Entity::find_by_id(id).one(db).await
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.status == Status::Active
    }

    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self.status, Status::Ended | Status::Cancelled)
    }

    /// True while `now` falls inside the marking window that starts at
    /// `start_time` and runs for `time_window_minutes`.
    pub fn within_time_window(&self, now: DateTime<Utc>) -> bool {
        now <= self.start_time + Duration::minutes(i64::from(self.time_window_minutes))
    }

    pub fn window(&self, now: DateTime<Utc>) -> i64 {
        token::window_index(now, self.qr_rotation_seconds)
    }

    pub fn token_for_window(&self, window: i64) -> String {
        token::token_for_window(&self.secret, window)
    }

    pub fn current_token_at(&self, now: DateTime<Utc>) -> String {
        self.token_for_window(self.window(now))
    }

    /// Recomputes and checks `submitted` against the current window and up
    /// to `tolerance` windows back.
    pub fn verify_token(&self, submitted: &str, tolerance: i64, now: DateTime<Utc>) -> bool {
        token::verify_token(&self.secret, self.qr_rotation_seconds, tolerance, submitted, now)
    }

    /// Derives the current-window token, stores it in the display cache and
    /// returns `(token, expires_at)`.
    pub async fn cache_current_token(
        &self,
        db: &DatabaseConnection,
        now: DateTime<Utc>,
    ) -> Result<(String, DateTime<Utc>), DbErr> {
        let window = self.window(now);
        let value = self.token_for_window(window);
        let expires_at = token::window_expiry(window, self.qr_rotation_seconds);

        let mut active = self.clone().into_active_model();
        active.current_token = Set(Some(value.clone()));
        active.current_token_expires_at = Set(Some(expires_at));
        active.updated_at = Set(now);
        active.update(db).await?;

        Ok((value, expires_at))
    }

    /// Moves the session to `status` and returns the updated row. Callers
    /// are responsible for rejecting transitions out of terminal states.
    pub async fn set_status(
        &self,
        db: &DatabaseConnection,
        status: Status,
    ) -> Result<Self, DbErr> {
        let mut active = self.clone().into_active_model();
        active.status = Set(status);
        active.updated_at = Set(Utc::now());
        active.update(db).await
    }

    /// Relative `attendance_count = attendance_count + 1`, pushed down to
    /// the database so concurrent marks never read-modify-write a stale
    /// value.
    pub async fn increment_attendance_count(
        db: &DatabaseConnection,
        session_id: i64,
    ) -> Result<(), DbErr> {
        Entity::update_many()
            .col_expr(
                Column::AttendanceCount,
                Expr::col(Column::AttendanceCount).add(1),
            )
            .col_expr(Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(Column::Id.eq(session_id))
            .exec(db)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{course, user};
    use crate::test_utils::setup_test_db;
    use chrono::TimeZone;

    const SECRET: &str = "00112233445566778899aabbccddeeff00112233445566778899aabbccddeeff";

    async fn seed_session(db: &DatabaseConnection) -> Model {
        let teacher = user::Model::create(db, "lect1", "lect1@test.com", user::Role::Teacher)
            .await
            .expect("create teacher");
        let course = course::Model::create(db, "COS101", "Intro to CS")
            .await
            .expect("create course");

        Model::create(
            db,
            course.id,
            teacher.id,
            None,
            Utc::now(),
            30,    // time_window_minutes
            30,    // qr_rotation_seconds
            false, // require_gps
            false, // require_selfie
            Some(SECRET),
        )
        .await
        .expect("create session")
    }

    #[tokio::test]
    async fn created_sessions_are_active_with_a_random_secret() {
        let db = setup_test_db().await;
        let teacher = user::Model::create(&db, "lect2", "lect2@test.com", user::Role::Teacher)
            .await
            .unwrap();
        let course = course::Model::create(&db, "COS132", "Imperative Programming")
            .await
            .unwrap();

        let s = Model::create(
            &db, course.id, teacher.id, None, Utc::now(), 30, 30, false, false, None,
        )
        .await
        .unwrap();

        assert_eq!(s.status, Status::Active);
        assert_eq!(s.secret.len(), 64);
        assert_eq!(s.attendance_count, 0);
        assert!(s.current_token.is_none());
    }

    #[tokio::test]
    async fn token_rotates_across_a_window_boundary() {
        let db = setup_test_db().await;
        let s = seed_session(&db).await;

        let t1 = Utc.with_ymd_and_hms(2025, 9, 8, 10, 0, 14).unwrap(); // window N
        let t2 = Utc.with_ymd_and_hms(2025, 9, 8, 10, 0, 31).unwrap(); // window N + 1
        assert_ne!(s.current_token_at(t1), s.current_token_at(t2));
    }

    #[tokio::test]
    async fn cache_current_token_persists_and_matches_recompute() {
        let db = setup_test_db().await;
        let s = seed_session(&db).await;
        let now = Utc::now();

        let (token, expires_at) = s.cache_current_token(&db, now).await.unwrap();
        assert_eq!(token, s.current_token_at(now));
        assert!(expires_at > now);

        let reloaded = Model::get_by_id(&db, s.id).await.unwrap().unwrap();
        assert_eq!(reloaded.current_token.as_deref(), Some(token.as_str()));
        assert_eq!(reloaded.current_token_expires_at, Some(expires_at));
    }

    #[tokio::test]
    async fn increment_attendance_count_is_relative() {
        let db = setup_test_db().await;
        let s = seed_session(&db).await;

        Model::increment_attendance_count(&db, s.id).await.unwrap();
        Model::increment_attendance_count(&db, s.id).await.unwrap();

        let reloaded = Model::get_by_id(&db, s.id).await.unwrap().unwrap();
        assert_eq!(reloaded.attendance_count, 2);
    }

    #[tokio::test]
    async fn set_status_reaches_terminal_states() {
        let db = setup_test_db().await;
        let s = seed_session(&db).await;
        assert!(!s.is_terminal());

        let ended = s.set_status(&db, Status::Ended).await.unwrap();
        assert!(ended.is_terminal());
        assert!(!ended.is_active());
    }

    #[tokio::test]
    async fn time_window_closes_after_the_configured_minutes() {
        let db = setup_test_db().await;
        let s = seed_session(&db).await;

        assert!(s.within_time_window(s.start_time + Duration::minutes(29)));
        assert!(!s.within_time_window(s.start_time + Duration::minutes(31)));
    }
}
