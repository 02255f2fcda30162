use chrono::{DateTime, Utc};
use sea_orm::ActiveValue::Set;
use sea_orm::entity::prelude::*;
use sea_orm::QueryFilter;

/// One verified attendance for (session, student). Rows are append-only and
/// never updated after creation.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, serde::Serialize)]
#[sea_orm(table_name = "attendance_records")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub session_id: i64,
    pub student_id: i64,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub gps_accuracy_meters: Option<f64>,
    pub distance_from_classroom_meters: Option<f64>,
    pub selfie_url: Option<String>,
    pub token_used: String,
    pub verification_status: String,
    pub marked_at: DateTime<Utc>,
}

/// Insert payload for a verified mark, assembled by the validation pipeline
/// once every check has passed.
#[derive(Debug, Clone)]
pub struct NewAttendanceRecord {
    pub session_id: i64,
    pub student_id: i64,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub gps_accuracy_meters: Option<f64>,
    pub distance_from_classroom_meters: Option<f64>,
    pub selfie_url: Option<String>,
    pub token_used: String,
    pub marked_at: DateTime<Utc>,
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
    /// Advisory duplicate check. The unique index on
    /// (session_id, student_id) remains the authoritative guard; two
    /// concurrent attempts can both see `false` here and race to insert.
    pub async fn exists_for(
        db: &DatabaseConnection,
        session_id: i64,
        student_id: i64,
    ) -> Result<bool, DbErr> {
        let found = Entity::find()
            .filter(Column::SessionId.eq(session_id))
            .filter(Column::StudentId.eq(student_id))
            .one(db)
            .await?;
        Ok(found.is_some())
    }

    /// Inserts the verified record. A unique-constraint rejection surfaces
    /// as `DbErr`; callers inspect `sql_err()` to distinguish the lost race
    /// from real storage failures.
    pub async fn insert_verified(
        db: &DatabaseConnection,
        new: NewAttendanceRecord,
    ) -> Result<Self, DbErr> {
        let record = ActiveModel {
            session_id: Set(new.session_id),
            student_id: Set(new.student_id),
            latitude: Set(new.latitude),
            longitude: Set(new.longitude),
            gps_accuracy_meters: Set(new.gps_accuracy_meters),
            distance_from_classroom_meters: Set(new.distance_from_classroom_meters),
            selfie_url: Set(new.selfie_url),
            token_used: Set(new.token_used),
            verification_status: Set("verified".to_owned()),
            marked_at: Set(new.marked_at),
            ..Default::default()
        };
        record.insert(db).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{attendance_session, course, user};
    use crate::test_utils::setup_test_db;
    use sea_orm::SqlErr;

    async fn seed(db: &DatabaseConnection) -> (attendance_session::Model, user::Model) {
        let teacher = user::Model::create(db, "lect1", "lect1@test.com", user::Role::Teacher)
            .await
            .unwrap();
        let student = user::Model::create(db, "u00000001", "s1@test.com", user::Role::Student)
            .await
            .unwrap();
        let course = course::Model::create(db, "COS101", "Intro to CS").await.unwrap();
        let session = attendance_session::Model::create(
            db, course.id, teacher.id, None, Utc::now(), 30, 30, false, false, None,
        )
        .await
        .unwrap();
        (session, student)
    }

    fn new_record(session_id: i64, student_id: i64) -> NewAttendanceRecord {
        NewAttendanceRecord {
            session_id,
            student_id,
            latitude: None,
            longitude: None,
            gps_accuracy_meters: None,
            distance_from_classroom_meters: None,
            selfie_url: None,
            token_used: "abcdef0123456789".to_owned(),
            marked_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn insert_then_exists() {
        let db = setup_test_db().await;
        let (session, student) = seed(&db).await;

        assert!(!Model::exists_for(&db, session.id, student.id).await.unwrap());

        let rec = Model::insert_verified(&db, new_record(session.id, student.id))
            .await
            .unwrap();
        assert_eq!(rec.verification_status, "verified");
        assert!(Model::exists_for(&db, session.id, student.id).await.unwrap());
    }

    #[tokio::test]
    async fn second_insert_for_same_pair_hits_the_unique_index() {
        let db = setup_test_db().await;
        let (session, student) = seed(&db).await;

        Model::insert_verified(&db, new_record(session.id, student.id))
            .await
            .unwrap();

        let err = Model::insert_verified(&db, new_record(session.id, student.id))
            .await
            .expect_err("duplicate insert must fail");
        assert!(matches!(
            err.sql_err(),
            Some(SqlErr::UniqueConstraintViolation(_))
        ));
    }

    #[tokio::test]
    async fn same_student_may_mark_in_two_different_sessions() {
        let db = setup_test_db().await;
        let (session_a, student) = seed(&db).await;
        let session_b = attendance_session::Model::create(
            &db,
            session_a.course_id,
            session_a.teacher_id,
            None,
            Utc::now(),
            30,
            30,
            false,
            false,
            None,
        )
        .await
        .unwrap();

        Model::insert_verified(&db, new_record(session_a.id, student.id))
            .await
            .unwrap();
        Model::insert_verified(&db, new_record(session_b.id, student.id))
            .await
            .unwrap();
    }
}
