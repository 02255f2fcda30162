use chrono::{DateTime, Utc};
use sea_orm::ActiveValue::Set;
use sea_orm::entity::prelude::*;
use sea_orm::sea_query::Expr;
use sea_orm::{IntoActiveModel, QueryFilter, QueryOrder};

/// A device fingerprint bound to a student. At most one `is_active` row per
/// student is authoritative; older rows stay behind as history.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, serde::Serialize)]
#[sea_orm(table_name = "student_devices")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub student_id: i64,
    pub fingerprint: String,
    pub is_active: bool,
    pub last_used_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Outcome of a read-only binding check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindingStatus {
    /// No active device on file; binding may be established after a
    /// fully successful mark.
    NotBound,
    /// Active device matches the submitted fingerprint.
    Match,
    /// Active device differs from the submitted fingerprint.
    Mismatch,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::StudentId",
        to = "super::user::Column::Id"
    )]
    Student,
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
    pub async fn active_for_student(
        db: &DatabaseConnection,
        student_id: i64,
    ) -> Result<Option<Self>, DbErr> {
        Entity::find()
            .filter(Column::StudentId.eq(student_id))
            .filter(Column::IsActive.eq(true))
            .order_by_desc(Column::CreatedAt)
            .one(db)
            .await
    }

    /// Read-only comparison of `fingerprint` against the student's active
    /// binding. Never creates or updates rows; establishment and the
    /// `last_used_at` refresh both happen in [`Self::bind_if_absent`] once
    /// the surrounding attempt has fully succeeded.
    pub async fn check_binding(
        db: &DatabaseConnection,
        student_id: i64,
        fingerprint: &str,
    ) -> Result<BindingStatus, DbErr> {
        match Self::active_for_student(db, student_id).await? {
            None => Ok(BindingStatus::NotBound),
            Some(device) if device.fingerprint == fingerprint => Ok(BindingStatus::Match),
            Some(_) => Ok(BindingStatus::Mismatch),
        }
    }

    /// Establishes the first binding for a student, or refreshes
    /// `last_used_at` when the active binding already matches. Called only
    /// after a verified mark so failed attempts can never claim a device.
    pub async fn bind_if_absent(
        db: &DatabaseConnection,
        student_id: i64,
        fingerprint: &str,
    ) -> Result<(), DbErr> {
        let now = Utc::now();
        match Self::active_for_student(db, student_id).await? {
            None => {
                let device = ActiveModel {
                    student_id: Set(student_id),
                    fingerprint: Set(fingerprint.to_owned()),
                    is_active: Set(true),
                    last_used_at: Set(now),
                    created_at: Set(now),
                    ..Default::default()
                };
                device.insert(db).await?;
            }
            Some(device) if device.fingerprint == fingerprint => {
                let mut active = device.into_active_model();
                active.last_used_at = Set(now);
                active.update(db).await?;
            }
            // A mismatched active binding is rejected earlier in the
            // pipeline; nothing to do here.
            Some(_) => {}
        }
        Ok(())
    }

    /// Retires every active binding for a student. Rebinding to new
    /// hardware is an administrative action, not something a failed or
    /// successful mark may do on its own.
    pub async fn deactivate_for_student(
        db: &DatabaseConnection,
        student_id: i64,
    ) -> Result<u64, DbErr> {
        let result = Entity::update_many()
            .col_expr(Column::IsActive, Expr::value(false))
            .filter(Column::StudentId.eq(student_id))
            .filter(Column::IsActive.eq(true))
            .exec(db)
            .await?;
        Ok(result.rows_affected)
    }
}
