use chrono::{DateTime, Utc};
use sea_orm::ActiveValue::Set;
use sea_orm::entity::prelude::*;

/// A named classroom with its geofence center. `radius_meters` is optional;
/// sessions fall back to the configured default radius when it is absent.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, serde::Serialize)]
#[sea_orm(table_name = "classroom_locations")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub radius_meters: Option<f64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::attendance_session::Entity")]
    Sessions,
}

impl Related<super::attendance_session::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Sessions.def()
    }
    fn via() -> Option<RelationDef> {
        None
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub async fn create(
        db: &DatabaseConnection,
        name: &str,
        latitude: f64,
        longitude: f64,
        radius_meters: Option<f64>,
    ) -> Result<Self, DbErr> {
        let room = ActiveModel {
            name: Set(name.to_owned()),
            latitude: Set(latitude),
            longitude: Set(longitude),
            radius_meters: Set(radius_meters),
            created_at: Set(Utc::now()),
            ..Default::default()
        };
        room.insert(db).await
    }

    pub async fn get_by_id(db: &DatabaseConnection, id: i64) -> Result<Option<Self>, DbErr> {
        Entity::find_by_id(id).one(db).await
    }
}
