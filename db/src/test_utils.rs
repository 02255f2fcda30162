//! In-memory database harness shared by unit and integration tests.

use migration::Migrator;
use sea_orm::{Database, DatabaseConnection};
use sea_orm_migration::MigratorTrait;

/// Fresh SQLite database in memory with the full schema applied.
///
/// Every call returns an isolated database, so tests never observe each
/// other's rows and can run in parallel.
pub async fn setup_test_db() -> DatabaseConnection {
    let db = Database::connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite should always connect");

    Migrator::up(&db, None)
        .await
        .expect("schema migration failed");

    db
}
