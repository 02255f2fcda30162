//! Shared application state handed to Axum via `State<AppState>`.

use sea_orm::DatabaseConnection;

/// Everything route handlers and guards share: today that is the database
/// connection pool. Cloning is cheap; the pool itself is reference counted.
#[derive(Clone)]
pub struct AppState {
    db: DatabaseConnection,
}

impl AppState {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Borrow the connection for a query on the current task. Callers that
    /// spawn work clone the connection out of the reference.
    pub fn db(&self) -> &DatabaseConnection {
        &self.db
    }
}
