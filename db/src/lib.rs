pub mod models;
pub mod test_utils;
pub mod token;

use sea_orm::{Database, DatabaseConnection};
use std::path::Path;
use util::config::AppConfig;

/// Opens the configured database.
///
/// `DATABASE_PATH` may be a full DSN or a plain SQLite file path; file paths
/// get their parent directory created, since SQLite will not make
/// intermediate directories on its own.
pub async fn connect() -> DatabaseConnection {
    let configured = AppConfig::global().database_path.clone();
    let url = connection_url(&configured);

    if let Some(file) = url.strip_prefix("sqlite://") {
        let file = file.split('?').next().unwrap_or(file);
        if let Some(parent) = Path::new(file).parent() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    Database::connect(&url)
        .await
        .expect("Failed to connect to database")
}

fn connection_url(configured: &str) -> String {
    if configured.starts_with("sqlite:") || configured.contains("://") {
        configured.to_owned()
    } else {
        format!("sqlite://{configured}?mode=rwc")
    }
}
