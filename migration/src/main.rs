use migration::Migrator;
use std::path::Path;
use std::{env, fs, io};

mod runner;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let db_path = env::var("DATABASE_PATH").unwrap_or_else(|_| "data/attendance.db".into());

    match env::args().nth(1).as_deref() {
        Some("clean") => remove_database(&db_path),
        Some("fresh") => {
            remove_database(&db_path);
            migrate(&db_path).await;
        }
        _ => migrate(&db_path).await,
    }
}

async fn migrate(db_path: &str) {
    if let Some(parent) = Path::new(db_path).parent() {
        fs::create_dir_all(parent).expect("Failed to create DB directory");
    }
    runner::run_all_migrations(&format!("sqlite://{db_path}?mode=rwc")).await;
}

fn remove_database(path: &str) {
    match fs::remove_file(path) {
        Ok(()) => println!("Deleted DB: {path}"),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            println!("DB file does not exist: {path}");
        }
        Err(err) => panic!("Failed to delete DB file {path}: {err}"),
    }
}
