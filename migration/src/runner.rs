use colored::*;
use futures::FutureExt;
use sea_orm_migration::prelude::*;
use std::io::{self, Write};
use std::time::Instant;

const STATUS_COLUMN: usize = 72;

/// Applies every migration in order, one status line per step. Exits
/// non-zero on the first failure so deploy scripts can chain on it.
pub async fn run_all_migrations(url: &str) {
    let db = sea_orm::Database::connect(url)
        .await
        .expect("DB connection failed");
    let manager = SchemaManager::new(&db);

    println!("Running migrations...");
    for migration in <crate::Migrator as MigratorTrait>::migrations() {
        apply(&manager, migration.as_ref()).await;
    }
}

async fn apply(manager: &SchemaManager<'_>, migration: &dyn MigrationTrait) {
    let label = format!("Applying {}", migration.name().bold());
    let dots = ".".repeat(STATUS_COLUMN.saturating_sub(label.len()));
    print!("{label}{dots} ");
    io::stdout().flush().ok();

    let started = Instant::now();
    let outcome = std::panic::AssertUnwindSafe(migration.up(manager))
        .catch_unwind()
        .await;

    match outcome {
        Ok(Ok(())) => {
            let elapsed = format!("({:.2?})", started.elapsed()).dimmed();
            println!("{} {elapsed}", "done".green());
        }
        Ok(Err(err)) => {
            println!("{} {err}", "failed".red());
            std::process::exit(1);
        }
        Err(_) => {
            println!("{}", "panicked".red());
            std::process::exit(1);
        }
    }
}
