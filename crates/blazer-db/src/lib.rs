pub use sea_orm;

use sea_orm::{ConnectOptions, Database, DatabaseConnection};

pub mod entities;

pub async fn connect(database_url: &str) -> Result<DatabaseConnection, sea_orm::DbErr> {
    Database::connect(database_url).await
}

/// Single-connection SQLite pool; every connection to `sqlite::memory:` is a
/// separate database, so tests must not fan out.
pub async fn connect_memory() -> Result<DatabaseConnection, sea_orm::DbErr> {
    let mut opts = ConnectOptions::new("sqlite::memory:");
    opts.max_connections(1).min_connections(1).sqlx_logging(false);
    Database::connect(opts).await
}
