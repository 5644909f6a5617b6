//! PostgreSQL access for the sponsorship network.
//!
//! Repositories are zero-sized structs whose async methods take `&PgPool`
//! first. Rows come back as `FromRow` models and are converted to
//! `sponsornet_core` domain types by the caller.

use sqlx::postgres::PgPoolOptions;

pub mod models;
pub mod repositories;

pub type DbPool = sqlx::PgPool;

/// Create a connection pool from a database URL.
pub async fn create_pool(database_url: &str) -> Result<DbPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(20)
        .connect(database_url)
        .await
}

/// Round-trip a trivial query to prove the pool can reach the server.
pub async fn health_check(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// Apply pending migrations from `db/migrations`.
pub async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("../../db/migrations").run(pool).await
}

/// Name of the unique constraint a write violated, if that is why it failed.
///
/// PostgreSQL reports unique violations as SQLSTATE `23505`; our unique
/// indexes are all named with a `uq_` prefix.
pub fn unique_violation(err: &sqlx::Error) -> Option<&str> {
    match err {
        sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some("23505") => {
            db_err.constraint().filter(|c| c.starts_with("uq_"))
        }
        _ => None,
    }
}
