//! # Database
//!
//! Pool construction and schema migrations for the Postgres backends in
//! [`crate::records::postgres`] and [`crate::progress::postgres`].

pub mod connection;

pub use connection::DatabaseConnection;

use sqlx::PgPool;
use tracing::info;

/// Embedded schema migrations for the task entry and submission tables.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Apply any pending migrations.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    MIGRATOR.run(pool).await?;
    info!("Database migrations applied");
    Ok(())
}
