//! Database pool construction and migrations

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;

use crate::config::{DatabaseConfig, DATABASE_IDLE_TIMEOUT_SECS};

/// Build the shared connection pool
pub async fn connect(config: &DatabaseConfig) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_open_conns)
        .min_connections(config.max_idle_conns.min(config.max_open_conns))
        .idle_timeout(Duration::from_secs(DATABASE_IDLE_TIMEOUT_SECS))
        .connect(&config.url())
        .await
        .context("Failed to connect to database")?;

    Ok(pool)
}

/// Run embedded migrations
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("../../migrations")
        .run(pool)
        .await
        .context("Failed to run migrations")?;

    Ok(())
}
