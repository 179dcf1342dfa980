//! Postflow Database Layer
//!
//! Stores for posts, media assets, platform credentials and video jobs, each
//! behind a trait with a Postgres and an in-memory implementation.

pub mod memory;
pub mod postgres;
pub mod traits;

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;

pub use memory::{
    InMemoryCredentialStore, InMemoryMediaAssetStore, InMemoryPostStore, InMemoryVideoJobStore,
};
pub use postgres::{
    CredentialRepository, MediaAssetRepository, PostRepository, VideoJobRepository,
};
pub use traits::{
    CredentialStore, DueCursor, MediaAssetStore, PostStore, StoreError, VideoJobStore,
};

/// Open a connection pool and bring the schema up to date.
pub async fn connect(database_url: &str, max_connections: u32) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(30))
        .connect(database_url)
        .await
        .context("Failed to connect to database")?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run database migrations")?;

    tracing::info!("Database ready");
    Ok(pool)
}
