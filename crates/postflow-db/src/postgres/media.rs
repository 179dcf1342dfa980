use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{PgPool, Postgres};
use uuid::Uuid;

use postflow_core::models::{MediaAsset, MediaKind};

use crate::traits::MediaAssetStore;

const ASSET_COLUMNS: &str = r#"
    id, kind, location, public_url, content_type, content_hash, size_bytes,
    original_filename, duration_ms, width, height, created_at
"#;

#[derive(Clone)]
pub struct MediaAssetRepository {
    pool: PgPool,
}

impl MediaAssetRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MediaAssetStore for MediaAssetRepository {
    #[tracing::instrument(skip(self, asset), fields(asset_id = %asset.id, kind = %asset.kind))]
    async fn insert_asset(&self, asset: MediaAsset) -> Result<MediaAsset> {
        // the unique (content_hash, kind) constraint makes concurrent registrations converge
        let inserted = sqlx::query_as::<Postgres, MediaAsset>(&format!(
            r#"
            INSERT INTO media_assets (
                id, kind, location, public_url, content_type, content_hash, size_bytes,
                original_filename, duration_ms, width, height, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (content_hash, kind) DO NOTHING
            RETURNING {ASSET_COLUMNS}
            "#
        ))
        .bind(asset.id)
        .bind(asset.kind.to_string())
        .bind(&asset.location)
        .bind(&asset.public_url)
        .bind(&asset.content_type)
        .bind(&asset.content_hash)
        .bind(asset.size_bytes)
        .bind(&asset.original_filename)
        .bind(asset.duration_ms.map(|ms| ms as i64))
        .bind(asset.resolution.map(|r| r.width as i32))
        .bind(asset.resolution.map(|r| r.height as i32))
        .bind(asset.created_at)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to insert media asset")?;

        match inserted {
            Some(asset) => Ok(asset),
            None => self
                .find_by_hash(&asset.content_hash, asset.kind)
                .await?
                .ok_or_else(|| anyhow::anyhow!("Media asset vanished after conflict")),
        }
    }

    #[tracing::instrument(skip(self))]
    async fn get_asset(&self, id: Uuid) -> Result<Option<MediaAsset>> {
        sqlx::query_as::<Postgres, MediaAsset>(&format!(
            "SELECT {ASSET_COLUMNS} FROM media_assets WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch media asset")
    }

    async fn find_by_hash(&self, content_hash: &str, kind: MediaKind) -> Result<Option<MediaAsset>> {
        sqlx::query_as::<Postgres, MediaAsset>(&format!(
            "SELECT {ASSET_COLUMNS} FROM media_assets WHERE content_hash = $1 AND kind = $2"
        ))
        .bind(content_hash)
        .bind(kind.to_string())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to look up media asset by hash")
    }
}
