use chrono::Utc;
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

use postflow_core::models::{
    content_type_for_extension, extension_for_content_type, AssetMetadata, MediaAsset, MediaKind,
};
use postflow_db::MediaAssetStore;
use postflow_storage::{content_key, Storage, StorageError};

#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    #[error("Media asset not found: {0}")]
    NotFound(Uuid),

    #[error("Refusing to register empty {0} asset")]
    Empty(MediaKind),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Media store error: {0}")]
    Store(#[from] anyhow::Error),
}

/// An asset together with the ways it can be reached right now.
#[derive(Debug, Clone)]
pub struct ResolvedMedia {
    pub asset: MediaAsset,
    /// Publicly fetchable URL, when the storage backend is publicly served.
    pub public_url: Option<String>,
    /// Filesystem path, when the storage backend is local.
    pub local_path: Option<PathBuf>,
}

impl ResolvedMedia {
    pub fn id(&self) -> Uuid {
        self.asset.id
    }

    pub fn kind(&self) -> MediaKind {
        self.asset.kind
    }

    pub fn location(&self) -> &str {
        &self.asset.location
    }
}

/// Append-only registry mapping asset ids to stored bytes.
///
/// Registering the same bytes twice as the same kind yields the same asset.
#[derive(Clone)]
pub struct MediaLibrary {
    assets: Arc<dyn MediaAssetStore>,
    storage: Arc<dyn Storage>,
}

impl MediaLibrary {
    pub fn new(assets: Arc<dyn MediaAssetStore>, storage: Arc<dyn Storage>) -> Self {
        Self { assets, storage }
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// Store `data` and register it, returning the asset id.
    pub async fn register_asset(
        &self,
        data: &[u8],
        kind: MediaKind,
        metadata: AssetMetadata,
    ) -> Result<Uuid, MediaError> {
        Ok(self.register(data, kind, metadata).await?.id)
    }

    #[tracing::instrument(skip(self, data, metadata), fields(size_bytes = data.len()))]
    pub async fn register(
        &self,
        data: &[u8],
        kind: MediaKind,
        metadata: AssetMetadata,
    ) -> Result<MediaAsset, MediaError> {
        if data.is_empty() {
            return Err(MediaError::Empty(kind));
        }

        let content_hash = hex::encode(Sha256::digest(data));

        if let Some(existing) = self.assets.find_by_hash(&content_hash, kind).await? {
            tracing::debug!(asset_id = %existing.id, "Content already registered");
            return Ok(existing);
        }

        let extension = metadata
            .original_filename
            .as_deref()
            .and_then(|name| name.rsplit_once('.').map(|(_, ext)| ext.to_lowercase()))
            .filter(|ext| MediaKind::from_extension(ext).is_some())
            .or_else(|| {
                metadata
                    .content_type
                    .as_deref()
                    .and_then(extension_for_content_type)
                    .map(str::to_string)
            })
            .unwrap_or_else(|| kind.default_extension().to_string());

        let content_type = metadata
            .content_type
            .clone()
            .unwrap_or_else(|| content_type_for_extension(&extension).to_string());

        let location = content_key(&kind.to_string(), &content_hash, &extension);
        self.storage.put(&location, data, &content_type).await?;

        let asset = MediaAsset {
            id: Uuid::new_v4(),
            kind,
            public_url: self.storage.public_url(&location),
            location,
            content_type,
            content_hash,
            size_bytes: data.len() as i64,
            original_filename: metadata.original_filename,
            duration_ms: metadata.duration_ms,
            resolution: metadata.resolution,
            created_at: Utc::now(),
        };

        let asset = self.assets.insert_asset(asset).await?;

        tracing::info!(
            asset_id = %asset.id,
            kind = %asset.kind,
            location = %asset.location,
            "Media asset registered"
        );

        Ok(asset)
    }

    /// Look up an asset and where it can be reached.
    pub async fn resolve(&self, id: Uuid) -> Result<ResolvedMedia, MediaError> {
        let asset = self
            .assets
            .get_asset(id)
            .await?
            .ok_or(MediaError::NotFound(id))?;

        let public_url = self
            .storage
            .public_url(&asset.location)
            .or_else(|| asset.public_url.clone());
        let local_path = self.storage.local_path(&asset.location);

        Ok(ResolvedMedia {
            asset,
            public_url,
            local_path,
        })
    }

    /// Read the bytes of a resolved asset.
    pub async fn fetch(&self, media: &ResolvedMedia) -> Result<Vec<u8>, MediaError> {
        Ok(self.storage.get(media.location()).await?)
    }
}
