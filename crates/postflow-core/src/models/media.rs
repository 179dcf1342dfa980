use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(type_name = "text", rename_all = "lowercase"))]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
    Audio,
}

impl MediaKind {
    /// Guess the kind of a file from its extension.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.trim_start_matches('.').to_lowercase().as_str() {
            "png" | "jpg" | "jpeg" | "webp" | "gif" => Some(MediaKind::Image),
            "mp4" | "mov" | "avi" | "mkv" | "webm" => Some(MediaKind::Video),
            "mp3" | "wav" | "m4a" | "aac" | "ogg" => Some(MediaKind::Audio),
            _ => None,
        }
    }

    pub fn default_extension(&self) -> &'static str {
        match self {
            MediaKind::Image => "jpg",
            MediaKind::Video => "mp4",
            MediaKind::Audio => "mp3",
        }
    }
}

impl Display for MediaKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            MediaKind::Image => write!(f, "image"),
            MediaKind::Video => write!(f, "video"),
            MediaKind::Audio => write!(f, "audio"),
        }
    }
}

impl FromStr for MediaKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "image" => Ok(MediaKind::Image),
            "video" => Ok(MediaKind::Video),
            "audio" => Ok(MediaKind::Audio),
            _ => Err(anyhow::anyhow!("Invalid media kind: {}", s)),
        }
    }
}

/// Content type for a file extension, falling back to `application/octet-stream`.
pub fn content_type_for_extension(ext: &str) -> &'static str {
    match ext.trim_start_matches('.').to_lowercase().as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "mp4" => "video/mp4",
        "mov" => "video/quicktime",
        "avi" => "video/x-msvideo",
        "mkv" => "video/x-matroska",
        "webm" => "video/webm",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "m4a" => "audio/mp4",
        "aac" => "audio/aac",
        "ogg" => "audio/ogg",
        _ => "application/octet-stream",
    }
}

/// Extension for a content type, used when naming stored files.
pub fn extension_for_content_type(content_type: &str) -> Option<&'static str> {
    match content_type.split(';').next().unwrap_or("").trim() {
        "image/png" => Some("png"),
        "image/jpeg" => Some("jpg"),
        "image/gif" => Some("gif"),
        "image/webp" => Some("webp"),
        "video/mp4" => Some("mp4"),
        "video/quicktime" => Some("mov"),
        "video/webm" => Some("webm"),
        "audio/mpeg" => Some("mp3"),
        "audio/wav" | "audio/x-wav" => Some("wav"),
        "audio/mp4" => Some("m4a"),
        "audio/aac" => Some("aac"),
        "audio/ogg" => Some("ogg"),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Display for Resolution {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Descriptive metadata supplied when registering an asset.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssetMetadata {
    pub content_type: Option<String>,
    pub original_filename: Option<String>,
    pub duration_ms: Option<u64>,
    pub resolution: Option<Resolution>,
}

impl AssetMetadata {
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.original_filename = Some(filename.into());
        self
    }

    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    pub fn with_resolution(mut self, resolution: Resolution) -> Self {
        self.resolution = Some(resolution);
        self
    }
}

/// An immutable, registered piece of media.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaAsset {
    pub id: Uuid,
    pub kind: MediaKind,
    /// Storage key of the bytes.
    pub location: String,
    /// Present only when the storage backend exposes the file publicly.
    pub public_url: Option<String>,
    pub content_type: String,
    pub content_hash: String,
    pub size_bytes: i64,
    pub original_filename: Option<String>,
    pub duration_ms: Option<u64>,
    pub resolution: Option<Resolution>,
    pub created_at: DateTime<Utc>,
}

#[cfg(feature = "sqlx")]
impl sqlx::FromRow<'_, sqlx::postgres::PgRow> for MediaAsset {
    fn from_row(row: &sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;

        let width: Option<i32> = row.get("width");
        let height: Option<i32> = row.get("height");

        Ok(MediaAsset {
            id: row.get("id"),
            kind: row.get::<String, _>("kind").parse().map_err(|e| {
                sqlx::Error::Decode(format!("Failed to parse kind: {}", e).into())
            })?,
            location: row.get("location"),
            public_url: row.get("public_url"),
            content_type: row.get("content_type"),
            content_hash: row.get("content_hash"),
            size_bytes: row.get("size_bytes"),
            original_filename: row.get("original_filename"),
            duration_ms: row
                .get::<Option<i64>, _>("duration_ms")
                .map(|ms| ms.max(0) as u64),
            resolution: match (width, height) {
                (Some(w), Some(h)) => Some(Resolution {
                    width: w.max(0) as u32,
                    height: h.max(0) as u32,
                }),
                _ => None,
            },
            created_at: row.get("created_at"),
        })
    }
}

impl MediaAsset {
    pub fn extension(&self) -> &str {
        self.location
            .rsplit_once('.')
            .map(|(_, ext)| ext)
            .unwrap_or_else(|| self.kind.default_extension())
    }

    /// File name to present to platforms that want one.
    pub fn file_name(&self) -> String {
        self.original_filename
            .clone()
            .unwrap_or_else(|| format!("{}.{}", self.id, self.extension()))
    }
}
