use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use uuid::Uuid;

use super::Platform;
use crate::error::PublishErrorKind;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(type_name = "text", rename_all = "lowercase"))]
#[serde(rename_all = "snake_case")]
pub enum PostStatus {
    Draft,
    Scheduled,
    Publishing,
    Published,
    Failed,
}

impl PostStatus {
    /// Published and failed posts never move again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, PostStatus::Published | PostStatus::Failed)
    }
}

impl Display for PostStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            PostStatus::Draft => write!(f, "draft"),
            PostStatus::Scheduled => write!(f, "scheduled"),
            PostStatus::Publishing => write!(f, "publishing"),
            PostStatus::Published => write!(f, "published"),
            PostStatus::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for PostStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(PostStatus::Draft),
            "scheduled" => Ok(PostStatus::Scheduled),
            "publishing" => Ok(PostStatus::Publishing),
            "published" => Ok(PostStatus::Published),
            "failed" => Ok(PostStatus::Failed),
            _ => Err(anyhow::anyhow!("Invalid post status: {}", s)),
        }
    }
}

/// A post's reference to publishable media.
///
/// Video jobs are referenced directly so a post can be scheduled before its video
/// has finished rendering; the scheduler holds such posts back until the job's
/// output asset exists.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum MediaRef {
    Asset(Uuid),
    VideoJob(Uuid),
}

impl Display for MediaRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            MediaRef::Asset(id) => write!(f, "asset:{}", id),
            MediaRef::VideoJob(id) => write!(f, "video_job:{}", id),
        }
    }
}

impl FromStr for MediaRef {
    type Err = anyhow::Error;

    /// Accepts `asset:<uuid>`, `video_job:<uuid>` or a bare uuid (an asset).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (kind, id) = match s.split_once(':') {
            Some((kind, id)) => (kind, id),
            None => ("asset", s),
        };
        let id = Uuid::parse_str(id.trim())
            .map_err(|e| anyhow::anyhow!("Invalid media reference '{}': {}", s, e))?;
        match kind {
            "asset" => Ok(MediaRef::Asset(id)),
            "video_job" | "video" => Ok(MediaRef::VideoJob(id)),
            _ => Err(anyhow::anyhow!("Invalid media reference kind: {}", kind)),
        }
    }
}

/// Why the last delivery attempt of a post failed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PostFailure {
    pub kind: PublishErrorKind,
    pub platform: Platform,
    pub message: String,
}

impl Display for PostFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "[{}] {}: {}", self.platform, self.kind, self.message)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    pub id: Uuid,
    pub platform: Platform,
    /// Email subject or blog title. Other platforms ignore it.
    pub title: Option<String>,
    pub body: String,
    pub media_refs: Vec<MediaRef>,
    pub recipients: Vec<String>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub backoff_until: Option<DateTime<Utc>>,
    pub status: PostStatus,
    pub retry_count: i32,
    pub max_retries: i32,
    pub last_error: Option<PostFailure>,
    pub remote_id: Option<String>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
}

#[cfg(feature = "sqlx")]
impl sqlx::FromRow<'_, sqlx::postgres::PgRow> for Post {
    fn from_row(row: &sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;

        let media_refs: serde_json::Value = row.get("media_refs");
        let last_error: Option<serde_json::Value> = row.get("last_error");

        Ok(Post {
            id: row.get("id"),
            platform: row.get::<String, _>("platform").parse().map_err(|e| {
                sqlx::Error::Decode(format!("Failed to parse platform: {}", e).into())
            })?,
            title: row.get("title"),
            body: row.get("body"),
            media_refs: serde_json::from_value(media_refs).map_err(|e| {
                sqlx::Error::Decode(format!("Failed to parse media_refs: {}", e).into())
            })?,
            recipients: row
                .get::<Option<Vec<String>>, _>("recipients")
                .unwrap_or_default(),
            scheduled_at: row.get("scheduled_at"),
            backoff_until: row.get("backoff_until"),
            status: row.get::<String, _>("status").parse().map_err(|e| {
                sqlx::Error::Decode(format!("Failed to parse status: {}", e).into())
            })?,
            retry_count: row.get("retry_count"),
            max_retries: row.get("max_retries"),
            last_error: last_error.and_then(|v| serde_json::from_value(v).ok()),
            remote_id: row.get("remote_id"),
            version: row.get("version"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
            published_at: row.get("published_at"),
        })
    }
}

impl Post {
    /// Earliest instant the scheduler may pick the post up again.
    pub fn due_at(&self) -> Option<DateTime<Utc>> {
        match (self.scheduled_at, self.backoff_until) {
            (Some(at), Some(backoff)) => Some(at.max(backoff)),
            (Some(at), None) => Some(at),
            _ => None,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == PostStatus::Scheduled && self.due_at().is_some_and(|at| at <= now)
    }

    /// Whether another attempt is allowed after the one currently in flight fails.
    ///
    /// `max_retries` counts delivery attempts, so a post with `max_retries = 3`
    /// fails for good on its third failed attempt.
    pub fn has_attempts_left(&self) -> bool {
        self.retry_count + 1 < self.max_retries
    }

    pub fn video_job_refs(&self) -> impl Iterator<Item = Uuid> + '_ {
        self.media_refs.iter().filter_map(|r| match r {
            MediaRef::VideoJob(id) => Some(*id),
            MediaRef::Asset(_) => None,
        })
    }
}

/// Input for creating a draft post.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPost {
    pub platform: Platform,
    pub title: Option<String>,
    pub body: String,
    #[serde(default)]
    pub media_refs: Vec<MediaRef>,
    #[serde(default)]
    pub recipients: Vec<String>,
    pub max_retries: Option<i32>,
}

impl NewPost {
    pub fn new(platform: Platform, body: impl Into<String>) -> Self {
        Self {
            platform,
            title: None,
            body: body.into(),
            media_refs: Vec::new(),
            recipients: Vec::new(),
            max_retries: None,
        }
    }

    pub fn with_media(mut self, media_ref: MediaRef) -> Self {
        self.media_refs.push(media_ref);
        self
    }

    pub fn with_recipients(mut self, recipients: Vec<String>) -> Self {
        self.recipients = recipients;
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_max_retries(mut self, max_retries: i32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Materialize a draft post. `default_max_retries` applies when none was requested.
    pub fn into_post(self, default_max_retries: i32, now: DateTime<Utc>) -> Post {
        Post {
            id: Uuid::new_v4(),
            platform: self.platform,
            title: self.title,
            body: self.body,
            media_refs: self.media_refs,
            recipients: self.recipients,
            scheduled_at: None,
            backoff_until: None,
            status: PostStatus::Draft,
            retry_count: 0,
            max_retries: self.max_retries.unwrap_or(default_max_retries).max(1),
            last_error: None,
            remote_id: None,
            version: 0,
            created_at: now,
            updated_at: now,
            published_at: None,
        }
    }
}
