use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use uuid::Uuid;

use super::Resolution;

/// Persisted position of a video job in the pipeline.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum VideoStage {
    PendingScript,
    PendingTts,
    PendingAssembly,
    Complete,
    Failed,
}

impl VideoStage {
    /// The pipeline stage that has to run next, if any.
    pub fn pending(&self) -> Option<PipelineStage> {
        match self {
            VideoStage::PendingScript => Some(PipelineStage::Script),
            VideoStage::PendingTts => Some(PipelineStage::Speech),
            VideoStage::PendingAssembly => Some(PipelineStage::Assembly),
            VideoStage::Complete | VideoStage::Failed => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, VideoStage::Complete | VideoStage::Failed)
    }
}

impl Display for VideoStage {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            VideoStage::PendingScript => write!(f, "pending_script"),
            VideoStage::PendingTts => write!(f, "pending_tts"),
            VideoStage::PendingAssembly => write!(f, "pending_assembly"),
            VideoStage::Complete => write!(f, "complete"),
            VideoStage::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for VideoStage {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending_script" => Ok(VideoStage::PendingScript),
            "pending_tts" => Ok(VideoStage::PendingTts),
            "pending_assembly" => Ok(VideoStage::PendingAssembly),
            "complete" => Ok(VideoStage::Complete),
            "failed" => Ok(VideoStage::Failed),
            _ => Err(anyhow::anyhow!("Invalid video stage: {}", s)),
        }
    }
}

/// One unit of work in the video pipeline.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Script,
    Speech,
    Assembly,
}

impl PipelineStage {
    pub const ORDER: [PipelineStage; 3] = [
        PipelineStage::Script,
        PipelineStage::Speech,
        PipelineStage::Assembly,
    ];

    /// Stored stage while this pipeline stage waits to run.
    pub fn pending(&self) -> VideoStage {
        match self {
            PipelineStage::Script => VideoStage::PendingScript,
            PipelineStage::Speech => VideoStage::PendingTts,
            PipelineStage::Assembly => VideoStage::PendingAssembly,
        }
    }

    /// Stored stage once this pipeline stage has succeeded.
    pub fn completed(&self) -> VideoStage {
        match self {
            PipelineStage::Script => VideoStage::PendingTts,
            PipelineStage::Speech => VideoStage::PendingAssembly,
            PipelineStage::Assembly => VideoStage::Complete,
        }
    }
}

impl Display for PipelineStage {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            PipelineStage::Script => write!(f, "script"),
            PipelineStage::Speech => write!(f, "speech"),
            PipelineStage::Assembly => write!(f, "assembly"),
        }
    }
}

/// Output frame geometry for an assembled video.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionProfile {
    #[default]
    Vertical,
    Square,
    Horizontal,
}

impl ResolutionProfile {
    pub fn resolution(&self) -> Resolution {
        match self {
            ResolutionProfile::Vertical => Resolution {
                width: 1080,
                height: 1920,
            },
            ResolutionProfile::Square => Resolution {
                width: 1080,
                height: 1080,
            },
            ResolutionProfile::Horizontal => Resolution {
                width: 1920,
                height: 1080,
            },
        }
    }
}

impl Display for ResolutionProfile {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            ResolutionProfile::Vertical => write!(f, "vertical"),
            ResolutionProfile::Square => write!(f, "square"),
            ResolutionProfile::Horizontal => write!(f, "horizontal"),
        }
    }
}

impl FromStr for ResolutionProfile {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "vertical" | "9:16" => Ok(ResolutionProfile::Vertical),
            "square" | "1:1" => Ok(ResolutionProfile::Square),
            "horizontal" | "16:9" => Ok(ResolutionProfile::Horizontal),
            _ => Err(anyhow::anyhow!("Invalid resolution profile: {}", s)),
        }
    }
}

/// Narration produced by the script stage, one entry per spoken line.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Script {
    pub lines: Vec<String>,
}

impl Script {
    pub fn narration(&self) -> String {
        self.lines.join("\n")
    }

    pub fn is_empty(&self) -> bool {
        self.lines.iter().all(|l| l.trim().is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StageFailure {
    pub stage: PipelineStage,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoJob {
    pub id: Uuid,
    pub topic: String,
    pub tone: String,
    pub target_lines: i32,
    pub voice: String,
    pub profile: ResolutionProfile,
    pub image_refs: Vec<Uuid>,
    pub stage: VideoStage,
    pub script: Option<Script>,
    pub audio_asset_id: Option<Uuid>,
    pub audio_duration_ms: Option<u64>,
    pub output_asset_id: Option<Uuid>,
    /// Attempts spent on the current stage.
    pub stage_attempts: i32,
    pub failure: Option<StageFailure>,
    pub last_error: Option<String>,
    pub next_attempt_at: Option<DateTime<Utc>>,
    /// Lease held by the runner executing the current stage.
    pub locked_until: Option<DateTime<Utc>>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(feature = "sqlx")]
impl sqlx::FromRow<'_, sqlx::postgres::PgRow> for VideoJob {
    fn from_row(row: &sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;

        let decode = |field: &str, e: String| {
            sqlx::Error::Decode(format!("Failed to parse {}: {}", field, e).into())
        };
        let script: Option<serde_json::Value> = row.get("script");
        let failure: Option<serde_json::Value> = row.get("failure");

        Ok(VideoJob {
            id: row.get("id"),
            topic: row.get("topic"),
            tone: row.get("tone"),
            target_lines: row.get("target_lines"),
            voice: row.get("voice"),
            profile: row
                .get::<String, _>("profile")
                .parse()
                .map_err(|e: anyhow::Error| decode("profile", e.to_string()))?,
            image_refs: row.get::<Option<Vec<Uuid>>, _>("image_refs").unwrap_or_default(),
            stage: row
                .get::<String, _>("stage")
                .parse()
                .map_err(|e: anyhow::Error| decode("stage", e.to_string()))?,
            script: script
                .map(serde_json::from_value)
                .transpose()
                .map_err(|e| decode("script", e.to_string()))?,
            audio_asset_id: row.get("audio_asset_id"),
            audio_duration_ms: row
                .get::<Option<i64>, _>("audio_duration_ms")
                .map(|ms| ms.max(0) as u64),
            output_asset_id: row.get("output_asset_id"),
            stage_attempts: row.get("stage_attempts"),
            failure: failure
                .map(serde_json::from_value)
                .transpose()
                .map_err(|e| decode("failure", e.to_string()))?,
            last_error: row.get("last_error"),
            next_attempt_at: row.get("next_attempt_at"),
            locked_until: row.get("locked_until"),
            version: row.get("version"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }
}

impl VideoJob {
    /// Whether a runner may pick this job up at `now`.
    pub fn is_runnable(&self, now: DateTime<Utc>) -> bool {
        self.stage.pending().is_some()
            && self.locked_until.map_or(true, |until| until <= now)
            && self.next_attempt_at.map_or(true, |at| at <= now)
    }

    /// Move a failed job back to the stage that failed, keeping earlier outputs.
    pub fn restart(&mut self) -> anyhow::Result<PipelineStage> {
        let failure = match (&self.stage, &self.failure) {
            (VideoStage::Failed, Some(failure)) => failure.clone(),
            _ => {
                return Err(anyhow::anyhow!(
                    "Video job {} cannot be restarted from stage {}",
                    self.id,
                    self.stage
                ))
            }
        };
        self.stage = failure.stage.pending();
        self.stage_attempts = 0;
        self.failure = None;
        self.next_attempt_at = None;
        Ok(failure.stage)
    }
}

/// Input for creating a video job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewVideoJob {
    pub topic: String,
    pub tone: String,
    pub target_lines: i32,
    pub voice: String,
    #[serde(default)]
    pub profile: ResolutionProfile,
    pub image_refs: Vec<Uuid>,
}

impl NewVideoJob {
    pub fn into_job(self, now: DateTime<Utc>) -> VideoJob {
        VideoJob {
            id: Uuid::new_v4(),
            topic: self.topic,
            tone: self.tone,
            target_lines: self.target_lines.max(1),
            voice: self.voice,
            profile: self.profile,
            image_refs: self.image_refs,
            stage: VideoStage::PendingScript,
            script: None,
            audio_asset_id: None,
            audio_duration_ms: None,
            output_asset_id: None,
            stage_attempts: 0,
            failure: None,
            last_error: None,
            next_attempt_at: None,
            locked_until: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }
}
