//! ffprobe wrapper for duration and resolution metadata

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::Path;
use tokio::process::Command;
use tracing::error;

use postflow_core::models::{AssetMetadata, Resolution};

#[derive(Debug, Deserialize)]
struct FFprobeOutput {
    format: Option<FFprobeFormat>,
    streams: Option<Vec<FFprobeStream>>,
}

#[derive(Debug, Deserialize)]
struct FFprobeFormat {
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FFprobeStream {
    codec_type: Option<String>,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    duration: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeResult {
    pub duration_ms: Option<u64>,
    pub resolution: Option<Resolution>,
    pub codec: Option<String>,
}

impl ProbeResult {
    /// Copy what was measured onto registration metadata.
    pub fn apply(&self, mut metadata: AssetMetadata) -> AssetMetadata {
        if let Some(ms) = self.duration_ms {
            metadata.duration_ms = Some(ms);
        }
        if let Some(resolution) = self.resolution {
            metadata.resolution = Some(resolution);
        }
        metadata
    }
}

fn seconds_to_ms(raw: &str) -> Option<u64> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(|secs| (secs * 1000.0).round() as u64)
}

/// Parse `ffprobe -show_format -show_streams -of json` output.
pub fn parse_probe_output(stdout: &[u8]) -> Result<ProbeResult> {
    let output: FFprobeOutput =
        serde_json::from_slice(stdout).context("Failed to parse ffprobe output")?;
    let streams = output.streams.unwrap_or_default();

    let video = streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"));
    let primary = video.or_else(|| {
        streams
            .iter()
            .find(|s| s.codec_type.as_deref() == Some("audio"))
    });

    let duration_ms = output
        .format
        .as_ref()
        .and_then(|f| f.duration.as_deref())
        .and_then(seconds_to_ms)
        .or_else(|| primary.and_then(|s| s.duration.as_deref()).and_then(seconds_to_ms));

    let resolution = video.and_then(|s| match (s.width, s.height) {
        (Some(width), Some(height)) if width > 0 && height > 0 => {
            Some(Resolution { width, height })
        }
        _ => None,
    });

    Ok(ProbeResult {
        duration_ms,
        resolution,
        codec: primary.and_then(|s| s.codec_name.clone()),
    })
}

/// Runs ffprobe against files on disk.
#[derive(Debug, Clone)]
pub struct MediaProbe {
    ffprobe_path: String,
}

impl MediaProbe {
    pub fn new(ffprobe_path: impl Into<String>) -> Self {
        Self {
            ffprobe_path: ffprobe_path.into(),
        }
    }

    #[tracing::instrument(skip(self, path), fields(path = %path.display()))]
    pub async fn probe_path(&self, path: &Path) -> Result<ProbeResult> {
        let output = Command::new(&self.ffprobe_path)
            .args(["-v", "error", "-show_format", "-show_streams", "-of", "json"])
            .arg(path)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| anyhow!("Failed to run ffprobe: {}", e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            error!("ffprobe failed: {}", stderr);
            return Err(anyhow!("ffprobe failed: {}", stderr.trim()));
        }

        parse_probe_output(&output.stdout)
    }

    /// Probe in-memory bytes through a temporary file.
    pub async fn probe_bytes(&self, data: &[u8], extension: &str) -> Result<ProbeResult> {
        let temp_file = tempfile::Builder::new()
            .suffix(&format!(".{}", extension.trim_start_matches('.')))
            .tempfile()?;
        tokio::fs::write(temp_file.path(), data).await?;

        self.probe_path(temp_file.path()).await
    }
}
