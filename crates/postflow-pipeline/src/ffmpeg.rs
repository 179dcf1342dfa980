//! ffmpeg-backed slideshow compositor

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

use crate::services::{Composition, VideoCompositor};
use crate::timeline::concat_manifest;

const FRAME_RATE: u32 = 30;

#[derive(Debug, Clone)]
pub struct FfmpegCompositor {
    ffmpeg_path: String,
}

impl FfmpegCompositor {
    pub fn new(ffmpeg_path: impl Into<String>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
        }
    }
}

/// Scale every image into the frame without distortion and pad the rest.
fn frame_filter(width: u32, height: u32) -> String {
    format!(
        "scale={w}:{h}:force_original_aspect_ratio=decrease,\
         pad={w}:{h}:(ow-iw)/2:(oh-ih)/2:color=black,setsar=1,fps={fps},format=yuv420p",
        w = width,
        h = height,
        fps = FRAME_RATE
    )
}

/// Arguments for one render. The output is cut at the audio length.
pub fn compose_args(composition: &Composition, manifest: &Path) -> Vec<String> {
    let seconds = format!("{:.3}", composition.duration_ms as f64 / 1000.0);
    vec![
        "-y".to_string(),
        "-v".to_string(),
        "error".to_string(),
        "-f".to_string(),
        "concat".to_string(),
        "-safe".to_string(),
        "0".to_string(),
        "-i".to_string(),
        manifest.to_string_lossy().to_string(),
        "-i".to_string(),
        composition.audio.to_string_lossy().to_string(),
        "-map".to_string(),
        "0:v".to_string(),
        "-map".to_string(),
        "1:a".to_string(),
        "-vf".to_string(),
        frame_filter(composition.resolution.width, composition.resolution.height),
        "-c:v".to_string(),
        "libx264".to_string(),
        "-preset".to_string(),
        "fast".to_string(),
        "-c:a".to_string(),
        "aac".to_string(),
        "-b:a".to_string(),
        "192k".to_string(),
        "-t".to_string(),
        seconds,
        "-movflags".to_string(),
        "+faststart".to_string(),
        composition.output.to_string_lossy().to_string(),
    ]
}

#[async_trait]
impl VideoCompositor for FfmpegCompositor {
    #[tracing::instrument(skip(self, composition), fields(slides = composition.slides.len(), duration_ms = composition.duration_ms))]
    async fn compose(&self, composition: &Composition) -> Result<()> {
        if composition.slides.is_empty() {
            return Err(anyhow!("Nothing to compose: no slides"));
        }

        let manifest_file = tempfile::Builder::new()
            .suffix(".ffconcat")
            .tempfile()
            .context("Failed to create concat manifest")?;
        tokio::fs::write(manifest_file.path(), concat_manifest(&composition.slides))
            .await
            .context("Failed to write concat manifest")?;

        let output = Command::new(&self.ffmpeg_path)
            .args(compose_args(composition, manifest_file.path()))
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .context("Failed to execute ffmpeg")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("FFmpeg failed: {}", stderr.trim()));
        }

        tracing::debug!(output = %composition.output.display(), "Video composed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeline::slides;
    use postflow_core::models::ResolutionProfile;
    use std::path::PathBuf;

    fn composition() -> Composition {
        Composition {
            slides: slides(&[PathBuf::from("/w/a.jpg"), PathBuf::from("/w/b.jpg")], 7_250),
            audio: PathBuf::from("/w/voice.mp3"),
            duration_ms: 7_250,
            resolution: ResolutionProfile::Square.resolution(),
            output: PathBuf::from("/w/out.mp4"),
        }
    }

    #[test]
    fn output_is_trimmed_to_audio_length() {
        let args = compose_args(&composition(), Path::new("/w/list.ffconcat"));
        let t = args.iter().position(|a| a == "-t").unwrap();
        assert_eq!(args[t + 1], "7.250");
        assert_eq!(args.last().unwrap(), "/w/out.mp4");
    }

    #[test]
    fn frames_are_padded_to_profile() {
        let args = compose_args(&composition(), Path::new("/w/list.ffconcat"));
        let vf = args.iter().position(|a| a == "-vf").unwrap();
        assert!(args[vf + 1].starts_with("scale=1080:1080:force_original_aspect_ratio=decrease,pad=1080:1080"));
    }

    #[tokio::test]
    async fn missing_binary_is_an_error() {
        let compositor = FfmpegCompositor::new("/nonexistent/ffmpeg");
        assert!(compositor.compose(&composition()).await.is_err());
    }

    /// Writes a stand-in binary that records its pid, then sleeps.
    #[cfg(target_os = "linux")]
    fn sleeping_binary(dir: &Path) -> (PathBuf, PathBuf) {
        use std::os::unix::fs::PermissionsExt;

        let pid_file = dir.join("pid");
        let binary = dir.join("ffmpeg");
        std::fs::write(
            &binary,
            format!("#!/bin/sh\necho $$ > {}\nexec sleep 30\n", pid_file.display()),
        )
        .unwrap();
        std::fs::set_permissions(&binary, std::fs::Permissions::from_mode(0o755)).unwrap();
        (binary, pid_file)
    }

    /// Gone or a zombie waiting to be reaped.
    #[cfg(target_os = "linux")]
    async fn wait_until_dead(pid: &str) -> bool {
        for _ in 0..40 {
            let alive = match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
                Ok(stat) => stat
                    .rsplit_once(')')
                    .and_then(|(_, rest)| rest.trim_start().chars().next())
                    .is_some_and(|state| state != 'Z' && state != 'X'),
                Err(_) => false,
            };
            if !alive {
                return true;
            }
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        }
        false
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn cancelled_compose_kills_ffmpeg() {
        let dir = tempfile::tempdir().unwrap();
        let (binary, pid_file) = sleeping_binary(dir.path());
        let compositor = FfmpegCompositor::new(binary.to_string_lossy());

        let result =
            tokio::time::timeout(std::time::Duration::from_secs(1), compositor.compose(&composition()))
                .await;
        assert!(result.is_err());

        let pid = std::fs::read_to_string(&pid_file).unwrap();
        assert!(wait_until_dead(pid.trim()).await);
    }
}
