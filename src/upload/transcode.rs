//! Video transcoding
//!
//! Compression is a best-effort size optimization, not a correctness
//! requirement: files above the threshold are re-encoded to a bounded
//! resolution/bitrate profile, and a failed transcode falls back to
//! uploading the original file.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tempfile::NamedTempFile;
use thiserror::Error;

/// Files at or below this size skip compression (20 MB self-imposed target)
pub const COMPRESSION_THRESHOLD_BYTES: u64 = 20 * 1024 * 1024;

/// True if a source file of this size should be compressed before upload
pub fn needs_compression(size_bytes: u64) -> bool {
    size_bytes > COMPRESSION_THRESHOLD_BYTES
}

/// Transcode failure
#[derive(Debug, Clone, Error)]
#[error("transcode failed: {0}")]
pub struct TranscodeError(pub String);

/// A transcoded video staged in a temp file
///
/// The staging file is deleted when this is dropped, so it must outlive the
/// upload that reads it.
#[derive(Debug)]
pub struct TranscodedVideo {
    file: NamedTempFile,
}

impl TranscodedVideo {
    pub fn new(file: NamedTempFile) -> Self {
        Self { file }
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

/// Video transcoder collaborator
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VideoTranscoder: Send + Sync {
    /// Re-encode `source` to the bounded profile
    ///
    /// Output is always MP4 (H.264/AAC) regardless of the source container.
    async fn transcode(&self, source: &Path) -> Result<TranscodedVideo, TranscodeError>;
}

/// Transcoder shelling out to ffmpeg
///
/// Profile: height capped at 540 lines (width follows, kept even), 2 Mbps
/// video, 128 kbps audio, faststart for progressive playback.
pub struct FfmpegTranscoder {
    binary: PathBuf,
}

impl FfmpegTranscoder {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl Default for FfmpegTranscoder {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

#[async_trait]
impl VideoTranscoder for FfmpegTranscoder {
    async fn transcode(&self, source: &Path) -> Result<TranscodedVideo, TranscodeError> {
        let staging = tempfile::Builder::new()
            .prefix("pindrop-transcode-")
            .suffix(".mp4")
            .tempfile()
            .map_err(|e| TranscodeError(format!("could not create staging file: {}", e)))?;

        let output = tokio::process::Command::new(&self.binary)
            .arg("-y")
            .arg("-i")
            .arg(source)
            .args(["-vf", "scale=-2:'min(540,ih)'"])
            .args(["-c:v", "libx264", "-b:v", "2M", "-maxrate", "2.5M", "-bufsize", "4M"])
            .args(["-preset", "veryfast"])
            .args(["-c:a", "aac", "-b:a", "128k"])
            .args(["-movflags", "+faststart"])
            .arg(staging.path())
            .output()
            .await
            .map_err(|e| TranscodeError(format!("could not run {}: {}", self.binary.display(), e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: String = stderr
                .lines()
                .rev()
                .take(5)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect::<Vec<_>>()
                .join("\n");
            return Err(TranscodeError(format!(
                "ffmpeg exited with {}: {}",
                output.status, tail
            )));
        }

        tracing::debug!(
            source = %source.display(),
            staged = %staging.path().display(),
            "Video transcoded"
        );
        Ok(TranscodedVideo::new(staging))
    }
}
