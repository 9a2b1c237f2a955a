use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::info;

use super::{MediaCommandBuilder, Muxer};
use crate::config::MediaConfig;
use crate::error::{Result, VideoToolError};
use crate::language;

/// ffmpeg-backed muxer
pub struct FfmpegMuxer {
    command_builder: MediaCommandBuilder,
}

impl FfmpegMuxer {
    pub fn new(config: MediaConfig) -> Self {
        Self {
            command_builder: MediaCommandBuilder::new(config.binary_path),
        }
    }
}

/// Subtitle codec the output container can carry.
pub fn subtitle_codec_for(container: &Path) -> Result<&'static str> {
    let ext = container
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "mp4" | "m4v" | "mov" => Ok("mov_text"),
        "mkv" => Ok("srt"),
        "webm" => Ok("webvtt"),
        other => Err(VideoToolError::UnsupportedFormat(format!(
            "cannot embed soft subtitles in '.{}' containers",
            other
        ))),
    }
}

/// File name prefix of a mux still in progress.
pub const PARTIAL_PREFIX: &str = ".videotool-";

/// Container used for sources that cannot carry a soft subtitle track.
pub const FALLBACK_CONTAINER: &str = "mp4";

/// Extension of the muxed copy of `source`: its own when the container takes
/// a subtitle track, [`FALLBACK_CONTAINER`] otherwise.
pub fn muxed_extension(source: &Path) -> String {
    match (subtitle_codec_for(source), source.extension()) {
        (Ok(_), Some(ext)) => ext.to_string_lossy().to_string(),
        _ => FALLBACK_CONTAINER.to_string(),
    }
}

#[async_trait]
impl Muxer for FfmpegMuxer {
    async fn extract_audio(&self, video_path: &Path, audio_path: &Path) -> Result<()> {
        info!(
            "Extracting audio from {} to {}",
            video_path.display(),
            audio_path.display()
        );

        self.command_builder
            .extract_audio(video_path, audio_path)
            .execute()
            .await?;

        info!("Audio extraction completed");
        Ok(())
    }

    async fn embed_subtitles(
        &self,
        video_path: &Path,
        subtitle_path: &Path,
        output_path: &Path,
        language: &str,
    ) -> Result<PathBuf> {
        info!(
            "Embedding subtitles from {} into {} -> {}",
            subtitle_path.display(),
            video_path.display(),
            output_path.display()
        );

        let codec = subtitle_codec_for(output_path)?;
        let ext = output_path
            .extension()
            .map(|e| e.to_string_lossy().to_string())
            .unwrap_or_default();
        let dir = match output_path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        tokio::fs::create_dir_all(&dir).await?;

        // ffmpeg picks the muxer from the extension, so the partial file keeps it.
        let partial = tempfile::Builder::new()
            .prefix(PARTIAL_PREFIX)
            .suffix(&format!(".partial.{}", ext))
            .tempfile_in(&dir)?
            .into_temp_path();

        self.command_builder
            .embed_subtitles(
                video_path,
                subtitle_path,
                partial.as_ref(),
                codec,
                &language::iso639_2(language),
            )
            .execute()
            .await?;

        partial
            .persist(output_path)
            .map_err(|e| VideoToolError::Mux(format!("Failed to move output into place: {}", e)))?;

        info!("Subtitle embedding completed successfully");
        Ok(output_path.to_path_buf())
    }

    async fn check_availability(&self) -> Result<()> {
        self.command_builder.version_check().execute().await?;
        info!("Media processor is available");
        Ok(())
    }
}
