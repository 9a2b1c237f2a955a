// Media processing
//
// - Commands: ffmpeg command builders
// - Processor: the ffmpeg-backed `Muxer`

pub mod commands;
pub mod processor;

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub use commands::*;
pub use processor::*;

use crate::config::MediaConfig;
use crate::error::Result;

/// Audio extraction and subtitle muxing.
#[async_trait]
pub trait Muxer: Send + Sync {
    /// Extract a mono 16 kHz WAV track suitable for speech recognition.
    async fn extract_audio(&self, video_path: &Path, audio_path: &Path) -> Result<()>;

    /// Write a copy of `video_path` carrying `subtitle_path` as a subtitle
    /// track tagged with `language`. Nothing exists at `output_path` unless
    /// this succeeds.
    async fn embed_subtitles(
        &self,
        video_path: &Path,
        subtitle_path: &Path,
        output_path: &Path,
        language: &str,
    ) -> Result<PathBuf>;

    /// Check that the underlying tool can be run.
    async fn check_availability(&self) -> Result<()>;
}

/// Factory for creating muxer instances
pub struct MuxerFactory;

impl MuxerFactory {
    pub fn create(config: &MediaConfig) -> Arc<dyn Muxer> {
        Arc::new(processor::FfmpegMuxer::new(config.clone()))
    }
}
