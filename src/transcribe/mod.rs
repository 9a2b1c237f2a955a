// Transcription adapters
//
// The pipeline only needs one operation from a speech recognizer: turn an
// audio file into timed segments in a known source language. Implementations:
// - OpenAI: the openai-whisper command line tool
//
// To add another engine, implement `Transcriber` and extend the factory.

pub mod openai;

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

use crate::config::TranscriberConfig;
use crate::error::Result;
use crate::subtitle::Transcript;

/// Speech-to-text engine.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe `audio_path`, spoken in `source_lang`, with the given model size.
    async fn transcribe(&self, audio_path: &Path, source_lang: &str, model: &str)
    -> Result<Transcript>;
}

/// Factory for creating transcriber instances
pub struct TranscriberFactory;

impl TranscriberFactory {
    pub fn create(config: &TranscriberConfig) -> Arc<dyn Transcriber> {
        Arc::new(openai::OpenAITranscriber::new(config.clone()))
    }
}
