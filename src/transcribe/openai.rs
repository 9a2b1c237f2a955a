// OpenAI Whisper command line implementation

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::Path;
use tokio::process::Command;
use tracing::{debug, info};

use super::Transcriber;
use crate::config::TranscriberConfig;
use crate::error::{Result, VideoToolError};
use crate::subtitle::{Segment, Transcript};

/// OpenAI Whisper specific JSON output format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAIWhisperOutput {
    #[serde(default)]
    pub text: String,
    pub segments: Vec<OpenAIWhisperSegment>,
    pub language: Option<String>,
}

/// OpenAI Whisper specific segment format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAIWhisperSegment {
    pub id: u64,
    pub start: f64,
    pub end: f64,
    pub text: String,
    pub avg_logprob: Option<f64>,
    pub no_speech_prob: Option<f64>,
}

impl OpenAIWhisperOutput {
    /// Convert to a transcript in `source_lang`, dropping empty segments.
    pub fn into_transcript(self, source_lang: &str) -> Transcript {
        let segments = self
            .segments
            .into_iter()
            .map(|seg| Segment {
                start: seg.start,
                end: seg.end,
                text: seg.text.trim().to_string(),
            })
            .filter(|seg| !seg.text.is_empty())
            .collect();

        Transcript {
            language: source_lang.to_string(),
            segments,
        }
    }
}

/// Runs the `whisper` command and reads back its JSON output.
pub struct OpenAITranscriber {
    config: TranscriberConfig,
}

impl OpenAITranscriber {
    pub fn new(config: TranscriberConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Transcriber for OpenAITranscriber {
    async fn transcribe(
        &self,
        audio_path: &Path,
        source_lang: &str,
        model: &str,
    ) -> Result<Transcript> {
        info!(
            "Transcribing {} with whisper ({} model)",
            audio_path.display(),
            model
        );

        let temp_dir = tempfile::tempdir()?;
        let output_dir = temp_dir.path();

        let mut cmd = Command::new(&self.config.binary_path);
        cmd.arg(audio_path)
            .arg("--model")
            .arg(model)
            .arg("--language")
            .arg(source_lang)
            .arg("--output_dir")
            .arg(output_dir)
            .arg("--output_format")
            .arg("json")
            .arg("--verbose")
            .arg("False")
            .kill_on_drop(true);

        debug!("Executing whisper command: {:?}", cmd);

        let output = cmd.output().await.map_err(|e| match e.kind() {
            ErrorKind::NotFound => VideoToolError::transcription(format!(
                "'{}' not found. Install with: pip install openai-whisper",
                self.config.binary_path
            )),
            _ => VideoToolError::transcription(format!("Failed to execute whisper: {}", e)),
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(VideoToolError::transcription(format!(
                "whisper failed on {}: {}",
                audio_path.display(),
                stderr.trim()
            )));
        }

        let audio_filename = audio_path
            .file_stem()
            .ok_or_else(|| VideoToolError::transcription("Invalid audio filename"))?;
        let json_file = output_dir.join(format!("{}.json", audio_filename.to_string_lossy()));

        let json_content = tokio::fs::read_to_string(&json_file).await.map_err(|e| {
            VideoToolError::transcription(format!("Whisper JSON output missing: {}", e))
        })?;
        let whisper_output: OpenAIWhisperOutput = serde_json::from_str(&json_content)
            .map_err(|e| VideoToolError::transcription(format!("Failed to parse whisper JSON: {}", e)))?;

        let transcript = whisper_output.into_transcript(source_lang);
        info!("Transcription complete: {} segments", transcript.segments.len());
        Ok(transcript)
    }
}
