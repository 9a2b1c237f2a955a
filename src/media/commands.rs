use std::io::ErrorKind;
use std::path::Path;
use tokio::process::Command;
use tracing::debug;

use crate::error::{Result, VideoToolError};

/// Abstract media processing command representation
#[derive(Debug, Clone)]
pub struct MediaCommand {
    pub binary_path: String,
    pub args: Vec<String>,
    pub description: String,
}

impl MediaCommand {
    /// Create a new media processing command
    pub fn new<S1: Into<String>, S2: Into<String>>(binary_path: S1, description: S2) -> Self {
        Self {
            binary_path: binary_path.into(),
            args: Vec::new(),
            description: description.into(),
        }
    }

    /// Add an argument
    pub fn arg<S: Into<String>>(mut self, arg: S) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add input file
    pub fn input<P: AsRef<Path>>(self, path: P) -> Self {
        self.arg("-i").arg(path.as_ref().to_string_lossy().to_string())
    }

    /// Add output file
    pub fn output<P: AsRef<Path>>(self, path: P) -> Self {
        self.arg(path.as_ref().to_string_lossy().to_string())
    }

    /// Force overwrite output
    pub fn overwrite(self) -> Self {
        self.arg("-y")
    }

    /// Select streams for the output
    pub fn map<S: Into<String>>(self, spec: S) -> Self {
        self.arg("-map").arg(spec)
    }

    /// Copy every selected stream unchanged
    pub fn copy_streams(self) -> Self {
        self.arg("-c").arg("copy")
    }

    /// Set subtitle codec
    pub fn subtitle_codec<S: Into<String>>(self, codec: S) -> Self {
        self.arg("-c:s").arg(codec)
    }

    /// Set audio codec
    pub fn audio_codec<S: Into<String>>(self, codec: S) -> Self {
        self.arg("-c:a").arg(codec)
    }

    /// Tag the first subtitle stream with a language
    pub fn subtitle_language<S: AsRef<str>>(self, tag: S) -> Self {
        self.arg("-metadata:s:s:0")
            .arg(format!("language={}", tag.as_ref()))
    }

    /// Disable video
    pub fn no_video(self) -> Self {
        self.arg("-vn")
    }

    /// Set audio sample rate
    pub fn audio_sample_rate(self, rate: u32) -> Self {
        self.arg("-ar").arg(rate.to_string())
    }

    /// Set audio channels
    pub fn audio_channels(self, channels: u32) -> Self {
        self.arg("-ac").arg(channels.to_string())
    }

    /// Execute the command. The child is killed if this future is dropped.
    pub async fn execute(&self) -> Result<()> {
        debug!("Executing media processing command: {} {:?}", self.binary_path, self.args);
        debug!("Description: {}", self.description);

        let output = Command::new(&self.binary_path)
            .args(&self.args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => VideoToolError::Mux(format!(
                    "'{}' not found. Install ffmpeg from https://ffmpeg.org/",
                    self.binary_path
                )),
                _ => VideoToolError::Mux(format!("Failed to execute media processor: {}", e)),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(VideoToolError::Mux(format!(
                "{} failed: {}",
                self.description,
                last_lines(&stderr, 5)
            )));
        }

        Ok(())
    }
}

/// ffmpeg prints its banner first; the cause is at the end.
fn last_lines(text: &str, count: usize) -> String {
    let lines: Vec<&str> = text.trim().lines().collect();
    lines[lines.len().saturating_sub(count)..].join("\n")
}

/// Builder for common media processing operations
pub struct MediaCommandBuilder {
    binary_path: String,
}

impl MediaCommandBuilder {
    /// Create a new command builder
    pub fn new<S: Into<String>>(binary_path: S) -> Self {
        Self {
            binary_path: binary_path.into(),
        }
    }

    /// Build a soft-subtitle mux: copy video and audio, add the subtitle file
    /// as a new tagged track.
    pub fn embed_subtitles<P: AsRef<Path>>(
        &self,
        video_path: P,
        subtitle_path: P,
        output_path: P,
        subtitle_codec: &str,
        language_tag: &str,
    ) -> MediaCommand {
        MediaCommand::new(&self.binary_path, "Subtitle embedding")
            .overwrite()
            .input(&video_path)
            .input(&subtitle_path)
            .map("0:v?")
            .map("0:a?")
            .map("1:0")
            .copy_streams()
            .subtitle_codec(subtitle_codec)
            .subtitle_language(language_tag)
            .output(output_path)
    }

    /// Build audio extraction command: 16 kHz mono PCM for whisper
    pub fn extract_audio<P: AsRef<Path>>(&self, video_path: P, audio_path: P) -> MediaCommand {
        MediaCommand::new(&self.binary_path, "Audio extraction")
            .input(video_path)
            .no_video()
            .audio_codec("pcm_s16le")
            .audio_sample_rate(16000)
            .audio_channels(1)
            .overwrite()
            .output(audio_path)
    }

    /// Build version check command
    pub fn version_check(&self) -> MediaCommand {
        MediaCommand::new(&self.binary_path, "Version check").arg("-version")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorClass;

    #[test]
    fn test_embed_command_layout() {
        let cmd = MediaCommandBuilder::new("ffmpeg").embed_subtitles(
            "Avatar.mp4",
            "Avatar_my.srt",
            "Avatar_my.mp4",
            "mov_text",
            "bur",
        );
        assert_eq!(
            cmd.args,
            vec![
                "-y", "-i", "Avatar.mp4", "-i", "Avatar_my.srt", "-map", "0:v?", "-map", "0:a?",
                "-map", "1:0", "-c", "copy", "-c:s", "mov_text", "-metadata:s:s:0",
                "language=bur", "Avatar_my.mp4",
            ]
        );
    }

    #[test]
    fn test_extract_command_layout() {
        let cmd = MediaCommandBuilder::new("ffmpeg").extract_audio("in.mkv", "out.wav");
        assert_eq!(
            cmd.args,
            vec![
                "-i", "in.mkv", "-vn", "-c:a", "pcm_s16le", "-ar", "16000", "-ac", "1", "-y",
                "out.wav",
            ]
        );
    }

    #[test]
    fn test_last_lines() {
        assert_eq!(last_lines("a\nb\nc\n", 2), "b\nc");
        assert_eq!(last_lines("only", 5), "only");
    }

    #[tokio::test]
    async fn test_missing_binary_is_permanent_mux_error() {
        let err = MediaCommandBuilder::new("videotool-test-no-such-ffmpeg")
            .version_check()
            .execute()
            .await
            .unwrap_err();
        assert!(matches!(err, VideoToolError::Mux(_)));
        assert_eq!(err.class(), ErrorClass::Permanent);
    }
}
