use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::info;

use crate::error::{Result, VideoToolError};

/// One timed line of speech.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

impl Segment {
    pub fn new<S: Into<String>>(start: f64, end: f64, text: S) -> Self {
        Self {
            start,
            end,
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    pub language: String,
    pub segments: Vec<Segment>,
}

/// Writes timed captions to disk.
#[async_trait]
pub trait CaptionWriter: Send + Sync {
    async fn write_captions(&self, segments: &[Segment], path: &Path) -> Result<PathBuf>;
}

/// SRT caption writer. The file is written next to its final location and
/// renamed into place, so a reader never sees half a subtitle file.
#[derive(Debug, Clone, Default)]
pub struct SrtWriter;

#[async_trait]
impl CaptionWriter for SrtWriter {
    async fn write_captions(&self, segments: &[Segment], path: &Path) -> Result<PathBuf> {
        info!("Generating SRT file: {}", path.display());

        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir).await?;

        let temp = tempfile::Builder::new()
            .prefix(".videotool-")
            .suffix(".srt.tmp")
            .tempfile_in(&dir)?
            .into_temp_path();

        fs::write(&temp, render_srt(segments)).await?;
        temp.persist(path)
            .map_err(|e| VideoToolError::Caption(format!("Failed to move SRT into place: {}", e)))?;

        info!("SRT file generated successfully");
        Ok(path.to_path_buf())
    }
}

/// Render segments as SRT text.
pub fn render_srt(segments: &[Segment]) -> String {
    let mut srt_content = String::new();

    for (index, segment) in segments.iter().enumerate() {
        srt_content.push_str(&format!(
            "{}\n{} --> {}\n{}\n\n",
            index + 1,
            format_srt_time(segment.start),
            format_srt_time(segment.end),
            segment.text.trim()
        ));
    }

    srt_content
}

/// Read an SRT file back into segments.
pub async fn read_srt<P: AsRef<Path>>(path: P) -> Result<Vec<Segment>> {
    let path = path.as_ref();
    let content = fs::read_to_string(path).await?;
    parse_srt(&content)
        .map_err(|e| VideoToolError::Caption(format!("{}: {}", path.display(), e)))
}

/// Parse SRT text. Cue numbers are ignored; cue order is kept.
pub fn parse_srt(content: &str) -> std::result::Result<Vec<Segment>, String> {
    let content = content.trim_start_matches('\u{feff}').replace("\r\n", "\n");
    let mut segments = Vec::new();

    for block in content.split("\n\n") {
        let mut lines = block.lines().filter(|l| !l.trim().is_empty()).peekable();
        if lines.peek().is_none() {
            continue;
        }

        let mut timing = lines.next().unwrap_or_default();
        if !timing.contains("-->") {
            timing = lines.next().ok_or_else(|| format!("cue without timing: {:?}", block))?;
        }

        let (start, end) = timing
            .split_once("-->")
            .ok_or_else(|| format!("malformed timing line: {:?}", timing))?;
        let start = parse_srt_time(start.trim())?;
        let end = parse_srt_time(end.trim())?;
        let text = lines.collect::<Vec<_>>().join("\n");

        segments.push(Segment { start, end, text });
    }

    Ok(segments)
}

/// Format time in seconds to SRT time format (HH:MM:SS,mmm)
fn format_srt_time(seconds: f64) -> String {
    let total_milliseconds = (seconds.max(0.0) * 1000.0).round() as u64;
    let hours = total_milliseconds / 3_600_000;
    let minutes = (total_milliseconds % 3_600_000) / 60_000;
    let secs = (total_milliseconds % 60_000) / 1_000;
    let millis = total_milliseconds % 1_000;

    format!("{:02}:{:02}:{:02},{:03}", hours, minutes, secs, millis)
}

fn parse_srt_time(value: &str) -> std::result::Result<f64, String> {
    let malformed = || format!("malformed timestamp: {:?}", value);

    let (clock, millis) = value.split_once([',', '.']).ok_or_else(malformed)?;
    let parts: Vec<&str> = clock.split(':').collect();
    if parts.len() != 3 {
        return Err(malformed());
    }

    let number = |s: &str| s.trim().parse::<u64>().map_err(|_| malformed());
    let total_ms = number(parts[0])? * 3_600_000
        + number(parts[1])? * 60_000
        + number(parts[2])? * 1_000
        + number(millis)?;

    Ok(total_ms as f64 / 1000.0)
}
