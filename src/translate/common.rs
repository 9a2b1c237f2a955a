use reqwest::{Client, StatusCode};
use std::collections::HashMap;
use std::time::Duration;

use crate::error::{classify_status, ErrorClass, Result, VideoToolError};
use crate::subtitle::Segment;

pub fn build_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .user_agent(concat!("videotool/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| VideoToolError::Config(format!("Failed to build HTTP client: {}", e)))
}

/// Turn a non-success API status into a translation error with the right class.
pub fn status_error(status: StatusCode, body: &str) -> VideoToolError {
    let message = format!("API error {}: {}", status, body.trim());
    match classify_status(status.as_u16()) {
        ErrorClass::Transient => VideoToolError::transient_translation(message),
        _ => VideoToolError::translation(message),
    }
}

/// Render segments as `[i] text` lines, one per segment.
pub fn numbered_lines(segments: &[Segment]) -> String {
    segments
        .iter()
        .enumerate()
        .map(|(i, seg)| format!("[{}] {}", i, flatten(&seg.text)))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Parse a `[i] text` reply back into exactly `expected` texts.
///
/// Lines without a tag and tags outside the batch are ignored; a missing
/// index is an error, since the reply no longer lines up with the input.
pub fn parse_numbered_lines(reply: &str, expected: usize) -> Result<Vec<String>> {
    let mut by_index: HashMap<usize, String> = HashMap::new();

    for line in reply.lines() {
        let line = line.trim();
        let Some(rest) = line.strip_prefix('[') else {
            continue;
        };
        let Some((index, text)) = rest.split_once(']') else {
            continue;
        };
        if let Ok(index) = index.trim().parse::<usize>() {
            if index < expected {
                by_index.entry(index).or_insert_with(|| text.trim().to_string());
            }
        }
    }

    (0..expected)
        .map(|i| {
            by_index.remove(&i).ok_or_else(|| {
                VideoToolError::transient_translation(format!(
                    "reply is missing line [{}] of {}",
                    i, expected
                ))
            })
        })
        .collect()
}

/// Strip a surrounding markdown code fence, if any.
pub fn strip_code_fence(text: &str) -> &str {
    let text = text.trim();
    let Some(inner) = text.strip_prefix("```") else {
        return text;
    };
    let inner = inner.strip_suffix("```").unwrap_or(inner);
    // Drop an info string such as ```json
    match inner.split_once('\n') {
        Some((first, rest)) if !first.trim().contains(' ') => rest.trim(),
        _ => inner.trim(),
    }
}

/// Pick the translation out of a chatty model answer.
pub fn clean_translation_response(response: &str) -> String {
    let lines: Vec<&str> = response.lines().collect();

    for &line in &lines {
        let trimmed = line.trim();

        if trimmed.is_empty() {
            continue;
        }

        if trimmed.starts_with("Here are")
            || trimmed.starts_with("Here is")
            || trimmed.starts_with("Translation:")
            || trimmed.starts_with("- ")
            || trimmed.starts_with("* ")
        {
            continue;
        }

        if trimmed.starts_with("**") && trimmed.ends_with("**") {
            continue;
        }

        return trimmed.to_string();
    }

    response.trim().to_string()
}

fn flatten(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
