use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VideoToolError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Transcription error: {message}")]
    Transcription { message: String, transient: bool },

    #[error("Translation error: {message}")]
    Translation { message: String, transient: bool },

    #[error("Mux error: {0}")]
    Mux(String),

    #[error("Caption error: {0}")]
    Caption(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Stage timed out after {}s", .0.as_secs_f64())]
    Timeout(Duration),

    #[error("Interrupted")]
    Interrupted,
}

pub type Result<T> = std::result::Result<T, VideoToolError>;

/// How the stage executor treats a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Network hiccups, timeouts, rate limits and quota exhaustion. Retried.
    Transient,
    /// Bad input, missing tools, unsupported media. Never retried.
    Permanent,
    /// Missing credentials or invalid settings. Aborts the invocation.
    Configuration,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::Permanent => "permanent",
            Self::Configuration => "configuration",
        }
    }
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl VideoToolError {
    pub fn transcription<S: Into<String>>(message: S) -> Self {
        Self::Transcription { message: message.into(), transient: false }
    }

    pub fn transient_transcription<S: Into<String>>(message: S) -> Self {
        Self::Transcription { message: message.into(), transient: true }
    }

    pub fn translation<S: Into<String>>(message: S) -> Self {
        Self::Translation { message: message.into(), transient: false }
    }

    pub fn transient_translation<S: Into<String>>(message: S) -> Self {
        Self::Translation { message: message.into(), transient: true }
    }

    /// Classify this error for retry purposes.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Io(e) => match e.kind() {
                std::io::ErrorKind::TimedOut
                | std::io::ErrorKind::Interrupted
                | std::io::ErrorKind::ConnectionReset
                | std::io::ErrorKind::ConnectionAborted
                | std::io::ErrorKind::ConnectionRefused
                | std::io::ErrorKind::WouldBlock => ErrorClass::Transient,
                _ => ErrorClass::Permanent,
            },
            Self::Http(e) => {
                if e.is_timeout() || e.is_connect() || e.is_request() {
                    ErrorClass::Transient
                } else if let Some(status) = e.status() {
                    classify_status(status.as_u16())
                } else {
                    ErrorClass::Permanent
                }
            }
            Self::Transcription { transient, .. } | Self::Translation { transient, .. } => {
                if *transient {
                    ErrorClass::Transient
                } else {
                    ErrorClass::Permanent
                }
            }
            Self::Timeout(_) => ErrorClass::Transient,
            Self::Config(_) => ErrorClass::Configuration,
            Self::Json(_)
            | Self::Toml(_)
            | Self::Mux(_)
            | Self::Caption(_)
            | Self::FileNotFound(_)
            | Self::UnsupportedFormat(_)
            | Self::Interrupted => ErrorClass::Permanent,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.class() == ErrorClass::Transient
    }
}

/// Classify an HTTP status code returned by a remote translation backend.
///
/// 408/429 and 5xx (including Anthropic's 529 "overloaded") are worth another
/// attempt; quota exhaustion surfaces as 429 too. Every other status means the
/// request itself is wrong.
pub fn classify_status(status: u16) -> ErrorClass {
    match status {
        408 | 429 => ErrorClass::Transient,
        500..=599 => ErrorClass::Transient,
        _ => ErrorClass::Permanent,
    }
}
