//! Pipeline stage bookkeeping.
//!
//! A [`StageResult`] starts out `Pending` and moves exactly once to a terminal
//! status. The per-language [`ChainState`] machine enforces the stage order
//! `transcribing → translating → captioning → muxing`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{ErrorClass, VideoToolError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Transcribe,
    Translate,
    Caption,
    Mux,
}

impl StageKind {
    pub const ALL: [StageKind; 4] = [Self::Transcribe, Self::Translate, Self::Caption, Self::Mux];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transcribe => "transcribe",
            Self::Translate => "translate",
            Self::Caption => "caption",
            Self::Mux => "mux",
        }
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Succeeded,
    Failed,
    Skipped,
}

impl StageStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

impl std::fmt::Display for StageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure detail kept on a stage result and in the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageError {
    pub class: ErrorClass,
    pub message: String,
    pub attempts: u32,
}

impl StageError {
    pub fn from_error(error: &VideoToolError, attempts: u32) -> Self {
        Self {
            class: error.class(),
            message: error.to_string(),
            attempts,
        }
    }
}

impl std::fmt::Display for StageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.class, self.message)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageResult {
    pub stage: StageKind,
    pub language: String,
    pub status: StageStatus,
    pub artifacts: Vec<PathBuf>,
    pub error: Option<StageError>,
    pub skip_reason: Option<String>,
    pub attempts: u32,
    /// Set when the stage was abandoned because of an interrupt.
    pub interrupted: bool,
    pub timestamp: DateTime<Utc>,
}

impl StageResult {
    pub fn pending<S: Into<String>>(stage: StageKind, language: S) -> Self {
        Self {
            stage,
            language: language.into(),
            status: StageStatus::Pending,
            artifacts: Vec::new(),
            error: None,
            skip_reason: None,
            attempts: 0,
            interrupted: false,
            timestamp: Utc::now(),
        }
    }

    pub fn succeed(mut self, artifacts: Vec<PathBuf>, attempts: u32) -> Self {
        debug_assert_eq!(self.status, StageStatus::Pending);
        self.status = StageStatus::Succeeded;
        self.artifacts = artifacts;
        self.attempts = attempts;
        self.timestamp = Utc::now();
        self
    }

    pub fn fail(mut self, error: StageError) -> Self {
        debug_assert_eq!(self.status, StageStatus::Pending);
        self.status = StageStatus::Failed;
        self.attempts = error.attempts;
        self.error = Some(error);
        self.timestamp = Utc::now();
        self
    }

    pub fn skip<S: Into<String>>(mut self, reason: S) -> Self {
        debug_assert_eq!(self.status, StageStatus::Pending);
        self.status = StageStatus::Skipped;
        self.skip_reason = Some(reason.into());
        self.timestamp = Utc::now();
        self
    }

    /// Leave the stage pending, marking it as abandoned.
    pub fn interrupt(mut self, attempts: u32) -> Self {
        debug_assert_eq!(self.status, StageStatus::Pending);
        self.interrupted = true;
        self.attempts = attempts;
        self.timestamp = Utc::now();
        self
    }

    pub fn succeeded(&self) -> bool {
        self.status == StageStatus::Succeeded
    }

    pub fn failed(&self) -> bool {
        self.status == StageStatus::Failed
    }
}

/// Progress of one (job, language) chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainState {
    Pending,
    Transcribing,
    Translating,
    Captioning,
    Muxing,
    Done,
    Failed,
    Skipped,
}

impl ChainState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Skipped)
    }

    /// The state that follows `self` when the current stage succeeds.
    pub fn next(&self) -> Option<ChainState> {
        match self {
            Self::Pending => Some(Self::Transcribing),
            Self::Transcribing => Some(Self::Translating),
            Self::Translating => Some(Self::Captioning),
            Self::Captioning => Some(Self::Muxing),
            Self::Muxing => Some(Self::Done),
            Self::Done | Self::Failed | Self::Skipped => None,
        }
    }

    /// Move to `to` if the transition is legal.
    pub fn advance(&mut self, to: ChainState) -> Result<(), InvalidTransition> {
        let legal = match (*self, to) {
            (Self::Pending, Self::Skipped) => true,
            (from, Self::Failed) => !from.is_terminal() && from != Self::Pending,
            (from, to) => from.next() == Some(to),
        };

        if legal {
            *self = to;
            Ok(())
        } else {
            Err(InvalidTransition { from: *self, to })
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Transcribing => "transcribing",
            Self::Translating => "translating",
            Self::Captioning => "captioning",
            Self::Muxing => "muxing",
            Self::Done => "done",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

impl std::fmt::Display for ChainState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("illegal chain transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: ChainState,
    pub to: ChainState,
}
