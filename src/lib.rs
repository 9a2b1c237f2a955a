//! videotool - batch subtitle translation pipeline
//!
//! Takes a video file or a directory of videos and runs each one through
//! audio extraction, transcription with whisper, translation with Claude or a
//! local ollama model, SRT generation and soft-subtitle muxing with ffmpeg.
//! Finished stages are kept in a ledger so interrupted batches can resume.

pub mod cli;
pub mod config;
pub mod error;
pub mod executor;
pub mod language;
pub mod ledger;
pub mod logging;
pub mod media;
pub mod stage;
pub mod subtitle;
pub mod summary;
pub mod transcribe;
pub mod translate;
pub mod workflow;
