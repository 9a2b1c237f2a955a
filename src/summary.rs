//! End-of-run reporting.

use chrono::{DateTime, TimeDelta, Utc};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::error::ErrorClass;
use crate::stage::{ChainState, StageError, StageKind, StageResult, StageStatus};

/// Process exit status when the run was interrupted.
pub const EXIT_INTERRUPTED: u8 = 130;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Succeeded,
    Failed,
    Skipped,
    Interrupted,
    NotStarted,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
            Self::Interrupted => "interrupted",
            Self::NotStarted => "not started",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One target language of one job.
#[derive(Debug, Clone)]
pub struct LanguageOutcome {
    pub language: String,
    pub state: ChainState,
    pub stages: Vec<StageResult>,
    /// Muxed video, when the chain got that far or was already complete.
    pub output: Option<PathBuf>,
}

impl LanguageOutcome {
    pub fn new<S: Into<String>>(language: S) -> Self {
        Self {
            language: language.into(),
            state: ChainState::Pending,
            stages: Vec::new(),
            output: None,
        }
    }

    /// Move the chain forward. Illegal moves are logged and ignored.
    pub fn advance(&mut self, to: ChainState) {
        if let Err(e) = self.state.advance(to) {
            warn!("[{}] {}", self.language, e);
        }
    }

    pub fn error(&self) -> Option<&StageError> {
        self.stages.iter().find_map(|stage| stage.error.as_ref())
    }

    pub fn interrupted(&self) -> bool {
        self.stages.iter().any(|stage| stage.interrupted)
    }
}

/// Everything that happened to one source video.
#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub source: PathBuf,
    /// Stages shared by all languages: transcription and the source caption.
    pub stages: Vec<StageResult>,
    pub languages: Vec<LanguageOutcome>,
    /// Failure before any stage could run (unreadable source, output
    /// directory not writable).
    pub error: Option<StageError>,
    pub started: bool,
}

impl JobOutcome {
    pub fn new(source: PathBuf) -> Self {
        Self {
            source,
            stages: Vec::new(),
            languages: Vec::new(),
            error: None,
            started: true,
        }
    }

    pub fn not_started(source: PathBuf) -> Self {
        Self {
            started: false,
            ..Self::new(source)
        }
    }

    pub fn failed(source: PathBuf, message: String) -> Self {
        Self {
            error: Some(StageError {
                class: ErrorClass::Permanent,
                message,
                attempts: 0,
            }),
            ..Self::new(source)
        }
    }

    pub fn all_stages(&self) -> impl Iterator<Item = &StageResult> {
        self.stages
            .iter()
            .chain(self.languages.iter().flat_map(|chain| chain.stages.iter()))
    }

    pub fn status(&self) -> JobStatus {
        if !self.started {
            return JobStatus::NotStarted;
        }
        if self.error.is_some()
            || self.all_stages().any(|s| s.failed())
            || self.languages.iter().any(|c| c.state == ChainState::Failed)
        {
            return JobStatus::Failed;
        }
        if self.all_stages().any(|s| s.interrupted)
            || self.languages.iter().any(|c| !c.state.is_terminal())
        {
            return JobStatus::Interrupted;
        }
        if self.all_stages().next().is_some()
            && self.all_stages().all(|s| s.status == StageStatus::Skipped)
        {
            return JobStatus::Skipped;
        }
        JobStatus::Succeeded
    }

    /// Error shown for a language whose chain failed: its own stage error,
    /// else whatever failed the shared stages.
    fn language_error<'a>(&'a self, chain: &'a LanguageOutcome) -> Option<&'a StageError> {
        chain
            .error()
            .or_else(|| self.stages.iter().find_map(|s| s.error.as_ref()))
            .or(self.error.as_ref())
    }

    fn shared_artifact(&self) -> Option<&Path> {
        self.stages
            .iter()
            .filter(|s| s.stage == StageKind::Caption)
            .flat_map(|s| s.artifacts.iter())
            .next()
            .map(PathBuf::as_path)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageCounts {
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub pending: usize,
}

impl StageCounts {
    fn add(&mut self, status: StageStatus) {
        match status {
            StageStatus::Succeeded => self.succeeded += 1,
            StageStatus::Failed => self.failed += 1,
            StageStatus::Skipped => self.skipped += 1,
            StageStatus::Pending => self.pending += 1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    /// Jobs in discovery order.
    pub jobs: Vec<JobOutcome>,
    pub interrupted: bool,
    pub started: DateTime<Utc>,
    pub finished: DateTime<Utc>,
}

impl RunSummary {
    pub fn new(jobs: Vec<JobOutcome>, interrupted: bool) -> Self {
        let now = Utc::now();
        Self {
            jobs,
            interrupted,
            started: now,
            finished: now,
        }
    }

    pub fn with_timing(mut self, started: DateTime<Utc>, finished: DateTime<Utc>) -> Self {
        self.started = started;
        self.finished = finished;
        self
    }

    /// Wall time of the whole run.
    pub fn elapsed(&self) -> TimeDelta {
        (self.finished - self.started).max(TimeDelta::zero())
    }

    /// Wall time divided over the videos that completed successfully.
    pub fn average_per_video(&self) -> Option<TimeDelta> {
        let completed = self.count(JobStatus::Succeeded);
        if completed == 0 {
            return None;
        }
        Some(TimeDelta::milliseconds(
            self.elapsed().num_milliseconds() / completed as i64,
        ))
    }

    pub fn stage_counts(&self) -> BTreeMap<StageKind, StageCounts> {
        let mut counts: BTreeMap<StageKind, StageCounts> = StageKind::ALL
            .iter()
            .map(|kind| (*kind, StageCounts::default()))
            .collect();
        for stage in self.jobs.iter().flat_map(|job| job.all_stages()) {
            counts.entry(stage.stage).or_default().add(stage.status);
        }
        counts
    }

    pub fn count(&self, status: JobStatus) -> usize {
        self.jobs.iter().filter(|job| job.status() == status).count()
    }

    pub fn has_failures(&self) -> bool {
        self.count(JobStatus::Failed) > 0
    }

    pub fn exit_code(&self) -> u8 {
        if self.interrupted {
            EXIT_INTERRUPTED
        } else if self.has_failures() {
            1
        } else {
            0
        }
    }

    pub fn render(&self) -> String {
        let mut out = String::new();

        out.push_str("\nRun Summary:\n");
        out.push_str(&format!(
            "{:<12} {:<10} {:<8} {:<8} {:<8}\n",
            "Stage", "Succeeded", "Failed", "Skipped", "Pending"
        ));
        out.push_str(&format!("{}\n", "-".repeat(50)));
        for (kind, counts) in self.stage_counts() {
            out.push_str(&format!(
                "{:<12} {:<10} {:<8} {:<8} {:<8}\n",
                kind.as_str(),
                counts.succeeded,
                counts.failed,
                counts.skipped,
                counts.pending
            ));
        }

        out.push_str(&format!(
            "\nJobs: {} total, {} succeeded, {} failed, {} skipped",
            self.jobs.len(),
            self.count(JobStatus::Succeeded),
            self.count(JobStatus::Failed),
            self.count(JobStatus::Skipped)
        ));
        let unfinished = self.count(JobStatus::Interrupted) + self.count(JobStatus::NotStarted);
        if unfinished > 0 {
            out.push_str(&format!(", {} not finished", unfinished));
        }
        out.push('\n');

        out.push_str(&format!("Total time: {}", format_elapsed(self.elapsed())));
        if let Some(average) = self.average_per_video() {
            out.push_str(&format!(", {} per completed video", format_elapsed(average)));
        }
        out.push('\n');

        if self.jobs.is_empty() {
            return out;
        }

        out.push_str(&format!(
            "\n{:<40} {:<10} {:<12} {}\n",
            "File", "Language", "Status", "Detail"
        ));
        out.push_str(&format!("{}\n", "-".repeat(100)));
        for job in &self.jobs {
            let file = job
                .source
                .file_name()
                .unwrap_or_default()
                .to_string_lossy()
                .to_string();

            if job.languages.is_empty() {
                let status = job.status();
                let detail = match status {
                    JobStatus::Failed => job
                        .stages
                        .iter()
                        .find_map(|s| s.error.as_ref())
                        .or(job.error.as_ref())
                        .map(|e| e.to_string())
                        .unwrap_or_default(),
                    _ => job
                        .shared_artifact()
                        .map(|p| p.display().to_string())
                        .unwrap_or_default(),
                };
                out.push_str(&format!("{:<40} {:<10} {:<12} {}\n", file, "-", status, detail));
                continue;
            }

            for chain in &job.languages {
                let (status, detail) = match chain.state {
                    ChainState::Done | ChainState::Skipped => (
                        if chain.state == ChainState::Done { "succeeded" } else { "skipped" },
                        chain
                            .output
                            .as_ref()
                            .map(|p| p.display().to_string())
                            .unwrap_or_default(),
                    ),
                    ChainState::Failed => (
                        "failed",
                        job.language_error(chain)
                            .map(|e| e.to_string())
                            .unwrap_or_default(),
                    ),
                    _ if !job.started => ("not started", String::new()),
                    _ => ("interrupted", format!("stopped while {}", chain.state)),
                };
                out.push_str(&format!(
                    "{:<40} {:<10} {:<12} {}\n",
                    file, chain.language, status, detail
                ));
            }
        }

        out
    }

    pub fn print(&self) {
        println!("{}", self.render());
    }
}

fn format_elapsed(delta: TimeDelta) -> String {
    let millis = delta.num_milliseconds().max(0);
    if millis < 60_000 {
        return format!("{:.1}s", millis as f64 / 1000.0);
    }
    let secs = millis / 1000;
    if secs < 3600 {
        format!("{}m {:02}s", secs / 60, secs % 60)
    } else {
        format!("{}h {:02}m {:02}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn done_chain(language: &str) -> LanguageOutcome {
        let mut chain = LanguageOutcome::new(language);
        for state in [
            ChainState::Transcribing,
            ChainState::Translating,
            ChainState::Captioning,
            ChainState::Muxing,
            ChainState::Done,
        ] {
            chain.advance(state);
        }
        chain.stages = vec![
            StageResult::pending(StageKind::Translate, language).succeed(vec![], 1),
            StageResult::pending(StageKind::Caption, language).succeed(vec![], 1),
            StageResult::pending(StageKind::Mux, language).succeed(vec![], 1),
        ];
        chain.output = Some(PathBuf::from(format!("Avatar_{}.mp4", language)));
        chain
    }

    fn transcribed(source: &str) -> JobOutcome {
        let mut job = JobOutcome::new(PathBuf::from(source));
        job.stages = vec![
            StageResult::pending(StageKind::Transcribe, "en").succeed(vec![], 1),
            StageResult::pending(StageKind::Caption, "en").succeed(vec![], 1),
        ];
        job
    }

    #[test]
    fn test_job_status_from_stages() {
        let mut ok = transcribed("a.mp4");
        ok.languages.push(done_chain("my"));
        assert_eq!(ok.status(), JobStatus::Succeeded);

        let mut broken = JobOutcome::new(PathBuf::from("b.mp4"));
        broken.stages.push(StageResult::pending(StageKind::Transcribe, "en").fail(StageError {
            class: ErrorClass::Permanent,
            message: "no audio stream".into(),
            attempts: 1,
        }));
        assert_eq!(broken.status(), JobStatus::Failed);

        let mut halfway = transcribed("c.mp4");
        let mut chain = LanguageOutcome::new("th");
        chain.advance(ChainState::Transcribing);
        chain.advance(ChainState::Translating);
        chain
            .stages
            .push(StageResult::pending(StageKind::Translate, "th").interrupt(1));
        halfway.languages.push(chain);
        assert_eq!(halfway.status(), JobStatus::Interrupted);

        assert_eq!(
            JobOutcome::not_started(PathBuf::from("d.mp4")).status(),
            JobStatus::NotStarted
        );
    }

    #[test]
    fn test_all_skipped_job_is_skipped() {
        let mut job = JobOutcome::new(PathBuf::from("a.mp4"));
        job.stages = vec![
            StageResult::pending(StageKind::Transcribe, "en").skip("already completed"),
            StageResult::pending(StageKind::Caption, "en").skip("already completed"),
        ];
        let mut chain = LanguageOutcome::new("my");
        chain.advance(ChainState::Skipped);
        chain.stages = vec![StageResult::pending(StageKind::Mux, "my").skip("already completed")];
        job.languages.push(chain);

        assert_eq!(job.status(), JobStatus::Skipped);
    }

    #[test]
    fn test_counts_and_exit_code() {
        let mut first = transcribed("a.mp4");
        first.languages.push(done_chain("my"));
        let failed = JobOutcome::failed(PathBuf::from("b.mp4"), "unreadable".into());
        let mut third = transcribed("c.mp4");
        third.languages.push(done_chain("my"));

        let summary = RunSummary::new(vec![first, failed, third], false);
        assert_eq!(summary.count(JobStatus::Succeeded), 2);
        assert_eq!(summary.count(JobStatus::Failed), 1);
        assert_eq!(summary.exit_code(), 1);

        let counts = summary.stage_counts();
        assert_eq!(counts[&StageKind::Transcribe].succeeded, 2);
        assert_eq!(counts[&StageKind::Caption].succeeded, 4);
        assert_eq!(counts[&StageKind::Mux].succeeded, 2);

        let rendered = summary.render();
        assert!(rendered.contains("3 total, 2 succeeded, 1 failed"));
        assert!(rendered.contains("[permanent] unreadable"));
    }

    #[test]
    fn test_interrupt_wins_exit_code() {
        let summary = RunSummary::new(
            vec![JobOutcome::failed(PathBuf::from("a.mp4"), "boom".into())],
            true,
        );
        assert_eq!(summary.exit_code(), EXIT_INTERRUPTED);
        assert_eq!(RunSummary::new(vec![], false).exit_code(), 0);
    }

    #[test]
    fn test_timing_is_reported() {
        let mut first = transcribed("a.mp4");
        first.languages.push(done_chain("my"));
        let mut second = transcribed("b.mp4");
        second.languages.push(done_chain("th"));
        let failed = JobOutcome::failed(PathBuf::from("c.mp4"), "unreadable".into());

        let started = Utc::now();
        let summary = RunSummary::new(vec![first, second, failed], false)
            .with_timing(started, started + TimeDelta::seconds(125));

        assert_eq!(summary.elapsed(), TimeDelta::seconds(125));
        assert_eq!(summary.average_per_video(), Some(TimeDelta::milliseconds(62_500)));
        let rendered = summary.render();
        assert!(rendered.contains("Total time: 2m 05s, 1m 02s per completed video"));

        let nothing_done = RunSummary::new(vec![], false).with_timing(started, started);
        assert_eq!(nothing_done.average_per_video(), None);
        assert!(nothing_done.render().contains("Total time: 0.0s\n"));
    }

    #[test]
    fn test_format_elapsed() {
        assert_eq!(format_elapsed(TimeDelta::milliseconds(4_300)), "4.3s");
        assert_eq!(format_elapsed(TimeDelta::seconds(3_725)), "1h 02m 05s");
    }
}
