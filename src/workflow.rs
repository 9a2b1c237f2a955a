//! Batch orchestration.
//!
//! A run discovers the input videos, turns each one into a [`Job`] and works
//! through the jobs on a bounded pool. Inside a job the source audio is
//! transcribed once; after that every target language runs its own
//! translate, caption and mux chain concurrently with the others.

use chrono::Utc;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::fs;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use crate::config::{PipelineSettings, WhisperModel};
use crate::error::{ErrorClass, Result, VideoToolError};
use crate::executor::{Shutdown, StageContext, StageExecutor, StageOutput, StageRun};
use crate::ledger::{FileId, JobLedger};
use crate::media::{muxed_extension, Muxer, PARTIAL_PREFIX};
use crate::stage::{ChainState, StageError, StageKind, StageResult};
use crate::subtitle::{read_srt, CaptionWriter, Segment, Transcript};
use crate::summary::{JobOutcome, JobStatus, LanguageOutcome, RunSummary};
use crate::transcribe::Transcriber;
use crate::translate::Translator;

/// Container formats picked up by discovery, compared case-insensitively.
pub const VIDEO_EXTENSIONS: [&str; 6] = ["mp4", "mkv", "avi", "mov", "m4v", "webm"];

const ALREADY_COMPLETED: &str = "already completed";
const SOURCE_LANGUAGE: &str = "source language";

/// The external collaborators a run talks to.
#[derive(Clone)]
pub struct Adapters {
    pub transcriber: Arc<dyn Transcriber>,
    pub translator: Arc<dyn Translator>,
    pub captions: Arc<dyn CaptionWriter>,
    pub muxer: Arc<dyn Muxer>,
}

/// One source video and the languages requested for it.
#[derive(Debug, Clone)]
pub struct Job {
    pub source: PathBuf,
    pub source_language: String,
    pub target_languages: Vec<String>,
    pub model: WhisperModel,
    pub output_dir: PathBuf,
}

impl Job {
    pub fn base_name(&self) -> String {
        self.source
            .file_stem()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string()
    }

    /// `<basename>_<lang>.srt`
    pub fn caption_path(&self, language: &str) -> PathBuf {
        self.output_dir
            .join(format!("{}_{}.srt", self.base_name(), language))
    }

    /// `<basename>_<lang>.<ext>`, keeping the source container when it can
    /// carry a subtitle track.
    pub fn video_path(&self, language: &str) -> PathBuf {
        self.output_dir.join(format!(
            "{}_{}.{}",
            self.base_name(),
            language,
            muxed_extension(&self.source)
        ))
    }
}

fn is_video(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| VIDEO_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
}

/// A mux that never finished, left behind by a killed run.
fn is_partial_output(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with(PARTIAL_PREFIX))
}

/// `<stem>_<lang>.<ext>` sitting next to a `<stem>.*` source that muxes into
/// `.<ext>` was produced by an earlier run.
fn is_generated_output(path: &Path, languages: &[String]) -> bool {
    let (Some(stem), Some(ext)) = (
        path.file_stem().and_then(|s| s.to_str()),
        path.extension().and_then(|e| e.to_str()),
    ) else {
        return false;
    };
    let Some((base, language)) = stem.rsplit_once('_') else {
        return false;
    };
    if base.is_empty() || !languages.iter().any(|l| l == language) {
        return false;
    }
    let source = |source_ext: &str| path.with_file_name(format!("{}.{}", base, source_ext));
    source(ext).exists()
        || VIDEO_EXTENSIONS.iter().map(|e| source(*e)).any(|candidate| {
            candidate.exists() && muxed_extension(&candidate).eq_ignore_ascii_case(ext)
        })
}

/// Video files under `input`, sorted by path. A file input is returned as is.
pub fn discover_videos(input: &Path, recursive: bool, languages: &[String]) -> Result<Vec<PathBuf>> {
    if !input.exists() {
        return Err(VideoToolError::FileNotFound(input.display().to_string()));
    }

    if input.is_file() {
        if !is_video(input) {
            return Err(VideoToolError::UnsupportedFormat(format!(
                "{} is not a supported video file ({})",
                input.display(),
                VIDEO_EXTENSIONS.join(", ")
            )));
        }
        return Ok(vec![input.to_path_buf()]);
    }

    let max_depth = if recursive { usize::MAX } else { 1 };
    let mut videos: Vec<PathBuf> = WalkDir::new(input)
        .max_depth(max_depth)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("Skipping unreadable directory entry: {}", e);
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| is_video(path))
        .filter(|path| {
            let partial = is_partial_output(path);
            if partial {
                warn!("Ignoring unfinished mux output {}", path.display());
            }
            !partial
        })
        .filter(|path| {
            let generated = is_generated_output(path, languages);
            if generated {
                debug!("Ignoring generated output {}", path.display());
            }
            !generated
        })
        .collect();

    videos.sort();
    Ok(videos)
}

/// Where the ledger for a run over `input` lives: the output directory if one
/// was given, else the input directory (or the input file's directory).
pub fn ledger_path(settings: &PipelineSettings, input: &Path) -> PathBuf {
    let root = match &settings.output_dir {
        Some(dir) => dir.clone(),
        None if input.is_dir() => input.to_path_buf(),
        None => parent_dir(input),
    };
    root.join(&settings.ledger_file)
}

fn parent_dir(path: &Path) -> PathBuf {
    path.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Why a stage produced no value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stopped {
    Failed,
    Interrupted,
}

/// Shared transcript of one job.
enum SourceTranscript {
    Ready(Arc<Vec<Segment>>),
    /// Every chain was already complete.
    NotNeeded,
    Stopped(Stopped),
}

pub struct Workflow {
    settings: Arc<PipelineSettings>,
    adapters: Adapters,
    executor: StageExecutor,
}

impl Workflow {
    pub fn new(
        settings: Arc<PipelineSettings>,
        adapters: Adapters,
        ledger: Arc<JobLedger>,
        shutdown: Shutdown,
    ) -> Self {
        let executor = StageExecutor::new(ledger, settings.retry.clone(), shutdown);
        Self {
            settings,
            adapters,
            executor,
        }
    }

    pub fn ledger(&self) -> &Arc<JobLedger> {
        self.executor.ledger()
    }

    /// Discover the input and build one job per video.
    pub fn plan(&self, input: &Path) -> Result<Vec<Job>> {
        let mut languages = vec![self.settings.source_language.clone()];
        languages.extend(self.settings.target_languages.iter().cloned());

        let videos = discover_videos(input, self.settings.recursive, &languages)?;
        Ok(videos
            .into_iter()
            .map(|source| Job {
                output_dir: self.output_dir_for(&source, input),
                source,
                source_language: self.settings.source_language.clone(),
                target_languages: self.settings.target_languages.clone(),
                model: self.settings.model,
            })
            .collect())
    }

    fn output_dir_for(&self, source: &Path, input_root: &Path) -> PathBuf {
        let source_dir = parent_dir(source);
        match &self.settings.output_dir {
            None => source_dir,
            // Mirror the input tree so equal names in different folders never collide.
            Some(out) if self.settings.recursive && input_root.is_dir() => {
                match pathdiff::diff_paths(&source_dir, input_root) {
                    Some(relative) if !relative.as_os_str().is_empty() => out.join(relative),
                    _ => out.clone(),
                }
            }
            Some(out) => out.clone(),
        }
    }

    fn progress_bar(&self, input: &Path, total: usize) -> ProgressBar {
        if !self.settings.show_progress || !input.is_dir() {
            return ProgressBar::hidden();
        }

        let progress = ProgressBar::new(total as u64);
        if let Ok(style) = ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} videos",
        ) {
            progress.set_style(style.progress_chars("#>-"));
        }
        progress
    }

    /// Process every video under `input` and report what happened. Only
    /// discovery errors are returned; stage failures end up in the summary.
    pub async fn run(self: &Arc<Self>, input: &Path) -> Result<RunSummary> {
        let started = Utc::now();
        let jobs = self.plan(input)?;
        info!("Found {} video files to process", jobs.len());

        let progress = self.progress_bar(input, jobs.len());
        let semaphore = Arc::new(Semaphore::new(self.settings.jobs.max(1)));
        let halt = Arc::new(AtomicBool::new(false));
        let mut shutdown = self.executor.shutdown().clone();

        let sources: Vec<PathBuf> = jobs.iter().map(|job| job.source.clone()).collect();
        let mut outcomes: Vec<Option<JobOutcome>> = sources.iter().map(|_| None).collect();
        let mut launched = vec![false; sources.len()];
        let mut workers = JoinSet::new();

        for (index, job) in jobs.into_iter().enumerate() {
            let permit = tokio::select! {
                biased;
                _ = shutdown.wait() => None,
                permit = Arc::clone(&semaphore).acquire_owned() => permit.ok(),
            };
            let Some(permit) = permit else {
                info!("Interrupted, not starting remaining videos");
                break;
            };
            if halt.load(Ordering::SeqCst) {
                warn!("Stopping after failure, not starting remaining videos");
                break;
            }

            launched[index] = true;
            let workflow = Arc::clone(self);
            let halt = Arc::clone(&halt);
            let progress = progress.clone();
            workers.spawn(async move {
                let outcome = workflow.process_job(&job).await;
                if workflow.settings.stop_on_error && outcome.status() == JobStatus::Failed {
                    halt.store(true, Ordering::SeqCst);
                }
                progress.inc(1);
                drop(permit);
                (index, outcome)
            });
        }

        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok((index, outcome)) => outcomes[index] = Some(outcome),
                Err(e) => error!("Job task failed: {}", e),
            }
        }
        progress.finish_and_clear();

        let jobs = outcomes
            .into_iter()
            .zip(sources)
            .zip(launched)
            .map(|((outcome, source), launched)| match outcome {
                Some(outcome) => outcome,
                None if launched => JobOutcome::failed(source, "job task panicked".to_string()),
                None => JobOutcome::not_started(source),
            })
            .collect();

        Ok(RunSummary::new(jobs, self.executor.shutdown().is_triggered())
            .with_timing(started, Utc::now()))
    }

    async fn process_job(self: &Arc<Self>, job: &Job) -> JobOutcome {
        info!("Processing video file: {}", job.source.display());
        let mut outcome = JobOutcome::new(job.source.clone());

        let file_id = match FileId::from_path(&job.source) {
            Ok(id) => id,
            Err(e) => {
                warn!("Cannot identify {}: {}", job.source.display(), e);
                outcome.error = Some(StageError::from_error(&e, 0));
                return outcome;
            }
        };
        if let Err(e) = fs::create_dir_all(&job.output_dir).await {
            warn!("Cannot create {}: {}", job.output_dir.display(), e);
            outcome.error = Some(StageError::from_error(&e.into(), 0));
            return outcome;
        }

        let mut languages: Vec<LanguageOutcome> = job
            .target_languages
            .iter()
            .map(LanguageOutcome::new)
            .collect();
        let mut remaining = Vec::new();
        for (index, chain) in languages.iter_mut().enumerate() {
            if self.chain_complete(&file_id, job, &chain.language) {
                info!("Skipping {} [{}]: already muxed", job.source.display(), chain.language);
                chain.advance(ChainState::Skipped);
                chain.output = Some(job.video_path(&chain.language));
                for stage in [StageKind::Translate, StageKind::Caption, StageKind::Mux] {
                    chain
                        .stages
                        .push(StageResult::pending(stage, chain.language.clone()).skip(ALREADY_COMPLETED));
                }
            } else {
                remaining.push(index);
            }
        }

        let (stages, transcript) = self
            .transcribe_source(job, &file_id, !remaining.is_empty())
            .await;
        outcome.stages = stages;

        match transcript {
            SourceTranscript::Ready(segments) => {
                let mut chains = JoinSet::new();
                for index in remaining {
                    let workflow = Arc::clone(self);
                    let job = job.clone();
                    let file_id = file_id.clone();
                    let segments = Arc::clone(&segments);
                    let language = languages[index].language.clone();
                    chains.spawn(async move {
                        let chain = workflow.run_chain(&job, &file_id, language, &segments).await;
                        (index, chain)
                    });
                }
                while let Some(joined) = chains.join_next().await {
                    match joined {
                        Ok((index, chain)) => languages[index] = chain,
                        Err(e) => {
                            error!("Language chain for {} failed: {}", job.source.display(), e);
                            if outcome.error.is_none() {
                                outcome.error = Some(StageError {
                                    class: ErrorClass::Permanent,
                                    message: format!("language chain panicked: {}", e),
                                    attempts: 0,
                                });
                            }
                        }
                    }
                }
            }
            SourceTranscript::Stopped(Stopped::Failed) => {
                for index in remaining {
                    let chain = &mut languages[index];
                    chain.advance(ChainState::Transcribing);
                    chain.advance(ChainState::Failed);
                }
            }
            SourceTranscript::NotNeeded | SourceTranscript::Stopped(Stopped::Interrupted) => {}
        }

        outcome.languages = languages;
        info!("Finished {}: {}", job.source.display(), outcome.status());
        outcome
    }

    fn chain_complete(&self, file_id: &FileId, job: &Job, language: &str) -> bool {
        self.settings.skip_existing
            && self
                .executor
                .ledger()
                .has_succeeded(file_id, language, StageKind::Mux)
            && job.video_path(language).exists()
    }

    /// Transcribe once and write `<basename>_<source>.srt`. With skip-existing
    /// a previous transcript on disk is reused instead.
    async fn transcribe_source(
        &self,
        job: &Job,
        file_id: &FileId,
        needed: bool,
    ) -> (Vec<StageResult>, SourceTranscript) {
        let source = job.source_language.as_str();
        let caption_path = job.caption_path(source);
        let ledger = self.executor.ledger();

        let resumable = self.settings.skip_existing
            && ledger.has_succeeded(file_id, source, StageKind::Transcribe)
            && ledger.has_succeeded(file_id, source, StageKind::Caption)
            && caption_path.exists();
        if resumable {
            let reused = || {
                let mut caption = StageResult::pending(StageKind::Caption, source).skip(ALREADY_COMPLETED);
                caption.artifacts = vec![caption_path.clone()];
                vec![
                    StageResult::pending(StageKind::Transcribe, source).skip(ALREADY_COMPLETED),
                    caption,
                ]
            };
            if !needed {
                return (reused(), SourceTranscript::NotNeeded);
            }
            match read_srt(&caption_path).await {
                Ok(segments) => {
                    info!("Reusing transcript {}", caption_path.display());
                    return (reused(), SourceTranscript::Ready(Arc::new(segments)));
                }
                Err(e) => warn!(
                    "Cannot reuse {}: {}, transcribing again",
                    caption_path.display(),
                    e
                ),
            }
        }

        let mut results = Vec::new();

        let ctx = StageContext::new(file_id, source, StageKind::Transcribe);
        let this = self;
        let run = self
            .executor
            .run(&ctx, move || this.transcribe_attempt(job))
            .await;
        let transcript = match settle(&mut results, run) {
            Ok(transcript) => transcript,
            Err(stopped) => return (results, SourceTranscript::Stopped(stopped)),
        };
        info!(
            "Transcribed {} segments from {}",
            transcript.segments.len(),
            job.source.display()
        );

        let ctx = StageContext::new(file_id, source, StageKind::Caption);
        let segments = transcript.segments.as_slice();
        let path = caption_path.as_path();
        let run = self
            .executor
            .run(&ctx, move || this.caption_attempt(segments, path))
            .await;
        if let Err(stopped) = settle(&mut results, run) {
            return (results, SourceTranscript::Stopped(stopped));
        }

        (results, SourceTranscript::Ready(Arc::new(transcript.segments)))
    }

    /// Extract audio into a scratch directory and run the transcriber on it.
    async fn transcribe_attempt(&self, job: &Job) -> Result<StageOutput<Transcript>> {
        let workdir = tempfile::Builder::new()
            .prefix("videotool-audio-")
            .tempdir()?;
        let audio_path = workdir.path().join(format!("{}.wav", job.base_name()));

        self.adapters
            .muxer
            .extract_audio(&job.source, &audio_path)
            .await?;
        let transcript = self
            .adapters
            .transcriber
            .transcribe(&audio_path, &job.source_language, job.model.as_str())
            .await?;

        Ok(StageOutput::new(transcript, Vec::new()))
    }

    async fn caption_attempt(&self, segments: &[Segment], path: &Path) -> Result<StageOutput<PathBuf>> {
        let written = self.adapters.captions.write_captions(segments, path).await?;
        Ok(StageOutput::new(written.clone(), vec![written]))
    }

    async fn translate_attempt(
        &self,
        segments: &[Segment],
        source_lang: &str,
        target_lang: &str,
    ) -> Result<StageOutput<Vec<Segment>>> {
        let translated = self
            .adapters
            .translator
            .translate(segments, source_lang, target_lang)
            .await?;
        Ok(StageOutput::new(translated, Vec::new()))
    }

    async fn mux_attempt(
        &self,
        video: &Path,
        subtitle: &Path,
        output: &Path,
        language: &str,
    ) -> Result<StageOutput<PathBuf>> {
        let muxed = self
            .adapters
            .muxer
            .embed_subtitles(video, subtitle, output, language)
            .await?;
        Ok(StageOutput::new(muxed.clone(), vec![muxed]))
    }

    /// translate → caption → mux for one language, on top of the shared
    /// transcript.
    async fn run_chain(
        &self,
        job: &Job,
        file_id: &FileId,
        language: String,
        segments: &[Segment],
    ) -> LanguageOutcome {
        let mut chain = LanguageOutcome::new(language.clone());
        let lang = language.as_str();
        let source = job.source_language.as_str();
        let caption_path = job.caption_path(lang);
        let this = self;

        // Transcription already happened for the whole job.
        chain.advance(ChainState::Transcribing);
        chain.advance(ChainState::Translating);

        let bypass = lang == source;
        let reuse_caption = !bypass
            && self.settings.skip_existing
            && self
                .executor
                .ledger()
                .has_succeeded(file_id, lang, StageKind::Caption)
            && caption_path.exists();

        if bypass || reuse_caption {
            let reason = if bypass { SOURCE_LANGUAGE } else { ALREADY_COMPLETED };
            if reuse_caption {
                info!("Reusing captions {}", caption_path.display());
            }
            chain
                .stages
                .push(StageResult::pending(StageKind::Translate, lang).skip(reason));
            chain.advance(ChainState::Captioning);
            let mut caption = StageResult::pending(StageKind::Caption, lang).skip(reason);
            caption.artifacts = vec![caption_path.clone()];
            chain.stages.push(caption);
        } else {
            let ctx = StageContext::new(file_id, lang, StageKind::Translate);
            let run = self
                .executor
                .run(&ctx, move || this.translate_attempt(segments, source, lang))
                .await;
            let translated = match settle(&mut chain.stages, run) {
                Ok(translated) => translated,
                Err(stopped) => return stop(chain, stopped),
            };

            chain.advance(ChainState::Captioning);
            let ctx = StageContext::new(file_id, lang, StageKind::Caption);
            let translated = translated.as_slice();
            let path = caption_path.as_path();
            let run = self
                .executor
                .run(&ctx, move || this.caption_attempt(translated, path))
                .await;
            if let Err(stopped) = settle(&mut chain.stages, run) {
                return stop(chain, stopped);
            }
        }

        chain.advance(ChainState::Muxing);
        let ctx = StageContext::new(file_id, lang, StageKind::Mux);
        let output = job.video_path(lang);
        let (video, subtitle, target) = (job.source.as_path(), caption_path.as_path(), output.as_path());
        let run = self
            .executor
            .run(&ctx, move || this.mux_attempt(video, subtitle, target, lang))
            .await;
        match settle(&mut chain.stages, run) {
            Ok(muxed) => {
                chain.output = Some(muxed);
                chain.advance(ChainState::Done);
                chain
            }
            Err(stopped) => stop(chain, stopped),
        }
    }
}

/// Keep the stage result and hand back the value of a succeeded stage.
fn settle<T>(results: &mut Vec<StageResult>, run: StageRun<T>) -> std::result::Result<T, Stopped> {
    let stopped = if run.result.failed() {
        Stopped::Failed
    } else {
        Stopped::Interrupted
    };
    results.push(run.result);
    run.value.ok_or(stopped)
}

fn stop(mut chain: LanguageOutcome, stopped: Stopped) -> LanguageOutcome {
    if stopped == Stopped::Failed {
        chain.advance(ChainState::Failed);
    }
    chain
}
