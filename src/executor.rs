//! Runs one adapter call as a pipeline stage.
//!
//! Each attempt is bounded by a timeout. Transient failures are retried with
//! exponential backoff until the attempt budget runs out; anything else fails
//! the stage at once. The caller always gets a [`StageResult`] back, and every
//! terminal result is written to the ledger before it is returned.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::{ErrorClass, Result, VideoToolError};
use crate::ledger::{FileId, JobLedger, LedgerEntry};
use crate::stage::{StageError, StageKind, StageResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Upper bound for a single attempt.
    pub timeout: Duration,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            timeout: Duration::from_secs(3600),
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay before the attempt that follows `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Fires once when the user asks the run to stop.
#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

impl ShutdownTrigger {
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    /// Trigger on the first signal from `next_signal`. Resolves to `true` if
    /// a second signal follows, i.e. the user wants out without waiting.
    pub async fn forward_signals<F, Fut>(self, mut next_signal: F) -> bool
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::io::Result<()>>,
    {
        if let Err(e) = next_signal().await {
            warn!("Cannot listen for interrupts: {}", e);
            return false;
        }
        warn!("Interrupt received, finishing in-flight stages (interrupt again to exit now)");
        self.trigger();
        next_signal().await.is_ok()
    }
}

/// Observer side of [`ShutdownTrigger`].
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

pub fn shutdown_channel() -> (ShutdownTrigger, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx }, Shutdown { rx })
}

impl Shutdown {
    /// A signal that never fires.
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    pub async fn wait(&mut self) {
        if self.rx.wait_for(|stop| *stop).await.is_err() {
            // Trigger dropped without firing.
            std::future::pending::<()>().await;
        }
    }
}

/// What a stage call produced.
#[derive(Debug)]
pub struct StageOutput<T> {
    pub value: T,
    pub artifacts: Vec<PathBuf>,
}

impl<T> StageOutput<T> {
    pub fn new(value: T, artifacts: Vec<PathBuf>) -> Self {
        Self { value, artifacts }
    }
}

/// Identifies the (file, language, stage) a call belongs to.
#[derive(Debug, Clone)]
pub struct StageContext {
    pub file_id: FileId,
    pub language: String,
    pub stage: StageKind,
}

impl StageContext {
    pub fn new<S: Into<String>>(file_id: &FileId, language: S, stage: StageKind) -> Self {
        Self {
            file_id: file_id.clone(),
            language: language.into(),
            stage,
        }
    }
}

#[derive(Debug)]
pub struct StageRun<T> {
    pub result: StageResult,
    pub value: Option<T>,
}

enum RetryState<T> {
    Ready { attempt: u32 },
    Backoff { attempt: u32, delay: Duration, error: VideoToolError },
    Finished(Finished<T>),
}

enum Finished<T> {
    Succeeded { output: StageOutput<T>, attempts: u32 },
    Failed { error: StageError },
    Abandoned { attempts: u32 },
}

#[derive(Debug, Clone)]
pub struct StageExecutor {
    ledger: Arc<JobLedger>,
    policy: RetryPolicy,
    shutdown: Shutdown,
}

impl StageExecutor {
    pub fn new(ledger: Arc<JobLedger>, policy: RetryPolicy, shutdown: Shutdown) -> Self {
        Self {
            ledger,
            policy,
            shutdown,
        }
    }

    pub fn ledger(&self) -> &Arc<JobLedger> {
        &self.ledger
    }

    pub fn shutdown(&self) -> &Shutdown {
        &self.shutdown
    }

    /// Run `call` with the default retry policy.
    pub async fn run<T, F, Fut>(&self, ctx: &StageContext, call: F) -> StageRun<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<StageOutput<T>>>,
    {
        let policy = self.policy.clone();
        self.run_with(&policy, ctx, call).await
    }

    /// Run `call` with an explicit attempt budget and timeout. `call` builds a
    /// fresh future for every attempt.
    pub async fn run_with<T, F, Fut>(
        &self,
        policy: &RetryPolicy,
        ctx: &StageContext,
        mut call: F,
    ) -> StageRun<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<StageOutput<T>>>,
    {
        let max_attempts = policy.max_attempts.max(1);
        let mut shutdown = self.shutdown.clone();
        let mut state = RetryState::Ready { attempt: 1 };

        let finished = loop {
            state = match state {
                RetryState::Ready { attempt } => {
                    if shutdown.is_triggered() {
                        RetryState::Finished(Finished::Abandoned { attempts: attempt - 1 })
                    } else {
                        debug!(
                            "{} [{}] attempt {}/{}",
                            ctx.stage, ctx.language, attempt, max_attempts
                        );
                        let outcome = match tokio::time::timeout(policy.timeout, call()).await {
                            Ok(outcome) => outcome,
                            Err(_) => Err(VideoToolError::Timeout(policy.timeout)),
                        };
                        Self::after_attempt(policy, max_attempts, attempt, outcome)
                    }
                }
                RetryState::Backoff {
                    attempt,
                    delay,
                    error,
                } => {
                    warn!(
                        "{} [{}] attempt {}/{} failed ({}), retrying in {:?}",
                        ctx.stage, ctx.language, attempt, max_attempts, error, delay
                    );
                    tokio::select! {
                        biased;
                        _ = shutdown.wait() => RetryState::Finished(Finished::Abandoned { attempts: attempt }),
                        _ = tokio::time::sleep(delay) => RetryState::Ready { attempt: attempt + 1 },
                    }
                }
                RetryState::Finished(finished) => break finished,
            };
        };

        let pending = StageResult::pending(ctx.stage, ctx.language.clone());
        let (result, value) = match finished {
            Finished::Succeeded { output, attempts } => {
                info!("{} [{}] succeeded", ctx.stage, ctx.language);
                (pending.succeed(output.artifacts, attempts), Some(output.value))
            }
            Finished::Failed { error } => {
                warn!("{} [{}] failed: {}", ctx.stage, ctx.language, error);
                (pending.fail(error), None)
            }
            Finished::Abandoned { attempts } => {
                info!("{} [{}] abandoned after interrupt", ctx.stage, ctx.language);
                return StageRun {
                    result: pending.interrupt(attempts),
                    value: None,
                };
            }
        };

        if let Err(e) = self.ledger.record(LedgerEntry::from_result(&ctx.file_id, &result)) {
            warn!(
                "Failed to record {} [{}] in ledger {}: {}",
                ctx.stage,
                ctx.language,
                self.ledger.path().display(),
                e
            );
        }

        StageRun { result, value }
    }

    fn after_attempt<T>(
        policy: &RetryPolicy,
        max_attempts: u32,
        attempt: u32,
        outcome: Result<StageOutput<T>>,
    ) -> RetryState<T> {
        let error = match outcome {
            Ok(output) => {
                return RetryState::Finished(Finished::Succeeded {
                    output,
                    attempts: attempt,
                });
            }
            Err(error) => error,
        };

        if matches!(error, VideoToolError::Interrupted) {
            return RetryState::Finished(Finished::Abandoned { attempts: attempt });
        }

        match error.class() {
            ErrorClass::Transient if attempt < max_attempts => RetryState::Backoff {
                attempt,
                delay: policy.backoff(attempt),
                error,
            },
            ErrorClass::Transient => {
                // Out of budget: reported as permanent.
                let mut detail = StageError::from_error(&error, attempt);
                detail.class = ErrorClass::Permanent;
                detail.message = format!("{} (gave up after {} attempts)", detail.message, attempt);
                RetryState::Finished(Finished::Failed { error: detail })
            }
            ErrorClass::Permanent | ErrorClass::Configuration => {
                RetryState::Finished(Finished::Failed {
                    error: StageError::from_error(&error, attempt),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::StageStatus;
    use crate::subtitle::{Segment, Transcript};
    use crate::transcribe::{MockTranscriber, Transcriber};
    use std::path::Path;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            timeout: Duration::from_secs(5),
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
        }
    }

    fn executor(dir: &Path, shutdown: Shutdown) -> StageExecutor {
        let ledger = Arc::new(JobLedger::load(dir.join("ledger.json")).unwrap());
        StageExecutor::new(ledger, fast_policy(), shutdown)
    }

    fn ctx(stage: StageKind) -> StageContext {
        StageContext::new(&FileId::from("movie"), "en", stage)
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(300),
            ..RetryPolicy::default()
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(300));
        assert_eq!(policy.backoff(40), Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_transcriber_recovers_on_third_attempt() {
        let dir = tempfile::tempdir().unwrap();
        let executor = executor(dir.path(), Shutdown::never());

        let mut mock = MockTranscriber::new();
        let mut seq = mockall::Sequence::new();
        mock.expect_transcribe()
            .times(2)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Err(VideoToolError::transient_transcription("model server busy")));
        mock.expect_transcribe()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, lang, _| {
                Ok(Transcript {
                    language: lang.to_string(),
                    segments: vec![Segment::new(0.0, 1.0, "hello")],
                })
            });
        let transcriber: Arc<dyn Transcriber> = Arc::new(mock);

        let run = executor
            .run(&ctx(StageKind::Transcribe), || {
                let transcriber = transcriber.clone();
                async move {
                    let transcript = transcriber
                        .transcribe(Path::new("audio.wav"), "en", "base")
                        .await?;
                    Ok(StageOutput::new(transcript, vec![]))
                }
            })
            .await;

        assert_eq!(run.result.status, StageStatus::Succeeded);
        assert_eq!(run.result.attempts, 3);
        assert_eq!(run.value.unwrap().segments.len(), 1);
        assert!(executor.ledger().has_succeeded(
            &FileId::from("movie"),
            "en",
            StageKind::Transcribe
        ));
    }

    #[tokio::test]
    async fn test_exhausted_budget_keeps_last_error() {
        let dir = tempfile::tempdir().unwrap();
        let executor = executor(dir.path(), Shutdown::never());
        let calls = AtomicU32::new(0);

        let run: StageRun<()> = executor
            .run(&ctx(StageKind::Translate), || {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    Err(VideoToolError::transient_translation(format!("rate limited #{}", n)))
                }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(run.result.status, StageStatus::Failed);
        let error = run.result.error.unwrap();
        assert_eq!(error.class, ErrorClass::Permanent);
        assert_eq!(error.attempts, 3);
        assert!(error.message.contains("rate limited #3"), "{}", error.message);

        let entry = executor
            .ledger()
            .get(&FileId::from("movie"), "en", StageKind::Translate)
            .unwrap();
        assert_eq!(entry.status, StageStatus::Failed);
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_retried() {
        let dir = tempfile::tempdir().unwrap();
        let executor = executor(dir.path(), Shutdown::never());
        let calls = AtomicU32::new(0);

        let run: StageRun<()> = executor
            .run(&ctx(StageKind::Mux), || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(VideoToolError::Mux("unsupported codec".into())) }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(run.result.failed());
        assert_eq!(run.result.error.unwrap().class, ErrorClass::Permanent);
    }

    #[tokio::test]
    async fn test_timeout_counts_as_transient() {
        let dir = tempfile::tempdir().unwrap();
        let executor = executor(dir.path(), Shutdown::never());
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy {
            max_attempts: 2,
            timeout: Duration::from_millis(10),
            ..fast_policy()
        };

        let run = executor
            .run_with(&policy, &ctx(StageKind::Translate), || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        tokio::time::sleep(Duration::from_secs(60)).await;
                    }
                    Ok(StageOutput::new("done", vec![]))
                }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(run.result.succeeded());
        assert_eq!(run.value, Some("done"));
    }

    #[tokio::test]
    async fn test_interrupt_records_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let (trigger, shutdown) = shutdown_channel();
        let executor = executor(dir.path(), shutdown);
        trigger.trigger();

        let run: StageRun<()> = executor
            .run(&ctx(StageKind::Caption), || async { Ok(StageOutput::new((), vec![])) })
            .await;

        assert_eq!(run.result.status, StageStatus::Pending);
        assert!(run.result.interrupted);
        assert!(executor.ledger().is_empty());
    }

    #[tokio::test]
    async fn test_second_signal_forces_exit() {
        let signals = Arc::new(tokio::sync::Notify::new());
        let (trigger, mut shutdown) = shutdown_channel();
        let next_signal = {
            let signals = Arc::clone(&signals);
            move || {
                let signals = Arc::clone(&signals);
                async move {
                    signals.notified().await;
                    Ok(())
                }
            }
        };
        let forwarding = tokio::spawn(trigger.forward_signals(next_signal));

        signals.notify_one();
        tokio::time::timeout(Duration::from_secs(5), shutdown.wait())
            .await
            .unwrap();
        assert!(shutdown.is_triggered());
        assert!(!forwarding.is_finished());

        signals.notify_one();
        assert!(forwarding.await.unwrap());
    }

    #[tokio::test]
    async fn test_unavailable_signal_never_triggers() {
        let (trigger, shutdown) = shutdown_channel();
        let forced = trigger
            .forward_signals(|| async { Err(std::io::Error::other("no signal handler")) })
            .await;
        assert!(!forced);
        assert!(!shutdown.is_triggered());
    }

    #[tokio::test]
    async fn test_interrupt_during_backoff_abandons_stage() {
        let dir = tempfile::tempdir().unwrap();
        let (trigger, shutdown) = shutdown_channel();
        let executor = executor(dir.path(), shutdown);
        let policy = RetryPolicy {
            base_delay: Duration::from_secs(60),
            max_delay: Duration::from_secs(60),
            ..fast_policy()
        };

        let run: StageRun<()> = executor
            .run_with(&policy, &ctx(StageKind::Translate), || {
                trigger.trigger();
                async { Err(VideoToolError::transient_translation("503")) }
            })
            .await;

        assert_eq!(run.result.status, StageStatus::Pending);
        assert_eq!(run.result.attempts, 1);
        assert!(executor.ledger().is_empty());
    }
}
