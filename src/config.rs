use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cli::Args;
use crate::error::{Result, VideoToolError};
use crate::executor::RetryPolicy;
use crate::language;

/// Name of the config file picked up from the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "videotool.toml";

/// Name of the ledger file kept in the output root.
pub const DEFAULT_LEDGER_FILE: &str = ".videotool-ledger.json";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub transcriber: TranscriberConfig,
    pub translate: TranslateConfig,
    pub media: MediaConfig,
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriberConfig {
    /// Path to the whisper command line tool
    pub binary_path: String,
    /// Model size used when the command line does not name one
    pub model: WhisperModel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum WhisperModel {
    Tiny,
    Base,
    Small,
    Medium,
    Large,
}

impl WhisperModel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tiny => "tiny",
            Self::Base => "base",
            Self::Small => "small",
            Self::Medium => "medium",
            Self::Large => "large",
        }
    }
}

impl std::fmt::Display for WhisperModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranslateConfig {
    /// Anthropic API base URL
    pub api_endpoint: String,
    /// Claude model used for cloud translation
    pub api_model: String,
    /// Upper bound on tokens generated per request
    pub max_tokens: u32,
    /// Segments sent together in one cloud request
    pub batch_size: usize,
    /// Ollama endpoint used with --local
    pub local_endpoint: String,
    /// Ollama model used with --local
    pub local_model: String,
    /// HTTP timeout for a single request, in seconds
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    /// Path to ffmpeg binary
    pub binary_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Attempts per stage, including the first one
    pub max_attempts: u32,
    /// Per-attempt timeout, in seconds
    pub stage_timeout_secs: u64,
    /// First backoff delay, doubled on each retry
    pub backoff_base_ms: u64,
    /// Backoff ceiling
    pub backoff_max_ms: u64,
    /// Videos processed concurrently
    pub jobs: usize,
    /// Ledger file name inside the output root
    pub ledger_file: String,
}

impl Default for TranscriberConfig {
    fn default() -> Self {
        Self {
            binary_path: "whisper".to_string(),
            model: WhisperModel::Base,
        }
    }
}

impl Default for TranslateConfig {
    fn default() -> Self {
        Self {
            api_endpoint: "https://api.anthropic.com".to_string(),
            api_model: "claude-sonnet-4-20250514".to_string(),
            max_tokens: 4000,
            batch_size: 10,
            local_endpoint: "http://localhost:11434".to_string(),
            local_model: "llama3.2:3b".to_string(),
            request_timeout_secs: 300,
        }
    }
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            binary_path: "ffmpeg".to_string(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            stage_timeout_secs: 3600,
            backoff_base_ms: 1000,
            backoff_max_ms: 30_000,
            jobs: 1,
            ledger_file: DEFAULT_LEDGER_FILE.to_string(),
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| VideoToolError::Config(format!("Failed to read config file: {}", e)))?;

        toml::from_str(&content)
            .map_err(|e| VideoToolError::Config(format!("Failed to parse config file: {}", e)))
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| VideoToolError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| VideoToolError::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    /// Load the explicit config file, else `videotool.toml` from the working
    /// directory, else defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        match explicit {
            Some(path) => Self::from_file(path),
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => Self::from_file(DEFAULT_CONFIG_FILE),
            None => Ok(Self::default()),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.pipeline.max_attempts.max(1),
            timeout: Duration::from_secs(self.pipeline.stage_timeout_secs),
            base_delay: Duration::from_millis(self.pipeline.backoff_base_ms),
            max_delay: Duration::from_millis(self.pipeline.backoff_max_ms),
        }
    }
}

/// Translation backend, chosen once per run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranslationBackend {
    Local {
        endpoint: String,
        model: String,
    },
    Cloud {
        endpoint: String,
        model: String,
        api_key: String,
        max_tokens: u32,
        batch_size: usize,
    },
}

impl TranslationBackend {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Local { .. } => "local",
            Self::Cloud { .. } => "cloud",
        }
    }
}

/// Everything a run needs, resolved once at startup and shared read-only.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub source_language: String,
    pub target_languages: Vec<String>,
    pub model: WhisperModel,
    pub output_dir: Option<PathBuf>,
    pub recursive: bool,
    pub skip_existing: bool,
    pub stop_on_error: bool,
    pub jobs: usize,
    pub retry: RetryPolicy,
    pub ledger_file: String,
    pub backend: TranslationBackend,
    pub request_timeout: Duration,
    pub show_progress: bool,
}

impl PipelineSettings {
    /// Merge config file values with command line flags.
    ///
    /// `env_api_key` is the value of `ANTHROPIC_API_KEY` as read by the caller.
    /// A cloud run without any key is a configuration error, since no stage
    /// could ever succeed.
    pub fn resolve(config: &Config, args: &Args, env_api_key: Option<String>) -> Result<Self> {
        let source_language = language::validate(&args.source)?;
        let target_languages = language::unique_targets(&args.targets)?;

        let needs_translation = target_languages.iter().any(|t| *t != source_language);
        let backend = if args.local {
            TranslationBackend::Local {
                endpoint: config.translate.local_endpoint.clone(),
                model: config.translate.local_model.clone(),
            }
        } else {
            let api_key = args
                .api_key
                .clone()
                .or(env_api_key)
                .filter(|key| !key.trim().is_empty());
            match api_key {
                Some(api_key) => TranslationBackend::Cloud {
                    endpoint: config.translate.api_endpoint.clone(),
                    model: config.translate.api_model.clone(),
                    api_key,
                    max_tokens: config.translate.max_tokens,
                    batch_size: config.translate.batch_size.max(1),
                },
                None if needs_translation => {
                    return Err(VideoToolError::Config(
                        "No Anthropic API key: pass --api-key, set ANTHROPIC_API_KEY, or use --local"
                            .to_string(),
                    ));
                }
                // Nothing will be translated, so the key is never used.
                None => TranslationBackend::Cloud {
                    endpoint: config.translate.api_endpoint.clone(),
                    model: config.translate.api_model.clone(),
                    api_key: String::new(),
                    max_tokens: config.translate.max_tokens,
                    batch_size: config.translate.batch_size.max(1),
                },
            }
        };

        let mut retry = config.retry_policy();
        if let Some(attempts) = args.max_attempts {
            retry.max_attempts = attempts.max(1);
        }
        if let Some(secs) = args.stage_timeout {
            retry.timeout = Duration::from_secs(secs);
        }

        let jobs = args.jobs.unwrap_or(config.pipeline.jobs);
        if jobs == 0 {
            return Err(VideoToolError::Config("--jobs must be at least 1".to_string()));
        }

        Ok(Self {
            source_language,
            target_languages,
            model: args.model.unwrap_or(config.transcriber.model),
            output_dir: args.output.clone(),
            recursive: args.recursive,
            skip_existing: args.skip_existing(),
            stop_on_error: args.stop_on_error,
            jobs,
            retry,
            ledger_file: config.pipeline.ledger_file.clone(),
            backend,
            request_timeout: Duration::from_secs(config.translate.request_timeout_secs),
            show_progress: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec!["videotool", "movies"];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_config_roundtrip_through_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("videotool.toml");

        let mut config = Config::default();
        config.pipeline.jobs = 2;
        config.transcriber.model = WhisperModel::Medium;
        config.save_to_file(&path).unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded.pipeline.jobs, 2);
        assert_eq!(loaded.transcriber.model, WhisperModel::Medium);
        assert_eq!(loaded.media.binary_path, "ffmpeg");
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: Config = toml::from_str("[pipeline]\nmax_attempts = 5\n").unwrap();
        assert_eq!(config.pipeline.max_attempts, 5);
        assert_eq!(config.pipeline.jobs, 1);
        assert_eq!(config.translate.batch_size, 10);
    }

    #[test]
    fn test_cloud_backend_requires_key() {
        let config = Config::default();
        let err = PipelineSettings::resolve(&config, &args(&["--targets", "my"]), None).unwrap_err();
        assert!(matches!(err, VideoToolError::Config(_)));
    }

    #[test]
    fn test_env_key_used_when_flag_absent() {
        let config = Config::default();
        let settings =
            PipelineSettings::resolve(&config, &args(&["--targets", "th"]), Some("sk-env".into()))
                .unwrap();
        match settings.backend {
            TranslationBackend::Cloud { api_key, .. } => assert_eq!(api_key, "sk-env"),
            other => panic!("unexpected backend {:?}", other),
        }
    }

    #[test]
    fn test_flag_key_wins_over_env() {
        let config = Config::default();
        let settings = PipelineSettings::resolve(
            &config,
            &args(&["--targets", "th", "--api-key", "sk-flag"]),
            Some("sk-env".into()),
        )
        .unwrap();
        assert!(matches!(
            settings.backend,
            TranslationBackend::Cloud { ref api_key, .. } if api_key == "sk-flag"
        ));
    }

    #[test]
    fn test_local_and_transcribe_only_need_no_key() {
        let config = Config::default();
        let local = PipelineSettings::resolve(&config, &args(&["--targets", "my", "--local"]), None)
            .unwrap();
        assert_eq!(local.backend.name(), "local");

        let transcribe_only = PipelineSettings::resolve(&config, &args(&[]), None).unwrap();
        assert!(transcribe_only.target_languages.is_empty());

        let same_language =
            PipelineSettings::resolve(&config, &args(&["--targets", "en"]), None).unwrap();
        assert_eq!(same_language.target_languages, vec!["en"]);
    }

    #[test]
    fn test_flags_override_pipeline_config() {
        let config = Config::default();
        let settings = PipelineSettings::resolve(
            &config,
            &args(&["--local", "--jobs", "2", "--max-attempts", "5", "--stage-timeout", "10"]),
            None,
        )
        .unwrap();
        assert_eq!(settings.jobs, 2);
        assert_eq!(settings.retry.max_attempts, 5);
        assert_eq!(settings.retry.timeout, Duration::from_secs(10));
        assert_eq!(settings.model, WhisperModel::Base);
    }

    #[test]
    fn test_unknown_language_rejected() {
        let config = Config::default();
        let err = PipelineSettings::resolve(&config, &args(&["--source", "klingon"]), None)
            .unwrap_err();
        assert!(matches!(err, VideoToolError::Config(_)));
    }
}
