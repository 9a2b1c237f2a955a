//! videotool - batch subtitle translation pipeline
//!
//! Entry point: resolves configuration, wires the adapters and hands the
//! input to the workflow.

use anyhow::{Context, Result};
use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use videotool::cli::Args;
use videotool::config::{Config, PipelineSettings};
use videotool::executor::shutdown_channel;
use videotool::ledger::JobLedger;
use videotool::logging::setup_logging;
use videotool::media::MuxerFactory;
use videotool::subtitle::SrtWriter;
use videotool::summary::EXIT_INTERRUPTED;
use videotool::transcribe::TranscriberFactory;
use videotool::translate::TranslatorFactory;
use videotool::workflow::{ledger_path, Adapters, Workflow};

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(e) = setup_logging(args.verbose) {
        eprintln!("Error: {}", e);
        return ExitCode::from(1);
    }

    let run_id = Uuid::new_v4();
    match execute(args).instrument(info_span!("run", id = %run_id)).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!("{:#}", e);
            ExitCode::from(1)
        }
    }
}

async fn execute(args: Args) -> Result<u8> {
    info!("Starting videotool {}", env!("CARGO_PKG_VERSION"));

    let config = Config::load(args.config.as_deref()).context("Failed to load configuration")?;
    let settings = Arc::new(PipelineSettings::resolve(
        &config,
        &args,
        std::env::var("ANTHROPIC_API_KEY").ok(),
    )?);
    info!(
        "Source: {}, targets: [{}], translation backend: {}, jobs: {}",
        settings.source_language,
        settings.target_languages.join(", "),
        settings.backend.name(),
        settings.jobs
    );

    let ledger_path = ledger_path(&settings, &args.input);
    let ledger = Arc::new(
        JobLedger::load(&ledger_path)
            .with_context(|| format!("Failed to open ledger {}", ledger_path.display()))?,
    );

    let muxer = MuxerFactory::create(&config.media);
    if let Err(e) = muxer.check_availability().await {
        warn!("{}", e);
    }
    let adapters = Adapters {
        transcriber: TranscriberFactory::create(&config.transcriber),
        translator: TranslatorFactory::create(&settings.backend, settings.request_timeout)?,
        captions: Arc::new(SrtWriter),
        muxer,
    };

    let (trigger, shutdown) = shutdown_channel();
    tokio::spawn(async move {
        if trigger.forward_signals(tokio::signal::ctrl_c).await {
            error!("Second interrupt, exiting without waiting for running stages");
            std::process::exit(i32::from(EXIT_INTERRUPTED));
        }
    });

    let workflow = Arc::new(Workflow::new(settings, adapters, ledger, shutdown));
    let summary = workflow.run(&args.input).await?;
    summary.print();

    info!("videotool finished with exit code {}", summary.exit_code());
    Ok(summary.exit_code())
}
