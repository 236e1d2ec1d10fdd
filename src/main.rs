mod baidu;
mod cli;
mod conditioner;
mod config;
mod error;
mod inputs;
mod ledger;
mod orchestrator;
mod output;
mod retry;
mod state_machine;
mod ui;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use baidu::BaiduClient;
use cli::{Cli, Command};
use config::OcrConfig;
use error::AppError;
use ledger::Outcome;
use orchestrator::{BatchOrchestrator, Settings};
use ui::BatchProgress;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = OcrConfig::load(cli.config.as_deref())?;
    apply_overrides(&mut config, &cli);
    config.validate()?;

    match cli.command {
        Command::Run {
            paths,
            dir,
            report,
            output_dir,
        } => {
            let inputs = inputs::collect_inputs(&paths, dir.as_deref())?;
            execute(&config, inputs, report.as_deref(), output_dir.as_deref()).await
        }
        Command::Retry {
            report,
            kinds,
            output_dir,
            save_report,
        } => {
            let previous = output::read_report(&report)?;
            let ids = previous.failed_ids(&kinds);
            if ids.is_empty() {
                return Err(AppError::NothingToRetry(report.display().to_string()).into());
            }
            info!(count = ids.len(), from = %previous.run_id, "resubmitting failed items");
            let paths = ids.into_iter().map(PathBuf::from).collect();
            execute(&config, paths, save_report.as_deref(), output_dir.as_deref()).await
        }
        Command::Condition { input, out } => condition_file(&config, &input, &out),
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "ocr_batch=debug"
    } else {
        "ocr_batch=info"
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// CLI flags win over the file and the environment.
fn apply_overrides(config: &mut OcrConfig, cli: &Cli) {
    if let Some(workers) = cli.workers {
        config.workers = workers;
    }
    if let Some(max_retries) = cli.max_retries {
        config.retry.max_rate_limit_retries = max_retries;
        config.retry.max_network_retries = max_retries;
    }
    if let Some(mode) = cli.mode {
        config.mode = mode;
    }
}

async fn execute(
    config: &OcrConfig,
    paths: Vec<PathBuf>,
    report: Option<&Path>,
    output_dir: Option<&Path>,
) -> Result<()> {
    config.require_credentials()?;
    let client = BaiduClient::from_config(config)?;

    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_signal(cancel.clone()));

    let (tx, mut rx) = mpsc::unbounded_channel();
    let progress = BatchProgress::start(paths.len());
    let watcher = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            progress.on_event(&event);
        }
        progress
    });

    let orchestrator = BatchOrchestrator::new(client, Settings::from_config(config))
        .with_cancellation(cancel)
        .with_progress(tx);
    let ledger = orchestrator.run(paths).await;
    // Closes the progress channel.
    drop(orchestrator);

    let progress = watcher.await?;
    progress.finish();

    if let Some(dir) = output_dir {
        let mut writer = output::MarkdownWriter::new(dir, config.mode)?;
        for entry in ledger.entries() {
            if let Outcome::Success { recognition, .. } = &entry.outcome {
                writer.write(&entry.id, recognition)?;
            }
        }
    }

    let summary = ledger.summary();
    progress.print_summary(&summary);
    if let Some(path) = report {
        output::write_report(path, &summary)?;
        info!(path = %path.display(), "report saved");
    } else if summary.failed > 0 {
        progress.print_json(&summary);
    }
    Ok(())
}

fn condition_file(config: &OcrConfig, input: &Path, out: &Path) -> Result<()> {
    let bytes =
        std::fs::read(input).with_context(|| format!("failed to read {}", input.display()))?;
    let payload = conditioner::condition(&bytes, &config.limits(), &config.quality_ladder())
        .map_err(AppError::from)?;
    std::fs::write(out, &payload.bytes)
        .with_context(|| format!("failed to write {}", out.display()))?;

    let quality = payload
        .quality
        .map_or_else(|| "unchanged".to_string(), |q| format!("quality {q}"));
    println!(
        "{} -> {}: {}x{}, {} bytes ({quality})",
        input.display(),
        out.display(),
        payload.width,
        payload.height,
        payload.byte_size()
    );
    Ok(())
}

async fn shutdown_signal(cancel: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for Ctrl-C");
        return;
    }
    warn!("interrupted, finishing in-flight items as cancelled");
    cancel.cancel();
}
