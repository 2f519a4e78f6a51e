use anyhow::{Context, Result};
use clap::Parser;
use retrace_events::EventBus;
use retrace_server::cli::{Cli, Config};
use retrace_server::core::start_continuous_recording;
use retrace_server::logs::init_logging;
use retrace_server::summarization::{spawn_summarization_loop, HttpSummarizer, Summarizer};
use retrace_storage::{LocalDirContainer, StorageContainer};
use retrace_vision::{CaptureSource, MonitorSource, SourceFactory, TesseractExtractor};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::from_cli(cli)?;

    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("creating data dir {}", config.data_dir.display()))?;
    let _log_guard = init_logging(&config.data_dir, config.debug)?;

    info!(
        data_dir = %config.data_dir.display(),
        interval_ms = config.sample_interval.as_millis() as u64,
        threshold = config.diff_threshold,
        language = %config.language,
        "starting retrace"
    );
    if let Some(days) = config.retention_days {
        info!(days, "retention window handed to external retention");
    }

    let container: Arc<dyn StorageContainer> =
        Arc::new(LocalDirContainer::new(&config.data_dir)?);
    let source_factory: Arc<SourceFactory> = Arc::new(|| {
        MonitorSource::acquire().map(|source| Box::new(source) as Box<dyn CaptureSource>)
    });
    let extractor = Arc::new(TesseractExtractor::new());
    let bus = EventBus::default();

    let handle = start_continuous_recording(
        &config,
        container,
        source_factory,
        extractor,
        bus.clone(),
    )
    .await?;

    if let Some(summarizer) = summarizer_from_env() {
        spawn_summarization_loop(summarizer, handle.index().clone(), bus.clone());
    } else {
        info!("no summarization endpoint configured, summaries disabled");
    }

    handle.start();
    info!("capture started, ctrl-c to stop");

    signal::ctrl_c().await?;
    info!("shutting down");

    if let Err(e) = handle.shutdown().await {
        error!(error = %e, "final index flush failed");
    }

    Ok(())
}

/// Optional OpenAI-compatible backend, configured entirely by environment.
fn summarizer_from_env() -> Option<Arc<dyn Summarizer>> {
    let endpoint = std::env::var("RETRACE_SUMMARY_ENDPOINT").ok()?;
    let model = std::env::var("RETRACE_SUMMARY_MODEL").unwrap_or_else(|_| "gpt-4o-mini".into());
    let api_key = std::env::var("RETRACE_SUMMARY_API_KEY").ok();
    if api_key.is_none() {
        warn!("summary endpoint set without api key, sending unauthenticated requests");
    }
    Some(Arc::new(HttpSummarizer::new(endpoint, model, api_key)))
}
