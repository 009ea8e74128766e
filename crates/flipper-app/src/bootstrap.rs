use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use flipper_config::{CoreConfig, LogSettings};
use flipper_core::PageFetcher;
use flipper_tasks::HttpPageFetcher;
use flipper_telemetry::{LogFormat, LoggingConfig};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::context::{CoreContext, Stores};
use crate::error::{AppError, AppResult};
use crate::orchestrator::CoreOrchestrator;
use crate::parser::JsonPageParser;

/// Build identifier baked in at compile time, when provided.
const BUILD_SHA: &str = match option_env!("FLIPPER_BUILD_SHA") {
    Some(sha) => sha,
    None => "dev",
};

/// Entry point for the Flipper core boot sequence.
///
/// # Errors
///
/// Returns an error if configuration, logging, storage or startup fails.
pub async fn run_app() -> AppResult<()> {
    let config = flipper_config::load().map_err(|err| AppError::config("config.load", err))?;
    Box::pin(run_app_with(config, shutdown_signal())).await
}

/// Boot sequence driven by an explicit configuration; returns once `shutdown` resolves.
pub(crate) async fn run_app_with(
    config: CoreConfig,
    shutdown: impl Future<Output = ()> + Send,
) -> AppResult<()> {
    flipper_telemetry::init_logging(&logging_config(&config.logging))
        .map_err(|err| AppError::telemetry("telemetry.init", err))?;
    info!(
        build_sha = flipper_telemetry::build_sha(),
        "Flipper core bootstrap starting"
    );

    let stores = match config.database_url.as_deref() {
        Some(url) => Stores::postgres(url).await?,
        None => {
            warn!("no database configured; corpus and task state are kept in memory");
            Stores::memory()
        }
    };
    let fetcher: Arc<dyn PageFetcher> = Arc::new(
        HttpPageFetcher::new(
            Duration::from_secs(config.engine.fetch_timeout_secs),
            &config.engine.user_agent,
        )
        .map_err(|err| AppError::fetch("http_fetcher.new", err))?,
    );
    let service_bind = config.service_bind.clone();

    let ctx = CoreContext::assemble(config, stores, fetcher, Arc::new(JsonPageParser))?;
    let orchestrator = CoreOrchestrator::init(ctx).await?;
    let resumed = orchestrator.take_resumed().len();
    if resumed > 0 {
        info!(crawls = resumed, "interrupted crawls resumed in the background");
    }

    let service = match service_bind {
        Some(bind) => start_service(&orchestrator, &bind).await?,
        None => None,
    };

    shutdown.await;
    info!("shutdown requested");

    let interrupted = orchestrator.context().engine.shutdown().await;
    if interrupted > 0 {
        info!(tasks = interrupted, "running crawls interrupted; they resume on next start");
    }
    if let Some(service) = service {
        service.abort();
    }
    info!("Flipper core shutdown complete");
    Ok(())
}

/// Expose the local source over HTTP for remote-mode clients.
async fn start_service(
    orchestrator: &CoreOrchestrator,
    bind: &str,
) -> AppResult<Option<JoinHandle<()>>> {
    let Some(local) = orchestrator.context().local.clone() else {
        warn!(bind, "recommendation service needs the local source; not started");
        return Ok(None);
    };
    let listener = TcpListener::bind(bind)
        .await
        .map_err(|err| AppError::io("service.bind", err))?;
    Ok(Some(tokio::spawn(async move {
        if let Err(err) = flipper_source::serve(listener, local).await {
            warn!(error = %err, "recommendation service stopped");
        }
    })))
}

fn logging_config(settings: &LogSettings) -> LoggingConfig<'_> {
    LoggingConfig {
        level: &settings.level,
        format: settings
            .format
            .as_deref()
            .map_or_else(LogFormat::infer, LogFormat::from_name),
        build_sha: BUILD_SHA,
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for shutdown signal");
    }
}
