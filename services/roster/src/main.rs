//! Roster service entry point.
//!
//! # Purpose
//! Wires configuration, storage, observability and the dispatcher, then feeds
//! newline-delimited JSON events from stdin until end of input or ctrl-c.
//!
//! # Notes
//! `run_with_shutdown` takes the input and the shutdown signal so the wiring is
//! testable without a terminal.
use roster::app::{AppState, build_store};
use roster::config::RosterConfig;
use roster::dispatch::registry::EventRegistry;
use roster::dispatch::source::forward_lines;
use roster::dispatch::{DispatchConfig, Dispatcher};
use roster::observability;
use roster::platform::LoggingPlatformClient;
use std::future::Future;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, BufReader};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = RosterConfig::from_env_or_yaml()?;
    run_with_shutdown(config, BufReader::new(tokio::io::stdin()), async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await
}

async fn run_with_shutdown<R, F>(config: RosterConfig, input: R, shutdown: F) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
    F: Future<Output = ()> + Send + 'static,
{
    let metrics_handle = observability::init_observability("roster");
    let store = build_store(&config).await?;
    let metrics_task = tokio::spawn(observability::serve_metrics(
        metrics_handle,
        config.metrics_bind,
    ));

    let state = AppState::new(store, Arc::new(LoggingPlatformClient));
    let dispatcher = Dispatcher::start(
        state,
        Arc::new(EventRegistry::standard()),
        DispatchConfig::from(&config),
    );

    tokio::pin!(shutdown);
    let result = tokio::select! {
        result = forward_lines(input, &dispatcher) => result.map(|_| ()),
        _ = &mut shutdown => {
            tracing::info!("shutdown requested");
            Ok(())
        }
    };

    dispatcher.shutdown().await;
    metrics_task.abort();
    let _ = metrics_task.await;
    result
}
