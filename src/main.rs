use anyhow::{Context, Result};
use avelon_exporter::api::{AvelonClient, TelemetrySource};
use avelon_exporter::cli::Args;
use avelon_exporter::config::Config;
use avelon_exporter::http;
use avelon_exporter::metrics::MetricsRegistry;
use avelon_exporter::poller::{CycleReport, Poller};
use clap::Parser;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

fn init_tracing() -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,avelon_exporter=info".into());
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .try_init()
        .map_err(|err| anyhow::anyhow!(err.to_string()))?;
    Ok(())
}

async fn bind_listener(addr: &str) -> Result<TcpListener> {
    match TcpListener::bind(addr).await {
        Ok(listener) => Ok(listener),
        Err(err) if err.kind() == std::io::ErrorKind::AddrInUse => {
            anyhow::bail!(
                "Failed to bind avelon-exporter listener on {addr}: port already in use. Stop the other service using this port or re-run with --bind to choose another address.",
            );
        }
        Err(err) => {
            Err(err).with_context(|| format!("failed to bind avelon-exporter listener on {addr}"))
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

/// Runs a single fetch cycle and renders the resulting exposition text.
async fn scrape_once<S: TelemetrySource>(
    poller: &Poller<S>,
    metrics: &MetricsRegistry,
) -> Result<(CycleReport, String)> {
    let report = poller.run_cycle().await;
    let text = metrics.encode_text()?;
    Ok((report, text))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing()?;

    let config = Config::load(&args)?;
    let metrics = Arc::new(MetricsRegistry::new(&config.devices)?);
    let client = AvelonClient::new(config.api_base.clone(), config.request_timeout)?;
    let poller = Poller::new(client, metrics.clone(), config.fetch_interval);

    if args.once {
        let (_, text) = scrape_once(&poller, &metrics).await?;
        print!("{text}");
        return Ok(());
    }

    let listener = bind_listener(&config.http_bind).await?;
    tracing::info!(
        bind = %config.http_bind,
        devices = config.devices.len(),
        fetch_interval_secs = config.fetch_interval.as_secs(),
        api_base = %config.api_base,
        "serving metrics at /metrics"
    );

    let cancel = CancellationToken::new();
    let poller_handle = poller.start(cancel.clone());

    let app = http::router(http::HttpState { metrics });
    let server_cancel = cancel.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = shutdown_signal() => {
                    tracing::info!("shutdown signal received");
                }
                _ = server_cancel.cancelled() => {}
            }
        })
        .await
        .context("metrics server failed")?;

    cancel.cancel();
    if let Err(err) = poller_handle.await {
        tracing::warn!(error = %err, "poller task failed");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{bind_listener, scrape_once};
    use anyhow::Result;
    use avelon_exporter::api::AvelonClient;
    use avelon_exporter::config::parse_device_list;
    use avelon_exporter::metrics::MetricsRegistry;
    use avelon_exporter::poller::Poller;
    use std::sync::Arc;
    use std::time::Duration;
    use url::Url;

    #[tokio::test]
    async fn once_mode_renders_gauges_even_when_fetches_fail() -> Result<()> {
        let listener = match std::net::TcpListener::bind("127.0.0.1:0") {
            Ok(listener) => listener,
            Err(err) if err.kind() == std::io::ErrorKind::PermissionDenied => return Ok(()),
            Err(err) => return Err(err.into()),
        };
        let addr = listener.local_addr()?;
        drop(listener);

        let devices = parse_device_list("AAA")?;
        let metrics = Arc::new(MetricsRegistry::new(&devices)?);
        let base = Url::parse(&format!("http://{addr}/devices/"))?;
        let client = AvelonClient::new(base, Duration::from_secs(2))?;
        let poller = Poller::new(client, metrics.clone(), Duration::from_secs(3600));

        let (report, text) = scrape_once(&poller, &metrics).await?;
        assert_eq!(report.failed, 1);
        assert!(text.contains("avelon_device_battery_level_percent{activationcode=\"AAA\"} 0"));
        assert!(text.contains("avelon_record_last_temperature_celsius{activationcode=\"AAA\"} 0"));
        Ok(())
    }

    #[tokio::test]
    async fn reports_port_in_use_with_actionable_message() -> Result<()> {
        let listener = match std::net::TcpListener::bind("127.0.0.1:0") {
            Ok(listener) => listener,
            Err(err) if err.kind() == std::io::ErrorKind::PermissionDenied => {
                // Sandbox environments can block binding attempts.
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        };
        let addr = listener.local_addr()?;

        let err = bind_listener(&addr.to_string()).await.unwrap_err();
        let message = err.to_string().to_lowercase();
        if message.contains("operation not permitted") {
            return Ok(());
        }

        assert!(message.contains(&addr.to_string()));
        assert!(message.contains("port already in use"));
        assert!(message.contains("--bind"));

        drop(listener);
        Ok(())
    }
}
