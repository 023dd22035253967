mod config;
mod routes;
mod startup;

use std::future::Future;

use anyhow::Result;
use clap::Parser;

use crate::config::Args;
use crate::routes::{app, ServiceState};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let service = startup::build_service(&args).await?;
    let listener = tokio::net::TcpListener::bind(args.bind).await?;
    tracing::info!(bind = %args.bind, "recipe service listening");
    axum::serve(listener, app(ServiceState { service }))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let signal = first_signal(ctrl_c, terminate).await;
    tracing::info!(signal, "shutting down");
}

/// Resolve with the name of whichever shutdown source fires first.
async fn first_signal(
    ctrl_c: impl Future<Output = ()>,
    terminate: impl Future<Output = ()>,
) -> &'static str {
    tokio::select! {
        () = ctrl_c => "ctrl-c",
        () = terminate => "terminate",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn terminate_alone_triggers_shutdown() {
        let fired = first_signal(std::future::pending(), std::future::ready(())).await;
        assert_eq!(fired, "terminate");
    }

    #[tokio::test]
    async fn ctrl_c_alone_triggers_shutdown() {
        let fired = first_signal(std::future::ready(()), std::future::pending()).await;
        assert_eq!(fired, "ctrl-c");
    }
}
