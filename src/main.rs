use anyhow::Result;
use clap::Parser;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::prelude::*;

use localragd::{config, server, state};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = config::Cli::parse();
    let app_config = config::AppConfig::load(&cli);

    std::fs::create_dir_all(&app_config.logs_dir).ok();

    let file_appender = tracing_appender::rolling::daily(&app_config.logs_dir, "localragd.log");
    let (non_blocking_writer, _guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "localragd=info,tower_http=info".into());

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .compact();

    let file_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false)
        .with_writer(non_blocking_writer)
        .compact();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(file_layer)
        .init();

    let default_panic = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let location = info
            .location()
            .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
            .unwrap_or_default();
        error!(target: "localragd::panic", location = %location, "PANIC: thread panicked");
        default_panic(info);
    }));

    info!(
        ollama_url = %app_config.ollama_url,
        embedding_model = %app_config.embedding_model,
        chat_model = %app_config.chat_model,
        data_dir = %app_config.data_dir.display(),
        port = app_config.port,
        "localragd starting"
    );

    let addr: SocketAddr = app_config.listen_addr().parse()?;
    let app_state = state::AppState::new(app_config).await?;
    app_state.start_worker();

    let app = server::create_app(app_state.clone());

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("localragd listening on {}", addr);

    let shutdown_state = app_state.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            wait_for_shutdown(shutdown_state.clone()).await;
            // Force-exit if in-flight `/api/chat` streams haven't drained
            // within the grace period (§5).
            tokio::spawn(async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                error!("graceful shutdown grace period elapsed, forcing exit");
                std::process::exit(0);
            });
        })
        .await?;

    app_state.logger.flush().await;
    if let Err(e) = app_state.queue.persist_now() {
        error!(error = %e, "failed to persist ingestion queue during shutdown");
    }
    info!("localragd shutdown complete");
    Ok(())
}

/// Resolves on SIGINT/SIGTERM or the HTTP `/shutdown` endpoint, whichever
/// comes first.
async fn wait_for_shutdown(state: state::AppState) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install secondary Ctrl+C handler");
    };

    let http_shutdown = state.shutdown.notified();

    tokio::select! {
        _ = ctrl_c => { info!("received Ctrl+C, initiating shutdown"); },
        _ = terminate => { info!("received terminate signal, initiating shutdown"); },
        _ = http_shutdown => { info!("received HTTP shutdown request, initiating shutdown"); },
    }
}
