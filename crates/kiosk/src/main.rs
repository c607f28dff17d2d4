use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use kiosk::engine::Kiosk;
use kiosk::monitor::spawn_period_monitor;
use kiosk::{telemetry, web};
use kioskconf::KioskConfig;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Personal display kiosk server
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the HTTP/WebSocket server (default)
    Serve {
        /// Config file, used in place of ./kiosk.toml
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,

        /// State document path (overrides config)
        #[arg(long)]
        state_file: Option<PathBuf>,
    },
    /// Print the effective configuration as TOML
    Config {
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Serve {
        config: None,
        port: None,
        state_file: None,
    }) {
        Commands::Config { config } => {
            let (config, sources) = KioskConfig::load_with_sources_from(config.as_deref())
                .context("Failed to load configuration")?;
            for file in &sources.files {
                println!("# loaded: {}", file.display());
            }
            for var in &sources.env_overrides {
                println!("# env: {}", var);
            }
            print!("{}", config.to_toml());
            Ok(())
        }
        Commands::Serve {
            config,
            port,
            state_file,
        } => {
            let mut config =
                KioskConfig::load_from(config.as_deref()).context("Failed to load configuration")?;
            if let Some(port) = port {
                config.infra.bind.http_port = port;
            }
            if let Some(state_file) = state_file {
                config.infra.paths.state_file = state_file;
            }
            serve(config).await
        }
    }
}

async fn serve(config: KioskConfig) -> Result<()> {
    telemetry::init(&config.infra.telemetry).context("Failed to initialize telemetry")?;

    tracing::info!("🖼️  Opening kiosk state...");
    let kiosk = Arc::new(Kiosk::from_config(&config).context("Failed to open state document")?);
    let doc = kiosk.store().snapshot();
    tracing::info!("   State file: {}", config.infra.paths.state_file.display());
    tracing::info!(
        "   {} items, {} themes, {} atmospheres",
        doc.graph.items.len(),
        doc.graph.themes.len(),
        doc.graph.atmospheres.len()
    );
    tracing::info!("   Schedule clock offset: {}", kiosk.clock().offset());

    let shutdown_token = CancellationToken::new();

    let monitor_interval = Duration::from_millis(config.bootstrap.schedule.monitor_interval_ms);
    let monitor = spawn_period_monitor(kiosk.clone(), monitor_interval, shutdown_token.clone());

    let addr = config.infra.bind.addr();
    let app_router = web::router(web::WebState {
        kiosk: kiosk.clone(),
    });

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    tracing::info!("🌐 Kiosk server starting on http://{}", addr);
    tracing::info!("   Displays: GET ws://{}/ws", addr);
    tracing::info!("   Selection: GET http://{}/api/selection", addr);
    tracing::info!("   Health: GET http://{}/health", addr);

    let shutdown_token_srv = shutdown_token.clone();
    let server = axum::serve(listener, app_router).with_graceful_shutdown(async move {
        shutdown_token_srv.cancelled().await;
        tracing::info!("Server shutdown signal received");
    });

    let server_handle = tokio::spawn(async move {
        if let Err(e) = server.await {
            tracing::error!("Server shutdown with error: {:?}", e);
        }
    });

    tracing::info!("🖼️  Server ready.");

    // Handle both SIGINT (Ctrl+C) and SIGTERM (systemd)
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received SIGINT (Ctrl+C), shutting down gracefully...");
        }
        result = terminate_signal() => {
            result?;
            tracing::info!("Received SIGTERM, shutting down gracefully...");
        }
    }
    shutdown_token.cancel();

    if tokio::time::timeout(Duration::from_secs(5), server_handle)
        .await
        .is_err()
    {
        tracing::warn!("Server did not stop within 5s, exiting anyway");
    }
    let _ = monitor.await;

    telemetry::shutdown();
    Ok(())
}

#[cfg(unix)]
async fn terminate_signal() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = signal(SignalKind::terminate()).context("Failed to set up SIGTERM handler")?;
    sigterm.recv().await;
    Ok(())
}

#[cfg(not(unix))]
async fn terminate_signal() -> Result<()> {
    std::future::pending::<()>().await;
    Ok(())
}
