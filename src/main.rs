use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use live_scientist::{
    create_router, AppState, Config, ConfiguredDevices, GeminiConnector, SessionController, SessionStatus,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Realtime audio/video conversation with a live generative model
#[derive(Debug, Parser)]
#[command(name = "live-scientist", version)]
struct Cli {
    /// Configuration file (extension optional)
    #[arg(short, long, default_value = "config/live-scientist")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve the HTTP control API
    Serve,
    /// Run one headless session, then print its statistics
    Run {
        /// Session length in seconds
        #[arg(short, long, default_value_t = 30)]
        duration: u64,

        /// Start with the microphone muted
        #[arg(long)]
        muted: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let cfg = Config::load(&cli.config)?;

    info!("Live Scientist v{}", env!("CARGO_PKG_VERSION"));
    info!("Loaded config: {}", cfg.service.name);

    if cfg.api_key().is_none() {
        warn!("No API key configured; set LIVE_SCIENTIST__LIVE__API_KEY or GEMINI_API_KEY");
    }

    let controller = Arc::new(build_controller(&cfg));

    match cli.command {
        Command::Serve => serve(&cfg, controller).await,
        Command::Run { duration, muted } => run(controller, Duration::from_secs(duration), muted).await,
    }
}

fn build_controller(cfg: &Config) -> SessionController {
    let devices = ConfiguredDevices {
        source: cfg.capture_source(),
        config: cfg.capture_config(),
    };
    let output = cfg.output_target();
    info!("Capture source: {:?}, playback output: {:?}", devices.source, output);

    SessionController::new(
        cfg.session_config(),
        Arc::new(devices),
        Arc::new(GeminiConnector::new()),
        Arc::new(output),
    )
}

async fn serve(cfg: &Config, controller: Arc<SessionController>) -> Result<()> {
    let addr = format!("{}:{}", cfg.service.http.bind, cfg.service.http.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind HTTP server to {}", addr))?;

    info!("HTTP control API listening on http://{}", addr);

    let app = create_router(AppState::new(Arc::clone(&controller)));
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    controller.disconnect().await;
    info!("Shut down");
    Ok(())
}

async fn run(controller: Arc<SessionController>, duration: Duration, muted: bool) -> Result<()> {
    controller.set_muted(muted);

    let status = controller.connect().await;
    if status == SessionStatus::Error {
        anyhow::bail!("Live session failed to start (see log for details)");
    }

    let mut status_rx = controller.subscribe_status();
    let ended = async {
        // Returns early if the remote ends the session
        let _ = status_rx.wait_for(|s| !s.is_active()).await;
    };

    tokio::select! {
        _ = tokio::time::sleep(duration) => info!("Session duration reached"),
        _ = shutdown_signal() => info!("Interrupted"),
        _ = ended => warn!("Session ended early: {}", controller.status()),
    }

    let stats = controller.stats().await;
    controller.disconnect().await;

    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
}
