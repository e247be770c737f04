//! lifeline-server: HTTP front end of the emergency allocation engine.

use std::path::PathBuf;

use clap::Parser;
use tracing::info;

use lifeline_server::{build_router, startup};

// ── CLI ─────────────────────────────────────────────────────────────

/// Emergency blood allocation engine with a REST interface.
#[derive(Parser, Debug)]
#[command(name = "lifeline-server", version, about)]
struct Cli {
    /// Bind address; overrides HOST.
    #[arg(long)]
    host: Option<String>,

    /// Listen port; overrides PORT.
    #[arg(long)]
    port: Option<u16>,

    /// YAML or JSON graph snapshot to load at start-up; overrides GRAPH_SEED.
    #[arg(long)]
    graph_seed: Option<PathBuf>,
}

// ── main ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    lifeline_core::config::load_dotenv();
    let mut config = lifeline_core::Config::from_env();
    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if cli.graph_seed.is_some() {
        config.graph_seed = cli.graph_seed;
    }
    config.log_summary();

    let graph = startup::load_seed_graph(config.graph_seed.as_deref())?;
    let (state, runtime) = startup::build_app_state(&config, graph)?;
    let app = build_router(state, &config.server.cors_origin);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Server listening on http://{}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down allocation engine...");
    runtime.shutdown().await;
    info!("lifeline-server exited cleanly");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}
