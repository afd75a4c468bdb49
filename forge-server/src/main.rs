//! Forge server - streams orchestrator runs to browser clients over SSE.

mod routes;
mod sse;
mod state;

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use forge::io::config::load_config;
use forge::io::gateway::OpenAiGateway;
use forge::io::harness::ProcessSandbox;

use crate::state::AppState;

#[derive(Parser)]
#[command(name = "forge-server")]
#[command(about = "HTTP front end streaming forge runs as Server-Sent Events")]
struct Args {
    /// Address to bind the server to
    #[arg(long, default_value = "127.0.0.1")]
    bind: String,

    /// Port to listen on
    #[arg(long, default_value = "8000")]
    port: u16,

    /// Forge config file (defaults apply when missing)
    #[arg(long, default_value = "forge.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("{:#}", err);
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("forge_server=info".parse()?),
        )
        .init();

    let args = Args::parse();
    let config = load_config(&args.config)?;
    info!(config = %args.config.display(), model = %config.gateway.model, "starting forge-server");

    let gateway = OpenAiGateway::new(&config.gateway)?;
    let sandbox = ProcessSandbox::new(config.harness.clone());
    let app = routes::app(AppState::new(gateway, sandbox, config));

    let addr: SocketAddr = format!("{}:{}", args.bind, args.port)
        .parse()
        .context("parse bind address")?;
    info!(addr = %addr, "listening");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    axum::serve(listener, app).await.context("serve")?;

    Ok(())
}
