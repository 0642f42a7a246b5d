use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use codemate_core::{EventHub, Store};
use codemate_server::{serve, AppState};
use codemate_tools::LocalToolRunner;

#[derive(Parser, Debug)]
#[command(name = "codemate-gateway")]
#[command(about = "CodeMate autonomy gateway")]
struct Cli {
    #[arg(long, default_value = "127.0.0.1")]
    host: String,
    #[arg(long, default_value_t = 7011)]
    port: u16,
    #[arg(long, default_value = "./.codemate/codemate_gateway.db")]
    db: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("info")
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let addr: SocketAddr = format!("{}:{}", cli.host, cli.port)
        .parse()
        .context("invalid host or port")?;

    let store = Arc::new(Store::new(&cli.db).await?);
    let state = AppState::new(store, EventHub::new(), Arc::new(LocalToolRunner::new()));

    info!("database at {}", cli.db.display());
    serve(addr, state).await
}
