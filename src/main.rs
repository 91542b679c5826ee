// src/main.rs
mod api;
mod bounds;
mod cli;
mod config;
mod model;
mod optimizer;
mod order;
mod render;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use cli::{Action, Cli};
use config::AppConfig;

#[tokio::main]
async fn main() {
    let dotenv = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(format!("{}=info", env!("CARGO_CRATE_NAME")))),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Err(err) = dotenv {
        if !matches!(err, dotenvy::Error::Io(ref io_err) if io_err.kind() == std::io::ErrorKind::NotFound)
        {
            warn!("⚠️ Could not load .env: {}", err);
        }
    }

    let cli = Cli::parse();
    let app_config = AppConfig::from_env();

    match cli.run(&app_config) {
        Action::Serve => {
            info!("🚀 Bundle planner v{} starting...", env!("CARGO_PKG_VERSION"));
            api::start_api_server(app_config.api, app_config.optimizer).await;
        }
        Action::Exit(code) => std::process::exit(code),
    }
}
