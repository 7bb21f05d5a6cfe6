// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;
use tracing::error;

use ztagent::config::AgentConfig;

#[derive(Parser)]
#[command(name = "ztagent", about = "Zero Trust overlay node agent")]
struct Cli {
    #[command(flatten)]
    config: AgentConfig,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // reqwest is built without a default TLS provider; install ring.
    let _ = rustls::crypto::ring::default_provider().install_default();

    if let Err(e) = ztagent::run(cli.config).await {
        error!("fatal: {e}");
        std::process::exit(e.exit_code());
    }
}
