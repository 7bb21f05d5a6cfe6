// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;
use tracing::error;

use zthub::config::HubConfig;

#[derive(Parser)]
#[command(name = "zthub", about = "Zero Trust overlay-network control plane")]
struct Cli {
    #[command(flatten)]
    config: HubConfig,
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

    if let Err(e) = zthub::run(cli.config).await {
        error!("fatal: {e:#}");
        let code = match e.downcast_ref::<zthub::error::HubError>() {
            Some(zthub::error::HubError::InvariantViolated) => 10,
            _ => 1,
        };
        std::process::exit(code);
    }
}
