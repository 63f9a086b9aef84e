//! Entry point: configuration, the sweep timer, and the stdio RPC loop.

mod bootstrap_helpers;
mod cli;
mod rpc;

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;

use claude_mcp_core::SessionManager;
use claude_mcp_tools::ToolRegistry;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = cli::Cli::parse();
    bootstrap_helpers::init_tracing(cli.debug);

    let config = Arc::new(cli.into_config()?);
    tracing::debug!(?config, "resolved configuration");

    let manager = SessionManager::new(config.clone());
    let registry = ToolRegistry::new(manager.clone(), config.clone());

    let sweep_manager = manager.clone();
    let sweep_interval = config.sweep_interval;
    let sweeper = tokio::spawn(async move {
        loop {
            tokio::time::sleep(sweep_interval).await;
            sweep_manager.sweep();
        }
    });

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let mut stdout = tokio::io::stdout();
    tokio::select! {
        served = rpc::serve(stdin, &mut stdout, &registry) => {
            let report = served?;
            tracing::debug!(
                frames = report.processed_frames,
                errors = report.error_count,
                "stdin closed; rpc loop finished"
            );
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::debug!("interrupt received; sweeping before exit");
        }
    }

    sweeper.abort();
    manager.sweep();
    Ok(())
}
