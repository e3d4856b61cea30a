use anyhow::Context;
use sshpit::{cli::CliConfig, logging::init_tracing, server::run_server};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = CliConfig::parse()?;
    init_tracing(&cfg.log).context("failed to set up logging")?;

    run_server(cfg.server).await.context("honeypot failed to start")?;
    Ok(())
}
