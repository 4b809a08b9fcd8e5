use std::process::ExitCode;

use anyhow::{Context, Result};
use commands::{DhiSearchCli, dhi_search_cli};
use dhi_catalog::CatalogConfig;
use logger::init_logger;
use tracing::debug;

mod commands;
mod logger;

async fn run(args: DhiSearchCli) -> Result<ExitCode> {
    let config = CatalogConfig::load().context("failed to load configuration")?;
    debug!(?config, "loaded configuration");
    args.handle(config).await
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = dhi_search_cli().run();
    init_logger(args.verbosity);

    match run(args).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::FAILURE
        },
    }
}
