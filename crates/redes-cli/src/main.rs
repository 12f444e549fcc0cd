mod bootstrap_helpers;
mod cli_args;
mod cli_types;
mod server_runtime;

use anyhow::Result;
use clap::Parser;

use crate::bootstrap_helpers::init_tracing;
use crate::cli_args::Cli;
use crate::server_runtime::server_config_from_cli;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = server_config_from_cli(&cli)?;
    redes_server::run_server(config).await
}
