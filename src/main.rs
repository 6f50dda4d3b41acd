use std::process::ExitCode;

use anyhow::Context as _;
use clap::Parser as _;

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(err) = try_main().await {
        eprintln!("{err:#}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

async fn try_main() -> anyhow::Result<()> {
    let cli = recipe_producer::cli::Cli::parse();
    recipe_producer::logging::init(cli.verbose).context("init logging")?;
    tracing::debug!(?cli, "parsed cli");

    recipe_producer::workspace::run(cli).await
}
