use anyhow::Result;
use clap::Parser;
use ladle_server::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .target(env_logger::Target::Stderr)
        .filter_module("ort", log::LevelFilter::Warn)
        .init();

    ladle_server::run(cli).await
}
