//! fanin CLI entry point.

use anyhow::Result;
use clap::Parser;

use fanin::cli::{commands, AppContext, Cli, Commands};
use fanin::domain::models::Config;
use fanin::infrastructure::config::ConfigLoader;
use fanin::infrastructure::logging::{LogConfig, LoggerImpl};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(err) => fanin::cli::handle_error(&err, cli.json),
    };

    let _logger = match LoggerImpl::init(&LogConfig::from(&config.logging)) {
        Ok(logger) => logger,
        Err(err) => fanin::cli::handle_error(&err, cli.json),
    };

    if let Err(err) = run(cli.command, config, cli.json).await {
        fanin::cli::handle_error(&err, cli.json);
    }
}

fn load_config(cli: &Cli) -> Result<Config> {
    match cli.config {
        Some(ref path) => ConfigLoader::load_from_file(path),
        None => ConfigLoader::load(),
    }
}

async fn run(command: Commands, config: Config, json: bool) -> Result<()> {
    let ctx = AppContext::open(config).await?;

    match command {
        Commands::Register(args) => commands::register::execute(args, &ctx, json).await,
        Commands::Submit(args) => commands::submit::execute(args, &ctx, json).await,
        Commands::Poll => commands::poll::execute(&ctx, json).await,
        Commands::Status(args) => commands::status::execute(args, &ctx, json).await,
        Commands::Resubmit(args) => commands::resubmit::execute(args, &ctx, json).await,
        Commands::Plan => commands::plan::execute(&ctx, json).await,
        Commands::Merge => commands::merge::execute(&ctx, json).await,
    }
}
