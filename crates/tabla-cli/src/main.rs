mod cli;
mod commands;
mod output;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tabla_client::config::loader::load_config;
use tabla_client::geo::FixedPositionSource;
use tabla_client::logging::{init_tracing, set_log_level};
use tabla_client::{AppContext, ClientConfig};

use cli::{Cli, Commands, OutputFormat};
use output::print_error;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        print_error(&format!("{e:#}"));
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();
    let config = load_config(cli.config.as_deref()).context("Failed to load configuration")?;
    set_log_level(if cli.verbose {
        "debug"
    } else {
        config.logging.level.as_str()
    })?;
    let format = cli.format.unwrap_or_default();

    if let Commands::Config(args) = &cli.command {
        return commands::config::run(&args.command, &config, format);
    }

    let ctx = build_context(config, &cli.command)?;
    ctx.initialize().await;
    let result = dispatch(&ctx, &cli.command, format).await;
    ctx.shutdown();
    result
}

fn build_context(config: ClientConfig, command: &Commands) -> Result<AppContext> {
    let mut builder = AppContext::builder(config);
    if let Commands::Locate(args) = command
        && let Some(at) = args.at
    {
        builder = builder.position_source(Arc::new(FixedPositionSource::new(at)));
    }
    Ok(builder.build()?)
}

async fn dispatch(ctx: &AppContext, command: &Commands, format: OutputFormat) -> Result<()> {
    match command {
        Commands::Login(args) => commands::auth::login(ctx, args).await,
        Commands::Register(args) => commands::auth::register(ctx, args).await,
        Commands::Logout => commands::auth::logout(ctx).await,
        Commands::Whoami => commands::auth::whoami(ctx, format).await,
        Commands::Restaurants(args) => commands::restaurants::list(ctx, args, format).await,
        Commands::Show(args) => commands::restaurants::show(ctx, args, format).await,
        Commands::Like(args) => commands::restaurants::like(ctx, args).await,
        Commands::Reviews => commands::restaurants::reviews(ctx, format).await,
        Commands::Slots(args) => commands::restaurants::slots(ctx, args, format).await,
        Commands::Locate(args) => commands::location::run(ctx, args, format).await,
        Commands::Theme(args) => commands::theme::run(ctx, args),
        Commands::Config(args) => commands::config::run(&args.command, ctx.config(), format),
    }
}
