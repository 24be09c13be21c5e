use std::{process, sync::Arc};

use annogate_app::cli::{Cli, Commands, ResolveArgs, ServeArgs};
use annogate_app::engine::BasicEngine;
use annogate_app::error::AppError;
use annogate_app::{bootstrap, config};
use annogate_server::RawParameters;
use tracing_subscriber::{filter::LevelFilter, fmt};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let log_level = determine_log_level(&cli);
    init_tracing(log_level);

    if let Err(err) = run(cli).await {
        eprintln!("{err}");
        process::exit(1);
    }
}

fn init_tracing(level: LevelFilter) {
    let subscriber = fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();

    if tracing::subscriber::set_global_default(subscriber).is_err() {
        tracing::warn!("Tracing subscriber already set; skipping re-initialization.");
    }
}

async fn run(cli: Cli) -> Result<(), AppError> {
    match cli.command {
        Some(Commands::Serve(args)) => run_serve(args).await?,
        Some(Commands::Resolve(args)) => run_resolve(args).await?,
        None => Cli::print_help(),
    }
    Ok(())
}

async fn run_serve(args: ServeArgs) -> Result<(), AppError> {
    let mut config = config::load()?;
    if let Some(listen) = args.listen {
        config.server.listen_addr = listen;
    }
    let state = bootstrap::gateway_state(&config, Arc::new(BasicEngine::new())).await?;
    annogate_server::serve(config.server, state).await?;
    Ok(())
}

async fn run_resolve(args: ResolveArgs) -> Result<(), AppError> {
    let config = config::load()?;
    let resolver = bootstrap::resolver(&config, bootstrap::resources(&config));
    let properties = resolver
        .resolve(&RawParameters::from_query(&args.query))
        .await?;
    let rendered = if args.compact {
        serde_json::to_string(&properties)?
    } else {
        serde_json::to_string_pretty(&properties)?
    };
    println!("{rendered}");
    Ok(())
}

fn determine_log_level(cli: &Cli) -> LevelFilter {
    match cli.command.as_ref() {
        Some(Commands::Serve(_)) => match cli.verbose {
            0 => LevelFilter::INFO,
            1 => LevelFilter::DEBUG,
            _ => LevelFilter::TRACE,
        },
        Some(Commands::Resolve(_)) => match cli.verbose {
            0 => LevelFilter::OFF,
            1 => LevelFilter::INFO,
            2 => LevelFilter::DEBUG,
            _ => LevelFilter::TRACE,
        },
        None => match cli.verbose {
            0 => LevelFilter::WARN,
            1 => LevelFilter::INFO,
            _ => LevelFilter::DEBUG,
        },
    }
}
