mod cli;

use clap::Parser as ClapParser;
use cli::{Cli, Commands};
use foreman::config::parse_duration;
use foreman::{ConsoleSink, Foreman, Graph, Parser, Result, Settings};
use std::sync::Arc;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        std::process::exit(e.exit_code());
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    match cli.command {
        Commands::Start {
            procfile,
            tick_interval,
            workers,
            max_services,
            signal_buffer,
            grace,
        } => {
            let settings = Settings {
                tick_interval: parse_duration(&tick_interval)?,
                workers,
                max_services,
                signal_buffer,
                grace: parse_duration(&grace)?,
            };

            let manifest = Parser::new().load(&procfile)?;
            let foreman = Foreman::new(procfile, manifest, settings, Arc::new(ConsoleSink))?;
            foreman.run().await
        }
        Commands::Check { procfile } => {
            let manifest = Parser::new().load(&procfile)?;
            let order = Graph::build(&manifest).topo_sort()?;
            println!("{} services, launch order: {}", order.len(), order.join(", "));
            Ok(())
        }
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}
