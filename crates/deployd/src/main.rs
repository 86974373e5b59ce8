use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use deployd::config::DeploydConfig;
use deployd::http;

#[derive(Debug, Parser)]
#[command(name = "deployd")]
#[command(about = "Deployment orchestration and container lifecycle engine")]
struct Cli {
    #[arg(long, short)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the control plane API server.
    Serve,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    let result = match cli.command {
        Command::Serve => match DeploydConfig::load() {
            Ok(config) => http::run(&config).await,
            Err(error) => Err(error),
        },
    };

    if let Err(error) = result {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}
