mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Commands};
use tracing_subscriber::EnvFilter;

fn init_logging(json_logs: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    if json_logs {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging(cli.json_logs);

    match cli.command {
        Commands::Version => commands::version::run()?,
        Commands::Check { config, policies, tenants } => {
            commands::check::run(&config, policies.as_deref(), tenants.as_deref())?;
        }
        Commands::Serve { addr, config, policies, tenants } => {
            commands::serve::run(&addr, &config, policies.as_deref(), tenants.as_deref()).await?;
        }
    }

    Ok(())
}
