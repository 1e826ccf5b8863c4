use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "ai-gatewayd")]
#[command(about = "Inline security and governance gateway for generative-AI traffic")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Emit structured logs as JSON instead of the default human-readable
    /// formatter.
    #[arg(long, global = true)]
    pub json_logs: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Display application version
    Version,

    /// Validate a gateway config/policy/tenant document without starting
    /// the server
    Check {
        #[arg(long, default_value = "config.yaml")]
        config: String,
        #[arg(long)]
        policies: Option<String>,
        #[arg(long)]
        tenants: Option<String>,
    },

    /// Start the gateway's admin HTTP surface (health, metrics, demo
    /// ingress route)
    Serve {
        #[arg(long, default_value = "0.0.0.0:8080")]
        addr: String,
        #[arg(long, default_value = "config.yaml")]
        config: String,
        #[arg(long)]
        policies: Option<String>,
        #[arg(long)]
        tenants: Option<String>,
    },
}
