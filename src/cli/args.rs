/// CLI argument parsing
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "certdrive")]
#[command(about = "Drive ACME certificate issuance for managed domains", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Store directory holding accounts, staging data, and certificates
    #[arg(global = true, short, long, default_value = ".certdrive")]
    pub store_dir: String,

    /// Driver configuration file (TOML)
    #[arg(global = true, short, long)]
    pub config: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(global = true, short, long, default_value = "info")]
    pub log_level: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Add a new managed domain. Must not overlap with existing domains.
    Add(AddArgs),

    /// List all managed domains
    List,

    /// Drive a managed domain to a persisted certificate
    Drive(DriveArgs),
}

#[derive(Parser)]
pub struct AddArgs {
    /// DNS name(s) of the managed domain; the first is canonical
    #[arg(required = true)]
    pub domains: Vec<String>,

    /// ACME directory URL of the CA
    #[arg(long, default_value = "https://acme-staging.api.letsencrypt.org/directory")]
    pub ca_url: String,

    /// Contact URI(s), e.g. mailto:admin@example.com
    #[arg(long = "contact")]
    pub contacts: Vec<String>,

    /// Terms-of-service URL the operator agrees to
    #[arg(long)]
    pub agreement: Option<String>,
}

#[derive(Parser)]
pub struct DriveArgs {
    /// Name of the managed domain
    pub name: String,
}
