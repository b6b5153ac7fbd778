use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use hyperswap_deploy::CONFIG_FILENAME;
use tracing::level_filters::LevelFilter;

#[derive(Parser)]
#[command(name = "hyperswap")]
#[command(
    author,
    version,
    about = "Deploy and verify the hyperswap contracts across chains"
)]
pub struct Cli {
    /// The verbosity level.
    #[arg(short, long, env = "HYPERSWAP_VERBOSITY", default_value_t = LevelFilter::INFO)]
    pub verbosity: LevelFilter,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Deploy and initialize the contracts on every configured chain.
    Deploy(DeployArgs),
    /// Verify the deployed contracts against the configuration.
    Check(CheckArgs),
}

#[derive(Debug, Clone, Args)]
pub struct DeployArgs {
    /// Path to the Hyperswap.toml configuration file, or to the directory containing it.
    #[arg(short, long, alias = "conf", env = "HYPERSWAP_CONFIG", default_value = CONFIG_FILENAME)]
    pub config: PathBuf,

    /// Redeploy every chain.
    /// If not provided, chains with a complete bundle in the address book are skipped.
    #[arg(long, env = "HYPERSWAP_REDEPLOY", default_value_t = false)]
    pub redeploy: bool,
}

#[derive(Debug, Clone, Args)]
pub struct CheckArgs {
    /// Path to the Hyperswap.toml configuration file, or to the directory containing it.
    #[arg(short, long, alias = "conf", env = "HYPERSWAP_CONFIG", default_value = CONFIG_FILENAME)]
    pub config: PathBuf,

    /// Address book to check. Defaults to the one named in the configuration.
    #[arg(long, env = "HYPERSWAP_ADDRESS_BOOK")]
    pub address_book: Option<PathBuf>,
}
