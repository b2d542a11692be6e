use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// keyforge — issue API keys and register their hashes
#[derive(Parser)]
#[command(name = "keyforge", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Generate a new API key and write it to the export files
    Generate(GenerateArgs),

    /// Register a generated key's hash in the credential store
    Register {
        /// Export file written by `generate` (defaults to OUTPUT_FILE)
        #[arg(long, conflicts_with_all = ["verifier", "prefix"])]
        file: Option<PathBuf>,
        /// Register a bare SHA-256 verifier instead of an export file
        #[arg(long, requires = "prefix")]
        verifier: Option<String>,
        /// Display prefix to store with --verifier
        #[arg(long, requires = "verifier")]
        prefix: Option<String>,
        #[command(flatten)]
        key: KeyArgs,
    },

    /// Generate, export and register in one step
    Issue {
        #[command(flatten)]
        generate: GenerateArgs,
        #[command(flatten)]
        key: KeyArgs,
    },

    /// Apply pending store migrations
    Migrate,
}

#[derive(Args)]
pub struct GenerateArgs {
    /// JSON export path
    #[arg(short, long, env = "OUTPUT_FILE")]
    pub output: Option<PathBuf>,
    /// Endpoint the key is issued for
    #[arg(long, env = "KEYFORGE_ENDPOINT")]
    pub endpoint: Option<String>,
    /// Capability tag; repeat or comma-separate
    #[arg(long = "capability", env = "KEYFORGE_CAPABILITIES", value_delimiter = ',')]
    pub capabilities: Vec<String>,
}

#[derive(Args)]
pub struct KeyArgs {
    /// Display name for the key (defaults to "<service> - <purpose>")
    #[arg(long)]
    pub name: Option<String>,
    /// Tier recorded with the key
    #[arg(long, env = "KEYFORGE_TIER")]
    pub tier: Option<String>,
}
