//! Avatar generation CLI library

pub mod generate;
pub mod show;

// Re-export CLI types for testing
pub use clap::{Parser, Subcommand};

use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "avgen")]
#[command(about = "Generate avatars from photos with the avatar computation service")]
#[command(version, author, long_about = None)]
pub struct Cli {
    /// Log filter used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Generate an avatar from a photo and download its files
    Generate(generate::GenerateArgs),
    /// Show the stored record of an earlier generation
    Show(show::ShowArgs),
}

/// Installs the fmt subscriber; `RUST_LOG` takes precedence over `log_level`.
pub fn init_tracing(log_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
