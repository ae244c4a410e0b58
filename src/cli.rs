//! Command-line interface for Harbormaster
//!
//! Uses clap with derive for type-safe CLI parsing

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

/// Harbormaster - fleet health supervisor
#[derive(Parser)]
#[command(name = "harbormaster")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "harbormaster.toml")]
    pub config: PathBuf,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand)]
pub enum Commands {
    /// Validate configuration
    Check,

    /// Write a configuration template
    Init {
        /// Overwrite an existing file
        #[arg(short = 'y', long)]
        force: bool,
    },

    /// Probe every app once and remediate failures (for cron)
    Sweep,

    /// Show health, last restart and circuit state per app
    Status {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Restart every app of a region, one after another
    RestartRegion {
        /// Region code (e.g. US)
        region: String,

        /// Who asked for the restart
        #[arg(short, long, default_value = "user")]
        operator: String,
    },

    /// Restart every app at once
    RestartAll {
        /// Who asked for the restart
        #[arg(short, long, default_value = "user")]
        operator: String,
    },

    /// Run the HTTP trigger surface and the sweep timer
    Serve {
        /// Listen address (overrides config)
        #[arg(short, long)]
        listen: Option<String>,

        /// Seconds between sweeps (overrides config)
        #[arg(short, long)]
        interval: Option<u64>,
    },

    /// Generate shell completion scripts
    Completion {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Generate shell completion scripts
    pub fn generate_completion(shell: Shell) {
        let mut cmd = Self::command();
        clap_complete::generate(shell, &mut cmd, "harbormaster", &mut std::io::stdout());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_restart_region_defaults_operator() {
        let cli = Cli::try_parse_from(["harbormaster", "restart-region", "US"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("harbormaster.toml"));
        match cli.command {
            Commands::RestartRegion { region, operator } => {
                assert_eq!(region, "US");
                assert_eq!(operator, "user");
            }
            _ => panic!("expected restart-region"),
        }
    }

    #[test]
    fn test_serve_overrides() {
        let cli = Cli::try_parse_from([
            "harbormaster",
            "-c",
            "/etc/hm.toml",
            "serve",
            "--listen",
            "127.0.0.1:9000",
            "--interval",
            "60",
        ])
        .unwrap();
        assert_eq!(cli.config, PathBuf::from("/etc/hm.toml"));
        match cli.command {
            Commands::Serve { listen, interval } => {
                assert_eq!(listen.as_deref(), Some("127.0.0.1:9000"));
                assert_eq!(interval, Some(60));
            }
            _ => panic!("expected serve"),
        }
    }
}
