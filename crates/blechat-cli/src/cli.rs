//! Command-line interface definitions and parsing

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<String>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Scan and print nearby devices
    Scan {
        /// How long to scan; defaults to the configured value
        #[arg(short, long)]
        seconds: Option<u64>,
    },
    /// Connect to a chat peripheral and send stdin lines to it
    Connect {
        /// Address of the peripheral
        address: String,
        /// How long to wait for the address to show up in a scan
        #[arg(long)]
        scan_seconds: Option<u64>,
    },
    /// Run the chat server and send stdin lines to subscribers
    Serve,
    /// Run both roles on the simulated radio
    Demo,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_connect() {
        let cli = Cli::parse_from(["blechat", "-v", "connect", "AA:BB", "--scan-seconds", "3"]);
        assert!(cli.verbose);
        assert_eq!(
            cli.command,
            Commands::Connect {
                address: "AA:BB".to_string(),
                scan_seconds: Some(3),
            }
        );
    }

    #[test]
    fn test_parse_scan_default() {
        let cli = Cli::parse_from(["blechat", "--config", "chat.toml", "scan"]);
        assert_eq!(cli.config.as_deref(), Some("chat.toml"));
        assert_eq!(cli.command, Commands::Scan { seconds: None });
    }
}
