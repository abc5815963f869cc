//! Command Line and Logging
//!
//! Command-line interface, logging setup and build information for the
//! modem relay daemon.

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::{fmt, EnvFilter};

/// Modem relay daemon command-line interface
#[derive(Parser, Debug)]
#[command(name = "modem-relay-daemon")]
#[command(about = "Relays a ModemManager modem to a chat control channel", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Set log level (error, warn, info, debug, trace)
    #[arg(short, long, value_name = "LEVEL", default_value = "info")]
    pub log_level: String,

    /// Enable JSON structured logging
    #[arg(long)]
    pub json_logs: bool,

    /// Show timestamps in logs
    #[arg(long, default_value_t = true, action = ArgAction::Set, value_name = "BOOL")]
    pub timestamps: bool,

    /// Configuration file (default: $XDG_CONFIG_HOME/modem-relay/daemon.toml)
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Run against an in-memory modem instead of ModemManager
    #[arg(long)]
    pub simulate: bool,

    /// Diagnostic subcommand
    #[command(subcommand)]
    pub command: Option<DiagnosticCommand>,
}

/// One-shot commands that run instead of the daemon
#[derive(Subcommand, Debug)]
pub enum DiagnosticCommand {
    /// Show daemon version and build information
    Version {
        /// Show detailed build information
        #[arg(long)]
        verbose: bool,
    },

    /// Show the effective configuration
    DumpConfig,

    /// Print the modem status report
    Status {
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// List the messages stored on the modem
    ListSms,
}

/// Initialize logging based on CLI configuration
pub fn init_logging(cli: &Cli) -> Result<()> {
    let log_level = cli.log_level.parse::<Level>().with_context(|| {
        format!(
            "Invalid log level '{}'. Valid levels: error, warn, info, debug, trace",
            cli.log_level
        )
    })?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level.as_str()))
        .context("Failed to create log filter")?;

    let subscriber = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .with_file(true)
        .with_line_number(true);

    match (cli.json_logs, cli.timestamps) {
        (true, true) => subscriber.json().init(),
        (true, false) => subscriber.without_time().json().init(),
        (false, true) => subscriber.init(),
        (false, false) => subscriber.without_time().init(),
    }

    info!(
        "Logging initialized: level={}, json={}, timestamps={}",
        log_level, cli.json_logs, cli.timestamps
    );
    Ok(())
}

/// Build information for diagnostics
pub struct BuildInfo {
    pub version: &'static str,
    pub git_hash: Option<&'static str>,
}

impl BuildInfo {
    pub fn get() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION"),
            git_hash: option_env!("GIT_HASH"),
        }
    }

    pub fn display(&self, verbose: bool) {
        println!("Modem relay daemon v{}", self.version);

        if verbose {
            if let Some(hash) = self.git_hash {
                println!("Git commit: {}", hash);
            }
            println!("Platform: {}", std::env::consts::OS);
            println!("Architecture: {}", std::env::consts::ARCH);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["modem-relay-daemon"]);
        assert_eq!(cli.log_level, "info");
        assert!(cli.timestamps);
        assert!(!cli.json_logs);
        assert!(!cli.simulate);
        assert!(cli.config.is_none());
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_cli_flags_and_subcommand() {
        let cli = Cli::parse_from([
            "modem-relay-daemon",
            "--simulate",
            "--timestamps",
            "false",
            "--config",
            "/tmp/relay.toml",
            "status",
            "--json",
        ]);
        assert!(cli.simulate);
        assert!(!cli.timestamps);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/relay.toml")));
        assert!(matches!(cli.command, Some(DiagnosticCommand::Status { json: true })));
    }

    #[test]
    fn test_cli_rejects_unknown_subcommand() {
        assert!(Cli::try_parse_from(["modem-relay-daemon", "reboot"]).is_err());
    }

    #[test]
    fn test_build_info() {
        let build_info = BuildInfo::get();
        assert!(!build_info.version.is_empty());
    }
}
