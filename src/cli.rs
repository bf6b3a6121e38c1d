//! Command-line interface definitions using clap derive macros.
//!
//! Contains the top-level [`Cli`] parser, the [`Commands`] enum for
//! subcommands (run, init, validate, health, logs), and their associated
//! argument structs. Every `run` flag has an environment variable
//! equivalent for container deployments.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(
    name = "tapwire",
    version,
    about = "Streaming reverse proxy that records every exchange",
    propagate_version = true,
    after_help = "\x1b[1mQuick start:\x1b[0m\n  \
        tapwire init                     Create a starter config\n  \
        tapwire run                      Start with ./tapwire.yaml\n  \
        tapwire run -c routes.yaml       Start with a specific config"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the proxy server
    Run(Box<RunArgs>),

    /// Generate a starter config file
    Init(InitArgs),

    /// Validate a config file without starting
    Validate(ValidateArgs),

    /// Check health of a running instance
    Health(HealthArgs),

    /// Show recently recorded exchanges
    #[cfg(feature = "sqlite")]
    Logs(LogsArgs),
}

#[derive(Args)]
#[command(after_help = "\x1b[1mExamples:\x1b[0m\n  \
        tapwire run                                     Auto-detect config\n  \
        tapwire run -c routes.yaml -p 8080 --pretty     Local dev mode\n  \
        tapwire run --sqlite-path exchanges.db          Record into SQLite")]
pub struct RunArgs {
    /// Config file path (.yaml, .json, .toml)
    #[arg(short, long, env = "CONFIG_FILE")]
    pub config: Option<PathBuf>,

    /// Listen port
    #[arg(short, long, env = "PORT", default_value_t = 3000)]
    pub port: u16,

    /// Listen address
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    // -- Log Store --
    /// `SQLite` database recording every exchange (created if missing).
    /// Without it, exchanges are emitted as log events.
    #[cfg(feature = "sqlite")]
    #[arg(long, env = "SQLITE_PATH", help_heading = "Log Store")]
    pub sqlite_path: Option<PathBuf>,

    // -- Logging --
    /// Log level
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: LogLevel,

    /// Force pretty (human-readable) log output
    #[arg(long)]
    pub pretty: bool,

    /// Force JSON log output (overrides TTY detection)
    #[arg(long, conflicts_with = "pretty")]
    pub json: bool,

    // -- Tuning --
    /// Upstream header timeout in milliseconds (overrides `defaults.timeout`)
    #[arg(long, env = "UPSTREAM_TIMEOUT_MS", help_heading = "Tuning")]
    pub timeout: Option<u64>,

    /// Max request body size in bytes
    #[arg(
        long,
        env = "MAX_BODY_SIZE",
        default_value_t = 1_048_576,
        help_heading = "Tuning"
    )]
    pub max_body: usize,
}

#[derive(Args)]
#[command(after_help = "\x1b[1mExamples:\x1b[0m\n  \
        tapwire init                            Quick start config (yaml)\n  \
        tapwire init --full                     Every option, documented\n  \
        tapwire init -f toml -o config.toml     TOML format")]
pub struct InitArgs {
    /// Output format
    #[arg(short, long, default_value = "yaml")]
    pub format: ConfigFormat,

    /// Output file path
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Include full documentation as comments
    #[arg(long)]
    pub full: bool,
}

#[derive(Args)]
pub struct ValidateArgs {
    /// Config file to validate
    #[arg(default_value = "tapwire.yaml")]
    pub config: PathBuf,

    /// Output format
    #[arg(long, default_value = "text")]
    pub format: ValidateFormat,
}

#[derive(Args)]
pub struct HealthArgs {
    /// URL of the running instance
    #[arg(default_value = "http://localhost:3000")]
    pub url: String,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[cfg(feature = "sqlite")]
#[derive(Args)]
pub struct LogsArgs {
    /// `SQLite` database written by `tapwire run --sqlite-path`
    #[arg(long, env = "SQLITE_PATH", default_value = "tapwire.db")]
    pub sqlite_path: PathBuf,

    /// Number of most recent exchanges to show
    #[arg(short = 'n', long, default_value_t = 20)]
    pub limit: u32,

    /// Output as JSON lines
    #[arg(long)]
    pub json: bool,
}

#[derive(Clone, Debug, ValueEnum)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    #[must_use]
    pub const fn to_tracing_level(&self) -> tracing::Level {
        match self {
            Self::Trace => tracing::Level::TRACE,
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warn => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }
}

#[derive(Clone, Debug, ValueEnum)]
pub enum ConfigFormat {
    Yaml,
    Json,
    Toml,
}

impl ConfigFormat {
    #[must_use]
    pub const fn extension(&self) -> &'static str {
        match self {
            Self::Yaml => "yaml",
            Self::Json => "json",
            Self::Toml => "toml",
        }
    }
}

#[derive(Clone, Debug, ValueEnum)]
pub enum ValidateFormat {
    Text,
    Json,
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_defaults() {
        let cli = Cli::try_parse_from(["tapwire", "run"]).unwrap();
        let Some(Commands::Run(args)) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.port, 3000);
        assert!(args.timeout.is_none());
        assert_eq!(args.max_body, 1_048_576);
    }

    #[test]
    fn pretty_and_json_conflict() {
        assert!(Cli::try_parse_from(["tapwire", "run", "--pretty", "--json"]).is_err());
    }
}
