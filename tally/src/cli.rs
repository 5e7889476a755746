use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tally_config::{Config, OverridableConfig};

use crate::setup;

/// The config folder used when `--config` is not passed.
///
/// Unlike an explicitly requested folder, it may be missing. Defaults are used in that case.
const DEFAULT_CONFIG_PATH: &str = ".tally";

/// Tally aggregates counters and timers received over UDP and flushes them to graphite.
#[derive(Debug, Parser)]
#[command(
    name = "tally",
    version,
    subcommand_required = true,
    arg_required_else_help = true,
    disable_help_subcommand = true,
    max_term_width = 79
)]
struct Cli {
    /// The path to the config folder.
    #[arg(short, long, global = true, value_name = "CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the aggregation server.
    ///
    /// This runs the server in the foreground until it receives SIGINT or SIGTERM. It binds to
    /// the port and network interface configured in the config file or passed as options. On
    /// shutdown, the remaining statistics are flushed one last time.
    Run(OverrideArgs),

    /// Manage the configuration.
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Debug, Subcommand)]
enum ConfigCommand {
    /// Show the entire config for debugging purposes.
    ///
    /// This dumps the entire config including the values which are not in the config file but
    /// filled in from defaults, environment variables or options.
    Show(OverrideArgs),
}

/// Options overriding values of the config file.
#[derive(Debug, Args)]
struct OverrideArgs {
    /// The host the UDP listener binds to.
    #[arg(long, value_name = "HOST", env = "TALLY_HOST")]
    host: Option<String>,

    /// The port the UDP listener binds to.
    #[arg(long, value_name = "PORT", env = "TALLY_PORT")]
    port: Option<String>,

    /// The host of the graphite plaintext receiver.
    #[arg(long, value_name = "HOST", env = "TALLY_GRAPHITE_HOST")]
    graphite_host: Option<String>,

    /// The port of the graphite plaintext receiver.
    #[arg(long, value_name = "PORT", env = "TALLY_GRAPHITE_PORT")]
    graphite_port: Option<String>,

    /// Seconds between two flushes.
    #[arg(long, value_name = "SECONDS", env = "TALLY_FLUSH_INTERVAL")]
    flush_interval: Option<String>,

    /// The percentile threshold for timer statistics (1 to 100).
    #[arg(long, value_name = "PERCENT", env = "TALLY_PERCENTILE")]
    percentile: Option<String>,

    /// The log level (off, error, warn, info, debug or trace).
    #[arg(long, value_name = "LEVEL", env = "TALLY_LOG_LEVEL")]
    log_level: Option<String>,
}

impl From<OverrideArgs> for OverridableConfig {
    fn from(args: OverrideArgs) -> Self {
        OverridableConfig {
            host: args.host,
            port: args.port,
            graphite_host: args.graphite_host,
            graphite_port: args.graphite_port,
            flush_interval: args.flush_interval,
            percentile: args.percentile,
            log_level: args.log_level,
        }
    }
}

/// Loads the config from `path`, or from the default folder if it exists.
fn load_config(path: Option<&Path>) -> Result<Config> {
    let config = match path {
        Some(path) => Config::from_path(path)
            .with_context(|| format!("could not load config from {}", path.display()))?,
        None if Config::config_exists(DEFAULT_CONFIG_PATH) => {
            Config::from_path(DEFAULT_CONFIG_PATH)?
        }
        None => Config::default(),
    };

    Ok(config)
}

fn load_effective_config(path: Option<&Path>, overrides: OverrideArgs) -> Result<Config> {
    let mut config = load_config(path)?;
    config.apply_override(overrides.into())?;
    Ok(config)
}

/// Runs the command line application.
pub fn execute() -> Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.as_deref();

    match cli.command {
        Command::Run(overrides) => run(load_effective_config(config_path, overrides)?),
        Command::Config(ConfigCommand::Show(overrides)) => {
            setup::dump_config(&load_effective_config(config_path, overrides)?)
        }
    }
}

fn run(config: Config) -> Result<()> {
    setup::init_logging(&config);
    setup::dump_spawn_infos(&config);
    setup::init_metrics(&config)?;

    tally_server::run(config)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run_overrides() {
        let cli = Cli::try_parse_from([
            "tally",
            "run",
            "--port",
            "9125",
            "--graphite-host",
            "carbon.local",
            "--percentile",
            "90",
        ])
        .unwrap();

        let Command::Run(args) = cli.command else {
            panic!("expected run command");
        };

        let overrides = OverridableConfig::from(args);
        assert_eq!(overrides.port.as_deref(), Some("9125"));
        assert_eq!(overrides.graphite_host.as_deref(), Some("carbon.local"));
        assert_eq!(overrides.percentile.as_deref(), Some("90"));
    }

    #[test]
    fn test_global_config_flag() {
        let cli = Cli::try_parse_from(["tally", "config", "show", "--config", "/etc/tally"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/etc/tally")));
        assert!(matches!(cli.command, Command::Config(ConfigCommand::Show(_))));
    }

    #[test]
    fn test_subcommand_required() {
        assert!(Cli::try_parse_from(["tally"]).is_err());
    }

    #[test]
    fn test_explicit_config_must_exist() {
        let error = load_config(Some(Path::new("/nonexistent/tally"))).unwrap_err();
        assert!(error.to_string().contains("/nonexistent/tally"), "{error:#}");
    }
}
