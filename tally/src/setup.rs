use anyhow::Result;
use tally_client::ClientConfig;
use tally_config::Config;

/// Initializes logging from the `logging` section of the config.
pub fn init_logging(config: &Config) {
    tally_log::init(config.logging());
}

/// Print spawn infos to the log.
pub fn dump_spawn_infos(config: &Config) {
    if config.path().as_os_str().is_empty() {
        tally_log::info!("launching tally without config folder");
    } else {
        tally_log::info!(
            "launching tally from config folder {}",
            config.path().display()
        );
    }
    tally_log::info!("  log level: {}", config.logging().level);
}

/// Initialize the metric system for internal measurements.
///
/// Without `client.statsd` in the config, internal metrics are not reported.
pub fn init_metrics(config: &Config) -> Result<()> {
    let Some(host) = config.statsd_addr() else {
        return Ok(());
    };

    tally_client::init(ClientConfig {
        namespace: config.metrics_namespace(),
        host,
    })?;

    Ok(())
}

/// Prints the effective config as YAML.
#[allow(clippy::print_stdout)]
pub fn dump_config(config: &Config) -> Result<()> {
    if config.path().as_os_str().is_empty() {
        println!("# config: defaults");
    } else {
        println!("# config: {}", config.path().display());
    }
    print!("{}", config.to_yaml_string()?);
    Ok(())
}
