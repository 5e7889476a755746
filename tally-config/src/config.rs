use std::error::Error;
use std::fmt;
use std::fs;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tally_log::{Level, LogConfig};
use tally_metrics::AggregatorConfig;

/// Defines the source of a config error
#[derive(Debug, Default)]
enum ConfigErrorSource {
    /// An error occurring independently.
    #[default]
    None,
    /// An error originating from a configuration file.
    File(PathBuf),
    /// An error originating in a field override (an env var, or a CLI parameter).
    FieldOverride(String),
}

impl fmt::Display for ConfigErrorSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigErrorSource::None => Ok(()),
            ConfigErrorSource::File(file_name) => write!(f, " (file {})", file_name.display()),
            ConfigErrorSource::FieldOverride(name) => write!(f, " (field {name})"),
        }
    }
}

/// Indicates config related errors.
#[derive(Debug, thiserror::Error)]
#[error("{kind}{origin}")]
pub struct ConfigError {
    origin: ConfigErrorSource,
    kind: ConfigErrorKind,
    #[source]
    source: Option<Box<dyn Error + Send + Sync + 'static>>,
}

impl ConfigError {
    #[inline]
    fn new(kind: ConfigErrorKind) -> Self {
        Self {
            origin: ConfigErrorSource::None,
            kind,
            source: None,
        }
    }

    #[inline]
    fn wrap<E>(source: E, kind: ConfigErrorKind) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        Self {
            origin: ConfigErrorSource::None,
            kind,
            source: Some(Box::new(source)),
        }
    }

    #[inline]
    fn for_field<E>(source: E, field: &'static str) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        Self::wrap(source, ConfigErrorKind::InvalidValue).field(field)
    }

    #[inline]
    fn file<P: AsRef<Path>>(mut self, p: P) -> Self {
        self.origin = ConfigErrorSource::File(p.as_ref().to_path_buf());
        self
    }

    #[inline]
    fn field(mut self, name: &'static str) -> Self {
        self.origin = ConfigErrorSource::FieldOverride(name.to_owned());
        self
    }

    /// Returns the error kind of the error.
    pub fn kind(&self) -> ConfigErrorKind {
        self.kind
    }
}

/// Indicates config related errors.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, thiserror::Error)]
pub enum ConfigErrorKind {
    /// Failed to open the file.
    #[error("could not open config file")]
    CouldNotOpenFile,
    /// Failed to save a file.
    #[error("could not write config file")]
    CouldNotWriteFile,
    /// Parsing YAML failed.
    #[error("could not parse yaml config file")]
    BadYaml,
    /// Parsing JSON failed.
    #[error("could not parse json config file")]
    BadJson,
    /// Invalid config value
    #[error("invalid config value")]
    InvalidValue,
}

/// A value outside of its permitted range.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct OutOfRange(&'static str);

trait ConfigObject: DeserializeOwned + Serialize {
    /// The basename of the config file.
    fn name() -> &'static str;

    /// The full filename of the config file, including the file extension.
    fn path(base: &Path) -> PathBuf {
        base.join(format!("{}.yml", Self::name()))
    }

    /// Loads the config file from a file within the given directory location.
    fn load(base: &Path) -> Result<Self, ConfigError> {
        let path = Self::path(base);

        let f = fs::File::open(&path)
            .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::CouldNotOpenFile).file(&path))?;

        serde_yaml::from_reader(io::BufReader::new(f))
            .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::BadYaml).file(&path))
    }
}

/// Structure used to hold information about configuration overrides via
/// CLI parameters or environment variables
#[derive(Debug, Default)]
pub struct OverridableConfig {
    /// The host the UDP listener should bind to (network interface).
    pub host: Option<String>,
    /// The port of the UDP listener.
    pub port: Option<String>,
    /// The host of the graphite backend.
    pub graphite_host: Option<String>,
    /// The plaintext port of the graphite backend.
    pub graphite_port: Option<String>,
    /// Seconds between two flushes.
    pub flush_interval: Option<String>,
    /// The percentile threshold for timers.
    pub percentile: Option<String>,
    /// The log level.
    pub log_level: Option<String>,
}

/// Settings of the UDP listener.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Server {
    /// The host the listener should bind to (network interface).
    pub host: IpAddr,
    /// The port to bind for the listener.
    pub port: u16,
    /// Maximum size of a datagram in bytes, at most `65535`.
    ///
    /// Larger datagrams are cut off and their incomplete last line is discarded.
    pub max_datagram_size: usize,
}

impl Default for Server {
    fn default() -> Self {
        Server {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 8125,
            max_datagram_size: 8192,
        }
    }
}

/// Settings of the graphite backend receiving flushed statistics.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Graphite {
    /// Host of the carbon plaintext receiver.
    ///
    /// If unset, flushed statistics are discarded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    /// Port of the carbon plaintext receiver.
    pub port: u16,
    /// Seconds to wait for the connection to be established.
    pub connect_timeout: u64,
}

impl Default for Graphite {
    fn default() -> Self {
        Graphite {
            host: None,
            port: 2003,
            connect_timeout: 5,
        }
    }
}

/// Settings for reporting Tally's own counters and timers.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Client {
    /// The `host:port` of a statsd-compatible aggregator. Usually Tally's own listener.
    ///
    /// If unset, internal metrics are not reported.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub statsd: Option<String>,
    /// Prefix for all internal metric keys.
    pub namespace: String,
}

impl Default for Client {
    fn default() -> Self {
        Client {
            statsd: None,
            namespace: "tally".to_owned(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Default, Clone)]
struct ConfigValues {
    #[serde(default)]
    server: Server,
    #[serde(default)]
    graphite: Graphite,
    #[serde(default)]
    aggregator: AggregatorConfig,
    #[serde(default)]
    client: Client,
    #[serde(default)]
    logging: LogConfig,
}

impl ConfigObject for ConfigValues {
    fn name() -> &'static str {
        "config"
    }
}

impl ConfigValues {
    fn validate(&self) -> Result<(), ConfigError> {
        let aggregator = &self.aggregator;
        if aggregator.flush_interval == 0 {
            return Err(ConfigError::for_field(
                OutOfRange("flush interval must be positive"),
                "flush_interval",
            ));
        }

        if !(1..=100).contains(&aggregator.percentile_threshold) {
            return Err(ConfigError::for_field(
                OutOfRange("percentile must be between 1 and 100"),
                "percentile",
            ));
        }

        Ok(())
    }
}

/// Config struct.
#[derive(Default)]
pub struct Config {
    values: ConfigValues,
    path: PathBuf,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("path", &self.path)
            .field("values", &self.values)
            .finish()
    }
}

impl Config {
    /// Loads a config from a given config folder.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
        let path = std::env::current_dir()
            .map(|x| x.join(path.as_ref()))
            .unwrap_or_else(|_| path.as_ref().to_path_buf());

        let values = ConfigValues::load(&path)?;
        values.validate().map_err(|e| e.file(ConfigValues::path(&path)))?;

        Ok(Config { values, path })
    }

    /// Creates a config from a JSON value.
    ///
    /// This is mostly useful for tests.
    pub fn from_json_value(value: serde_json::Value) -> Result<Config, ConfigError> {
        let values: ConfigValues = serde_json::from_value(value)
            .map_err(|err| ConfigError::wrap(err, ConfigErrorKind::BadJson))?;
        values.validate()?;

        Ok(Config {
            values,
            path: PathBuf::new(),
        })
    }

    /// Override configuration with values coming from other sources (e.g. env variables or
    /// command line parameters)
    ///
    /// Overrides are applied all at once. On error, the config remains unchanged.
    pub fn apply_override(&mut self, overrides: OverridableConfig) -> Result<&mut Self, ConfigError> {
        let mut values = self.values.clone();
        let server = &mut values.server;

        if let Some(host) = overrides.host {
            server.host = host
                .parse::<IpAddr>()
                .map_err(|err| ConfigError::for_field(err, "host"))?;
        }

        if let Some(port) = overrides.port {
            server.port = port
                .as_str()
                .parse()
                .map_err(|err| ConfigError::for_field(err, "port"))?;
        }

        let graphite = &mut values.graphite;

        if let Some(host) = overrides.graphite_host {
            graphite.host = Some(host).filter(|h| !h.is_empty());
        }

        if let Some(port) = overrides.graphite_port {
            graphite.port = port
                .as_str()
                .parse()
                .map_err(|err| ConfigError::for_field(err, "graphite_port"))?;
        }

        let aggregator = &mut values.aggregator;

        if let Some(flush_interval) = overrides.flush_interval {
            aggregator.flush_interval = flush_interval
                .parse()
                .map_err(|err| ConfigError::for_field(err, "flush_interval"))?;
        }

        if let Some(percentile) = overrides.percentile {
            aggregator.percentile_threshold = percentile
                .parse()
                .map_err(|err| ConfigError::for_field(err, "percentile"))?;
        }

        if let Some(log_level) = overrides.log_level {
            values.logging.level = log_level
                .parse::<Level>()
                .map_err(|err| ConfigError::for_field(err, "log_level"))?;
        }

        values.validate()?;
        self.values = values;
        Ok(self)
    }

    /// Checks if the config is already initialized.
    pub fn config_exists<P: AsRef<Path>>(path: P) -> bool {
        fs::metadata(ConfigValues::path(path.as_ref())).is_ok()
    }

    /// Returns the filename of the config file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Dumps out a YAML string of the values.
    pub fn to_yaml_string(&self) -> Result<String, ConfigError> {
        serde_yaml::to_string(&self.values)
            .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::CouldNotWriteFile))
    }

    /// Returns the socket address of the UDP listener.
    pub fn listen_addr(&self) -> SocketAddr {
        (self.values.server.host, self.values.server.port).into()
    }

    /// Returns the maximum size of a received datagram.
    pub fn max_datagram_size(&self) -> usize {
        self.values.server.max_datagram_size
    }

    /// Returns the `host:port` of the graphite backend, if configured.
    pub fn graphite_addr(&self) -> Option<String> {
        let graphite = &self.values.graphite;
        let host = graphite.host.as_deref()?;
        Some(format!("{host}:{}", graphite.port))
    }

    /// Returns the timeout for connecting to the graphite backend.
    pub fn graphite_connect_timeout(&self) -> Duration {
        Duration::from_secs(self.values.graphite.connect_timeout)
    }

    /// Returns the aggregator configuration.
    pub fn aggregator_config(&self) -> &AggregatorConfig {
        &self.values.aggregator
    }

    /// Returns the address internal metrics are reported to, if configured.
    pub fn statsd_addr(&self) -> Option<&str> {
        self.values.client.statsd.as_deref()
    }

    /// Returns the prefix for internal metric keys.
    pub fn metrics_namespace(&self) -> &str {
        &self.values.client.namespace
    }

    /// Returns the logging configuration.
    pub fn logging(&self) -> &LogConfig {
        &self.values.logging
    }
}
