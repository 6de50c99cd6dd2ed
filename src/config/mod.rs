//! Command-line surface and resolved application configuration.
//!
//! `Cli` is what clap parses; `Config` is the immutable result of resolving it
//! once at startup: broker list split and trimmed, CA file checked, client id
//! derived from the host name when absent. Every later stage reads from
//! `Config` and nothing mutates it.

use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use clap::Parser;
use mtrwatch_mqtt::{split_broker_list, SubscriberConfig, TlsConfig, DEFAULT_TOPIC};
use validator::Validate;

use self::logger::{LogFormat, LoggerConfig};

pub mod logger;

/// Timestamp used by the `print_*` macros.
#[doc(hidden)]
pub fn timestamp() -> String {
    const FORMAT: &[time::format_description::FormatItem<'_>] = time::macros::format_description!(
        "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:6]Z"
    );
    time::OffsetDateTime::now_utc()
        .format(FORMAT)
        .unwrap_or_default()
}

/// Simple macros for printing timestamped messages before the tracing subscriber
/// is initialized. These are used during early configuration loading.
#[macro_export]
macro_rules! print_info {
    ($($arg:tt)*) => {
        eprintln!("{}  {} {}",
            console::style($crate::config::timestamp()).dim(),
            console::style("INFO").green(),
            format_args!($($arg)*)
        );
    };
}

#[macro_export]
macro_rules! print_warn {
    ($($arg:tt)*) => {
        eprintln!("{}  {} {}",
            console::style($crate::config::timestamp()).dim(),
            console::style("WARN").yellow(),
            format_args!($($arg)*)
        );
    };
}

#[macro_export]
macro_rules! print_error {
    ($($arg:tt)*) => {
        eprintln!("{}  {} {}",
            console::style($crate::config::timestamp()).dim(),
            console::style("ERROR").red(),
            format_args!($($arg)*)
        );
    };
}

/// Errors that can occur while resolving the configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The broker list contained no usable entry.
    #[error("No broker URL given, use --broker-urls or MQTT_URLS")]
    MissingBrokers,

    /// The CA certificate cannot be accessed.
    #[error("Error reading CA certificate {path}: {source}")]
    CaFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// No client id was given and the host name is unknown.
    #[error("Can't get the hostname to use it as the ClientID, use --clientid option")]
    Hostname,

    /// Validation failure on the resolved settings.
    #[error("Validation error: {0}")]
    ValidationError(#[from] validator::ValidationErrors),
}

/// Subscribe to mtr reports on one or more MQTT brokers and print them as tables.
#[derive(Debug, Clone, Parser)]
#[command(name = "mtrwatch", version, about)]
pub struct Cli {
    /// Comma separated MQTT broker URLs
    #[arg(long = "broker-urls", env = "MQTT_URLS", value_name = "URLS")]
    pub broker_urls: String,

    /// CA certificate when using TLS (optional)
    #[arg(long, value_name = "FILE")]
    pub cafile: Option<PathBuf>,

    /// MQTT topic
    #[arg(long, default_value = DEFAULT_TOPIC)]
    pub topic: String,

    /// Use a custom MQTT client ID
    #[arg(long = "clientid", value_name = "ID")]
    pub client_id: Option<String>,

    /// Don't verify the server's certificate chain and host name
    #[arg(long)]
    pub insecure: bool,

    /// Print debugging messages
    #[arg(long)]
    pub debug: bool,

    /// Filter reports by country code
    #[arg(long = "country-code", value_name = "CODE")]
    pub country_code: Option<String>,

    /// Log output format
    #[arg(long = "log-format", value_enum, default_value_t = LogFormat::Compact)]
    pub log_format: LogFormat,

    /// MQTT keep-alive interval in seconds
    #[arg(long = "keep-alive", default_value_t = 60, value_name = "SECS")]
    pub keep_alive: u64,

    /// Seconds allowed for each broker to acknowledge connect and subscribe
    #[arg(long = "connect-timeout", default_value_t = 30, value_name = "SECS")]
    pub connect_timeout: u64,

    /// Grace period for each broker disconnect at shutdown
    #[arg(long = "disconnect-timeout-ms", default_value_t = 250, value_name = "MS")]
    pub disconnect_timeout_ms: u64,

    /// Disable colours in rendered reports
    #[arg(long = "no-color")]
    pub no_color: bool,
}

/// Top-level application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Logging subsystem configuration.
    pub logger: LoggerConfig,

    /// Broker connection settings.
    pub subscriber: SubscriberConfig,

    /// Country code reports must match; empty accepts every report with an origin.
    pub country_code: String,

    /// Whether the renderer emits ANSI styling.
    pub colored: bool,

    /// Grace period for each disconnect at shutdown.
    pub disconnect_grace: Duration,
}

impl Config {
    /// Parses the process arguments and resolves them.
    pub fn new() -> Result<Self, ConfigError> {
        Self::from_cli(Cli::parse())
    }

    /// Resolves parsed arguments, using the local host name as default client id.
    pub fn from_cli(cli: Cli) -> Result<Self, ConfigError> {
        Self::resolve(cli, local_hostname)
    }

    fn resolve(cli: Cli, hostname: impl FnOnce() -> Option<String>) -> Result<Self, ConfigError> {
        let brokers = split_broker_list(&cli.broker_urls);
        if brokers.is_empty() {
            return Err(ConfigError::MissingBrokers);
        }

        if let Some(path) = &cli.cafile {
            check_ca_file(path)?;
        }

        let client_id = match cli.client_id.filter(|id| !id.trim().is_empty()) {
            Some(id) => id,
            None => hostname().ok_or(ConfigError::Hostname)?,
        };

        let subscriber = SubscriberConfig {
            brokers,
            topic: cli.topic,
            client_id,
            keep_alive: cli.keep_alive,
            connection_timeout: cli.connect_timeout,
            tls: TlsConfig {
                ca_cert_path: cli.cafile,
                insecure: cli.insecure,
            },
            ..Default::default()
        };
        subscriber.validate()?;

        let mut logger = if cli.debug {
            LoggerConfig::debug()
        } else {
            LoggerConfig::default()
        };
        if let Some(console) = logger.console.as_mut() {
            console.format = cli.log_format;
            console.ansi_colors = !cli.no_color;
        }

        Ok(Config {
            logger,
            subscriber,
            country_code: cli.country_code.unwrap_or_default(),
            colored: !cli.no_color && console::colors_enabled(),
            disconnect_grace: Duration::from_millis(cli.disconnect_timeout_ms),
        })
    }
}

fn check_ca_file(path: &Path) -> Result<(), ConfigError> {
    let ca_error = |source| ConfigError::CaFile {
        path: path.to_path_buf(),
        source,
    };
    let metadata = fs::metadata(path).map_err(ca_error)?;
    if !metadata.is_file() {
        return Err(ca_error(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "not a regular file",
        )));
    }
    Ok(())
}

/// Local host name from `HOSTNAME`, `/etc/hostname` or the kernel.
pub fn local_hostname() -> Option<String> {
    let from_env = env::var("HOSTNAME").ok();
    let candidates = from_env.into_iter().chain(
        ["/etc/hostname", "/proc/sys/kernel/hostname"]
            .iter()
            .filter_map(|path| fs::read_to_string(path).ok()),
    );

    candidates
        .map(|name| name.trim().to_string())
        .find(|name| !name.is_empty())
}
