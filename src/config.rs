//! Process configuration, read from the environment.

use crate::error::ConfigError;
use dropshot::ConfigLoggingLevel;
use std::fmt;
use std::io;
use std::net::IpAddr;
use std::net::Ipv4Addr;
use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_BIND_ADDRESS: SocketAddr =
    SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 3000);
const DEFAULT_POOL_SIZE: u32 = 10;
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_REQUIRED_VERSION: u32 = 14;

#[derive(Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub log_level: ConfigLoggingLevel,
    pub database: DatabaseConfig,
}

pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub name: String,
    pub user: String,
    pub password: String,
    /// upper bound on open connections
    pub pool_size: u32,
    /// how long a request (or startup) waits to check out a connection
    pub connect_timeout: Duration,
    /// PostgreSQL major version the readiness gate insists on
    pub required_version: u32,
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("name", &self.name)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("pool_size", &self.pool_size)
            .field("connect_timeout", &self.connect_timeout)
            .field("required_version", &self.required_version)
            .finish()
    }
}

impl DatabaseConfig {
    /// Returns a libpq keyword/value connection string.  Values are quoted so
    /// that passwords with spaces or quotes survive.
    pub fn connection_string(&self) -> String {
        format!(
            "host={} port={} dbname={} user={} password={}",
            quote(&self.host),
            self.port,
            quote(&self.name),
            quote(&self.user),
            quote(&self.password),
        )
    }
}

fn quote(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('\'');
    for c in value.chars() {
        if c == '\'' || c == '\\' {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('\'');
    quoted
}

impl Config {
    /// Loads configuration from the process environment.
    pub fn from_env() -> Result<Config, ConfigError> {
        Config::from_lookup(|var| std::env::var(var).ok())
    }

    /// Loads configuration using `lookup` to resolve each variable.
    pub fn from_lookup<F>(lookup: F) -> Result<Config, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database = DatabaseConfig {
            host: required(&lookup, "DATABASE_HOST")?,
            port: parse(&lookup, "DATABASE_PORT", None)?,
            name: required(&lookup, "DATABASE_NAME")?,
            user: required(&lookup, "DATABASE_USER")?,
            password: required(&lookup, "DATABASE_PASSWORD")?,
            pool_size: parse(
                &lookup,
                "DATABASE_POOL_SIZE",
                Some(DEFAULT_POOL_SIZE),
            )?,
            connect_timeout: Duration::from_secs(parse(
                &lookup,
                "DATABASE_CONNECT_TIMEOUT_SECS",
                Some(DEFAULT_CONNECT_TIMEOUT_SECS),
            )?),
            required_version: parse(
                &lookup,
                "DATABASE_REQUIRED_VERSION",
                Some(DEFAULT_REQUIRED_VERSION),
            )?,
        };

        if database.pool_size == 0 {
            return Err(ConfigError::Invalid {
                var: "DATABASE_POOL_SIZE",
                value: String::from("0"),
                reason: String::from("pool must hold at least one connection"),
            });
        }

        let bind_address = match lookup("BIND_ADDRESS") {
            Some(value) => value.parse().map_err(
                |error: std::net::AddrParseError| ConfigError::Invalid {
                    var: "BIND_ADDRESS",
                    value,
                    reason: error.to_string(),
                },
            )?,
            None => DEFAULT_BIND_ADDRESS,
        };

        let log_level = match lookup("LOG_LEVEL") {
            Some(value) => parse_log_level(&value).ok_or_else(|| {
                ConfigError::Invalid {
                    var: "LOG_LEVEL",
                    value,
                    reason: String::from(
                        "expected one of trace, debug, info, warn, error, \
                         critical",
                    ),
                }
            })?,
            None => ConfigLoggingLevel::Info,
        };

        Ok(Config { bind_address, log_level, database })
    }
}

/// Reads `.env` from the working directory (or a parent) into the process
/// environment.  Having no `.env` at all is fine; one that cannot be parsed is
/// an error.
pub fn load_dotenv() -> Result<(), ConfigError> {
    ignore_missing(dotenvy::dotenv().map(|_| ()))
}

/// Like `load_dotenv`, for a specific file.
pub fn load_dotenv_from(path: &Path) -> Result<(), ConfigError> {
    ignore_missing(dotenvy::from_path(path))
}

fn ignore_missing(
    result: Result<(), dotenvy::Error>,
) -> Result<(), ConfigError> {
    match result {
        Ok(()) => Ok(()),
        Err(dotenvy::Error::Io(error))
            if error.kind() == io::ErrorKind::NotFound =>
        {
            Ok(())
        }
        Err(error) => Err(ConfigError::DotEnv(error)),
    }
}

fn required<F>(lookup: &F, var: &'static str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(var).ok_or(ConfigError::Missing { var })
}

fn parse<F, T>(
    lookup: &F,
    var: &'static str,
    default: Option<T>,
) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: fmt::Display,
{
    match (lookup(var), default) {
        (Some(value), _) => value.trim().parse().map_err(|error: T::Err| {
            ConfigError::Invalid { var, value, reason: error.to_string() }
        }),
        (None, Some(default)) => Ok(default),
        (None, None) => Err(ConfigError::Missing { var }),
    }
}

fn parse_log_level(value: &str) -> Option<ConfigLoggingLevel> {
    match value.to_ascii_lowercase().as_str() {
        "trace" => Some(ConfigLoggingLevel::Trace),
        "debug" => Some(ConfigLoggingLevel::Debug),
        "info" => Some(ConfigLoggingLevel::Info),
        "warn" => Some(ConfigLoggingLevel::Warn),
        "error" => Some(ConfigLoggingLevel::Error),
        "critical" => Some(ConfigLoggingLevel::Critical),
        _ => None,
    }
}
