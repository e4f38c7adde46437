use std::env;
use std::path::PathBuf;
use std::time::Duration;

use reqwest::Url;
use thiserror::Error;

pub const HOST: &str = "HOST";
pub const PORT: &str = "PORT";

pub const VAR_VAPID_PRIVATE_KEY_PATH: &str = "VAPID_PRIVATE_KEY_PATH";
pub const VAR_VAPID_SUBJECT: &str = "VAPID_SUBJECT";
pub const VAR_PLANNER_DATA_DIR: &str = "PLANNER_DATA_DIR";
pub const VAR_APP_ORIGIN: &str = "APP_ORIGIN";
pub const VAR_RELAY_URL: &str = "RELAY_URL";
pub const VAR_STORE_QUOTA_BYTES: &str = "STORE_QUOTA_BYTES";
pub const VAR_STORE_RESCAN_SECS: &str = "STORE_RESCAN_SECS";
pub const VAR_LOG_LEVEL: &str = "LOG_LEVEL";
pub const VAR_HTTP_TIMEOUT_SECS: &str = "HTTP_TIMEOUT_SECS";

pub const REQUIRED_VARS: [&str; 2] = [VAR_VAPID_PRIVATE_KEY_PATH, VAR_VAPID_SUBJECT];

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 4000;
const DEFAULT_APP_ORIGIN: &str = "http://localhost:5173";
const DEFAULT_STORE_RESCAN_SECS: u64 = 5;
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 10;
const CONNECT_TIMEOUT_SECS: u64 = 5;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing environment variable {0}")]
    Missing(&'static str),
    #[error("{var} is not valid: {value}")]
    Invalid { var: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub vapid_private_key_path: PathBuf,
    pub vapid_subject: String,
    pub host: String,
    pub port: u16,
    pub data_dir: Option<PathBuf>,
    pub app_origin: String,
    pub relay_url: String,
    pub store_quota_bytes: Option<u64>,
    pub store_rescan_secs: u64,
    pub log_level: Option<String>,
    pub http_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Config, ConfigError> {
        Config::from_lookup(|name| env::var(name).ok())
    }

    /// Builds the configuration from any variable source. Blank values count
    /// as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Config, ConfigError> {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let required = |name: &'static str| var(name).ok_or(ConfigError::Missing(name));

        let vapid_private_key_path = PathBuf::from(required(VAR_VAPID_PRIVATE_KEY_PATH)?);
        let vapid_subject = required(VAR_VAPID_SUBJECT)?;
        if !is_contact(&vapid_subject) {
            return Err(ConfigError::Invalid {
                var: VAR_VAPID_SUBJECT,
                value: vapid_subject,
            });
        }

        let host = var(HOST).unwrap_or_else(|| DEFAULT_HOST.to_string());
        let port = parse_or(var(PORT), PORT, DEFAULT_PORT)?;
        let relay_url = var(VAR_RELAY_URL).unwrap_or_else(|| format!("http://{host}:{port}"));
        let store_quota_bytes = var(VAR_STORE_QUOTA_BYTES)
            .map(|v| parse(v, VAR_STORE_QUOTA_BYTES))
            .transpose()?;

        Ok(Config {
            vapid_private_key_path,
            vapid_subject,
            host,
            port,
            data_dir: var(VAR_PLANNER_DATA_DIR).map(PathBuf::from),
            app_origin: var(VAR_APP_ORIGIN).unwrap_or_else(|| DEFAULT_APP_ORIGIN.to_string()),
            relay_url,
            store_quota_bytes,
            store_rescan_secs: parse_or(
                var(VAR_STORE_RESCAN_SECS),
                VAR_STORE_RESCAN_SECS,
                DEFAULT_STORE_RESCAN_SECS,
            )?,
            log_level: var(VAR_LOG_LEVEL),
            http_timeout: Duration::from_secs(parse_or(
                var(VAR_HTTP_TIMEOUT_SECS),
                VAR_HTTP_TIMEOUT_SECS,
                DEFAULT_HTTP_TIMEOUT_SECS,
            )?),
        })
    }
}

/// A `mailto:` address or any web URL, `http://localhost` included.
fn is_contact(subject: &str) -> bool {
    if subject.starts_with("mailto:") {
        return true;
    }
    Url::parse(subject).map_or(false, |url| {
        matches!(url.scheme(), "http" | "https") && url.has_host()
    })
}

/// Every outbound client (push services, the relay, the app origin) gives up
/// after `timeout`, so one stuck peer cannot hold up the rest.
pub fn http_client(timeout: Duration) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS).min(timeout))
        .build()
}

fn parse<T: std::str::FromStr>(value: String, var: &'static str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Invalid { var, value })
}

fn parse_or<T: std::str::FromStr>(
    value: Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    value.map_or(Ok(default), |v| parse(v, var))
}

/// Keeps log lines readable; push endpoints carry long opaque tokens.
pub fn short_endpoint(endpoint: &str) -> String {
    let tail: String = endpoint
        .chars()
        .rev()
        .take(8)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    if tail.len() == endpoint.len() {
        return endpoint.to_string();
    }
    format!("...{tail}")
}
