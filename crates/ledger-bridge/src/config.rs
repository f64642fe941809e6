//! Ledger Bridge configuration.
//!
//! Configuration is loaded from environment variables. All sensitive
//! fields are redacted in Debug output.

use secrecy::SecretString;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Chain id used when the ledger's chain-id query fails.
pub const DEFAULT_FALLBACK_CHAIN_ID: u64 = 97;

/// Gas limit attached to every write.
pub const DEFAULT_GAS_LIMIT: u64 = 3_000_000;

/// Receipt polling interval in milliseconds.
pub const DEFAULT_RECEIPT_POLL_INTERVAL_MS: u64 = 2_000;

/// Ledger event polling interval in milliseconds.
pub const DEFAULT_EVENT_POLL_INTERVAL_MS: u64 = 1_000;

/// Coordinator safety re-signal interval in milliseconds.
pub const DEFAULT_SAFETY_INTERVAL_MS: u64 = 5_000;

/// Default session broker base URL.
pub const DEFAULT_BROKER_BASE_URL: &str = "https://rtc.live.cloudflare.com/v1/apps";

/// Default broker HTTP timeout in seconds.
pub const DEFAULT_BROKER_REQUEST_TIMEOUT_SECONDS: u64 = 10;

/// Default bind address for the relay, health and metrics server.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8080";

/// Settings consumed by the transaction coordinator.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Room registry contract every write targets.
    pub contract_address: String,
    pub fallback_chain_id: u64,
    pub gas_limit: u64,
    pub receipt_poll_interval: Duration,
    /// `None` polls until a receipt or a non-"not found" error arrives.
    pub receipt_timeout: Option<Duration>,
    pub safety_interval: Duration,
}

impl CoordinatorConfig {
    /// Coordinator settings with production defaults for the given contract.
    pub fn new(contract_address: impl Into<String>) -> Self {
        Self {
            contract_address: contract_address.into(),
            fallback_chain_id: DEFAULT_FALLBACK_CHAIN_ID,
            gas_limit: DEFAULT_GAS_LIMIT,
            receipt_poll_interval: Duration::from_millis(DEFAULT_RECEIPT_POLL_INTERVAL_MS),
            receipt_timeout: None,
            safety_interval: Duration::from_millis(DEFAULT_SAFETY_INTERVAL_MS),
        }
    }
}

/// Ledger Bridge configuration.
#[derive(Clone)]
pub struct Config {
    /// Ledger gateway JSON-RPC endpoint.
    pub ledger_rpc_url: String,

    /// Hex-encoded Ed25519 seed for the signing identity.
    /// Protected by `SecretString` to prevent accidental logging.
    pub signing_key: SecretString,

    pub coordinator: CoordinatorConfig,

    /// Ledger event polling interval.
    pub event_poll_interval: Duration,

    /// Session broker base URL (default: Cloudflare Calls apps endpoint).
    pub broker_base_url: String,

    /// Session broker application id.
    pub broker_app_id: String,

    /// Session broker bearer secret.
    pub broker_app_secret: SecretString,

    pub broker_request_timeout: Duration,

    /// Bind address for `/ws`, `/health`, `/ready` and `/metrics`.
    pub bind_address: String,
}

/// Custom Debug implementation that redacts sensitive fields.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("ledger_rpc_url", &self.ledger_rpc_url)
            .field("signing_key", &"[REDACTED]")
            .field("coordinator", &self.coordinator)
            .field("event_poll_interval", &self.event_poll_interval)
            .field("broker_base_url", &self.broker_base_url)
            .field("broker_app_id", &self.broker_app_id)
            .field("broker_app_secret", &"[REDACTED]")
            .field("broker_request_timeout", &self.broker_request_timeout)
            .field("bind_address", &self.bind_address)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let ledger_rpc_url = require_url(vars, "LEDGER_RPC_URL")?;
        let contract_address = require(vars, "LEDGER_CONTRACT_ADDRESS")?;
        let signing_key = SecretString::from(require(vars, "LEDGER_SIGNING_KEY")?);
        let broker_app_id = require(vars, "BROKER_APP_ID")?;
        let broker_app_secret = SecretString::from(require(vars, "BROKER_APP_SECRET")?);

        let broker_base_url = match vars.get("BROKER_BASE_URL") {
            Some(url) => validate_url("BROKER_BASE_URL", url)?,
            None => DEFAULT_BROKER_BASE_URL.to_string(),
        };

        let coordinator = CoordinatorConfig {
            contract_address,
            fallback_chain_id: parse_or(vars, "LEDGER_FALLBACK_CHAIN_ID", DEFAULT_FALLBACK_CHAIN_ID)?,
            gas_limit: parse_or(vars, "LEDGER_GAS_LIMIT", DEFAULT_GAS_LIMIT)?,
            receipt_poll_interval: Duration::from_millis(positive_or(
                vars,
                "LEDGER_RECEIPT_POLL_INTERVAL_MS",
                DEFAULT_RECEIPT_POLL_INTERVAL_MS,
            )?),
            receipt_timeout: parse_optional::<u64>(vars, "LEDGER_RECEIPT_TIMEOUT_SECONDS")?
                .map(Duration::from_secs),
            safety_interval: Duration::from_millis(positive_or(
                vars,
                "COORDINATOR_SAFETY_INTERVAL_MS",
                DEFAULT_SAFETY_INTERVAL_MS,
            )?),
        };

        let event_poll_interval = Duration::from_millis(positive_or(
            vars,
            "LEDGER_EVENT_POLL_INTERVAL_MS",
            DEFAULT_EVENT_POLL_INTERVAL_MS,
        )?);

        let broker_request_timeout = Duration::from_secs(positive_or(
            vars,
            "BROKER_REQUEST_TIMEOUT_SECONDS",
            DEFAULT_BROKER_REQUEST_TIMEOUT_SECONDS,
        )?);

        let bind_address = vars
            .get("BRIDGE_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        Ok(Config {
            ledger_rpc_url,
            signing_key,
            coordinator,
            event_poll_interval,
            broker_base_url,
            broker_app_id,
            broker_app_secret,
            broker_request_timeout,
            bind_address,
        })
    }
}

fn require(vars: &HashMap<String, String>, key: &str) -> Result<String, ConfigError> {
    match vars.get(key) {
        Some(value) if !value.trim().is_empty() => Ok(value.clone()),
        _ => Err(ConfigError::MissingEnvVar(key.to_string())),
    }
}

fn require_url(vars: &HashMap<String, String>, key: &str) -> Result<String, ConfigError> {
    let value = require(vars, key)?;
    validate_url(key, &value)
}

fn validate_url(key: &str, value: &str) -> Result<String, ConfigError> {
    if value.starts_with("http://") || value.starts_with("https://") {
        Ok(value.trim_end_matches('/').to_string())
    } else {
        Err(ConfigError::InvalidValue(format!(
            "{key} must start with http:// or https://"
        )))
    }
}

fn parse_optional<T: FromStr>(
    vars: &HashMap<String, String>,
    key: &str,
) -> Result<Option<T>, ConfigError> {
    vars.get(key)
        .map(|raw| {
            raw.parse::<T>()
                .map_err(|_| ConfigError::InvalidValue(format!("{key}={raw} is not a valid number")))
        })
        .transpose()
}

fn parse_or<T: FromStr>(
    vars: &HashMap<String, String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError> {
    Ok(parse_optional(vars, key)?.unwrap_or(default))
}

fn positive_or(vars: &HashMap<String, String>, key: &str, default: u64) -> Result<u64, ConfigError> {
    let value = parse_or(vars, key, default)?;
    if value == 0 {
        return Err(ConfigError::InvalidValue(format!(
            "{key} must be greater than zero"
        )));
    }
    Ok(value)
}
