use std::net::SocketAddr;
use std::time::Duration;

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:9977";
const DEFAULT_STORE_TIMEOUT_MS: u64 = 2000;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("CHESS_BIND_ADDR is not a socket address: {0}")]
    InvalidBindAddr(String),

    #[error("CHESS_STORE_TIMEOUT_MS must be a positive number of milliseconds, got {0}")]
    InvalidTimeout(String),
}

/// Server settings, read from `CHESS_*` environment variables. The log level comes from `LOG_LEVEL`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub store_timeout: Duration,
    /// Usernames to issue auth tokens for at startup.
    pub users: Vec<String>,
    /// Names of games to create at startup.
    pub games: Vec<String>,
}

impl Config {
    pub fn from_env() -> Result<Config, ConfigError> {
        Config::from_vars(|key| std::env::var(key).ok())
    }

    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Config, ConfigError> {
        let bind_addr = var("CHESS_BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());
        let bind_addr: SocketAddr = bind_addr.parse().map_err(|_| ConfigError::InvalidBindAddr(bind_addr))?;

        let store_timeout = match var("CHESS_STORE_TIMEOUT_MS") {
            None => Duration::from_millis(DEFAULT_STORE_TIMEOUT_MS),
            Some(raw) => match raw.trim().parse::<u64>() {
                Ok(ms) if ms > 0 => Duration::from_millis(ms),
                _ => return Err(ConfigError::InvalidTimeout(raw)),
            },
        };

        Ok(Config {
            bind_addr,
            store_timeout,
            users: list(var("CHESS_USERS")),
            games: list(var("CHESS_GAMES")),
        })
    }
}

fn list(raw: Option<String>) -> Vec<String> {
    raw.map(|s| s.split(',').map(str::trim).filter(|x| !x.is_empty()).map(str::to_string).collect())
        .unwrap_or_default()
}
