//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;

/// Log output format
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "pretty" | "" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(ConfigError::Invalid("LOG_FORMAT")),
        }
    }
}

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Text or JSON log lines
    pub log_format: LogFormat,

    /// Allowed client origins for CORS (`*` allows any)
    pub client_origin: String,

    /// Bullet simulation rate
    pub tick_rate_hz: u32,
    /// Distance a bullet travels per tick
    pub bullet_speed: f32,
    /// Re-clamp client-submitted positions to the player bounds
    pub clamp_positions: bool,
    /// Include the bullet ledger in every `players` frame
    pub broadcast_bullets: bool,

    /// Max inbound messages per second per connection
    pub input_rate_limit: u32,
    /// Per-connection outbound frame capacity
    pub outbound_queue: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            client_origin: "*".to_string(),
            tick_rate_hz: 60,
            bullet_speed: 5.0,
            clamp_positions: true,
            broadcast_bullets: false,
            input_rate_limit: 120,
            outbound_queue: 256,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup (environment in production)
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        // PORT (as set by most hosts) wins over SERVER_ADDR
        let server_addr = match lookup("PORT") {
            Some(port) => format!("0.0.0.0:{}", port),
            None => lookup("SERVER_ADDR").unwrap_or_else(|| defaults.server_addr.to_string()),
        };

        let tick_rate_hz = parse_or(&lookup, "TICK_RATE_HZ", defaults.tick_rate_hz)?;
        if !(1..=1000).contains(&tick_rate_hz) {
            return Err(ConfigError::Invalid("TICK_RATE_HZ"));
        }

        let bullet_speed = parse_or(&lookup, "BULLET_SPEED", defaults.bullet_speed)?;
        if !bullet_speed.is_finite() || bullet_speed <= 0.0 {
            return Err(ConfigError::Invalid("BULLET_SPEED"));
        }

        let input_rate_limit = parse_or(&lookup, "INPUT_RATE_LIMIT", defaults.input_rate_limit)?;
        if input_rate_limit == 0 {
            return Err(ConfigError::Invalid("INPUT_RATE_LIMIT"));
        }

        let outbound_queue = parse_or(&lookup, "OUTBOUND_QUEUE", defaults.outbound_queue)?;
        if outbound_queue == 0 {
            return Err(ConfigError::Invalid("OUTBOUND_QUEUE"));
        }

        Ok(Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,

            log_level: lookup("LOG_LEVEL").unwrap_or(defaults.log_level),
            log_format: match lookup("LOG_FORMAT") {
                Some(raw) => raw.parse()?,
                None => defaults.log_format,
            },

            client_origin: lookup("CLIENT_ORIGIN").unwrap_or(defaults.client_origin),

            tick_rate_hz,
            bullet_speed,
            clamp_positions: parse_bool_or(&lookup, "CLAMP_POSITIONS", defaults.clamp_positions)?,
            broadcast_bullets: parse_bool_or(
                &lookup,
                "BROADCAST_BULLETS",
                defaults.broadcast_bullets,
            )?,

            input_rate_limit,
            outbound_queue,
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(key)),
        None => Ok(default),
    }
}

fn parse_bool_or<F>(lookup: &F, key: &'static str, default: bool) -> Result<bool, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key).as_deref().map(str::trim) {
        None => Ok(default),
        Some("1") | Some("true") | Some("yes") | Some("on") => Ok(true),
        Some("0") | Some("false") | Some("no") | Some("off") => Ok(false),
        Some(_) => Err(ConfigError::Invalid(key)),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),

    #[error("Invalid server address format")]
    InvalidAddress,
}
