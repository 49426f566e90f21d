use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;

use rust_decimal::Decimal;

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub marketplace: MarketplaceConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        let log_format = LogFormat::parse(
            &env::var("APP_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string()),
        );

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig {
                log_level,
                log_format,
            },
            marketplace: MarketplaceConfig::from_env()?,
        })
    }
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Tracing and metrics controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
    pub log_format: LogFormat,
}

/// Line layout for the fmt subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Pretty,
}

impl LogFormat {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "pretty" => Self::Pretty,
            _ => Self::Compact,
        }
    }
}

pub const DEFAULT_ADMISSION_LIMIT: usize = 5;
pub const DEFAULT_INVITE_LIMIT: usize = 5;
pub const DEFAULT_WRITE_ATTEMPTS: u32 = 8;

/// Marketplace policy dials: response cap, invite fan-out, fee rate, and store retry budget.
#[derive(Debug, Clone, PartialEq)]
pub struct MarketplaceConfig {
    pub admission_limit: usize,
    pub invite_limit: usize,
    pub marketplace_fee_rate: Decimal,
    pub write_attempts: u32,
    pub geo_table: Option<PathBuf>,
}

impl Default for MarketplaceConfig {
    fn default() -> Self {
        Self {
            admission_limit: DEFAULT_ADMISSION_LIMIT,
            invite_limit: DEFAULT_INVITE_LIMIT,
            marketplace_fee_rate: Decimal::new(5, 2),
            write_attempts: DEFAULT_WRITE_ATTEMPTS,
            geo_table: None,
        }
    }
}

impl MarketplaceConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let admission_limit = positive_from_env(
            "MARKETPLACE_ADMISSION_LIMIT",
            defaults.admission_limit as u64,
        )? as usize;
        let invite_limit =
            positive_from_env("MARKETPLACE_INVITE_LIMIT", defaults.invite_limit as u64)? as usize;
        let write_attempts =
            positive_from_env("MARKETPLACE_WRITE_ATTEMPTS", defaults.write_attempts as u64)?;
        let write_attempts =
            u32::try_from(write_attempts).map_err(|_| ConfigError::InvalidLimit {
                key: "MARKETPLACE_WRITE_ATTEMPTS",
            })?;

        let marketplace_fee_rate = match env::var("MARKETPLACE_FEE_RATE") {
            Ok(raw) => {
                let rate =
                    Decimal::from_str(raw.trim()).map_err(|_| ConfigError::InvalidFeeRate)?;
                if rate.is_sign_negative() || rate >= Decimal::ONE {
                    return Err(ConfigError::InvalidFeeRate);
                }
                rate
            }
            Err(_) => defaults.marketplace_fee_rate,
        };

        let geo_table = env::var("MARKETPLACE_GEO_TABLE")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .map(PathBuf::from);

        Ok(Self {
            admission_limit,
            invite_limit,
            marketplace_fee_rate,
            write_attempts,
            geo_table,
        })
    }
}

fn positive_from_env(key: &'static str, default: u64) -> Result<u64, ConfigError> {
    match env::var(key) {
        Ok(raw) => match raw.trim().parse::<u64>() {
            Ok(value) if value > 0 => Ok(value),
            _ => Err(ConfigError::InvalidLimit { key }),
        },
        Err(_) => Ok(default),
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidLimit { key: &'static str },
    InvalidFeeRate,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidLimit { key } => write!(f, "{key} must be a positive integer"),
            ConfigError::InvalidFeeRate => {
                write!(f, "MARKETPLACE_FEE_RATE must be a decimal in [0, 1)")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidHost { source } => Some(source),
            ConfigError::InvalidPort
            | ConfigError::InvalidLimit { .. }
            | ConfigError::InvalidFeeRate => None,
        }
    }
}
