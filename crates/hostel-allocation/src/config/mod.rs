use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use crate::workflows::allocation::scoring::{
    ScoringPolicy, SeniorityBoost, SeniorityMode, DEFAULT_SENIORITY_FACTOR,
};
use crate::workflows::allocation::service::{
    EngineSettings, DEFAULT_CYCLE_TIMEOUT, DEFAULT_MAX_ATTEMPTS, DEFAULT_SCORING_WORKERS,
};

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
    pub allocation: EngineSettings,
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

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level },
            allocation: load_engine_settings()?,
        })
    }
}

/// Engine defaults from `ALLOC_*` variables; unset variables keep the built-in defaults.
pub fn load_engine_settings() -> Result<EngineSettings, ConfigError> {
    let defaults = ScoringPolicy::default();

    let levels = match optional("ALLOC_SENIORITY_LEVELS") {
        None => defaults.seniority.levels.clone(),
        Some(raw) => parse_levels(&raw)?,
    };
    let mode = match optional("ALLOC_SENIORITY_MODE")
        .map(|raw| raw.to_ascii_lowercase())
        .as_deref()
    {
        None | Some("multiplicative") => SeniorityMode::Multiplicative {
            factor: number("ALLOC_SENIORITY_FACTOR")?.unwrap_or(DEFAULT_SENIORITY_FACTOR),
        },
        Some("additive") => SeniorityMode::Additive {
            points: number("ALLOC_SENIORITY_POINTS")?.unwrap_or(10.0),
        },
        Some(other) => {
            return Err(ConfigError::InvalidValue {
                key: "ALLOC_SENIORITY_MODE",
                value: other.to_string(),
            })
        }
    };

    // Present but empty switches the disability floor off.
    let disability_floor = match env::var("ALLOC_DISABILITY_FLOOR") {
        Err(_) => defaults.disability_floor,
        Ok(raw) if raw.trim().is_empty() => None,
        Ok(raw) => Some(parse_score(&raw, "ALLOC_DISABILITY_FLOOR")?),
    };

    let distance_cap_km = match number("ALLOC_DISTANCE_CAP_KM")? {
        None => defaults.distance_cap_km,
        Some(cap) if cap > 0.0 => cap,
        Some(cap) => {
            return Err(ConfigError::InvalidValue {
                key: "ALLOC_DISTANCE_CAP_KM",
                value: cap.to_string(),
            })
        }
    };

    let cycle_timeout = match integer("ALLOC_CYCLE_TIMEOUT_MS")? {
        None => DEFAULT_CYCLE_TIMEOUT,
        Some(millis) => Duration::from_millis(millis),
    };
    let max_attempts = match integer("ALLOC_MAX_ATTEMPTS")? {
        None => DEFAULT_MAX_ATTEMPTS,
        Some(attempts) => u32::try_from(attempts)
            .ok()
            .filter(|attempts| *attempts > 0)
            .ok_or_else(|| ConfigError::InvalidValue {
                key: "ALLOC_MAX_ATTEMPTS",
                value: attempts.to_string(),
            })?,
    };
    let scoring_workers = match integer("ALLOC_SCORING_WORKERS")? {
        None => DEFAULT_SCORING_WORKERS,
        Some(workers) => usize::try_from(workers)
            .ok()
            .filter(|workers| *workers > 0)
            .ok_or_else(|| ConfigError::InvalidValue {
                key: "ALLOC_SCORING_WORKERS",
                value: workers.to_string(),
            })?,
    };
    let reserve_accessible_rooms = match optional("ALLOC_RESERVE_ACCESSIBLE") {
        None => true,
        Some(raw) => parse_bool(&raw).ok_or(ConfigError::InvalidValue {
            key: "ALLOC_RESERVE_ACCESSIBLE",
            value: raw,
        })?,
    };

    Ok(EngineSettings {
        scoring: ScoringPolicy {
            seniority: SeniorityBoost { levels, mode },
            disability_floor,
            distance_cap_km,
        },
        reserve_accessible_rooms,
        cycle_timeout,
        max_attempts,
        scoring_workers,
    })
}

fn optional(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn number(key: &'static str) -> Result<Option<f64>, ConfigError> {
    optional(key)
        .map(|raw| {
            raw.parse::<f64>()
                .ok()
                .filter(|value| value.is_finite())
                .ok_or(ConfigError::InvalidValue { key, value: raw })
        })
        .transpose()
}

fn integer(key: &'static str) -> Result<Option<u64>, ConfigError> {
    optional(key)
        .map(|raw| {
            raw.parse::<u64>()
                .map_err(|_| ConfigError::InvalidValue { key, value: raw })
        })
        .transpose()
}

fn parse_score(raw: &str, key: &'static str) -> Result<f64, ConfigError> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|value| (0.0..=100.0).contains(value))
        .ok_or_else(|| ConfigError::InvalidValue {
            key,
            value: raw.to_string(),
        })
}

fn parse_levels(raw: &str) -> Result<Vec<u16>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|level| !level.is_empty())
        .map(|level| {
            level
                .parse::<u16>()
                .map_err(|_| ConfigError::InvalidValue {
                    key: "ALLOC_SENIORITY_LEVELS",
                    value: raw.to_string(),
                })
        })
        .collect()
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" | "on" => Some(true),
        "false" | "no" | "0" | "off" => Some(false),
        _ => None,
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

/// Tracing controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidValue { key: &'static str, value: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidValue { key, value } => {
                write!(f, "{key} has an invalid value '{value}'")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidPort | ConfigError::InvalidValue { .. } => None,
            ConfigError::InvalidHost { source } => Some(source),
        }
    }
}
