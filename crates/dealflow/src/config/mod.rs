use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use crate::workflows::acquisitions::{GradeThresholds, PipelineConfig, QuietHours};

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
    pub pipeline: PipelineConfig,
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
            pipeline: load_pipeline()?,
        })
    }
}

/// Pipeline settings layered over the built-in defaults.
fn load_pipeline() -> Result<PipelineConfig, ConfigError> {
    let mut config = PipelineConfig::default();

    let thresholds = &mut config.scoring.thresholds;
    *thresholds = GradeThresholds {
        a: env_or("GRADE_THRESHOLD_A", thresholds.a)?,
        b: env_or("GRADE_THRESHOLD_B", thresholds.b)?,
        c: env_or("GRADE_THRESHOLD_C", thresholds.c)?,
        d: env_or("GRADE_THRESHOLD_D", thresholds.d)?,
    };
    if !thresholds.is_descending() {
        return Err(ConfigError::InvalidGradeThresholds);
    }

    let sla = &mut config.routing.sla;
    sla.a = env_or("SLA_HOURS_A", sla.a)?;
    sla.b = env_or("SLA_HOURS_B", sla.b)?;
    sla.c = env_or("SLA_HOURS_C", sla.c)?;
    sla.d = env_or("SLA_HOURS_D", sla.d)?;

    if let Ok(raw) = env::var("QUIET_HOURS") {
        config.routing.quiet_hours = parse_quiet_hours(&raw)?;
    }

    if let Ok(raw) = env::var("MAJOR_EXCLUSION_PHRASES") {
        config.scoring.major_exclusions = raw
            .split(',')
            .map(|phrase| phrase.trim().to_lowercase())
            .filter(|phrase| !phrase.is_empty())
            .collect();
    }

    config.blast.max_blasts_per_hour =
        env_or("MAX_BLASTS_PER_HOUR", config.blast.max_blasts_per_hour)?;

    let underwriting = &mut config.underwriting;
    underwriting.vacancy_rate = env_or("DEFAULT_VACANCY_RATE", underwriting.vacancy_rate)?;
    underwriting.maintenance_rate =
        env_or("DEFAULT_MAINTENANCE_RATE", underwriting.maintenance_rate)?;
    underwriting.management_rate =
        env_or("DEFAULT_MANAGEMENT_RATE", underwriting.management_rate)?;
    underwriting.base_interest_rate =
        env_or("BASE_INTEREST_RATE", underwriting.base_interest_rate)?;
    underwriting.rate_buffer = env_or("INTEREST_RATE_BUFFER", underwriting.rate_buffer)?;

    Ok(config)
}

fn env_or<T: FromStr>(var: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(var) {
        Ok(raw) if !raw.trim().is_empty() => {
            raw.trim()
                .parse::<T>()
                .map_err(|_| ConfigError::InvalidNumber { var, value: raw })
        }
        _ => Ok(default),
    }
}

/// `start-end` in UTC hours; an empty value disables quiet hours.
fn parse_quiet_hours(raw: &str) -> Result<Option<QuietHours>, ConfigError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }

    let invalid = || ConfigError::InvalidQuietHours {
        value: raw.to_string(),
    };
    let (start, end) = raw.split_once('-').ok_or_else(invalid)?;
    let start_hour: u32 = start.trim().parse().map_err(|_| invalid())?;
    let end_hour: u32 = end.trim().parse().map_err(|_| invalid())?;
    if start_hour > 23 || end_hour > 23 {
        return Err(invalid());
    }

    Ok(Some(QuietHours {
        start_hour,
        end_hour,
    }))
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
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidNumber { var: &'static str, value: String },
    InvalidQuietHours { value: String },
    InvalidGradeThresholds,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidNumber { var, value } => {
                write!(f, "{var} has an unparseable value '{value}'")
            }
            ConfigError::InvalidQuietHours { value } => {
                write!(f, "QUIET_HOURS must look like '22-7' (UTC hours), got '{value}'")
            }
            ConfigError::InvalidGradeThresholds => write!(
                f,
                "GRADE_THRESHOLD_A..D must be strictly descending"
            ),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidHost { source } => Some(source),
            ConfigError::InvalidPort
            | ConfigError::InvalidNumber { .. }
            | ConfigError::InvalidQuietHours { .. }
            | ConfigError::InvalidGradeThresholds => None,
        }
    }
}
