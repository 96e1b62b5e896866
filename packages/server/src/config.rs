use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub nats_url: Option<String>,
    pub expiry_sweep_cron: String,
    pub matching: MatchConfig,
    pub tracking: TrackingConfig,
    pub dispatch: DispatchConfig,
}

/// Candidate search parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchConfig {
    /// Search radius for LOCAL bookings
    pub radius_km: f64,
    /// Cap on ONLINE candidates
    pub online_limit: usize,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            radius_km: 10.0,
            online_limit: 20,
        }
    }
}

/// Live channel parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackingConfig {
    /// Minimum interval between forwarded location samples
    pub location_throttle: Duration,
    /// Per-channel buffer; slow subscribers skip ahead once it overflows
    pub channel_capacity: usize,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            location_throttle: Duration::from_millis(3000),
            channel_capacity: 64,
        }
    }
}

/// Dispatch timeouts
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DispatchConfig {
    /// How long a booking may sit in PENDING before the sweep expires it
    pub pending_timeout: Duration,
    /// Max bookings expired per sweep run
    pub sweep_batch_size: i64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            pending_timeout: Duration::from_secs(120),
            sweep_batch_size: 100,
        }
    }
}

fn parse_var<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .with_context(|| format!("{} must be a valid number", name)),
        Err(_) => Ok(default),
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        let radius_km: f64 = parse_var("MATCH_RADIUS_KM", 10.0)?;
        if !(radius_km.is_finite() && radius_km > 0.0) {
            anyhow::bail!("MATCH_RADIUS_KM must be positive");
        }

        Ok(Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            port: parse_var("PORT", 8080)?,
            nats_url: env::var("NATS_URL").ok().filter(|url| !url.is_empty()),
            expiry_sweep_cron: env::var("EXPIRY_SWEEP_CRON")
                .unwrap_or_else(|_| "*/15 * * * * *".to_string()),
            matching: MatchConfig {
                radius_km,
                online_limit: parse_var("ONLINE_CANDIDATE_LIMIT", 20)?,
            },
            tracking: TrackingConfig {
                location_throttle: Duration::from_millis(parse_var("LOCATION_THROTTLE_MS", 3000)?),
                ..TrackingConfig::default()
            },
            dispatch: DispatchConfig {
                pending_timeout: Duration::from_secs(parse_var("PENDING_TIMEOUT_SECS", 120)?),
                ..DispatchConfig::default()
            },
        })
    }
}
