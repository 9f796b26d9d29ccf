use std::fmt;
use std::path::PathBuf;

use chrono::{FixedOffset, NaiveTime, Timelike};

use crate::model::*;
use crate::policy::{BlackoutPolicy, PolicyError};

/// Process configuration, read once from `TASKSHIFT_*` variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub max_connections: usize,
    pub metrics_port: Option<u16>,
    pub seed_file: Option<PathBuf>,
    pub policy: BlackoutPolicy,
}

#[derive(Debug)]
pub enum ConfigError {
    Invalid { var: &'static str, value: String, reason: String },
    Policy(PolicyError),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Invalid { var, value, reason } => {
                write!(f, "{var}={value:?}: {reason}")
            }
            ConfigError::Policy(e) => write!(f, "blackout policy: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<PolicyError> for ConfigError {
    fn from(e: PolicyError) -> Self {
        ConfigError::Policy(e)
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from any variable source; `from_env` passes the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |var: &'static str| lookup(var).filter(|v| !v.trim().is_empty());

        let window_start = parse_or(get("TASKSHIFT_BLACKOUT_START"), "TASKSHIFT_BLACKOUT_START", 12 * HOUR_MS, parse_clock)?;
        let window_end = parse_or(
            get("TASKSHIFT_BLACKOUT_END"),
            "TASKSHIFT_BLACKOUT_END",
            12 * HOUR_MS + 30 * MINUTE_MS,
            parse_clock,
        )?;
        let utc_offset = parse_or(get("TASKSHIFT_BLACKOUT_UTC_OFFSET"), "TASKSHIFT_BLACKOUT_UTC_OFFSET", 0, parse_offset)?;
        let buffer = parse_or(get("TASKSHIFT_BUFFER_MINUTES"), "TASKSHIFT_BUFFER_MINUTES", 5 * MINUTE_MS, parse_minutes)?;
        let insert_buffer = parse_or(
            get("TASKSHIFT_INSERT_BUFFER_MINUTES"),
            "TASKSHIFT_INSERT_BUFFER_MINUTES",
            30 * MINUTE_MS,
            parse_minutes,
        )?;
        let policy = BlackoutPolicy::new(window_start, window_end, utc_offset, buffer, insert_buffer)?;

        Ok(Self {
            bind: get("TASKSHIFT_BIND").unwrap_or_else(|| "0.0.0.0".into()),
            port: parse_or(get("TASKSHIFT_PORT"), "TASKSHIFT_PORT", 5433, parse_num)?,
            max_connections: parse_or(get("TASKSHIFT_MAX_CONNECTIONS"), "TASKSHIFT_MAX_CONNECTIONS", 256, parse_num)?,
            metrics_port: get("TASKSHIFT_METRICS_PORT")
                .map(|v| parse_var("TASKSHIFT_METRICS_PORT", v, parse_num))
                .transpose()?,
            seed_file: get("TASKSHIFT_SEED_FILE").map(PathBuf::from),
            policy,
        })
    }
}

fn parse_var<T>(
    var: &'static str,
    value: String,
    parse: impl Fn(&str) -> Result<T, String>,
) -> Result<T, ConfigError> {
    parse(value.trim()).map_err(|reason| ConfigError::Invalid { var, value, reason })
}

fn parse_or<T>(
    value: Option<String>,
    var: &'static str,
    default: T,
    parse: impl Fn(&str) -> Result<T, String>,
) -> Result<T, ConfigError> {
    match value {
        Some(v) => parse_var(var, v, parse),
        None => Ok(default),
    }
}

fn parse_num<T: std::str::FromStr>(s: &str) -> Result<T, String>
where
    T::Err: fmt::Display,
{
    s.parse().map_err(|e: T::Err| e.to_string())
}

/// `HH:MM` → ms after midnight. `24:00` is accepted as end of day.
fn parse_clock(s: &str) -> Result<Ms, String> {
    if s == "24:00" {
        return Ok(DAY_MS);
    }
    let t = NaiveTime::parse_from_str(s, "%H:%M").map_err(|e| format!("expected HH:MM ({e})"))?;
    Ok(t.hour() as Ms * HOUR_MS + t.minute() as Ms * MINUTE_MS)
}

/// `+05:30`, `-08:00` or `Z` → ms east of UTC.
fn parse_offset(s: &str) -> Result<Ms, String> {
    if s.eq_ignore_ascii_case("z") {
        return Ok(0);
    }
    let offset: FixedOffset = s.parse().map_err(|_| "expected +HH:MM or -HH:MM".to_string())?;
    Ok(offset.local_minus_utc() as Ms * 1000)
}

fn parse_minutes(s: &str) -> Result<Ms, String> {
    let minutes: u32 = parse_num(s)?;
    Ok(minutes as Ms * MINUTE_MS)
}
