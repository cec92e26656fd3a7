//! Process configuration, read once from `COURTBOOK_*` environment variables.

use std::collections::HashSet;
use std::path::PathBuf;

use chrono::NaiveTime;
use chrono_tz::Tz;

use crate::limits::*;
use crate::slots::minute_of_day;

/// Booking rules shared by every request. Immutable after startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schedule {
    /// Bookable resources in display order.
    pub resources: Vec<String>,
    pub zone: Tz,
    pub open: NaiveTime,
    pub close: NaiveTime,
    /// Allowed reservation lengths in minutes, ascending.
    pub durations: Vec<u32>,
    pub step_minutes: u32,
}

impl Default for Schedule {
    fn default() -> Self {
        Self {
            resources: vec!["Campo 1".into(), "Campo 2".into()],
            zone: chrono_tz::Europe::Rome,
            open: NaiveTime::from_hms_opt(8, 0, 0).unwrap_or(NaiveTime::MIN),
            close: NaiveTime::from_hms_opt(22, 0, 0).unwrap_or(NaiveTime::MIN),
            durations: vec![60, 90, 120],
            step_minutes: 30,
        }
    }
}

impl Schedule {
    pub fn min_duration(&self) -> u32 {
        self.durations.iter().copied().min().unwrap_or(0)
    }

    pub fn allows_duration(&self, minutes: i64) -> bool {
        u32::try_from(minutes).is_ok_and(|m| self.durations.contains(&m))
    }

    pub fn open_minute(&self) -> u32 {
        minute_of_day(self.open)
    }

    pub fn close_minute(&self) -> u32 {
        minute_of_day(self.close)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.resources.is_empty() {
            return Err(ConfigError::Invalid("at least one resource is required".into()));
        }
        if self.resources.len() > MAX_RESOURCES {
            return Err(ConfigError::Invalid(format!(
                "too many resources: {} (max {MAX_RESOURCES})",
                self.resources.len()
            )));
        }
        let mut seen = HashSet::new();
        for name in &self.resources {
            if name.trim().is_empty() {
                return Err(ConfigError::Invalid("empty resource name".into()));
            }
            if name.len() > MAX_RESOURCE_NAME_LEN {
                return Err(ConfigError::Invalid(format!("resource name too long: {name}")));
            }
            if !seen.insert(name.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate resource: {name}")));
            }
        }
        if self.open >= self.close {
            return Err(ConfigError::Invalid(format!(
                "opening time {} must be before closing time {}",
                self.open, self.close
            )));
        }
        if self.durations.is_empty() || self.durations.contains(&0) {
            return Err(ConfigError::Invalid("durations must be non-empty and positive".into()));
        }
        if self.step_minutes == 0 {
            return Err(ConfigError::Invalid("slot step must be positive".into()));
        }
        Ok(())
    }

    /// Build from `COURTBOOK_*` variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut schedule = Schedule::default();
        if let Some(v) = lookup("COURTBOOK_RESOURCES") {
            schedule.resources = v.split(',').map(|s| s.trim().to_string()).collect();
        }
        if let Some(v) = lookup("COURTBOOK_TIMEZONE") {
            schedule.zone = v
                .trim()
                .parse::<Tz>()
                .map_err(|_| ConfigError::Parse("COURTBOOK_TIMEZONE", v.clone()))?;
        }
        if let Some(v) = lookup("COURTBOOK_OPEN") {
            schedule.open = parse_clock("COURTBOOK_OPEN", &v)?;
        }
        if let Some(v) = lookup("COURTBOOK_CLOSE") {
            schedule.close = parse_clock("COURTBOOK_CLOSE", &v)?;
        }
        if let Some(v) = lookup("COURTBOOK_DURATIONS") {
            let mut durations = v
                .split(',')
                .map(|s| s.trim().parse::<u32>())
                .collect::<Result<Vec<_>, _>>()
                .map_err(|_| ConfigError::Parse("COURTBOOK_DURATIONS", v.clone()))?;
            durations.sort_unstable();
            durations.dedup();
            schedule.durations = durations;
        }
        if let Some(v) = lookup("COURTBOOK_SLOT_STEP") {
            schedule.step_minutes = v
                .trim()
                .parse()
                .map_err(|_| ConfigError::Parse("COURTBOOK_SLOT_STEP", v.clone()))?;
        }
        schedule.validate()?;
        Ok(schedule)
    }
}

fn parse_clock(key: &'static str, value: &str) -> Result<NaiveTime, ConfigError> {
    let trimmed = value.trim();
    NaiveTime::parse_from_str(trimmed, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(trimmed, "%H:%M:%S"))
        .map_err(|_| ConfigError::Parse(key, value.to_string()))
}

/// Server settings: listener, storage, secrets, observability.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub password: String,
    pub admin_secret: Option<String>,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
    pub schedule: Schedule,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let port = match lookup("COURTBOOK_PORT") {
            Some(v) => v.parse().map_err(|_| ConfigError::Parse("COURTBOOK_PORT", v))?,
            None => 5433,
        };
        let metrics_port = lookup("COURTBOOK_METRICS_PORT").and_then(|s| s.parse().ok());
        Ok(Self {
            bind: lookup("COURTBOOK_BIND").unwrap_or_else(|| "0.0.0.0".into()),
            port,
            data_dir: PathBuf::from(lookup("COURTBOOK_DATA_DIR").unwrap_or_else(|| "./data".into())),
            password: lookup("COURTBOOK_PASSWORD").unwrap_or_else(|| "courtbook".into()),
            admin_secret: lookup("COURTBOOK_ADMIN_SECRET").filter(|s| !s.is_empty()),
            max_connections: lookup("COURTBOOK_MAX_CONNECTIONS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(256),
            compact_threshold: lookup("COURTBOOK_COMPACT_THRESHOLD")
                .and_then(|s| s.parse().ok())
                .unwrap_or(1000),
            metrics_port,
            tls_cert: lookup("COURTBOOK_TLS_CERT"),
            tls_key: lookup("COURTBOOK_TLS_KEY"),
            schedule: Schedule::from_lookup(&lookup)?,
        })
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Parse(&'static str, String),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Parse(key, value) => write!(f, "invalid value for {key}: {value:?}"),
            ConfigError::Invalid(msg) => write!(f, "invalid schedule: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}
