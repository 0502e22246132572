use common::LendingError;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

pub const DEFAULT_REFRESH_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_MAX_PRICE_STALENESS_S: u64 = 60;
pub const DEFAULT_EVENT_PAGE_SIZE: usize = 50;
pub const DEFAULT_EVENT_MAX_PAGES: usize = 20;

/// Runtime settings of the refresh engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub refresh_interval_secs: u64,
    pub max_price_staleness_s: u64,
    pub event_page_size: usize,
    pub event_max_pages: usize,
    pub snapshot_file: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: DEFAULT_REFRESH_INTERVAL_SECS,
            max_price_staleness_s: DEFAULT_MAX_PRICE_STALENESS_S,
            event_page_size: DEFAULT_EVENT_PAGE_SIZE,
            event_max_pages: DEFAULT_EVENT_MAX_PAGES,
            snapshot_file: None,
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by whichever environment variables are set
    pub fn from_env() -> Result<Self, LendingError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, LendingError> {
        let defaults = Self::default();
        let config = Self {
            refresh_interval_secs: parse_var(&lookup, "REFRESH_INTERVAL_SECS")?
                .unwrap_or(defaults.refresh_interval_secs),
            max_price_staleness_s: parse_var(&lookup, "MAX_PRICE_STALENESS_S")?
                .unwrap_or(defaults.max_price_staleness_s),
            event_page_size: parse_var(&lookup, "EVENT_PAGE_SIZE")?.unwrap_or(defaults.event_page_size),
            event_max_pages: parse_var(&lookup, "EVENT_MAX_PAGES")?.unwrap_or(defaults.event_max_pages),
            snapshot_file: lookup("SNAPSHOT_FILE").filter(|v| !v.is_empty()).map(PathBuf::from),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), LendingError> {
        if self.refresh_interval_secs == 0 {
            return Err(LendingError::InvalidConfig("REFRESH_INTERVAL_SECS must be positive".into()));
        }
        if self.event_page_size == 0 {
            return Err(LendingError::InvalidConfig("EVENT_PAGE_SIZE must be positive".into()));
        }
        Ok(())
    }
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>, LendingError> {
    match lookup(key) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| LendingError::InvalidConfig(format!("{key}={value} is not a valid number"))),
    }
}
