pub mod run_options;

use crate::calendar::CalendarConfig;
use crate::engine::program::{AdjustProfile, Program, Season};
use crate::engine::zones::ZoneConfig;
use crate::error::AppError;
use crate::events::EventConfig;
use crate::weather::{IndexConfig, WeatherConfig};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

pub const CONFIG_FILE: &str = "config.json";
pub const HARDWARE_FILE: &str = "hardware.json";
pub const EVENT_DB_FILE: &str = "events.db";
pub const FALLBACK_DIR: &str = "/var/lib/sprinkler";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WebServer {
    pub port: u16,
}

impl Default for WebServer {
    fn default() -> Self {
        Self { port: 8080 }
    }
}

/// The single user configuration document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub on: bool,
    pub production: bool,
    pub raindelay: bool,
    pub timezone: Option<String>,
    pub location: Option<String>,
    pub zipcode: Option<String>,
    pub zones: Vec<ZoneConfig>,
    pub programs: Vec<Program>,
    pub calendars: Vec<CalendarConfig>,
    pub seasons: Vec<Season>,
    pub adjust: Vec<AdjustProfile>,
    pub weather: WeatherConfig,
    pub wateringindex: IndexConfig,
    pub event: EventConfig,
    pub webserver: WebServer,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            on: true,
            production: false,
            raindelay: false,
            timezone: None,
            location: None,
            zipcode: None,
            zones: Vec::new(),
            programs: Vec::new(),
            calendars: Vec::new(),
            seasons: Vec::new(),
            adjust: Vec::new(),
            weather: WeatherConfig::default(),
            wateringindex: IndexConfig::default(),
            event: EventConfig::default(),
            webserver: WebServer::default(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, AppError> {
        let content = fs::read_to_string(path)?;
        Self::load_from_str(&content)
    }

    pub fn load_from_str(content: &str) -> Result<Self, AppError> {
        serde_json::from_str(content).map_err(|e| AppError::Config(e.to_string()))
    }

    pub fn tz(&self) -> Tz {
        match &self.timezone {
            Some(name) => name.parse().unwrap_or_else(|_| {
                warn!("Unknown timezone '{}', falling back to UTC", name);
                Tz::UTC
            }),
            None => Tz::UTC,
        }
    }

    pub fn season(&self, name: &str) -> Option<&Season> {
        self.seasons.iter().find(|s| s.name == name)
    }

    pub fn adjust_profile(&self, name: &str) -> Option<&AdjustProfile> {
        self.adjust.iter().find(|a| a.name == name)
    }
}

/// Resolve a data file: current directory first, then /var/lib/sprinkler.
/// When neither exists the local path is returned for creation.
pub fn locate_file(name: &str) -> PathBuf {
    let local = PathBuf::from(".").join(name);
    if local.exists() {
        return local;
    }
    let fallback = Path::new(FALLBACK_DIR).join(name);
    if fallback.exists() {
        fallback
    } else {
        local
    }
}
