pub mod index;
pub mod slots;

pub use index::{IndexConfig, WateringIndexAdjuster};

use crate::error::AppError;
use crate::utils::pct;
use chrono::DateTime;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use slots::{RefreshSchedule, RECONFIGURE_HOLDOFF_SECS};
use tracing::{debug, warn};

pub const WEATHER_SOURCE: &str = "WEATHER";
const OBSERVATION_URL: &str = "https://api.weather.com/v2/pws/observations/current";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WeatherAdjustOptions {
    pub enable: bool,
    pub min: i64,
    pub max: i64,
    /// Baseline temperature (°F) for the adjustment formula.
    pub temperature: i64,
    /// Baseline humidity (%) for the adjustment formula.
    pub humidity: i64,
    /// Formula gain in percent; 100 applies the formula as-is.
    pub sensitivity: i64,
}

impl Default for WeatherAdjustOptions {
    fn default() -> Self {
        Self { enable: false, min: 0, max: 200, temperature: 70, humidity: 30, sensitivity: 100 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WeatherConfig {
    pub enable: bool,
    pub key: Option<String>,
    pub station: Option<String>,
    /// Rain (inches) at or above which the virtual rain sensor trips.
    pub raintrigger: f64,
    /// "HH" / "HH:MM" fetch slots; empty falls back to every 6 h.
    pub refresh: Vec<String>,
    pub adjust: WeatherAdjustOptions,
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            enable: false,
            key: None,
            station: None,
            raintrigger: 0.2,
            refresh: Vec::new(),
            adjust: WeatherAdjustOptions::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct Observation {
    pub temperature: f64,
    pub humidity: f64,
    /// Today's precipitation total in inches.
    pub rain: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AdjusterStatus {
    pub enabled: bool,
    pub ok: bool,
    pub updated: i64,
    pub adjustment: i64,
    pub source: String,
}

/// Station-observation weather provider with percentage adjustment.
#[derive(Debug)]
pub struct WeatherAdjuster {
    cfg: WeatherConfig,
    schedule: RefreshSchedule,
    observation: Option<Observation>,
    updated: i64,
    failed: bool,
}

impl WeatherAdjuster {
    pub fn new() -> Self {
        Self {
            cfg: WeatherConfig::default(),
            schedule: RefreshSchedule::default(),
            observation: None,
            updated: 0,
            failed: false,
        }
    }

    /// Re-entrant; a reconfigure with data already cached holds the next
    /// fetch off for ten minutes so restarts do not stampede the provider.
    pub fn configure(&mut self, cfg: &WeatherConfig, now: i64) {
        self.cfg = cfg.clone();
        self.schedule = RefreshSchedule::new(&cfg.refresh);
        if self.observation.is_some() {
            self.schedule.force_at(now + RECONFIGURE_HOLDOFF_SECS);
        }
    }

    pub fn enabled(&self) -> bool {
        self.cfg.enable && self.cfg.adjust.enable
    }

    pub fn source(&self) -> &'static str {
        WEATHER_SOURCE
    }

    pub fn updated(&self) -> i64 {
        self.updated
    }

    pub fn observation(&self) -> Option<Observation> {
        self.observation
    }

    pub fn status(&self) -> AdjusterStatus {
        AdjusterStatus {
            enabled: self.cfg.enable,
            ok: !self.failed,
            updated: self.updated,
            adjustment: self.adjustment(),
            source: self.source().to_owned(),
        }
    }

    /// Documented adjustment formula over the cached observation;
    /// 100 (neutral) when no data is available.
    pub fn adjustment(&self) -> i64 {
        let Some(obs) = &self.observation else {
            return 100;
        };
        let raw = (self.cfg.adjust.humidity as f64 - obs.humidity)
            + 4.0 * (obs.temperature - self.cfg.adjust.temperature as f64)
            - 200.0 * obs.rain;
        let scaled = raw * self.cfg.adjust.sensitivity as f64 / 100.0;
        (100.0 + scaled).round().max(0.0) as i64
    }

    pub fn adjust(&self, seconds: i64) -> i64 {
        let adjusted = pct(seconds, self.adjustment());
        adjusted.clamp(pct(seconds, self.cfg.adjust.min), pct(seconds, self.cfg.adjust.max))
    }

    /// Virtual rain sensor: trips when today's rain reaches the trigger.
    pub fn rainsensor(&self) -> bool {
        self.cfg.enable
            && self.observation.map_or(false, |obs| self.cfg.raintrigger <= obs.rain)
    }

    /// Heartbeat; fetches only when the armed-slot schedule says so
    /// (or unconditionally when forced). Returns true when a fetch
    /// succeeded and produced newer data.
    pub async fn refresh(&mut self, now: &DateTime<Tz>, force: bool) -> bool {
        if !self.cfg.enable || !(force || self.schedule.due(now)) {
            return false;
        }
        match self.fetch().await {
            Ok(obs) => {
                debug!(
                    "Weather observation: {:.1}F {:.0}% rh {:.2}in rain",
                    obs.temperature, obs.humidity, obs.rain
                );
                self.observation = Some(obs);
                self.updated = now.timestamp();
                self.failed = false;
                self.schedule.mark_fetched(now.timestamp());
                true
            }
            Err(e) => {
                warn!("Weather fetch failed, keeping cached data: {}", e);
                self.failed = true;
                self.schedule.mark_fetched(now.timestamp());
                false
            }
        }
    }

    async fn fetch(&self) -> Result<Observation, AppError> {
        let key = self.cfg.key.as_deref().filter(|k| !k.is_empty()).ok_or_else(|| {
            AppError::Config("weather enabled without an api key".to_owned())
        })?;
        let station = self.cfg.station.as_deref().ok_or_else(|| {
            AppError::Config("weather enabled without a station id".to_owned())
        })?;
        let url = format!(
            "{}?stationId={}&format=json&units=e&apiKey={}",
            OBSERVATION_URL, station, key
        );
        let payload: serde_json::Value = reqwest::get(&url).await?.json().await?;
        parse_observation(&payload)
            .ok_or_else(|| AppError::Parse("unrecognised observation payload".to_owned()))
    }
}

impl Default for WeatherAdjuster {
    fn default() -> Self {
        Self::new()
    }
}

/// Pull the current observation out of a PWS `observations` payload.
pub fn parse_observation(payload: &serde_json::Value) -> Option<Observation> {
    let obs = payload.get("observations")?.get(0)?;
    let imperial = obs.get("imperial")?;
    Some(Observation {
        temperature: imperial.get("temp")?.as_f64()?,
        humidity: obs.get("humidity")?.as_f64()?,
        rain: imperial.get("precipTotal").and_then(|v| v.as_f64()).unwrap_or(0.0),
    })
}
