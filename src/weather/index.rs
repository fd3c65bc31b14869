use super::slots::{RefreshSchedule, RECONFIGURE_HOLDOFF_SECS};
use super::AdjusterStatus;
use crate::error::AppError;
use crate::utils::pct;
use chrono::DateTime;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

const WATERDEX_URL: &str = "https://waterdex.com/watering-index/";
const MWDSOCAL_URL: &str = "https://www.bewaterwise.com/watering-index.html";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexProvider {
    Waterdex,
    Mwdsocal,
}

impl IndexProvider {
    pub fn url(&self) -> &'static str {
        match self {
            IndexProvider::Waterdex => WATERDEX_URL,
            IndexProvider::Mwdsocal => MWDSOCAL_URL,
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            IndexProvider::Waterdex => "WATERDEX",
            IndexProvider::Mwdsocal => "MWDSOCAL",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IndexAdjustOptions {
    pub min: i64,
    pub max: i64,
}

impl Default for IndexAdjustOptions {
    fn default() -> Self {
        Self { min: 0, max: 200 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IndexConfig {
    pub enable: bool,
    pub provider: Option<IndexProvider>,
    pub refresh: Vec<String>,
    pub adjust: IndexAdjustOptions,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self { enable: false, provider: None, refresh: Vec::new(), adjust: IndexAdjustOptions::default() }
    }
}

/// Published evapotranspiration watering-index percentage, scraped from
/// the provider's page. Has no rain sensor.
#[derive(Debug)]
pub struct WateringIndexAdjuster {
    cfg: IndexConfig,
    schedule: RefreshSchedule,
    percentage: Option<i64>,
    updated: i64,
    failed: bool,
}

impl WateringIndexAdjuster {
    pub fn new() -> Self {
        Self {
            cfg: IndexConfig::default(),
            schedule: RefreshSchedule::default(),
            percentage: None,
            updated: 0,
            failed: false,
        }
    }

    pub fn configure(&mut self, cfg: &IndexConfig, now: i64) {
        self.cfg = cfg.clone();
        self.schedule = RefreshSchedule::new(&cfg.refresh);
        if self.percentage.is_some() {
            self.schedule.force_at(now + RECONFIGURE_HOLDOFF_SECS);
        }
    }

    pub fn enabled(&self) -> bool {
        self.cfg.enable && self.cfg.provider.is_some()
    }

    pub fn source(&self) -> &'static str {
        self.cfg.provider.map(|p| p.tag()).unwrap_or("WATERINGINDEX")
    }

    pub fn updated(&self) -> i64 {
        self.updated
    }

    /// Scraped percentage as-is; 100 when unavailable.
    pub fn adjustment(&self) -> i64 {
        self.percentage.unwrap_or(100)
    }

    pub fn adjust(&self, seconds: i64) -> i64 {
        let adjusted = pct(seconds, self.adjustment());
        adjusted.clamp(pct(seconds, self.cfg.adjust.min), pct(seconds, self.cfg.adjust.max))
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

    /// Heartbeat; same armed-slot semantics as the weather provider.
    pub async fn refresh(&mut self, now: &DateTime<Tz>, force: bool) -> bool {
        if !self.enabled() || !(force || self.schedule.due(now)) {
            return false;
        }
        match self.fetch().await {
            Ok(percentage) => {
                debug!("Watering index: {}%", percentage);
                self.percentage = Some(percentage);
                self.updated = now.timestamp();
                self.failed = false;
                self.schedule.mark_fetched(now.timestamp());
                true
            }
            Err(e) => {
                warn!("Watering index fetch failed, keeping cached value: {}", e);
                self.failed = true;
                self.schedule.mark_fetched(now.timestamp());
                false
            }
        }
    }

    async fn fetch(&self) -> Result<i64, AppError> {
        let provider = self
            .cfg
            .provider
            .ok_or_else(|| AppError::Config("watering index enabled without a provider".to_owned()))?;
        let body = reqwest::get(provider.url()).await?.text().await?;
        parse_percentage(&body)
            .ok_or_else(|| AppError::Parse("no percentage found in index page".to_owned()))
    }
}

impl Default for WateringIndexAdjuster {
    fn default() -> Self {
        Self::new()
    }
}

/// First `NN%` token in the page, 0..=200.
pub fn parse_percentage(body: &str) -> Option<i64> {
    let bytes = body.as_bytes();
    for (i, &b) in bytes.iter().enumerate() {
        if b != b'%' {
            continue;
        }
        let digits_start = bytes[..i].iter().rposition(|c| !c.is_ascii_digit()).map(|p| p + 1).unwrap_or(0);
        if digits_start < i {
            if let Ok(value) = body[digits_start..i].parse::<i64>() {
                if (0..=200).contains(&value) {
                    return Some(value);
                }
            }
        }
    }
    None
}
