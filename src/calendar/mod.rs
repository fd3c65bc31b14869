pub mod ics;

use crate::engine::program::Program;
use crate::engine::zones::ZoneIndex;
use crate::error::AppError;
use chrono::{DateTime, Timelike};
use chrono_tz::Tz;
use ics::{parse_calendar, ParseContext};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, warn};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CalendarConfig {
    pub name: String,
    pub format: String,
    pub source: String,
    pub season: Option<String>,
    pub disabled: bool,
}

impl Default for CalendarConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            format: "ical".to_owned(),
            source: String::new(),
            season: None,
            disabled: false,
        }
    }
}

#[derive(Debug, Clone)]
struct CalendarState {
    cfg: CalendarConfig,
    enabled: bool,
    ok: bool,
    updated: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CalendarStatus {
    pub name: String,
    pub ok: bool,
    pub updated: i64,
}

/// Periodically converts external calendar events into Programs.
/// Owns the imported program list; the scheduler walks it in place.
pub struct CalendarImporter {
    calendars: Vec<CalendarState>,
    programs: Vec<Program>,
    last_refresh_hour: i64,
}

impl CalendarImporter {
    pub fn new() -> Self {
        Self { calendars: Vec::new(), programs: Vec::new(), last_refresh_hour: -1 }
    }

    /// Rebuild the calendar list. Entries with an unsupported format or
    /// source scheme are marked disabled; programs whose parent calendar
    /// disappeared from the configuration are pruned.
    pub fn configure(&mut self, cfgs: &[CalendarConfig]) {
        self.calendars = cfgs
            .iter()
            .map(|cfg| {
                let supported = format_supported(&cfg.format) && scheme_supported(&cfg.source);
                if !supported && !cfg.disabled {
                    warn!("Calendar {} has unsupported format/source, disabling", cfg.name);
                }
                CalendarState { enabled: !cfg.disabled && supported, ok: true, updated: 0, cfg: cfg.clone() }
            })
            .collect();

        let known: HashSet<&str> = cfgs.iter().map(|c| c.name.as_str()).collect();
        self.programs
            .retain(|p| p.name.rsplit_once('@').map_or(true, |(_, calendar)| known.contains(calendar)));
    }

    /// Throttle gate: one pass per wall-clock hour, from minute 55.
    pub fn refresh_due(&self, now: &DateTime<Tz>) -> bool {
        now.minute() >= 55 && now.timestamp() / 3600 != self.last_refresh_hour
    }

    /// Fetch and re-parse every enabled calendar, sequentially — one
    /// outstanding request across the set. A failing source keeps its
    /// previous programs and is marked failed; the others continue.
    pub async fn refresh(
        &mut self,
        now: &DateTime<Tz>,
        zones: &ZoneIndex,
        location: Option<&str>,
        tz: Tz,
        force: bool,
    ) {
        if !force && !self.refresh_due(now) {
            return;
        }
        self.last_refresh_hour = now.timestamp() / 3600;

        for i in 0..self.calendars.len() {
            if !self.calendars[i].enabled {
                continue;
            }
            let cfg = self.calendars[i].cfg.clone();
            let text = match fetch_source(&cfg.source).await {
                Ok(text) => text,
                Err(e) => {
                    warn!("Calendar {} fetch failed: {}", cfg.name, e);
                    self.calendars[i].ok = false;
                    continue;
                }
            };
            let ctx = ParseContext {
                calendar: &cfg.name,
                season: cfg.season.clone(),
                zones,
                location,
                tz,
                now: now.timestamp(),
            };
            match parse_calendar(&text, &ctx) {
                Ok(fresh) => {
                    debug!("Calendar {}: {} programs", cfg.name, fresh.len());
                    self.merge(&cfg.name, fresh);
                    self.calendars[i].ok = true;
                    self.calendars[i].updated = now.timestamp();
                }
                Err(e) => {
                    warn!("Calendar {} parse failed: {}", cfg.name, e);
                    self.calendars[i].ok = false;
                }
            }
        }

        let mut seen = HashSet::new();
        self.programs.retain(|p| seen.insert(p.name.clone()));
    }

    /// Replace this calendar's programs with a fresh parse. Programs that
    /// had deactivated (one-shots that ran) and were not re-parsed stay,
    /// inactive, until their calendar drops them for good.
    fn merge(&mut self, calendar: &str, mut fresh: Vec<Program>) {
        let suffix = format!("@{}", calendar);
        let fresh_names: HashSet<&str> = fresh.iter().map(|p| p.name.as_str()).collect();
        self.programs.retain(|p| {
            !p.name.ends_with(&suffix) || (!p.active && !fresh_names.contains(p.name.as_str()))
        });
        self.programs.append(&mut fresh);
    }

    /// Currently active imported programs.
    pub fn programs(&self) -> Vec<Program> {
        self.programs.iter().filter(|p| p.active).cloned().collect()
    }

    pub fn programs_mut(&mut self) -> &mut [Program] {
        &mut self.programs
    }

    pub fn status(&self) -> Vec<CalendarStatus> {
        self.calendars
            .iter()
            .map(|c| CalendarStatus { name: c.cfg.name.clone(), ok: c.ok, updated: c.updated })
            .collect()
    }
}

impl Default for CalendarImporter {
    fn default() -> Self {
        Self::new()
    }
}

fn format_supported(format: &str) -> bool {
    let f = format.to_ascii_lowercase();
    f == "ical" || f == "icalendar" || f == "ics"
}

fn scheme_supported(source: &str) -> bool {
    source.starts_with("file:") || source.starts_with("http://") || source.starts_with("https://")
}

async fn fetch_source(source: &str) -> Result<String, AppError> {
    if let Some(path) = source.strip_prefix("file://").or_else(|| source.strip_prefix("file:")) {
        return Ok(std::fs::read_to_string(path)?);
    }
    Ok(reqwest::get(source).await?.text().await?)
}
