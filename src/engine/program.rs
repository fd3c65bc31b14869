use crate::utils::{format_yyyymmdd, parse_hhmm, parse_yyyymmdd};
use chrono::{DateTime, Datelike, Timelike};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Repeat {
    #[default]
    None,
    Daily,
    Weekly,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProgramOptions {
    /// Launch without clearing the current queue.
    pub append: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ProgramZone {
    pub zone: usize,
    pub seconds: i64,
}

/// A watering plan, authored in the configuration or synthesised from a
/// calendar event (imported names take the form `summary@calendar`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Program {
    pub name: String,
    pub active: bool,
    /// Local "HH:MM" launch time.
    pub start: String,
    pub repeat: Repeat,
    /// Day stride for `daily` repeats.
    pub interval: i64,
    /// Weekly repeat mask, Sunday first.
    pub days: Vec<bool>,
    /// YYYYMMDD anchor; set to the first day the program matches.
    pub date: Option<String>,
    /// YYYYMMDD upper bound.
    pub until: Option<String>,
    pub season: Option<String>,
    pub options: ProgramOptions,
    pub zones: Vec<ProgramZone>,
    /// Imported replacements for single occurrences; each is `repeat=none`.
    #[serde(skip)]
    pub exceptions: Vec<Program>,
    /// Occurrence moments (Unix ts) this program must skip.
    #[serde(skip)]
    pub exclusions: Vec<i64>,
}

impl Default for Program {
    fn default() -> Self {
        Self {
            name: String::new(),
            active: true,
            start: "00:00".to_owned(),
            repeat: Repeat::None,
            interval: 1,
            days: vec![false; 7],
            date: None,
            until: None,
            season: None,
            options: ProgramOptions::default(),
            zones: Vec::new(),
            exceptions: Vec::new(),
            exclusions: Vec::new(),
        }
    }
}

impl Program {
    /// Is this program due at `now`? Mutates the program where the rules
    /// demand it: an unset anchor date is written on first match, and a
    /// one-shot (`repeat=none`) deactivates itself once its minute is
    /// reached, whatever the outcome.
    pub fn check_due(&mut self, now: &DateTime<Tz>) -> bool {
        let Some((hour, minute)) = parse_hhmm(&self.start) else {
            return false;
        };
        if now.hour() != hour || now.minute() != minute {
            return false;
        }
        if let Some(until) = self.until.as_deref().and_then(parse_yyyymmdd) {
            if until < now.date_naive() {
                return false;
            }
        }
        let ts = now.timestamp();
        if self.exclusions.iter().any(|e| (ts - e).abs() < 60) {
            return false;
        }

        let delta = match self.date.as_deref().and_then(parse_yyyymmdd) {
            Some(anchor) => {
                let delta = (now.date_naive() - anchor).num_days();
                if delta < 0 {
                    return false;
                }
                delta
            }
            None => {
                self.date = Some(format_yyyymmdd(now.date_naive()));
                0
            }
        };

        match self.repeat {
            Repeat::Weekly => {
                let dow = now.weekday().num_days_from_sunday() as usize;
                self.days.get(dow).copied().unwrap_or(false)
            }
            Repeat::Daily => delta % self.interval.max(1) == 0,
            Repeat::None => {
                self.active = false;
                delta == 0
            }
        }
    }
}

/// Named run window: a program tagged with a season only launches while
/// the current month/week bit is set.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Season {
    pub name: String,
    pub monthly: Option<Vec<bool>>,
    pub weekly: Option<Vec<bool>>,
}

impl Season {
    pub fn active_at(&self, now: &DateTime<Tz>) -> bool {
        if let Some(weekly) = &self.weekly {
            if !weekly.is_empty() {
                let idx = (now.iso_week().week() as usize - 1).min(weekly.len() - 1);
                return weekly[idx];
            }
        }
        if let Some(monthly) = &self.monthly {
            if !monthly.is_empty() {
                let idx = (now.month0() as usize).min(monthly.len() - 1);
                return monthly[idx];
            }
        }
        true
    }
}

/// Named table of integer runtime percentages.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AdjustProfile {
    pub name: String,
    pub monthly: Option<Vec<i64>>,
    pub weekly: Option<Vec<i64>>,
}

impl AdjustProfile {
    /// Current ratio plus the vector kind used, for the event source tag.
    pub fn ratio_at(&self, now: &DateTime<Tz>) -> Option<(i64, &'static str)> {
        if let Some(weekly) = &self.weekly {
            if !weekly.is_empty() {
                let idx = (now.iso_week().week() as usize - 1).min(weekly.len() - 1);
                return Some((weekly[idx], "weekly"));
            }
        }
        if let Some(monthly) = &self.monthly {
            if !monthly.is_empty() {
                let idx = (now.month0() as usize).min(monthly.len() - 1);
                return Some((monthly[idx], "monthly"));
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use chrono_tz::Tz;

    fn local(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Tz> {
        Tz::UTC.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    fn daily(start: &str, interval: i64, date: &str) -> Program {
        Program {
            name: "p".to_owned(),
            start: start.to_owned(),
            repeat: Repeat::Daily,
            interval,
            date: Some(date.to_owned()),
            zones: vec![ProgramZone { zone: 0, seconds: 30 }],
            ..Default::default()
        }
    }

    #[test]
    fn wrong_minute_is_never_due() {
        let mut p = daily("07:00", 1, "20240101");
        assert!(!p.check_due(&local(2024, 1, 2, 7, 1)));
        assert!(!p.check_due(&local(2024, 1, 2, 6, 0)));
    }

    #[test]
    fn daily_interval_skips_days() {
        let mut p = daily("07:00", 2, "20240101");
        assert!(!p.check_due(&local(2024, 1, 2, 7, 0)));
        assert!(p.check_due(&local(2024, 1, 3, 7, 0)));
        assert!(p.check_due(&local(2024, 1, 1, 7, 0)));
    }

    #[test]
    fn anchor_before_date_never_fires() {
        let mut p = daily("07:00", 1, "20240110");
        assert!(!p.check_due(&local(2024, 1, 5, 7, 0)));
    }

    #[test]
    fn weekly_fires_on_masked_day() {
        // 2024-01-02 is a Tuesday (Sun=0 -> index 2).
        let mut days = vec![false; 7];
        days[2] = true;
        let mut p = Program {
            start: "06:00".to_owned(),
            repeat: Repeat::Weekly,
            days,
            ..Default::default()
        };
        assert!(p.check_due(&local(2024, 1, 2, 6, 0)));
        assert_eq!(p.date.as_deref(), Some("20240102")); // anchored on first match
        assert!(!p.check_due(&local(2024, 1, 3, 6, 0)));
    }

    #[test]
    fn one_shot_deactivates_even_when_not_due() {
        let mut p = Program {
            start: "06:00".to_owned(),
            repeat: Repeat::None,
            date: Some("20240101".to_owned()),
            ..Default::default()
        };
        // Matching minute on a later day: not due, but spent.
        assert!(!p.check_due(&local(2024, 1, 5, 6, 0)));
        assert!(!p.active);
    }

    #[test]
    fn one_shot_fires_on_its_day() {
        let mut p = Program {
            start: "06:00".to_owned(),
            repeat: Repeat::None,
            date: Some("20240105".to_owned()),
            ..Default::default()
        };
        assert!(p.check_due(&local(2024, 1, 5, 6, 0)));
        assert!(!p.active);
    }

    #[test]
    fn until_bound_is_inclusive() {
        let mut p = daily("07:00", 1, "20240101");
        p.until = Some("20240110".to_owned());
        assert!(p.check_due(&local(2024, 1, 10, 7, 0)));
        assert!(!p.check_due(&local(2024, 1, 11, 7, 0)));
    }

    #[test]
    fn exclusion_window_suppresses_occurrence() {
        let mut p = daily("07:00", 1, "20240101");
        p.exclusions.push(local(2024, 1, 2, 7, 0).timestamp() + 30);
        assert!(!p.check_due(&local(2024, 1, 2, 7, 0)));
        assert!(p.check_due(&local(2024, 1, 3, 7, 0)));
    }

    #[test]
    fn season_bits() {
        let summer = Season {
            name: "summer".to_owned(),
            monthly: Some(vec![
                false, false, false, false, true, true, true, true, true, false, false, false,
            ]),
            weekly: None,
        };
        assert!(summer.active_at(&local(2024, 7, 1, 0, 0)));
        assert!(!summer.active_at(&local(2024, 1, 1, 0, 0)));
    }

    #[test]
    fn adjust_profile_prefers_weekly() {
        let profile = AdjustProfile {
            name: "lawn".to_owned(),
            monthly: Some(vec![10; 12]),
            weekly: Some(vec![70; 52]),
        };
        let (ratio, kind) = profile.ratio_at(&local(2024, 6, 5, 0, 0)).unwrap();
        assert_eq!((ratio, kind), (70, "weekly"));

        let monthly_only = AdjustProfile { name: "m".to_owned(), monthly: Some(vec![55; 12]), weekly: None };
        let (ratio, kind) = monthly_only.ratio_at(&local(2024, 6, 5, 0, 0)).unwrap();
        assert_eq!((ratio, kind), (55, "monthly"));

        let empty = AdjustProfile::default();
        assert!(empty.ratio_at(&local(2024, 6, 5, 0, 0)).is_none());
    }
}
