use crate::utils::parse_hhmm;
use chrono::{DateTime, Timelike};
use chrono_tz::Tz;

/// Six-hour fallback cadence when no refresh slots are configured.
pub const FALLBACK_SECS: i64 = 6 * 3600;
/// Holdoff applied when a reconfigure finds data already cached.
pub const RECONFIGURE_HOLDOFF_SECS: i64 = 600;

#[derive(Debug, Clone, PartialEq)]
pub struct RefreshSlot {
    pub hour: u32,
    pub minute: u32,
    pub armed: bool,
}

/// Data-driven fetch arming: each slot fires at most once per hour.
#[derive(Debug, Clone, Default)]
pub struct RefreshSchedule {
    slots: Vec<RefreshSlot>,
    last_fetch: i64,
    pending: Option<i64>,
}

impl RefreshSchedule {
    /// Build from "HH" / "HH:MM" strings; invalid entries are dropped.
    pub fn new(specs: &[String]) -> Self {
        let slots = specs
            .iter()
            .filter_map(|s| parse_hhmm(s))
            .map(|(hour, minute)| RefreshSlot { hour, minute, armed: true })
            .collect();
        Self { slots, last_fetch: 0, pending: None }
    }

    /// Push the next fetch out to `now + holdoff` (reconfigure with cache).
    pub fn force_at(&mut self, ts: i64) {
        self.pending = Some(ts);
    }

    pub fn mark_fetched(&mut self, ts: i64) {
        self.last_fetch = ts;
    }

    pub fn last_fetch(&self) -> i64 {
        self.last_fetch
    }

    /// Heartbeat: is a fetch due at `now`? Re-arms slots whenever the
    /// hour moves on; a due slot disarms as it fires.
    pub fn due(&mut self, now: &DateTime<Tz>) -> bool {
        let ts = now.timestamp();
        if let Some(pending) = self.pending {
            if ts < pending {
                return false;
            }
            self.pending = None;
            return true;
        }
        if self.slots.is_empty() {
            return ts - self.last_fetch >= FALLBACK_SECS;
        }
        let mut fire = false;
        for slot in &mut self.slots {
            if now.hour() != slot.hour {
                slot.armed = true;
            } else if slot.armed && now.minute() >= slot.minute {
                slot.armed = false;
                fire = true;
            }
        }
        fire
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use chrono_tz::Tz;

    fn at(hour: u32, minute: u32) -> DateTime<Tz> {
        Tz::UTC.with_ymd_and_hms(2024, 6, 3, hour, minute, 0).unwrap()
    }

    #[test]
    fn slot_fires_once_per_hour() {
        let mut sched = RefreshSchedule::new(&["08:30".to_owned()]);
        assert!(!sched.due(&at(8, 15)));
        assert!(sched.due(&at(8, 30)));
        assert!(!sched.due(&at(8, 45))); // disarmed until the hour rolls
        assert!(!sched.due(&at(9, 0)));  // re-arms, different hour
        assert!(sched.due(&(at(8, 31) + chrono::Duration::days(1))));
    }

    #[test]
    fn rearm_after_hour_change() {
        let mut sched = RefreshSchedule::new(&["10".to_owned()]);
        assert!(sched.due(&at(10, 0)));
        assert!(!sched.due(&at(10, 59)));
        let _ = sched.due(&at(11, 5)); // passes through 11:05, re-arms 10:00
        assert!(sched.due(&(at(10, 2) + chrono::Duration::days(1))));
    }

    #[test]
    fn fallback_without_slots() {
        let mut sched = RefreshSchedule::new(&[]);
        sched.mark_fetched(at(0, 0).timestamp());
        assert!(!sched.due(&at(3, 0)));
        assert!(sched.due(&at(6, 0)));
    }

    #[test]
    fn forced_fetch_overrides_slots() {
        let mut sched = RefreshSchedule::new(&["23:00".to_owned()]);
        let base = at(8, 0).timestamp();
        sched.force_at(base + RECONFIGURE_HOLDOFF_SECS);
        assert!(!sched.due(&at(8, 5)));
        assert!(sched.due(&at(8, 10)));
        assert!(!sched.due(&at(8, 11))); // pending consumed
    }
}
