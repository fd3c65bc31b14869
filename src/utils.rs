use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

/// Apply an integer percentage with half-up rounding.
pub fn pct(seconds: i64, percent: i64) -> i64 {
    (seconds * percent + 50) / 100
}

/// Parse "HH:MM" (or bare "HH") into hour/minute.
pub fn parse_hhmm(s: &str) -> Option<(u32, u32)> {
    let mut parts = s.splitn(2, ':');
    let hour: u32 = parts.next()?.trim().parse().ok()?;
    let minute: u32 = match parts.next() {
        Some(m) => m.trim().parse().ok()?,
        None => 0,
    };
    (hour < 24 && minute < 60).then_some((hour, minute))
}

/// Parse a "YYYYMMDD" date stamp.
pub fn parse_yyyymmdd(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y%m%d").ok()
}

pub fn format_yyyymmdd(date: NaiveDate) -> String {
    date.format("%Y%m%d").to_string()
}

/// Resolve a local wall-clock moment in `tz` to a Unix timestamp.
/// Ambiguous instants (DST fold) take the earlier reading.
pub fn local_ts(tz: Tz, date: NaiveDate, time: NaiveTime) -> Option<i64> {
    let naive = date.and_time(time);
    let resolved = tz.from_local_datetime(&naive);
    resolved.single().or_else(|| resolved.earliest()).map(|dt| dt.timestamp())
}

pub fn local_now(tz: Tz, ts: i64) -> DateTime<Tz> {
    crate::time::utc_from_ts(ts).with_timezone(&tz)
}

pub fn display_from_ts(ts: i64) -> String {
    DateTime::<Utc>::from_timestamp(ts, 0).map(|dt| dt.to_string()).unwrap_or_default()
}

pub fn start_log() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sprinklerd=debug".into()),
        )
        .with_target(false)
        .init();
}
