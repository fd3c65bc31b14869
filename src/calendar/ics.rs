use crate::engine::program::{Program, ProgramOptions, ProgramZone, Repeat};
use crate::engine::zones::ZoneIndex;
use crate::error::AppError;
use chrono::{DateTime, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use ical::parser::ical::component::IcalCalendar;
use ical::property::Property;
use std::collections::{HashMap, HashSet};
use std::io::Cursor;
use tracing::{debug, warn};

pub struct ParseContext<'a> {
    pub calendar: &'a str,
    pub season: Option<String>,
    pub zones: &'a ZoneIndex,
    pub location: Option<&'a str>,
    /// Controller timezone; all stored times are converted into it.
    pub tz: Tz,
    pub now: i64,
}

struct RawEvent {
    uid: String,
    summary: String,
    description: String,
    location: Option<String>,
    start: Option<DateTime<Tz>>,
    all_day: bool,
    rrule: Option<String>,
    exdates: Vec<i64>,
    recurrence_id: Option<i64>,
    sequence: i64,
}

/// Parse one iCalendar text into Programs for `ctx.calendar`.
///
/// Events key by UID; updates (same UID plus RECURRENCE-ID) become
/// exceptions on the main event, later SEQUENCE winning. A malformed or
/// rejected event drops alone; the rest of the calendar proceeds.
pub fn parse_calendar(text: &str, ctx: &ParseContext) -> Result<Vec<Program>, AppError> {
    let parser = ical::IcalParser::new(Cursor::new(text.as_bytes().to_vec()));
    let mut programs: Vec<Program> = Vec::new();

    for calendar in parser {
        let calendar = calendar.map_err(|e| AppError::Parse(format!("icalendar: {}", e)))?;
        let default_tz = calendar_tz(&calendar).unwrap_or(ctx.tz);

        let mut mains: Vec<RawEvent> = Vec::new();
        let mut updates: Vec<RawEvent> = Vec::new();
        for event in &calendar.events {
            let Some(raw) = read_event(&event.properties, default_tz, ctx.tz) else {
                continue;
            };
            if raw.all_day {
                continue;
            }
            if raw.recurrence_id.is_some() {
                updates.push(raw);
            } else {
                mains.push(raw);
            }
        }

        let mut by_occurrence: HashMap<(String, i64), RawEvent> = HashMap::new();
        for update in updates {
            let key = (update.uid.clone(), update.recurrence_id.unwrap_or_default());
            match by_occurrence.get(&key) {
                Some(prev) if prev.sequence >= update.sequence => {}
                _ => {
                    by_occurrence.insert(key, update);
                }
            }
        }

        for main in &mains {
            match build_program(main, &by_occurrence, ctx) {
                Ok(Some(program)) => programs.push(program),
                Ok(None) => {}
                Err(e) => warn!("Dropping event '{}': {}", main.summary, e),
            }
        }
    }

    let mut seen = HashSet::new();
    programs.retain(|p| seen.insert(p.name.clone()));
    Ok(programs)
}

fn build_program(
    main: &RawEvent,
    updates: &HashMap<(String, i64), RawEvent>,
    ctx: &ParseContext,
) -> Result<Option<Program>, AppError> {
    if let (Some(want), Some(have)) = (ctx.location, main.location.as_deref()) {
        if !have.eq_ignore_ascii_case(want) {
            return Ok(None);
        }
    }
    let Some(start) = main.start else {
        return Ok(None);
    };
    let (zones, options) = parse_description(&main.description, ctx.zones)?;

    let mut program = Program {
        name: format!("{}@{}", main.summary, ctx.calendar),
        start: start.format("%H:%M").to_string(),
        date: Some(start.format("%Y%m%d").to_string()),
        season: ctx.season.clone(),
        options,
        zones,
        ..Default::default()
    };

    match &main.rrule {
        None => {
            // Single occurrence; drop once its minute is more than a minute gone.
            if start.timestamp() < ctx.now - 60 {
                return Ok(None);
            }
        }
        Some(rule) => {
            let info = parse_rrule(rule, ctx.tz)?;
            if let Some(until_ts) = info.until_ts {
                if until_ts < ctx.now {
                    return Ok(None);
                }
                program.until = Some(
                    crate::time::utc_from_ts(until_ts)
                        .with_timezone(&ctx.tz)
                        .format("%Y%m%d")
                        .to_string(),
                );
            }
            program.repeat = info.repeat;
            program.interval = info.interval;
            program.days = info.days;
        }
    }

    program.exclusions.extend(main.exdates.iter().copied());

    for ((uid, occurrence), update) in updates {
        if uid != &main.uid {
            continue;
        }
        let Some(new_start) = update.start else {
            continue;
        };
        // Only updates whose start or replaced occurrence is still ahead matter.
        if new_start.timestamp() < ctx.now - 60 && *occurrence < ctx.now - 60 {
            continue;
        }
        let (zones, options) = match parse_description(&update.description, ctx.zones) {
            Ok((zones, options)) if !zones.is_empty() => (zones, options),
            _ => (program.zones.clone(), program.options),
        };
        program.exceptions.push(Program {
            name: program.name.clone(),
            start: new_start.format("%H:%M").to_string(),
            date: Some(new_start.format("%Y%m%d").to_string()),
            season: ctx.season.clone(),
            options,
            zones,
            ..Default::default()
        });
        program.exclusions.push(*occurrence);
    }

    Ok(Some(program))
}

/// Event-description DSL: space/comma separated tokens. `name=minutes`
/// (or `name:minutes`) schedules a configured zone; bare `append` keeps
/// the current queue on launch. An unknown zone name rejects the event.
pub fn parse_description(
    description: &str,
    zones: &ZoneIndex,
) -> Result<(Vec<ProgramZone>, ProgramOptions), AppError> {
    let text = unescape(description);
    let mut out = Vec::new();
    let mut options = ProgramOptions::default();
    for token in text.split([' ', ',', '\t']).filter(|t| !t.is_empty()) {
        if token.eq_ignore_ascii_case("append") {
            options.append = true;
            continue;
        }
        let Some((name, value)) = token.split_once(['=', ':']) else {
            continue;
        };
        let Ok(minutes) = value.trim().parse::<i64>() else {
            debug!("Ignoring malformed duration token '{}'", token);
            continue;
        };
        let Some(zone) = zones.by_name(name.trim()) else {
            return Err(AppError::Parse(format!("unknown zone '{}'", name)));
        };
        // Calendar durations are minutes; configured programs use seconds.
        out.push(ProgramZone { zone, seconds: minutes * 60 });
    }
    Ok((out, options))
}

struct RruleInfo {
    repeat: Repeat,
    interval: i64,
    days: Vec<bool>,
    until_ts: Option<i64>,
}

fn parse_rrule(rule: &str, local: Tz) -> Result<RruleInfo, AppError> {
    let mut freq: Option<String> = None;
    let mut interval = 1;
    let mut days = vec![false; 7];
    let mut until_ts = None;

    for part in rule.split(';') {
        let Some((key, value)) = part.split_once('=') else {
            continue;
        };
        match key.to_ascii_uppercase().as_str() {
            "FREQ" => freq = Some(value.to_ascii_uppercase()),
            "INTERVAL" => interval = value.parse().unwrap_or(1),
            "BYDAY" => {
                for day in value.split(',') {
                    // strip any ordinal prefix (e.g. 2TU)
                    let tag: String =
                        day.chars().filter(|c| c.is_ascii_alphabetic()).collect::<String>().to_ascii_uppercase();
                    if let Some(idx) =
                        ["SU", "MO", "TU", "WE", "TH", "FR", "SA"].iter().position(|d| *d == tag)
                    {
                        days[idx] = true;
                    }
                }
            }
            "UNTIL" => until_ts = parse_until(value, local),
            _ => {}
        }
    }

    let repeat = match freq.as_deref() {
        Some("DAILY") => Repeat::Daily,
        Some("WEEKLY") => Repeat::Weekly,
        other => {
            return Err(AppError::Parse(format!(
                "unsupported recurrence frequency {:?}",
                other.unwrap_or("none")
            )))
        }
    };
    Ok(RruleInfo { repeat, interval, days, until_ts })
}

fn parse_until(value: &str, local: Tz) -> Option<i64> {
    if value.len() == 8 && !value.contains('T') {
        // date-only bound covers its whole day
        let date = crate::utils::parse_yyyymmdd(value)?;
        return crate::utils::local_ts(local, date, NaiveTime::from_hms_opt(23, 59, 59)?);
    }
    parse_ics_datetime(value, None, local, local).map(|dt| dt.timestamp())
}

/// Resolve an iCalendar date-time: trailing `Z` means UTC, otherwise the
/// TZID parameter, otherwise the calendar's zone; the result is expressed
/// in the controller's local zone.
fn parse_ics_datetime(value: &str, tzid: Option<&str>, default_tz: Tz, local: Tz) -> Option<DateTime<Tz>> {
    let value = value.trim();
    if value.ends_with('Z') {
        let naive = NaiveDateTime::parse_from_str(value, "%Y%m%dT%H%M%SZ").ok()?;
        return Some(Utc.from_utc_datetime(&naive).with_timezone(&local));
    }
    let naive = NaiveDateTime::parse_from_str(value, "%Y%m%dT%H%M%S").ok()?;
    let tz: Tz = tzid.and_then(|t| t.parse().ok()).unwrap_or(default_tz);
    let resolved = tz.from_local_datetime(&naive);
    resolved.single().or_else(|| resolved.earliest()).map(|dt| dt.with_timezone(&local))
}

fn calendar_tz(calendar: &IcalCalendar) -> Option<Tz> {
    if let Some(tz) = prop_value(&calendar.properties, "X-WR-TIMEZONE").and_then(|v| v.parse().ok()) {
        return Some(tz);
    }
    calendar
        .timezones
        .iter()
        .find_map(|tz| prop_value(&tz.properties, "TZID"))
        .and_then(|v| v.parse().ok())
}

fn read_event(properties: &[Property], default_tz: Tz, local: Tz) -> Option<RawEvent> {
    let mut raw = RawEvent {
        uid: String::new(),
        summary: String::new(),
        description: String::new(),
        location: None,
        start: None,
        all_day: false,
        rrule: None,
        exdates: Vec::new(),
        recurrence_id: None,
        sequence: 0,
    };

    for prop in properties {
        let value = prop.value.clone().unwrap_or_default();
        match prop.name.to_ascii_uppercase().as_str() {
            "UID" => raw.uid = value,
            "SUMMARY" => raw.summary = unescape(&value),
            "DESCRIPTION" => raw.description = value,
            "LOCATION" => raw.location = Some(unescape(&value)),
            "SEQUENCE" => raw.sequence = value.parse().unwrap_or(0),
            "RRULE" => raw.rrule = Some(value),
            "DTSTART" => {
                if is_date_only(prop, &value) {
                    raw.all_day = true;
                } else {
                    raw.start = parse_ics_datetime(&value, param(prop, "TZID"), default_tz, local);
                }
            }
            "RECURRENCE-ID" => {
                raw.recurrence_id = parse_ics_datetime(&value, param(prop, "TZID"), default_tz, local)
                    .map(|dt| dt.timestamp());
            }
            "EXDATE" => {
                let tzid = param(prop, "TZID").map(str::to_owned);
                for piece in value.split(',') {
                    if let Some(dt) = parse_ics_datetime(piece, tzid.as_deref(), default_tz, local) {
                        raw.exdates.push(dt.timestamp());
                    }
                }
            }
            _ => {}
        }
    }

    (!raw.uid.is_empty()).then_some(raw)
}

fn is_date_only(prop: &Property, value: &str) -> bool {
    if param(prop, "VALUE").map_or(false, |v| v.eq_ignore_ascii_case("DATE")) {
        return true;
    }
    value.len() == 8 && !value.contains('T')
}

fn param<'a>(prop: &'a Property, name: &str) -> Option<&'a str> {
    prop.params.as_ref().and_then(|pairs| {
        pairs
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .and_then(|(_, values)| values.first().map(String::as_str))
    })
}

fn prop_value(properties: &[Property], name: &str) -> Option<String> {
    properties.iter().find(|p| p.name.eq_ignore_ascii_case(name)).and_then(|p| p.value.clone())
}

fn unescape(value: &str) -> String {
    value
        .replace("\\n", " ")
        .replace("\\N", " ")
        .replace("\\,", ",")
        .replace("\\;", ";")
        .replace("\\\\", "\\")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::zones::ZoneConfig;

    fn ics(events: &str) -> String {
        format!("BEGIN:VCALENDAR\nVERSION:2.0\nPRODID:-//test//EN\n{}END:VCALENDAR\n", events)
            .replace('\n', "\r\n")
    }

    fn zones() -> ZoneIndex {
        ZoneIndex::new(&[
            ZoneConfig { name: "Front".to_owned(), ..Default::default() },
            ZoneConfig { name: "Back".to_owned(), ..Default::default() },
        ])
    }

    fn ctx<'a>(zones: &'a ZoneIndex, now: i64) -> ParseContext<'a> {
        ParseContext { calendar: "garden", season: None, zones, location: None, tz: Tz::UTC, now }
    }

    #[test]
    fn weekly_event_becomes_program() {
        let text = ics(
            "BEGIN:VEVENT\n\
             UID:ev1\n\
             SUMMARY:Lawn\n\
             DTSTART:20990602T060000Z\n\
             RRULE:FREQ=WEEKLY;BYDAY=TU,TH\n\
             DESCRIPTION:Front=10 Back=15 append\n\
             END:VEVENT\n",
        );
        let z = zones();
        let programs = parse_calendar(&text, &ctx(&z, 0)).unwrap();
        assert_eq!(programs.len(), 1);
        let p = &programs[0];
        assert_eq!(p.name, "Lawn@garden");
        assert_eq!(p.start, "06:00");
        assert_eq!(p.repeat, Repeat::Weekly);
        assert_eq!(p.days, vec![false, false, true, false, true, false, false]);
        assert_eq!(p.zones, vec![ProgramZone { zone: 0, seconds: 600 }, ProgramZone { zone: 1, seconds: 900 }]);
        assert!(p.options.append);
        assert_eq!(p.date.as_deref(), Some("20990602"));
    }

    #[test]
    fn daily_interval_from_rrule() {
        let text = ics(
            "BEGIN:VEVENT\n\
             UID:ev2\n\
             SUMMARY:Drip\n\
             DTSTART:20990601T070000Z\n\
             RRULE:FREQ=DAILY;INTERVAL=3\n\
             DESCRIPTION:Back=5\n\
             END:VEVENT\n",
        );
        let z = zones();
        let programs = parse_calendar(&text, &ctx(&z, 0)).unwrap();
        assert_eq!(programs[0].repeat, Repeat::Daily);
        assert_eq!(programs[0].interval, 3);
        assert_eq!(programs[0].zones, vec![ProgramZone { zone: 1, seconds: 300 }]);
    }

    #[test]
    fn unknown_zone_rejects_event_only() {
        let text = ics(
            "BEGIN:VEVENT\n\
             UID:bad\n\
             SUMMARY:Bad\n\
             DTSTART:20990601T070000Z\n\
             RRULE:FREQ=DAILY\n\
             DESCRIPTION:Side=5\n\
             END:VEVENT\n\
             BEGIN:VEVENT\n\
             UID:good\n\
             SUMMARY:Good\n\
             DTSTART:20990601T080000Z\n\
             RRULE:FREQ=DAILY\n\
             DESCRIPTION:Front=5\n\
             END:VEVENT\n",
        );
        let z = zones();
        let programs = parse_calendar(&text, &ctx(&z, 0)).unwrap();
        assert_eq!(programs.len(), 1);
        assert_eq!(programs[0].name, "Good@garden");
    }

    #[test]
    fn unsupported_frequency_rejected() {
        let text = ics(
            "BEGIN:VEVENT\n\
             UID:m\n\
             SUMMARY:Monthly\n\
             DTSTART:20990601T070000Z\n\
             RRULE:FREQ=MONTHLY\n\
             DESCRIPTION:Front=5\n\
             END:VEVENT\n",
        );
        let z = zones();
        assert!(parse_calendar(&text, &ctx(&z, 0)).unwrap().is_empty());
    }

    #[test]
    fn all_day_and_expired_are_dropped() {
        let z = zones();
        let all_day = ics(
            "BEGIN:VEVENT\nUID:a\nSUMMARY:AllDay\nDTSTART;VALUE=DATE:20990601\nDESCRIPTION:Front=5\nEND:VEVENT\n",
        );
        assert!(parse_calendar(&all_day, &ctx(&z, 0)).unwrap().is_empty());

        let past_single = ics(
            "BEGIN:VEVENT\nUID:p\nSUMMARY:Old\nDTSTART:20200601T070000Z\nDESCRIPTION:Front=5\nEND:VEVENT\n",
        );
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap().timestamp();
        assert!(parse_calendar(&past_single, &ctx(&z, now)).unwrap().is_empty());

        let expired_until = ics(
            "BEGIN:VEVENT\nUID:u\nSUMMARY:Done\nDTSTART:20200601T070000Z\n\
             RRULE:FREQ=DAILY;UNTIL=20210101T000000Z\nDESCRIPTION:Front=5\nEND:VEVENT\n",
        );
        assert!(parse_calendar(&expired_until, &ctx(&z, now)).unwrap().is_empty());
    }

    #[test]
    fn location_filter_is_case_insensitive() {
        let text = ics(
            "BEGIN:VEVENT\nUID:l1\nSUMMARY:Here\nLOCATION:Home\nDTSTART:20990601T070000Z\n\
             RRULE:FREQ=DAILY\nDESCRIPTION:Front=5\nEND:VEVENT\n\
             BEGIN:VEVENT\nUID:l2\nSUMMARY:There\nLOCATION:Cabin\nDTSTART:20990601T070000Z\n\
             RRULE:FREQ=DAILY\nDESCRIPTION:Front=5\nEND:VEVENT\n",
        );
        let z = zones();
        let mut c = ctx(&z, 0);
        c.location = Some("home");
        let programs = parse_calendar(&text, &c).unwrap();
        assert_eq!(programs.len(), 1);
        assert_eq!(programs[0].name, "Here@garden");
    }

    #[test]
    fn tzid_start_converts_to_controller_zone() {
        let text = ics(
            "BEGIN:VEVENT\nUID:t\nSUMMARY:Tz\nDTSTART;TZID=America/Los_Angeles:20990702T060000\n\
             RRULE:FREQ=DAILY\nDESCRIPTION:Front=5\nEND:VEVENT\n",
        );
        let z = zones();
        let programs = parse_calendar(&text, &ctx(&z, 0)).unwrap();
        // 06:00 PDT == 13:00 UTC
        assert_eq!(programs[0].start, "13:00");
    }

    #[test]
    fn update_becomes_exception_with_exclusion() {
        let text = ics(
            "BEGIN:VEVENT\n\
             UID:w\n\
             SUMMARY:Tuesdays\n\
             DTSTART:20990601T060000Z\n\
             RRULE:FREQ=WEEKLY;BYDAY=TU\n\
             DESCRIPTION:Front=10\n\
             END:VEVENT\n\
             BEGIN:VEVENT\n\
             UID:w\n\
             SUMMARY:Tuesdays\n\
             SEQUENCE:1\n\
             RECURRENCE-ID:20990608T060000Z\n\
             DTSTART:20990608T070000Z\n\
             DESCRIPTION:Front=20\n\
             END:VEVENT\n",
        );
        let z = zones();
        let programs = parse_calendar(&text, &ctx(&z, 0)).unwrap();
        assert_eq!(programs.len(), 1);
        let p = &programs[0];
        assert_eq!(p.exceptions.len(), 1);
        let ex = &p.exceptions[0];
        assert_eq!(ex.start, "07:00");
        assert_eq!(ex.date.as_deref(), Some("20990608"));
        assert_eq!(ex.repeat, Repeat::None);
        assert_eq!(ex.zones, vec![ProgramZone { zone: 0, seconds: 1200 }]);
        let replaced = Utc.with_ymd_and_hms(2099, 6, 8, 6, 0, 0).unwrap().timestamp();
        assert!(p.exclusions.contains(&replaced));
    }

    #[test]
    fn later_sequence_wins_for_same_occurrence() {
        let text = ics(
            "BEGIN:VEVENT\nUID:w\nSUMMARY:Tu\nDTSTART:20990601T060000Z\nRRULE:FREQ=WEEKLY;BYDAY=TU\n\
             DESCRIPTION:Front=10\nEND:VEVENT\n\
             BEGIN:VEVENT\nUID:w\nSUMMARY:Tu\nSEQUENCE:1\nRECURRENCE-ID:20990608T060000Z\n\
             DTSTART:20990608T070000Z\nDESCRIPTION:Front=20\nEND:VEVENT\n\
             BEGIN:VEVENT\nUID:w\nSUMMARY:Tu\nSEQUENCE:2\nRECURRENCE-ID:20990608T060000Z\n\
             DTSTART:20990608T080000Z\nDESCRIPTION:Front=30\nEND:VEVENT\n",
        );
        let z = zones();
        let programs = parse_calendar(&text, &ctx(&z, 0)).unwrap();
        let ex = &programs[0].exceptions[0];
        assert_eq!(ex.start, "08:00");
        assert_eq!(ex.zones[0].seconds, 1800);
    }

    #[test]
    fn exdate_feeds_exclusions() {
        let text = ics(
            "BEGIN:VEVENT\nUID:x\nSUMMARY:Daily\nDTSTART:20990601T060000Z\nRRULE:FREQ=DAILY\n\
             EXDATE:20990603T060000Z,20990605T060000Z\nDESCRIPTION:Front=5\nEND:VEVENT\n",
        );
        let z = zones();
        let programs = parse_calendar(&text, &ctx(&z, 0)).unwrap();
        let p = &programs[0];
        assert_eq!(p.exclusions.len(), 2);
        let first = Utc.with_ymd_and_hms(2099, 6, 3, 6, 0, 0).unwrap().timestamp();
        assert!(p.exclusions.contains(&first));
    }

    #[test]
    fn folded_description_unfolds() {
        // RFC 5545 folding: continuation lines start with a space.
        let text = ics("BEGIN:VEVENT\nUID:f\nSUMMARY:Fold\nDTSTART:20990601T060000Z\nRRULE:FREQ=DAILY\nDESCRIPTION:Front=1\n 0 Back=5\nEND:VEVENT\n");
        let z = zones();
        let programs = parse_calendar(&text, &ctx(&z, 0)).unwrap();
        assert_eq!(
            programs[0].zones,
            vec![ProgramZone { zone: 0, seconds: 600 }, ProgramZone { zone: 1, seconds: 300 }]
        );
    }
}
