use crate::engine::program::{Program, Season};
use chrono::DateTime;
use chrono_tz::Tz;
use tracing::debug;

/// Enforces "each wall-clock minute is evaluated at most once".
#[derive(Debug, Default)]
pub struct MinuteGate {
    last_check: Option<String>,
}

impl MinuteGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pass(&mut self, minute_key: &str) -> bool {
        if self.last_check.as_deref() == Some(minute_key) {
            return false;
        }
        self.last_check = Some(minute_key.to_owned());
        true
    }
}

/// Walk one program list and collect everything due this minute.
///
/// Inactive programs are skipped; a season tag gates on the current
/// month/week bit; a program's exceptions are evaluated first and a
/// firing exception replaces the program for this minute. Anchor-date
/// and one-shot mutations are written back through the list in place.
pub fn due_programs(programs: &mut [Program], seasons: &[Season], now: &DateTime<Tz>) -> Vec<Program> {
    let mut launches = Vec::new();

    for program in programs.iter_mut() {
        if !program.active {
            continue;
        }
        if let Some(season_name) = &program.season {
            if let Some(season) = seasons.iter().find(|s| &s.name == season_name) {
                if !season.active_at(now) {
                    debug!("Program {} out of season '{}'", program.name, season_name);
                    continue;
                }
            }
        }

        let mut replaced = false;
        for exception in program.exceptions.iter_mut() {
            if exception.active && exception.check_due(now) {
                launches.push(exception.clone());
                replaced = true;
                break;
            }
        }
        if replaced {
            continue;
        }

        if program.check_due(now) {
            launches.push(program.clone());
        }
    }

    launches
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::program::{ProgramZone, Repeat};
    use chrono::TimeZone;

    fn local(mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Tz> {
        Tz::UTC.with_ymd_and_hms(2024, mo, d, h, mi, 0).unwrap()
    }

    fn daily(name: &str, start: &str) -> Program {
        Program {
            name: name.to_owned(),
            start: start.to_owned(),
            repeat: Repeat::Daily,
            date: Some("20240101".to_owned()),
            zones: vec![ProgramZone { zone: 0, seconds: 60 }],
            ..Default::default()
        }
    }

    #[test]
    fn gate_passes_each_minute_once() {
        let mut gate = MinuteGate::new();
        assert!(gate.pass("06:00"));
        assert!(!gate.pass("06:00"));
        assert!(!gate.pass("06:00"));
        assert!(gate.pass("06:01"));
        assert!(!gate.pass("06:01"));
        // next day, same wall-clock minute: other minutes passed in between
        assert!(gate.pass("06:00"));
    }

    #[test]
    fn inactive_programs_are_skipped() {
        let mut p = daily("p", "06:00");
        p.active = false;
        let launches = due_programs(&mut [p], &[], &local(6, 3, 6, 0));
        assert!(launches.is_empty());
    }

    #[test]
    fn season_gate_blocks_out_of_season() {
        let summer = Season {
            name: "summer".to_owned(),
            monthly: Some(vec![
                false, false, false, false, true, true, true, true, true, false, false, false,
            ]),
            weekly: None,
        };
        let mut programs = [{
            let mut p = daily("p", "06:00");
            p.season = Some("summer".to_owned());
            p
        }];
        assert!(due_programs(&mut programs, std::slice::from_ref(&summer), &local(1, 3, 6, 0)).is_empty());
        assert_eq!(due_programs(&mut programs, std::slice::from_ref(&summer), &local(6, 3, 6, 0)).len(), 1);
    }

    #[test]
    fn unknown_season_name_does_not_block() {
        let mut programs = [{
            let mut p = daily("p", "06:00");
            p.season = Some("missing".to_owned());
            p
        }];
        assert_eq!(due_programs(&mut programs, &[], &local(1, 3, 6, 0)).len(), 1);
    }

    #[test]
    fn firing_exception_replaces_the_program() {
        let mut base = daily("base", "06:00");
        base.exclusions.push(local(6, 3, 6, 0).timestamp());
        base.exceptions.push(Program {
            name: "base".to_owned(),
            start: "07:00".to_owned(),
            repeat: Repeat::None,
            date: Some("20240603".to_owned()),
            zones: vec![ProgramZone { zone: 0, seconds: 120 }],
            ..Default::default()
        });
        let mut programs = [base];

        // replaced occurrence suppressed at 06:00
        assert!(due_programs(&mut programs, &[], &local(6, 3, 6, 0)).is_empty());
        // the exception fires at 07:00 with its own zones
        let launches = due_programs(&mut programs, &[], &local(6, 3, 7, 0));
        assert_eq!(launches.len(), 1);
        assert_eq!(launches[0].zones[0].seconds, 120);
        // spent one-shot exception does not fire again
        assert!(due_programs(&mut programs, &[], &local(6, 10, 7, 0)).is_empty());
    }

    #[test]
    fn anchor_mutation_persists_in_the_list() {
        let mut p = daily("p", "06:00");
        p.date = None;
        let mut programs = [p];
        let launches = due_programs(&mut programs, &[], &local(6, 3, 6, 0));
        assert_eq!(launches.len(), 1);
        assert_eq!(programs[0].date.as_deref(), Some("20240603"));
    }
}
