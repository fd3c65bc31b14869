#![allow(dead_code)]

use chrono::{TimeZone, Utc};
use sprinklerd::config::Config;
use sprinklerd::engine::program::{Program, ProgramZone, Repeat};
use sprinklerd::engine::zones::ZoneConfig;
use sprinklerd::engine::Engine;
use sprinklerd::events::{Action, Event, EventSink};
use sprinklerd::hardware::{sim::SimDriver, HardwareConfig};
use sprinklerd::time::MockTimeProvider;
use std::sync::Arc;

pub struct TestRig {
    pub engine: Arc<Engine>,
    pub sim: Arc<SimDriver>,
    pub clock: Arc<MockTimeProvider>,
}

pub fn ts(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> i64 {
    Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap().timestamp()
}

pub fn zone(name: &str) -> ZoneConfig {
    ZoneConfig { name: name.to_owned(), ..Default::default() }
}

pub fn zones(names: &[&str]) -> Vec<ZoneConfig> {
    names.iter().map(|n| zone(n)).collect()
}

pub fn weekly(name: &str, start: &str, day: usize, zone: usize, seconds: i64) -> Program {
    let mut days = vec![false; 7];
    days[day] = true;
    Program {
        name: name.to_owned(),
        start: start.to_owned(),
        repeat: Repeat::Weekly,
        days,
        zones: vec![ProgramZone { zone, seconds }],
        ..Default::default()
    }
}

pub async fn rig(config: Config, start_ts: i64) -> TestRig {
    let clock = Arc::new(MockTimeProvider::new(start_ts));
    let sim = Arc::new(SimDriver::new());
    let events = EventSink::new(None, clock.clone());
    let engine =
        Engine::with_driver(config, HardwareConfig::default(), sim.clone(), events, clock.clone())
            .await;
    TestRig { engine, sim, clock }
}

/// Let the paused runtime play `seconds` of executor time while the
/// wall clock follows along.
pub async fn play(rig: &TestRig, seconds: i64) {
    for _ in 0..seconds {
        rig.clock.advance(1);
        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
    }
    tokio::task::yield_now().await;
}

/// Recorded actions after the STARTUP marker.
pub fn actions(rig: &TestRig) -> Vec<Action> {
    rig.engine.events.tail().iter().skip(1).map(|e| e.action).collect()
}

pub fn events_after_startup(rig: &TestRig) -> Vec<Event> {
    rig.engine.events.tail().into_iter().skip(1).collect()
}
