mod common;

use common::*;
use sprinklerd::config::Config;
use sprinklerd::engine::program::{Program, ProgramZone};
use sprinklerd::events::Action;

fn test_config() -> Config {
    Config { zones: zones(&["Front", "Back", "Drip"]), ..Default::default() }
}

#[tokio::test(start_paused = true)]
async fn program_run_emits_ordered_events() {
    // Tuesday 2024-01-02 06:00 UTC, weekly mask on Tuesday (Sun=0 -> 2).
    let mut config = test_config();
    config.programs.push(weekly("W", "06:00", 2, 0, 60));
    let rig = rig(config, ts(2024, 1, 2, 6, 0, 0)).await;

    rig.engine.schedule_tick().await;
    play(&rig, 62).await;

    let events = events_after_startup(&rig);
    let shape: Vec<(Action, Option<usize>, Option<&str>, Option<&str>)> = events
        .iter()
        .map(|e| (e.action, e.zone, e.program.as_deref(), e.parent.as_deref()))
        .collect();
    assert_eq!(
        shape,
        vec![
            (Action::Start, None, Some("W"), None),
            (Action::Start, Some(0), None, Some("W")),
            (Action::End, Some(0), None, Some("W")),
            (Action::End, None, Some("W"), None),
            (Action::Idle, None, None, None),
        ]
    );
    assert_eq!(events[1].seconds, Some(60));
    assert!(rig.engine.executor.is_idle());
}

#[tokio::test(start_paused = true)]
async fn zone_energises_with_master_ordering() {
    let mut config = test_config();
    config.zones[1].master = Some(0);
    config.programs.push(weekly("M", "06:00", 2, 1, 5));
    let rig = rig(config, ts(2024, 1, 2, 6, 0, 0)).await;

    rig.engine.schedule_tick().await;
    tokio::task::yield_now().await;
    play(&rig, 1).await;
    // branch opens before the master pressurises the line
    assert_eq!(rig.sim.switch_log(), vec![(1, true), (0, true)]);
    assert_eq!(rig.sim.committed()[0], true);
    assert_eq!(rig.sim.committed()[1], true);
    rig.sim.clear_switch_log();

    play(&rig, 6).await;
    // master closes first, branch last
    assert_eq!(rig.sim.switch_log(), vec![(0, false), (1, false)]);
    assert_eq!(rig.sim.committed(), vec![false, false, false]);
}

#[tokio::test(start_paused = true)]
async fn at_most_one_zone_energised_across_a_program() {
    let mut config = test_config();
    config.programs.push(Program {
        name: "P".to_owned(),
        start: "06:00".to_owned(),
        repeat: sprinklerd::engine::program::Repeat::Daily,
        zones: vec![ProgramZone { zone: 0, seconds: 4 }, ProgramZone { zone: 2, seconds: 4 }],
        ..Default::default()
    });
    let rig = rig(config, ts(2024, 1, 2, 6, 0, 0)).await;

    rig.engine.schedule_tick().await;
    for _ in 0..14 {
        play(&rig, 1).await;
        let on_count = rig.sim.committed().iter().filter(|on| **on).count();
        assert!(on_count <= 1, "more than one zone energised");
    }
    assert!(rig.engine.executor.is_idle());
    // both zones got their runs, serially
    let events = events_after_startup(&rig);
    let started: Vec<usize> = events
        .iter()
        .filter(|e| e.action == Action::Start && e.zone.is_some())
        .map(|e| e.zone.unwrap())
        .collect();
    assert_eq!(started, vec![0, 2]);
}

#[tokio::test(start_paused = true)]
async fn manual_override_cancels_with_runtime() {
    let mut config = test_config();
    config.programs.push(weekly("A", "06:00", 2, 0, 600));
    let rig = rig(config, ts(2024, 1, 2, 6, 0, 0)).await;

    rig.engine.schedule_tick().await;
    play(&rig, 30).await;
    assert_eq!(rig.sim.committed()[0], true);

    rig.engine.zone_on_manual(2, 10).unwrap();
    play(&rig, 1).await;

    let events = events_after_startup(&rig);
    let cancel = events.iter().find(|e| e.action == Action::Cancel).expect("cancel event");
    assert_eq!(cancel.zone, Some(0));
    assert_eq!(cancel.parent.as_deref(), Some("A"));
    assert_eq!(cancel.runtime, Some(30));

    // zone 2 runs manually for 10 s, then the queue drains to idle
    assert_eq!(rig.sim.committed(), vec![false, false, true]);
    play(&rig, 11).await;
    assert!(rig.engine.executor.is_idle());
    assert_eq!(rig.sim.committed(), vec![false, false, false]);

    let events = events_after_startup(&rig);
    // manual runs record ON/OFF; program A never gets an END
    assert!(events.iter().any(|e| e.action == Action::On && e.zone == Some(2)));
    assert!(events.iter().any(|e| e.action == Action::Off && e.zone == Some(2)));
    assert!(!events.iter().any(|e| e.action == Action::End && e.program.as_deref() == Some("A")));
}

#[tokio::test(start_paused = true)]
async fn manual_flagged_zone_skipped_in_programs_but_direct_works() {
    let mut config = test_config();
    config.zones[2].manual = true;
    config.programs.push(Program {
        name: "P".to_owned(),
        start: "06:00".to_owned(),
        repeat: sprinklerd::engine::program::Repeat::Daily,
        zones: vec![ProgramZone { zone: 2, seconds: 60 }, ProgramZone { zone: 0, seconds: 5 }],
        ..Default::default()
    });
    let rig = rig(config, ts(2024, 1, 2, 6, 0, 0)).await;

    rig.engine.schedule_tick().await;
    play(&rig, 1).await;

    let events = events_after_startup(&rig);
    let skip = events.iter().find(|e| e.action == Action::Skip).expect("skip event");
    assert_eq!(skip.zone, Some(2));
    assert_eq!(rig.sim.committed()[2], false);
    assert_eq!(rig.sim.committed()[0], true);

    play(&rig, 8).await;
    rig.engine.zone_on_manual(2, 5).unwrap();
    play(&rig, 1).await;
    assert_eq!(rig.sim.committed()[2], true);
}

#[tokio::test(start_paused = true)]
async fn kill_queue_is_idempotent() {
    let config = test_config();
    let rig = rig(config, ts(2024, 1, 2, 6, 0, 0)).await;

    rig.engine.all_off();
    rig.engine.all_off();
    play(&rig, 1).await;

    // no CANCEL without a live run, outputs stay off
    assert!(!actions(&rig).contains(&Action::Cancel));
    assert_eq!(rig.sim.committed(), vec![false, false, false]);
}

#[tokio::test(start_paused = true)]
async fn out_of_range_zone_in_program_is_dropped() {
    let mut config = test_config();
    config.programs.push(Program {
        name: "P".to_owned(),
        start: "06:00".to_owned(),
        repeat: sprinklerd::engine::program::Repeat::Daily,
        zones: vec![ProgramZone { zone: 9, seconds: 60 }, ProgramZone { zone: 0, seconds: 5 }],
        ..Default::default()
    });
    let rig = rig(config, ts(2024, 1, 2, 6, 0, 0)).await;

    rig.engine.schedule_tick().await;
    play(&rig, 1).await;
    // invalid item dropped, the rest of the queue continues
    assert_eq!(rig.sim.committed()[0], true);
    play(&rig, 6).await;
    assert!(rig.engine.executor.is_idle());
}

#[tokio::test(start_paused = true)]
async fn append_option_preserves_the_queue() {
    let rig = rig(test_config(), ts(2024, 1, 2, 6, 0, 0)).await;

    let base = Program {
        name: "base".to_owned(),
        zones: vec![ProgramZone { zone: 0, seconds: 30 }],
        ..Default::default()
    };
    let mut extra = Program {
        name: "extra".to_owned(),
        zones: vec![ProgramZone { zone: 1, seconds: 10 }],
        ..Default::default()
    };
    extra.options.append = true;

    rig.engine.program_on(&base).await;
    play(&rig, 2).await;
    rig.engine.program_on(&extra).await;
    play(&rig, 1).await;

    // no CANCEL: the append launch kept base running
    assert!(!actions(&rig).contains(&Action::Cancel));
    assert_eq!(rig.sim.committed()[0], true);
    assert_eq!(rig.engine.executor.snapshot().queued, 1);
}
