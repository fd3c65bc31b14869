use crate::engine::program::Program;
use crate::engine::zones::ZoneIndex;
use crate::events::{Action, Event, EventSink};
use crate::hardware::HardwareDriver;
use crate::time::TimeProvider;
use crate::utils::pct;
use crate::weather::{WateringIndexAdjuster, WeatherAdjuster};
use chrono::DateTime;
use chrono_tz::Tz;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

/// Residual pulse fragments shorter than this are dropped.
pub const MIN_TAIL_SECS: i64 = 15;
/// Rest between two queue items, seconds.
pub const SETTLE_SECS: i64 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunTarget {
    Zone(usize),
    /// Sleep between pulse rounds; no hardware action.
    Pause,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunItem {
    pub target: RunTarget,
    pub seconds: i64,
    pub parent: Option<String>,
    pub adjust_source: Option<String>,
    pub ratio: Option<i64>,
}

impl RunItem {
    pub fn zone(zone: usize, seconds: i64, parent: Option<String>) -> Self {
        Self { target: RunTarget::Zone(zone), seconds, parent, adjust_source: None, ratio: None }
    }

    pub fn pause(seconds: i64, parent: Option<String>) -> Self {
        Self { target: RunTarget::Pause, seconds, parent, adjust_source: None, ratio: None }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunningInfo {
    pub zone: Option<usize>,
    pub parent: Option<String>,
    pub seconds: i64,
    pub remaining: i64,
    pub started_at: i64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecSnapshot {
    pub running: Option<RunningInfo>,
    pub queued: usize,
}

impl ExecSnapshot {
    pub fn is_idle(&self) -> bool {
        self.running.is_none() && self.queued == 0
    }
}

/// Extra fields stamped onto a program START event.
#[derive(Debug, Clone, Default)]
pub struct StartAnnotation {
    pub source: Option<String>,
    pub adjustment: Option<i64>,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub rain: Option<f64>,
}

pub enum ExecCommand {
    Launch {
        program: String,
        append: bool,
        skips: Vec<usize>,
        items: Vec<RunItem>,
        annotation: StartAnnotation,
    },
    ZoneOn { zone: usize, seconds: i64 },
    AllOff,
}

/// Hardware view the executor runs against; re-seated on config reload.
#[derive(Clone)]
pub struct ExecEnv {
    pub driver: Arc<dyn HardwareDriver>,
    pub zones: ZoneIndex,
}

/// Handle to the run-queue task. All queue and running-state mutation
/// happens on that task; at most one zone is physically energised.
#[derive(Clone)]
pub struct Executor {
    tx: mpsc::UnboundedSender<ExecCommand>,
    snapshot: Arc<Mutex<ExecSnapshot>>,
}

impl Executor {
    pub fn start(env: Arc<RwLock<ExecEnv>>, events: EventSink, time: Arc<dyn TimeProvider>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let snapshot = Arc::new(Mutex::new(ExecSnapshot::default()));
        let task_snapshot = snapshot.clone();
        tokio::spawn(async move {
            run_queue_task(rx, env, events, time, task_snapshot).await;
        });
        Self { tx, snapshot }
    }

    pub fn launch(&self, program: String, append: bool, skips: Vec<usize>, items: Vec<RunItem>, annotation: StartAnnotation) {
        let _ = self.tx.send(ExecCommand::Launch { program, append, skips, items, annotation });
    }

    pub fn zone_on(&self, zone: usize, seconds: i64) {
        let _ = self.tx.send(ExecCommand::ZoneOn { zone, seconds });
    }

    pub fn all_off(&self) {
        let _ = self.tx.send(ExecCommand::AllOff);
    }

    pub fn snapshot(&self) -> ExecSnapshot {
        self.snapshot.lock().unwrap().clone()
    }

    pub fn is_idle(&self) -> bool {
        self.snapshot().is_idle()
    }
}

/// Expansion result: the run plan plus the manual zones it skipped.
#[derive(Debug, Default)]
pub struct Expansion {
    pub items: Vec<RunItem>,
    pub skips: Vec<usize>,
}

struct ZonePlan {
    zone: usize,
    remaining: i64,
    pulse: i64,
    pause: i64,
    source: Option<String>,
    ratio: Option<i64>,
}

/// Expand a program into its pulsed run plan.
///
/// Adjustment source priority per zone: the named adjustment profile,
/// then the watering index, then the weather provider, then none.
/// Pulses are emitted round-robin; each round whose zones still hold
/// residual time is followed by one group-level pause (the round's
/// maximum). Residuals shorter than both 15 s and the pulse are dropped.
pub fn expand_program(
    program: &Program,
    zones: &ZoneIndex,
    profiles: &[crate::engine::program::AdjustProfile],
    windex: &WateringIndexAdjuster,
    weather: &WeatherAdjuster,
    now: &DateTime<Tz>,
) -> Expansion {
    let mut plans: Vec<ZonePlan> = Vec::with_capacity(program.zones.len());
    let mut skips = Vec::new();

    for pz in &program.zones {
        let zone_cfg = zones.get(pz.zone);
        if zone_cfg.map_or(false, |z| z.manual) {
            skips.push(pz.zone);
            continue;
        }
        let raw = pz.seconds;
        let profile_name = zone_cfg.and_then(|z| z.adjust.as_deref()).unwrap_or("default");
        let profile_ratio =
            profiles.iter().find(|p| p.name == profile_name).and_then(|p| p.ratio_at(now));

        let (adjusted, source) = if let Some((ratio, kind)) = profile_ratio {
            (pct(raw, ratio), Some(format!("{} ({})", profile_name, kind)))
        } else if windex.enabled() {
            (windex.adjust(raw), Some(windex.source().to_owned()))
        } else if weather.enabled() {
            (weather.adjust(raw), Some(weather.source().to_owned()))
        } else {
            (raw, None)
        };

        let ratio = (raw > 0).then(|| adjusted * 100 / raw);
        let pulse = zone_cfg.and_then(|z| z.pulse).filter(|p| *p > 0).unwrap_or(adjusted);
        let pause = zone_cfg.and_then(|z| z.pause).unwrap_or(0);
        plans.push(ZonePlan { zone: pz.zone, remaining: adjusted, pulse, pause, source, ratio });
    }

    let mut items = Vec::new();
    loop {
        let mut emitted = false;
        let mut max_pause = 0;
        for plan in plans.iter_mut() {
            if plan.remaining <= 0 {
                continue;
            }
            let run = plan.remaining.min(plan.pulse);
            items.push(RunItem {
                target: RunTarget::Zone(plan.zone),
                seconds: run,
                parent: Some(program.name.clone()),
                adjust_source: plan.source.clone(),
                ratio: plan.ratio,
            });
            emitted = true;
            plan.remaining -= run;
            if plan.remaining > 0 && plan.remaining < MIN_TAIL_SECS && plan.remaining < plan.pulse {
                plan.remaining = 0; // drop the tail fragment
            }
            if plan.remaining > 0 {
                max_pause = max_pause.max(plan.pause);
            }
        }
        if !emitted {
            break;
        }
        if max_pause >= 1 {
            items.push(RunItem::pause(max_pause, Some(program.name.clone())));
        }
    }

    Expansion { items, skips }
}

struct Running {
    item: RunItem,
    remaining: i64,
    started_at: i64,
}

#[derive(Default)]
struct ExecState {
    queue: VecDeque<RunItem>,
    running: Option<Running>,
    settle: i64,
}

async fn run_queue_task(
    mut rx: mpsc::UnboundedReceiver<ExecCommand>,
    env: Arc<RwLock<ExecEnv>>,
    events: EventSink,
    time: Arc<dyn TimeProvider>,
    snapshot: Arc<Mutex<ExecSnapshot>>,
) {
    let mut st = ExecState::default();
    let mut tick = tokio::time::interval(Duration::from_secs(1));
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // the first tick completes immediately; consume it
    tick.tick().await;

    loop {
        tokio::select! {
            cmd = rx.recv() => match cmd {
                Some(cmd) => handle_command(cmd, &mut st, &env, &events, &time),
                None => break,
            },
            _ = tick.tick() => advance_second(&mut st, &env, &events, &time),
        }
        publish(&st, &snapshot);
    }
}

fn handle_command(
    cmd: ExecCommand,
    st: &mut ExecState,
    env: &Arc<RwLock<ExecEnv>>,
    events: &EventSink,
    time: &Arc<dyn TimeProvider>,
) {
    match cmd {
        ExecCommand::Launch { program, append, skips, items, annotation } => {
            if !append {
                kill_queue(st, env, events);
            }
            for zone in skips {
                let mut ev = Event::new(Action::Skip);
                ev.zone = Some(zone);
                ev.parent = Some(program.clone());
                events.record(ev);
            }
            let mut ev = Event::new(Action::Start);
            ev.program = Some(program.clone());
            ev.source = annotation.source;
            ev.adjustment = annotation.adjustment;
            ev.temperature = annotation.temperature;
            ev.humidity = annotation.humidity;
            ev.rain = annotation.rain;
            events.record(ev);
            info!("Program {} queued ({} items)", program, items.len());
            st.queue.extend(items);
            pump(st, env, events, time);
        }
        ExecCommand::ZoneOn { zone, seconds } => {
            kill_queue(st, env, events);
            st.queue.push_back(RunItem::zone(zone, seconds, None));
            pump(st, env, events, time);
        }
        ExecCommand::AllOff => {
            kill_queue(st, env, events);
        }
    }
}

/// Start queued work if nothing is live and the settle rest has passed.
fn pump(st: &mut ExecState, env: &Arc<RwLock<ExecEnv>>, events: &EventSink, time: &Arc<dyn TimeProvider>) {
    while st.running.is_none() && st.settle == 0 {
        let Some(item) = st.queue.pop_front() else {
            return;
        };
        if item.seconds <= 0 {
            continue;
        }
        match item.target {
            RunTarget::Pause => {
                debug!("Pause for {}s", item.seconds);
                st.running = Some(Running { remaining: item.seconds, started_at: time.now(), item });
            }
            RunTarget::Zone(zone) => {
                let env = env.read().unwrap();
                if env.zones.get(zone).is_none() {
                    error!("Dropping run item for unknown zone {}", zone);
                    continue;
                }
                let mut ev = Event::new(if item.parent.is_some() { Action::Start } else { Action::On });
                ev.zone = Some(zone);
                ev.parent = item.parent.clone();
                ev.seconds = Some(item.seconds);
                ev.source = item.adjust_source.clone();
                ev.ratio = item.ratio;
                events.record(ev);

                // Branch valve first, then its master: the line must not
                // pressurise before the branch is open.
                env.driver.set_zone(zone, true);
                env.driver.apply();
                if let Some(master) = env.zones.master_of(zone) {
                    env.driver.set_zone(master, true);
                    env.driver.apply();
                }
                info!("Zone {} on for {}s", zone, item.seconds);
                st.running = Some(Running { remaining: item.seconds, started_at: time.now(), item });
            }
        }
        return;
    }
}

/// One second of wall-clock: count down the live run or the settle rest.
fn advance_second(st: &mut ExecState, env: &Arc<RwLock<ExecEnv>>, events: &EventSink, time: &Arc<dyn TimeProvider>) {
    if st.settle > 0 {
        st.settle -= 1;
        if st.settle == 0 {
            pump(st, env, events, time);
        }
        return;
    }
    let Some(run) = st.running.as_mut() else {
        return;
    };
    run.remaining -= 1;
    if run.remaining > 0 {
        return;
    }

    let run = st.running.take().expect("live run");
    if let RunTarget::Zone(zone) = run.item.target {
        {
            let env = env.read().unwrap();
            // Master closes first so the branch depressurises last.
            if let Some(master) = env.zones.master_of(zone) {
                env.driver.set_zone(master, false);
                env.driver.apply();
            }
            env.driver.set_zone(zone, false);
            env.driver.apply();
        }
        let mut ev = Event::new(if run.item.parent.is_some() { Action::End } else { Action::Off });
        ev.zone = Some(zone);
        ev.parent = run.item.parent.clone();
        ev.seconds = Some(run.item.seconds);
        events.record(ev);
        info!("Zone {} off", zone);
        st.settle = SETTLE_SECS;
    }

    // END for the outgoing program when the next item belongs elsewhere.
    if let Some(parent) = run.item.parent.clone() {
        let next_parent = st.queue.front().and_then(|i| i.parent.clone());
        if next_parent.as_deref() != Some(parent.as_str()) {
            let mut ev = Event::new(Action::End);
            ev.program = Some(parent);
            events.record(ev);
        }
    }
    if st.queue.is_empty() {
        events.record(Event::new(Action::Idle));
    }
    if matches!(run.item.target, RunTarget::Pause) {
        // A finished pause advances the queue immediately; no settle.
        pump(st, env, events, time);
    }
}

/// Cancel everything: pending items, the live run, every output.
/// Idempotent; safe to call with nothing running.
fn kill_queue(st: &mut ExecState, env: &Arc<RwLock<ExecEnv>>, events: &EventSink) {
    if let Some(run) = st.running.take() {
        if let RunTarget::Zone(zone) = run.item.target {
            let mut ev = Event::new(Action::Cancel);
            ev.zone = Some(zone);
            ev.parent = run.item.parent.clone();
            ev.runtime = Some(run.item.seconds - run.remaining);
            events.record(ev);
        }
    }
    st.queue.clear();
    st.settle = 0;
    let env = env.read().unwrap();
    for zone in 0..env.zones.len() {
        env.driver.set_zone(zone, false);
    }
    env.driver.apply();
}

fn publish(st: &ExecState, snapshot: &Arc<Mutex<ExecSnapshot>>) {
    let running = st.running.as_ref().map(|run| RunningInfo {
        zone: match run.item.target {
            RunTarget::Zone(zone) => Some(zone),
            RunTarget::Pause => None,
        },
        parent: run.item.parent.clone(),
        seconds: run.item.seconds,
        remaining: run.remaining,
        started_at: run.started_at,
    });
    *snapshot.lock().unwrap() = ExecSnapshot { running, queued: st.queue.len() };
}
