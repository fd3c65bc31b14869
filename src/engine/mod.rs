pub mod executor;
pub mod manual;
pub mod program;
pub mod rain;
pub mod scheduler;
pub mod zones;

use crate::calendar::{CalendarImporter, CalendarStatus};
use crate::config::Config;
use crate::error::AppError;
use crate::events::{Action, Event, EventFilter, EventSink};
use crate::hardware::{build_driver, HardwareConfig, HardwareDriver};
use crate::time::TimeProvider;
use crate::weather::{AdjusterStatus, WateringIndexAdjuster, WeatherAdjuster};
use chrono::DateTime;
use chrono_tz::Tz;
use executor::{expand_program, ExecEnv, Executor, RunningInfo, StartAnnotation};
use manual::ButtonWalk;
use program::Program;
use rain::RainDelay;
use scheduler::{due_programs, MinuteGate};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, RwLock as StdRwLock};
use tokio::sync::RwLock;
use tracing::{debug, info};
use zones::ZoneIndex;

/// Scheduler cadence.
pub const SCHEDULE_TICK_SECS: u64 = 10;
/// Refresher cadence.
pub const REFRESH_TICK_SECS: u64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    Off,
    Idle,
    RainHold,
    Running,
}

#[derive(Debug, Clone, Serialize)]
pub struct RainDelayStatus {
    pub enabled: bool,
    pub remaining: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ZoneStatus {
    pub name: String,
    pub manual: bool,
    pub master: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub mode: RunMode,
    pub on: bool,
    pub raindelay: RainDelayStatus,
    pub running: Option<RunningInfo>,
    pub queued: usize,
    pub zones: Vec<ZoneStatus>,
    pub weather: AdjusterStatus,
    pub wateringindex: AdjusterStatus,
    pub calendars: Vec<CalendarStatus>,
}

/// The controller core. One value owns every piece of mutable state and
/// is passed (as `Arc<Engine>`) through all calls; a config activation
/// re-seats the components without touching the live run queue.
pub struct Engine {
    pub config: RwLock<Config>,
    pub events: EventSink,
    pub time: Arc<dyn TimeProvider>,
    pub executor: Executor,
    env: Arc<StdRwLock<ExecEnv>>,
    button: ButtonWalk,
    weather: RwLock<WeatherAdjuster>,
    windex: RwLock<WateringIndexAdjuster>,
    calendar: RwLock<CalendarImporter>,
    rain: StdMutex<RainDelay>,
    gate: StdMutex<MinuteGate>,
    tz: StdRwLock<Tz>,
    /// Mirror of config.raindelay readable from sync edge callbacks.
    raindelay_enabled: AtomicBool,
    last_weather_update: StdMutex<i64>,
    last_index_update: StdMutex<i64>,
}

impl Engine {
    pub async fn new(
        config: Config,
        hw: HardwareConfig,
        events: EventSink,
        time: Arc<dyn TimeProvider>,
    ) -> Arc<Self> {
        let driver = build_driver(&hw, &config);
        Self::with_driver(config, hw, driver, events, time).await
    }

    /// Construct around an externally built driver (tests hand in the
    /// simulated bank and keep a handle to it).
    pub async fn with_driver(
        config: Config,
        hw: HardwareConfig,
        driver: Arc<dyn HardwareDriver>,
        events: EventSink,
        time: Arc<dyn TimeProvider>,
    ) -> Arc<Self> {
        let env = Arc::new(StdRwLock::new(ExecEnv {
            driver,
            zones: ZoneIndex::new(&config.zones),
        }));
        let executor = Executor::start(env.clone(), events.clone(), time.clone());
        let button = ButtonWalk::start(executor.clone(), env.clone());

        let engine = Arc::new(Self {
            config: RwLock::new(Config::default()),
            events,
            time,
            executor,
            env,
            button,
            weather: RwLock::new(WeatherAdjuster::new()),
            windex: RwLock::new(WateringIndexAdjuster::new()),
            calendar: RwLock::new(CalendarImporter::new()),
            rain: StdMutex::new(RainDelay::default()),
            gate: StdMutex::new(MinuteGate::new()),
            tz: StdRwLock::new(Tz::UTC),
            raindelay_enabled: AtomicBool::new(false),
            last_weather_update: StdMutex::new(0),
            last_index_update: StdMutex::new(0),
        });
        engine.wire_interrupts();
        engine.activate_config(config, &hw).await;
        engine.events.record(Event::new(Action::Startup));
        engine
    }

    /// Re-seat every component from a new configuration. The run queue
    /// and any in-flight run are deliberately left alone.
    pub async fn activate_config(&self, new: Config, hw: &HardwareConfig) {
        *self.tz.write().unwrap() = new.tz();
        self.raindelay_enabled.store(new.raindelay, Ordering::SeqCst);
        self.events.configure(&new.event);
        {
            let mut env = self.env.write().unwrap();
            env.zones = ZoneIndex::new(&new.zones);
            env.driver.configure(hw, &new);
        }
        let now = self.time.now();
        self.weather.write().await.configure(&new.weather, now);
        self.windex.write().await.configure(&new.wateringindex, now);
        self.calendar.write().await.configure(&new.calendars);
        self.rain.lock().unwrap().enabled = new.raindelay;
        *self.config.write().await = new;
        info!("Configuration activated");
    }

    /// Re-read configuration from disk. A parse failure keeps the last
    /// good configuration running.
    pub async fn reload_config(&self, path: &std::path::Path) -> Result<(), AppError> {
        match Config::load(path) {
            Ok(new) => {
                let hw = HardwareConfig::load(&crate::config::locate_file(
                    crate::config::HARDWARE_FILE,
                ))
                .unwrap_or_default();
                self.activate_config(new, &hw).await;
                Ok(())
            }
            Err(e) => {
                tracing::warn!("Config reload failed, keeping last good configuration: {}", e);
                Err(e)
            }
        }
    }

    fn wire_interrupts(self: &Arc<Self>) {
        let driver = self.env.read().unwrap().driver.clone();
        let weak = Arc::downgrade(self);
        driver.rain_interrupt(Arc::new(move |level| {
            if !level {
                return;
            }
            if let Some(engine) = weak.upgrade() {
                if engine.raindelay_enabled.load(Ordering::SeqCst) {
                    let now = engine.time.now();
                    engine.rain.lock().unwrap().extend(now);
                    info!("Rain detected, delay armed");
                }
            }
        }));
        let weak = Arc::downgrade(self);
        driver.button_interrupt(Arc::new(move |level| {
            if !level {
                return;
            }
            if let Some(engine) = weak.upgrade() {
                engine.button.press();
            }
        }));
    }

    pub fn now_local(&self) -> DateTime<Tz> {
        crate::utils::local_now(*self.tz.read().unwrap(), self.time.now())
    }

    /// 10-second heartbeat. Gated so each wall-clock minute evaluates at
    /// most once; a rain hold suppresses launches but never aborts the
    /// queue.
    pub async fn schedule_tick(&self) {
        let now = self.now_local();
        let minute_key = now.format("%H:%M").to_string();
        if !self.gate.lock().unwrap().pass(&minute_key) {
            return;
        }

        let (on, raindelay) = {
            let cfg = self.config.read().await;
            (cfg.on, cfg.raindelay)
        };
        if raindelay {
            let hw_rain = {
                let env = self.env.read().unwrap();
                env.driver.rain_sensor()
            };
            let sensed = hw_rain || self.weather.read().await.rainsensor();
            let ts = now.timestamp();
            let mut rain = self.rain.lock().unwrap();
            if sensed {
                rain.extend(ts);
            }
            if rain.holding(ts) {
                debug!("Rain hold, skipping program evaluation");
                return;
            }
        }
        if !on {
            return;
        }

        let user_launches = {
            let mut cfg = self.config.write().await;
            let Config { programs, seasons, .. } = &mut *cfg;
            due_programs(programs, seasons, &now)
        };
        let calendar_launches = {
            let seasons = self.config.read().await.seasons.clone();
            let mut calendar = self.calendar.write().await;
            due_programs(calendar.programs_mut(), &seasons, &now)
        };
        for program in user_launches.into_iter().chain(calendar_launches) {
            self.program_on(&program).await;
        }
    }

    /// Expand a program against the current adjusters and hand the run
    /// plan to the executor.
    pub async fn program_on(&self, program: &Program) {
        let now = self.now_local();
        let cfg = self.config.read().await;
        let windex = self.windex.read().await;
        let weather = self.weather.read().await;
        let expansion = {
            let env = self.env.read().unwrap();
            expand_program(program, &env.zones, &cfg.adjust, &windex, &weather, &now)
        };
        let annotation = if windex.enabled() {
            StartAnnotation {
                source: Some(windex.source().to_owned()),
                adjustment: Some(windex.adjustment()),
                ..Default::default()
            }
        } else if weather.enabled() {
            let obs = weather.observation();
            StartAnnotation {
                source: Some(weather.source().to_owned()),
                adjustment: Some(weather.adjustment()),
                temperature: obs.map(|o| o.temperature),
                humidity: obs.map(|o| o.humidity),
                rain: obs.map(|o| o.rain),
            }
        } else {
            StartAnnotation::default()
        };
        self.executor.launch(
            program.name.clone(),
            program.options.append,
            expansion.skips,
            expansion.items,
            annotation,
        );
    }

    /// 60-second heartbeat for the refreshers; each is self-throttling.
    /// A successful weather/index refresh newer than the last recorded
    /// one emits an UPDATE event.
    pub async fn refresh_tick(&self) {
        let now = self.now_local();
        {
            let (zones, location, tz) = {
                let cfg = self.config.read().await;
                (ZoneIndex::new(&cfg.zones), cfg.location.clone(), cfg.tz())
            };
            self.calendar.write().await.refresh(&now, &zones, location.as_deref(), tz, false).await;
        }
        {
            let mut weather = self.weather.write().await;
            weather.refresh(&now, false).await;
            let updated = weather.updated();
            let mut last = self.last_weather_update.lock().unwrap();
            if updated > *last {
                if *last > 0 {
                    let obs = weather.observation();
                    let mut ev = Event::new(Action::Update);
                    ev.source = Some(weather.source().to_owned());
                    ev.adjustment = Some(weather.adjustment());
                    ev.temperature = obs.map(|o| o.temperature);
                    ev.humidity = obs.map(|o| o.humidity);
                    ev.rain = obs.map(|o| o.rain);
                    self.events.record(ev);
                }
                *last = updated;
            }
        }
        {
            let mut windex = self.windex.write().await;
            windex.refresh(&now, false).await;
            let updated = windex.updated();
            let mut last = self.last_index_update.lock().unwrap();
            if updated > *last {
                if *last > 0 {
                    let mut ev = Event::new(Action::Update);
                    ev.source = Some(windex.source().to_owned());
                    ev.adjustment = Some(windex.adjustment());
                    self.events.record(ev);
                }
                *last = updated;
            }
        }
    }

    /// Force every refresher now, ignoring throttles.
    pub async fn refresh_now(&self) {
        let now = self.now_local();
        let (zones, location, tz) = {
            let cfg = self.config.read().await;
            (ZoneIndex::new(&cfg.zones), cfg.location.clone(), cfg.tz())
        };
        self.calendar.write().await.refresh(&now, &zones, location.as_deref(), tz, true).await;
        self.weather.write().await.refresh(&now, true).await;
        self.windex.write().await.refresh(&now, true).await;
    }

    // ---- control surface -------------------------------------------------

    pub async fn set_on(&self, on: bool) {
        self.config.write().await.on = on;
        info!("System {}", if on { "enabled" } else { "disabled" });
    }

    pub async fn set_raindelay(&self, enabled: bool) {
        self.config.write().await.raindelay = enabled;
        self.raindelay_enabled.store(enabled, Ordering::SeqCst);
        let mut rain = self.rain.lock().unwrap();
        rain.enabled = enabled;
        if !enabled {
            rain.clear();
        }
    }

    /// Arm (or push out) the rain hold by the full delay interval.
    pub async fn extend_raindelay(&self) {
        self.set_raindelay(true).await;
        let now = self.time.now();
        self.rain.lock().unwrap().extend(now);
    }

    pub async fn enable_weather(&self, enable: bool) {
        let mut cfg = self.config.write().await;
        cfg.weather.enable = enable;
        let weather_cfg = cfg.weather.clone();
        drop(cfg);
        self.weather.write().await.configure(&weather_cfg, self.time.now());
    }

    pub async fn enable_wateringindex(&self, enable: bool) {
        let mut cfg = self.config.write().await;
        cfg.wateringindex.enable = enable;
        let index_cfg = cfg.wateringindex.clone();
        drop(cfg);
        self.windex.write().await.configure(&index_cfg, self.time.now());
    }

    /// Start a program by id: `L<idx>` or a bare integer for the user
    /// list, `C<idx>` for the imported calendar list.
    pub async fn start_program_by_id(&self, id: &str) -> Result<(), AppError> {
        let id = id.trim();
        let program = if let Some(idx) = id.strip_prefix('C') {
            let idx: usize =
                idx.parse().map_err(|_| AppError::UnknownProgram(id.to_owned()))?;
            self.calendar
                .read()
                .await
                .programs()
                .get(idx)
                .cloned()
                .ok_or_else(|| AppError::UnknownProgram(id.to_owned()))?
        } else {
            let idx: usize = id
                .strip_prefix('L')
                .unwrap_or(id)
                .parse()
                .map_err(|_| AppError::UnknownProgram(id.to_owned()))?;
            self.config
                .read()
                .await
                .programs
                .get(idx)
                .cloned()
                .ok_or_else(|| AppError::UnknownProgram(id.to_owned()))?
        };
        self.program_on(&program).await;
        Ok(())
    }

    /// Manual zone activation; cancels whatever is queued or running.
    pub fn zone_on_manual(&self, zone: usize, seconds: i64) -> Result<(), AppError> {
        if self.env.read().unwrap().zones.get(zone).is_none() {
            return Err(AppError::InvalidZone(zone));
        }
        self.executor.zone_on(zone, seconds);
        Ok(())
    }

    pub fn all_off(&self) {
        self.executor.all_off();
    }

    pub fn run_mode(&self, on: bool, now: i64) -> RunMode {
        if !on {
            RunMode::Off
        } else if !self.executor.is_idle() {
            RunMode::Running
        } else if self.rain.lock().unwrap().holding(now) {
            RunMode::RainHold
        } else {
            RunMode::Idle
        }
    }

    pub async fn status(&self) -> StatusSnapshot {
        let now = self.time.now();
        let cfg = self.config.read().await;
        let exec = self.executor.snapshot();
        let rain = *self.rain.lock().unwrap();
        StatusSnapshot {
            mode: self.run_mode(cfg.on, now),
            on: cfg.on,
            raindelay: RainDelayStatus { enabled: rain.enabled, remaining: rain.remaining(now) },
            running: exec.running,
            queued: exec.queued,
            zones: cfg
                .zones
                .iter()
                .map(|z| ZoneStatus { name: z.name.clone(), manual: z.manual, master: z.master })
                .collect(),
            weather: self.weather.read().await.status(),
            wateringindex: self.windex.read().await.status(),
            calendars: self.calendar.read().await.status(),
        }
    }

    pub fn history(&self, filter: &EventFilter) -> Vec<Event> {
        self.events.find(filter)
    }

    /// Test and tooling access to the rain state.
    pub fn rain_state(&self) -> RainDelay {
        *self.rain.lock().unwrap()
    }

    /// Imported programs currently active (control-surface listing).
    pub async fn calendar_programs(&self) -> Vec<Program> {
        self.calendar.read().await.programs()
    }
}
