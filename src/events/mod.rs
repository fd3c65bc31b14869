pub mod store;

use crate::time::TimeProvider;
use crate::MAX_MSGS;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt::{self, Display};
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use store::EventStore;
use tracing::info;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Action {
    #[default]
    Startup,
    On,
    Off,
    Start,
    End,
    Cancel,
    Skip,
    Update,
    Idle,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Startup => "STARTUP",
            Action::On => "ON",
            Action::Off => "OFF",
            Action::Start => "START",
            Action::End => "END",
            Action::Cancel => "CANCEL",
            Action::Skip => "SKIP",
            Action::Update => "UPDATE",
            Action::Idle => "IDLE",
        }
    }
}

impl Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = &'static str;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input {
            "STARTUP" => Ok(Action::Startup),
            "ON" => Ok(Action::On),
            "OFF" => Ok(Action::Off),
            "START" => Ok(Action::Start),
            "END" => Ok(Action::End),
            "CANCEL" => Ok(Action::Cancel),
            "SKIP" => Ok(Action::Skip),
            "UPDATE" => Ok(Action::Update),
            "IDLE" => Ok(Action::Idle),
            _ => Err("Invalid action"),
        }
    }
}

/// One immutable controller event. (timestamp, sequence) totally orders
/// the log: sequence restarts at 1 whenever the timestamp advances.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Event {
    pub timestamp: i64,
    pub sequence: i64,
    pub action: Action,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zone: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub program: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seconds: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub adjustment: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub humidity: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rain: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ratio: Option<i64>,
}

impl Event {
    pub fn new(action: Action) -> Self {
        Self { action, ..Default::default() }
    }

    /// One-line rendering for the syslog fanout.
    pub fn syslog_line(&self) -> String {
        let mut line = self.action.to_string();
        if let Some(zone) = self.zone {
            line.push_str(&format!(" zone {}", zone));
        }
        if let Some(program) = &self.program {
            line.push_str(&format!(" program {}", program));
        }
        if let Some(parent) = &self.parent {
            line.push_str(&format!(" (program {})", parent));
        }
        line
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EventConfig {
    pub syslog: bool,
    /// Retention in days; 0 keeps everything.
    pub cleanup: i64,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self { syslog: false, cleanup: 0 }
    }
}

#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub action: Option<Action>,
    pub zone: Option<usize>,
    pub program: Option<String>,
    pub since: Option<i64>,
    pub until: Option<i64>,
    pub limit: Option<usize>,
}

impl EventFilter {
    pub fn matches(&self, ev: &Event) -> bool {
        self.action.map_or(true, |a| a == ev.action)
            && self.zone.map_or(true, |z| ev.zone == Some(z))
            && self.program.as_ref().map_or(true, |p| ev.program.as_deref() == Some(p.as_str()))
            && self.since.map_or(true, |s| ev.timestamp >= s)
            && self.until.map_or(true, |u| ev.timestamp <= u)
    }
}

struct SinkInner {
    last_ts: i64,
    last_seq: i64,
    tail: VecDeque<Event>,
    cfg: EventConfig,
}

/// Append-only event log: a bounded in-memory tail plus the persistent
/// store. Inserts are serialised here so the (timestamp, sequence)
/// ordering stays monotone no matter which task records.
#[derive(Clone)]
pub struct EventSink {
    inner: Arc<Mutex<SinkInner>>,
    store: Option<EventStore>,
    time: Arc<dyn TimeProvider>,
}

impl EventSink {
    pub fn new(store: Option<EventStore>, time: Arc<dyn TimeProvider>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SinkInner {
                last_ts: 0,
                last_seq: 0,
                tail: VecDeque::with_capacity(MAX_MSGS),
                cfg: EventConfig::default(),
            })),
            store,
            time,
        }
    }

    pub fn configure(&self, cfg: &EventConfig) {
        self.inner.lock().unwrap().cfg = *cfg;
    }

    /// Stamp and append a record. Persistence failures are logged by the
    /// store thread; the in-memory append always succeeds.
    pub fn record(&self, mut ev: Event) -> Event {
        let mut inner = self.inner.lock().unwrap();
        let ts = self.time.now();
        ev.timestamp = ts;
        ev.sequence = if ts > inner.last_ts { 1 } else { inner.last_seq + 1 };
        inner.last_ts = ts;
        inner.last_seq = ev.sequence;

        if inner.tail.len() >= MAX_MSGS {
            inner.tail.pop_front();
        }
        inner.tail.push_back(ev.clone());

        if inner.cfg.syslog {
            info!(target: "syslog", "{}", ev.syslog_line());
        }
        if let Some(store) = &self.store {
            store.insert(ev.clone());
            if inner.cfg.cleanup > 0 && ev.sequence == 1 {
                store.purge_before(ts - inner.cfg.cleanup * 86_400);
            }
        }
        ev
    }

    /// All matching records, newest first. Falls back to the in-memory
    /// tail when the store is unavailable.
    pub fn find(&self, filter: &EventFilter) -> Vec<Event> {
        if let Some(store) = &self.store {
            match store.find(filter.clone()) {
                Ok(records) => return records,
                Err(e) => tracing::error!("Event query failed, serving in-memory tail: {}", e),
            }
        }
        let inner = self.inner.lock().unwrap();
        let mut out: Vec<Event> = inner.tail.iter().filter(|e| filter.matches(e)).cloned().collect();
        out.reverse();
        if let Some(limit) = filter.limit {
            out.truncate(limit);
        }
        out
    }

    pub fn tail(&self) -> Vec<Event> {
        self.inner.lock().unwrap().tail.iter().cloned().collect()
    }
}
