use super::{Action, Event, EventFilter};
use crate::error::AppError;
use rusqlite::{params, Connection, Result, ToSql};
use std::path::Path;
use std::str::FromStr;
use std::sync::mpsc::{self, Sender};
use std::thread;
use tracing::error;

pub enum StoreCommand {
    Insert(Event),
    PurgeBefore(i64),
    Find { filter: EventFilter, response: Sender<Result<Vec<Event>>> },
}

/// Handle to the event database thread. All SQL runs on one dedicated
/// thread fed by a command channel; the handle is cheap to clone.
#[derive(Clone)]
pub struct EventStore {
    sender: Sender<StoreCommand>,
}

impl EventStore {
    pub fn open(path: &Path) -> Result<Self, AppError> {
        let conn = Connection::open(path).map_err(AppError::Database)?;
        Ok(Self::with_conn(conn)?)
    }

    pub fn open_in_memory() -> Result<Self, AppError> {
        let conn = Connection::open_in_memory().map_err(AppError::Database)?;
        Ok(Self::with_conn(conn)?)
    }

    fn with_conn(conn: Connection) -> Result<Self, AppError> {
        initialize(&conn)?;
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            while let Ok(command) = rx.recv() {
                match command {
                    StoreCommand::Insert(ev) => {
                        if let Err(e) = insert_event(&conn, &ev) {
                            error!("Event insert failed: {}", e);
                        }
                    }
                    StoreCommand::PurgeBefore(ts) => {
                        if let Err(e) = conn.execute("DELETE FROM events WHERE timestamp < ?1", params![ts]) {
                            error!("Event purge failed: {}", e);
                        }
                    }
                    StoreCommand::Find { filter, response } => {
                        let _ = response.send(find_events(&conn, &filter));
                    }
                }
            }
        });

        Ok(Self { sender: tx })
    }

    /// Fire-and-forget append; failures are logged on the store thread.
    pub fn insert(&self, ev: Event) {
        let _ = self.sender.send(StoreCommand::Insert(ev));
    }

    pub fn purge_before(&self, ts: i64) {
        let _ = self.sender.send(StoreCommand::PurgeBefore(ts));
    }

    pub fn find(&self, filter: EventFilter) -> Result<Vec<Event>, AppError> {
        let (response_tx, response_rx) = mpsc::channel();
        self.sender
            .send(StoreCommand::Find { filter, response: response_tx })
            .map_err(|_| AppError::Parse("event store thread gone".to_owned()))?;
        response_rx
            .recv()
            .map_err(|_| AppError::Parse("event store thread gone".to_owned()))?
            .map_err(AppError::Database)
    }
}

pub fn initialize(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS events (
            timestamp INTEGER NOT NULL,
            sequence INTEGER NOT NULL,
            action TEXT NOT NULL,
            zone INTEGER,
            program TEXT,
            parent TEXT,
            seconds INTEGER,
            runtime INTEGER,
            adjustment INTEGER,
            source TEXT,
            temperature REAL,
            humidity REAL,
            rain REAL,
            ratio INTEGER,
            PRIMARY KEY (timestamp, sequence)
        );",
    )
}

pub fn insert_event(conn: &Connection, ev: &Event) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO events (timestamp, sequence, action, zone, program, parent,
            seconds, runtime, adjustment, source, temperature, humidity, rain, ratio)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        params![
            ev.timestamp,
            ev.sequence,
            ev.action.as_str(),
            ev.zone.map(|z| z as i64),
            ev.program,
            ev.parent,
            ev.seconds,
            ev.runtime,
            ev.adjustment,
            ev.source,
            ev.temperature,
            ev.humidity,
            ev.rain,
            ev.ratio,
        ],
    )?;
    Ok(())
}

pub fn find_events(conn: &Connection, filter: &EventFilter) -> Result<Vec<Event>> {
    let mut query = String::from(
        "SELECT timestamp, sequence, action, zone, program, parent, seconds, runtime,
                adjustment, source, temperature, humidity, rain, ratio
         FROM events WHERE 1=1",
    );
    let mut params: Vec<Box<dyn ToSql>> = Vec::new();

    if let Some(action) = filter.action {
        query.push_str(&format!(" AND action = ?{}", params.len() + 1));
        params.push(Box::new(action.as_str().to_owned()));
    }
    if let Some(zone) = filter.zone {
        query.push_str(&format!(" AND zone = ?{}", params.len() + 1));
        params.push(Box::new(zone as i64));
    }
    if let Some(program) = &filter.program {
        query.push_str(&format!(" AND program = ?{}", params.len() + 1));
        params.push(Box::new(program.clone()));
    }
    if let Some(since) = filter.since {
        query.push_str(&format!(" AND timestamp >= ?{}", params.len() + 1));
        params.push(Box::new(since));
    }
    if let Some(until) = filter.until {
        query.push_str(&format!(" AND timestamp <= ?{}", params.len() + 1));
        params.push(Box::new(until));
    }
    query.push_str(" ORDER BY timestamp DESC, sequence DESC");
    if let Some(limit) = filter.limit {
        query.push_str(&format!(" LIMIT {}", limit));
    }

    let mut stmt = conn.prepare(&query)?;
    let refs: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref()).collect();
    let rows = stmt.query_map(refs.as_slice(), |row| {
        Ok(Event {
            timestamp: row.get(0)?,
            sequence: row.get(1)?,
            action: Action::from_str(&row.get::<_, String>(2)?).unwrap_or_default(),
            zone: row.get::<_, Option<i64>>(3)?.map(|z| z as usize),
            program: row.get(4)?,
            parent: row.get(5)?,
            seconds: row.get(6)?,
            runtime: row.get(7)?,
            adjustment: row.get(8)?,
            source: row.get(9)?,
            temperature: row.get(10)?,
            humidity: row.get(11)?,
            rain: row.get(12)?,
            ratio: row.get(13)?,
        })
    })?;
    rows.collect()
}
