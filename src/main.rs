use sprinklerd::api;
use sprinklerd::config::{locate_file, run_options, Config, EVENT_DB_FILE, HARDWARE_FILE};
use sprinklerd::engine::{Engine, REFRESH_TICK_SECS, SCHEDULE_TICK_SECS};
use sprinklerd::events::store::EventStore;
use sprinklerd::events::EventSink;
use sprinklerd::hardware::HardwareConfig;
use sprinklerd::time::RealTimeProvider;
use sprinklerd::utils::start_log;
use std::error::Error;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    start_log();
    let args = run_options::get_args();

    let config = match Config::load(&args.cfg_file) {
        Ok(config) => config,
        Err(e) => {
            warn!("Unable to load {}: {}. Starting with defaults.", args.cfg_file.display(), e);
            Config::default()
        }
    };
    let hardware = match HardwareConfig::load(&locate_file(HARDWARE_FILE)) {
        Ok(hardware) => hardware,
        Err(e) => {
            warn!("No usable hardware config: {}. Using defaults.", e);
            HardwareConfig::default()
        }
    };

    let time = Arc::new(RealTimeProvider);
    let store = match EventStore::open(&locate_file(EVENT_DB_FILE)) {
        Ok(store) => Some(store),
        Err(e) => {
            warn!("Event database unavailable, keeping history in memory only: {}", e);
            None
        }
    };
    let events = EventSink::new(store, time.clone());

    let port = config.webserver.port;
    let engine = Engine::new(config, hardware, events, time).await;

    let scheduler = engine.clone();
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_secs(SCHEDULE_TICK_SECS));
        loop {
            tick.tick().await;
            scheduler.schedule_tick().await;
        }
    });

    let refresher = engine.clone();
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_secs(REFRESH_TICK_SECS));
        loop {
            tick.tick().await;
            refresher.refresh_tick().await;
        }
    });

    let app = api::router(engine);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Starting HTTP control surface on http://{}", addr);

    tokio::select! {
        result = axum_server::Server::bind(addr).serve(app.into_make_service()) => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
        }
    }
    Ok(())
}
