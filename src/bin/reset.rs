//! Force every configured zone off and record the cancellation.
//! Invoked unconditionally on stop/restart so a killed daemon can never
//! leave a valve energised.

use sprinklerd::config::{locate_file, run_options, Config, EVENT_DB_FILE, HARDWARE_FILE};
use sprinklerd::events::store::EventStore;
use sprinklerd::events::{Action, Event, EventFilter, EventSink};
use sprinklerd::hardware::{build_driver, HardwareConfig};
use sprinklerd::time::RealTimeProvider;
use sprinklerd::utils::start_log;
use std::sync::Arc;
use tracing::info;

fn main() {
    start_log();
    let args = run_options::get_args();
    let config = Config::load(&args.cfg_file).unwrap_or_default();
    let hardware = HardwareConfig::load(&locate_file(HARDWARE_FILE)).unwrap_or_default();

    let driver = build_driver(&hardware, &config);
    for zone in 0..config.zones.len() {
        driver.set_zone(zone, false);
    }
    driver.apply();
    info!("All {} zones forced off", config.zones.len());

    let store = EventStore::open(&locate_file(EVENT_DB_FILE)).ok();
    let events = EventSink::new(store, Arc::new(RealTimeProvider));
    events.configure(&config.event);
    events.record(Event::new(Action::Cancel));
    // a round-trip query drains the store thread's queue before exit
    let _ = events.find(&EventFilter { limit: Some(1), ..Default::default() });
}
