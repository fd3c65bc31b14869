pub mod sim;

use crate::config::Config;
use crate::error::AppError;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct HardwareInfo {
    pub id: String,
    pub title: String,
    /// Zones may be added beyond the physically wired bank.
    pub zones_add: bool,
    /// Zones carry per-zone pin assignments.
    pub zones_pin: bool,
    pub zones_max: Option<usize>,
}

/// Contents of hardware.json. Driver-specific settings stay an opaque
/// value; each driver picks out what it understands in `configure`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HardwareConfig {
    pub driver: Option<String>,
    pub options: serde_json::Value,
}

impl HardwareConfig {
    pub fn load(path: &Path) -> Result<Self, AppError> {
        let content = fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| AppError::Config(e.to_string()))
    }
}

pub type EdgeCallback = Arc<dyn Fn(bool) + Send + Sync>;

/// Capability contract between the engine and an output bank.
///
/// `set_zone` and `apply` are best-effort and never raise: a driver that
/// cannot reach its pins yet keeps the intended state and retries in the
/// background until it can commit it. Drivers that cannot observe an
/// input report `false` constantly.
pub trait HardwareDriver: Send + Sync {
    fn info(&self) -> HardwareInfo;
    /// Re-entrant; called on every config activation.
    fn configure(&self, hw: &HardwareConfig, user: &Config);
    fn set_zone(&self, index: usize, on: bool);
    /// Commit pending bank state. A no-op for per-pin drivers; required
    /// for shift-register banks that transfer the whole bank atomically.
    fn apply(&self);
    fn rain_sensor(&self) -> bool;
    fn button(&self) -> bool;
    fn rain_interrupt(&self, cb: EdgeCallback);
    fn button_interrupt(&self, cb: EdgeCallback);
}

/// Select and configure a driver. Non-production configs always get the
/// simulated bank; unknown driver names degrade to it with a warning.
pub fn build_driver(hw: &HardwareConfig, cfg: &Config) -> Arc<dyn HardwareDriver> {
    let name = if cfg.production { hw.driver.as_deref().unwrap_or("sim") } else { "sim" };
    let driver: Arc<dyn HardwareDriver> = match name {
        "sim" => Arc::new(sim::SimDriver::new()),
        other => {
            warn!("Unknown hardware driver '{}', using simulated outputs", other);
            Arc::new(sim::SimDriver::new())
        }
    };
    driver.configure(hw, cfg);
    driver
}
