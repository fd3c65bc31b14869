use super::{EdgeCallback, HardwareConfig, HardwareDriver, HardwareInfo};
use crate::config::Config;
use std::sync::Mutex;
use tracing::debug;

#[derive(Default)]
struct SimState {
    pending: Vec<bool>,
    committed: Vec<bool>,
    rain: bool,
    button: bool,
    rain_cb: Option<EdgeCallback>,
    button_cb: Option<EdgeCallback>,
    switch_log: Vec<(usize, bool)>,
    apply_count: usize,
}

/// In-memory output bank. Stands in for real hardware when
/// `production=false` and backs every test.
pub struct SimDriver {
    state: Mutex<SimState>,
}

impl SimDriver {
    pub fn new() -> Self {
        Self { state: Mutex::new(SimState::default()) }
    }

    /// Committed (post-apply) zone levels.
    pub fn committed(&self) -> Vec<bool> {
        self.state.lock().unwrap().committed.clone()
    }

    /// Every `set_zone` call in order, for asserting switching order.
    pub fn switch_log(&self) -> Vec<(usize, bool)> {
        self.state.lock().unwrap().switch_log.clone()
    }

    pub fn clear_switch_log(&self) {
        self.state.lock().unwrap().switch_log.clear();
    }

    pub fn apply_count(&self) -> usize {
        self.state.lock().unwrap().apply_count
    }

    /// Force the rain input; fires the registered edge callback on change.
    pub fn set_rain(&self, level: bool) {
        let cb = {
            let mut st = self.state.lock().unwrap();
            let changed = st.rain != level;
            st.rain = level;
            changed.then(|| st.rain_cb.clone()).flatten()
        };
        if let Some(cb) = cb {
            cb(level);
        }
    }

    /// Force the button input; fires the registered edge callback on change.
    pub fn set_button(&self, level: bool) {
        let cb = {
            let mut st = self.state.lock().unwrap();
            let changed = st.button != level;
            st.button = level;
            changed.then(|| st.button_cb.clone()).flatten()
        };
        if let Some(cb) = cb {
            cb(level);
        }
    }

    /// Convenience for tests: a full press-and-release.
    pub fn press_button(&self) {
        self.set_button(true);
        self.set_button(false);
    }
}

impl Default for SimDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl HardwareDriver for SimDriver {
    fn info(&self) -> HardwareInfo {
        HardwareInfo {
            id: "sim".to_owned(),
            title: "Simulated output bank".to_owned(),
            zones_add: true,
            zones_pin: false,
            zones_max: None,
        }
    }

    fn configure(&self, _hw: &HardwareConfig, user: &Config) {
        let mut st = self.state.lock().unwrap();
        st.pending.resize(user.zones.len(), false);
        st.committed.resize(user.zones.len(), false);
        debug!("Simulated bank configured for {} zones", user.zones.len());
    }

    fn set_zone(&self, index: usize, on: bool) {
        let mut st = self.state.lock().unwrap();
        if index >= st.pending.len() {
            st.pending.resize(index + 1, false);
            st.committed.resize(index + 1, false);
        }
        st.pending[index] = on;
        st.switch_log.push((index, on));
    }

    fn apply(&self) {
        let mut st = self.state.lock().unwrap();
        let pending = st.pending.clone();
        st.committed = pending;
        st.apply_count += 1;
    }

    fn rain_sensor(&self) -> bool {
        self.state.lock().unwrap().rain
    }

    fn button(&self) -> bool {
        self.state.lock().unwrap().button
    }

    fn rain_interrupt(&self, cb: EdgeCallback) {
        self.state.lock().unwrap().rain_cb = Some(cb);
    }

    fn button_interrupt(&self, cb: EdgeCallback) {
        self.state.lock().unwrap().button_cb = Some(cb);
    }
}
