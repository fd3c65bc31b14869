use serde::{Deserialize, Serialize};

/// Output drive level for a zone pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Level {
    #[serde(rename = "HIGH")]
    High,
    #[serde(rename = "LOW")]
    Low,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ZoneConfig {
    pub name: String,
    pub pin: Option<u32>,
    pub on: Option<Level>,
    /// Adjustment-profile name; "default" when unset.
    pub adjust: Option<String>,
    /// Split long runs into pulses of this many seconds.
    pub pulse: Option<i64>,
    /// Rest between pulse rounds, seconds.
    pub pause: Option<i64>,
    /// Supply valve co-activated with this zone.
    pub master: Option<usize>,
    /// Program runs skip this zone; direct activation still works.
    pub manual: bool,
}

impl Default for ZoneConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            pin: None,
            on: None,
            adjust: None,
            pulse: None,
            pause: None,
            master: None,
            manual: false,
        }
    }
}

/// Stable, 0-based view over the configured zones.
#[derive(Debug, Clone, Default)]
pub struct ZoneIndex {
    zones: Vec<ZoneConfig>,
}

impl ZoneIndex {
    pub fn new(zones: &[ZoneConfig]) -> Self {
        Self { zones: zones.to_vec() }
    }

    pub fn get(&self, index: usize) -> Option<&ZoneConfig> {
        self.zones.get(index)
    }

    pub fn by_name(&self, name: &str) -> Option<usize> {
        self.zones.iter().position(|z| z.name.eq_ignore_ascii_case(name))
    }

    pub fn master_of(&self, index: usize) -> Option<usize> {
        self.get(index).and_then(|z| z.master)
    }

    pub fn len(&self) -> usize {
        self.zones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ZoneConfig> {
        self.zones.iter()
    }
}
