//! Monitor state, level conversions and state sinks.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use super::controller::MONITOR_PROPERTIES;
use crate::domain::ConnectionState;

/// Level reported for a fully closed slider.
pub const SILENT_DB: f64 = -96.0;

/// Lowest level still shown as a number.
const DISPLAY_FLOOR_DB: f64 = -59.0;

/// Slider position (0..=100) to monitor level in dB.
pub fn volume_to_db(volume: f64) -> f64 {
    if volume <= 0.0 {
        return SILENT_DB;
    }
    (volume / 100.0) * 60.0 - 60.0
}

/// Monitor level in dB to slider position (0..=100).
pub fn db_to_volume(db: f64) -> f64 {
    if db <= -90.0 {
        return 0.0;
    }
    ((db + 60.0) / 60.0 * 100.0).clamp(0.0, 100.0)
}

/// Human-readable level: `-∞` near silence, otherwise one decimal.
pub fn format_level(db: f64) -> String {
    if db <= DISPLAY_FLOOR_DB {
        "-∞".to_string()
    } else {
        format!("{:.1}", db)
    }
}

/// Everything a front end needs to render the monitor section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorState {
    pub connection: ConnectionState,
    pub status_message: String,
    pub host: Option<String>,
    pub device: Option<String>,
    pub output: Option<String>,
    pub level_db: f64,
    pub muted: bool,
    pub dimmed: bool,
    pub mono: bool,
    /// Monitor properties the engine has reported for the selected output
    pub reported: BTreeSet<String>,
}

impl Default for MonitorState {
    fn default() -> Self {
        Self {
            connection: ConnectionState::Disconnected,
            status_message: "Disconnected".to_string(),
            host: None,
            device: None,
            output: None,
            level_db: volume_to_db(50.0),
            muted: false,
            dimmed: false,
            mono: false,
            reported: BTreeSet::new(),
        }
    }
}

impl MonitorState {
    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    /// Slider position for the current level.
    pub fn volume(&self) -> f64 {
        db_to_volume(self.level_db)
    }

    pub fn volume_display(&self) -> String {
        format_level(self.level_db)
    }

    /// An output is selected and every monitor property has reported its
    /// current value.
    pub fn is_synced(&self) -> bool {
        self.output.is_some() && MONITOR_PROPERTIES.iter().all(|p| self.reported.contains(*p))
    }

    /// `/devices/<d>/outputs/<o>` once enumeration has picked both.
    pub fn output_path(&self) -> Option<String> {
        match (&self.device, &self.output) {
            (Some(device), Some(output)) => Some(format!("/devices/{}/outputs/{}", device, output)),
            _ => None,
        }
    }
}

/// Receives every published monitor state.
pub trait StateSink: Send + Sync {
    fn publish(&self, state: &MonitorState);
}

impl StateSink for watch::Sender<MonitorState> {
    fn publish(&self, state: &MonitorState) {
        self.send_replace(state.clone());
    }
}

/// Publishes to several sinks in order.
#[derive(Default)]
pub struct Fanout {
    sinks: Vec<Arc<dyn StateSink>>,
}

impl Fanout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn StateSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl StateSink for Fanout {
    fn publish(&self, state: &MonitorState) {
        for sink in &self.sinks {
            sink.publish(state);
        }
    }
}
