//! Monitor controller.
//!
//! Sits on a connection manager as its event sink. After each connect it
//! walks `/devices` and the chosen device's outputs, subscribes to the
//! monitor properties of one output and mirrors them into [`MonitorState`].
//! Every change is published through the injected [`StateSink`].

use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use log::{debug, info, warn};

use super::state::{MonitorState, SILENT_DB, StateSink, volume_to_db};
use crate::client::{ClientConfig, ConnectionManager, EventSink};
use crate::domain::{ConnectionState, ConnectionStatus, Endpoint, ProtocolEvent};
use crate::error::{MonitorError, Result};

pub const DEVICES_PATH: &str = "/devices";

pub const LEVEL: &str = "CRMonitorLevel";
pub const MUTE: &str = "Mute";
pub const DIM: &str = "DimOn";
pub const MONO: &str = "MixToMono";

/// Properties fetched and subscribed on the selected output.
pub const MONITOR_PROPERTIES: [&str; 4] = [LEVEL, MUTE, DIM, MONO];

/// Smallest slider change worth sending.
const VOLUME_EPSILON: f64 = 0.3;

enum VolumeChange {
    To(f64),
    By(f64),
}

/// Controller preferences.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Device id to select when present; otherwise the first one
    pub preferred_device: Option<String>,
    /// Output id to select when present; otherwise the first one
    pub preferred_output: Option<String>,
    /// Slider step for increase/decrease
    pub volume_step: f64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            preferred_device: None,
            preferred_output: Some("4".to_string()),
            volume_step: 3.0,
        }
    }
}

/// Keeps one output's monitor section in sync with the engine.
///
/// The attached manager holds the controller as its sink; call
/// [`MonitorController::shutdown`] to break the cycle.
pub struct MonitorController {
    config: MonitorConfig,
    state: Mutex<MonitorState>,
    sink: Arc<dyn StateSink>,
    manager: OnceLock<ConnectionManager>,
}

impl MonitorController {
    pub fn new(config: MonitorConfig, sink: Arc<dyn StateSink>) -> Arc<Self> {
        Arc::new(Self {
            config,
            state: Mutex::new(MonitorState::default()),
            sink,
            manager: OnceLock::new(),
        })
    }

    /// Create the connection manager feeding this controller. Later calls
    /// return the same manager.
    pub fn attach(self: &Arc<Self>, client: ClientConfig) -> ConnectionManager {
        self.manager
            .get_or_init(|| ConnectionManager::new(client, self.clone()))
            .clone()
    }

    fn manager(&self) -> Result<&ConnectionManager> {
        self.manager.get().ok_or(MonitorError::NotConnected)
    }

    fn lock(&self) -> MutexGuard<'_, MonitorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mutate the state and publish the result.
    fn update(&self, f: impl FnOnce(&mut MonitorState)) {
        let mut state = self.lock();
        f(&mut *state);
        self.sink.publish(&state);
    }

    pub fn state(&self) -> MonitorState {
        self.lock().clone()
    }

    /// Switch to another engine.
    pub fn connect_to(&self, endpoint: Endpoint) -> Result<()> {
        let manager = self.manager()?;
        self.update(|s| {
            s.host = Some(endpoint.address.clone());
            clear_selection(s);
        });
        manager.connect(endpoint);
        Ok(())
    }

    /// Retry now, resetting the backoff.
    pub fn reconnect(&self) -> Result<()> {
        self.manager()?.reconnect()
    }

    /// Stop the connection and release the manager.
    pub fn shutdown(&self) {
        if let Some(manager) = self.manager.get() {
            manager.shutdown();
        }
    }

    /// Set the slider position (0..=100).
    pub fn set_volume(&self, volume: f64) -> Result<()> {
        self.adjust_volume(VolumeChange::To(volume))
    }

    /// Step the slider up from the engine's reported level.
    pub fn increase_volume(&self) -> Result<()> {
        self.adjust_volume(VolumeChange::By(self.config.volume_step))
    }

    /// Step the slider down from the engine's reported level.
    pub fn decrease_volume(&self) -> Result<()> {
        self.adjust_volume(VolumeChange::By(-self.config.volume_step))
    }

    fn adjust_volume(&self, change: VolumeChange) -> Result<()> {
        let manager = self.manager()?;
        let mut state = self.lock();
        let path = state.output_path().ok_or(MonitorError::NoOutput)?;

        let known = state.reported.contains(LEVEL);
        let current = state.volume();
        let next = match change {
            VolumeChange::To(volume) => volume,
            VolumeChange::By(_) if !known => return Err(MonitorError::NotReported(LEVEL.to_string())),
            VolumeChange::By(step) => current + step,
        }
        .clamp(0.0, 100.0);
        if known && (next - current).abs() <= VOLUME_EPSILON {
            debug!("Volume change {:.2} -> {:.2} below threshold", current, next);
            return Ok(());
        }

        let db = volume_to_db(next);
        manager.set(&format!("{}/{}", path, LEVEL), db)?;
        state.level_db = db;
        self.sink.publish(&state);
        Ok(())
    }

    /// Set the monitor level directly in dB.
    pub fn set_level_db(&self, db: f64) -> Result<()> {
        let manager = self.manager()?;
        let mut state = self.lock();
        let path = state.output_path().ok_or(MonitorError::NoOutput)?;

        let db = db.clamp(SILENT_DB, 0.0);
        manager.set(&format!("{}/{}", path, LEVEL), db)?;
        state.level_db = db;
        self.sink.publish(&state);
        Ok(())
    }

    pub fn toggle_mute(&self) -> Result<bool> {
        self.toggle(MUTE, |s| &mut s.muted)
    }

    pub fn toggle_dim(&self) -> Result<bool> {
        self.toggle(DIM, |s| &mut s.dimmed)
    }

    pub fn toggle_mono(&self) -> Result<bool> {
        self.toggle(MONO, |s| &mut s.mono)
    }

    fn toggle(&self, property: &str, field: fn(&mut MonitorState) -> &mut bool) -> Result<bool> {
        let manager = self.manager()?;
        let mut state = self.lock();
        let path = state.output_path().ok_or(MonitorError::NoOutput)?;
        if !state.reported.contains(property) {
            return Err(MonitorError::NotReported(property.to_string()));
        }

        let next = !*field(&mut *state);
        manager.set(&format!("{}/{}", path, property), next)?;
        *field(&mut *state) = next;
        self.sink.publish(&state);
        Ok(next)
    }

    /// Send through the attached manager; failures are logged.
    fn request(&self, what: &str, send: impl FnOnce(&ConnectionManager) -> Result<()>) {
        let Some(manager) = self.manager.get() else {
            return;
        };
        if let Err(e) = send(manager) {
            warn!("Failed to {}: {}", what, e);
        }
    }

    fn on_devices(&self, ids: &[String]) {
        let device = {
            let mut state = self.lock();
            // Keep-alive listings arrive every interval; only the first one
            // after a connect drives enumeration.
            if state.connection != ConnectionState::Enumerating || state.device.is_some() {
                return;
            }
            let Some(device) = pick(ids, self.config.preferred_device.as_deref()) else {
                info!("No devices found");
                state.connection = ConnectionState::Connected;
                state.status_message = "No devices found".to_string();
                self.sink.publish(&state);
                return;
            };
            info!("Using device {}", device);
            state.device = Some(device.clone());
            self.sink.publish(&state);
            device
        };

        self.request("list outputs", |m| m.get(&format!("{}/{}/outputs", DEVICES_PATH, device)));
    }

    fn on_outputs(&self, device: &str, ids: &[String]) {
        let path = {
            let mut state = self.lock();
            if state.device.as_deref() != Some(device) || state.output.is_some() {
                return;
            }
            let Some(output) = pick(ids, self.config.preferred_output.as_deref()) else {
                info!("Device {} has no outputs", device);
                state.connection = ConnectionState::Connected;
                state.status_message = "No outputs found".to_string();
                self.sink.publish(&state);
                return;
            };
            info!("Using output {} on device {}", output, device);
            state.output = Some(output);
            state.reported.clear();
            state.connection = ConnectionState::Connected;
            self.sink.publish(&state);
            state.output_path()
        };

        let Some(path) = path else { return };
        for property in MONITOR_PROPERTIES {
            let property_path = format!("{}/{}", path, property);
            self.request("read monitor property", |m| m.get(&property_path));
            self.request("subscribe to monitor property", |m| m.subscribe(&property_path));
        }
    }

    fn on_value(&self, event: &ProtocolEvent) {
        let mut state = self.lock();
        let Some(prefix) = state.output_path() else {
            return;
        };
        if !is_under(event.path(), &prefix) {
            return;
        }
        let Some(key) = property_key(event) else {
            return;
        };

        let changed = match key {
            LEVEL => numeric(event).map(|db| state.level_db = db),
            MUTE => flag(event).map(|on| state.muted = on),
            DIM => flag(event).map(|on| state.dimmed = on),
            MONO => flag(event).map(|on| state.mono = on),
            _ => None,
        };
        if changed.is_some() {
            if !state.reported.contains(key) {
                debug!("{} reported", key);
                state.reported.insert(key.to_string());
            }
            self.sink.publish(&state);
        }
    }
}

impl EventSink for MonitorController {
    fn on_event(&self, event: ProtocolEvent) {
        match &event {
            ProtocolEvent::ChildList { path, ids } if path == DEVICES_PATH => self.on_devices(ids),
            ProtocolEvent::ChildList { path, ids } => {
                if let Some(device) = outputs_listing_device(path) {
                    self.on_outputs(device, ids);
                }
            }
            _ => self.on_value(&event),
        }
    }

    fn on_status(&self, status: ConnectionStatus) {
        let enumerate = status.state == ConnectionState::Connected;
        self.update(|s| {
            s.status_message = status.message;
            if enumerate {
                s.connection = ConnectionState::Enumerating;
                clear_selection(s);
            } else {
                s.connection = status.state;
            }
        });

        if enumerate {
            self.request("list devices", |m| m.get(DEVICES_PATH));
        }
    }

    fn on_disconnected(&self) {
        self.update(clear_selection);
    }
}

/// Forget the selected output and everything it reported.
fn clear_selection(state: &mut MonitorState) {
    state.device = None;
    state.output = None;
    state.reported.clear();
}

/// Preferred id when listed, else the first.
fn pick(ids: &[String], preferred: Option<&str>) -> Option<String> {
    preferred
        .and_then(|p| ids.iter().find(|id| id.as_str() == p))
        .or_else(|| ids.first())
        .cloned()
}

/// `/devices/<d>/outputs` -> `<d>`
fn outputs_listing_device(path: &str) -> Option<&str> {
    let rest = path.strip_prefix(DEVICES_PATH)?.strip_prefix('/')?;
    let device = rest.strip_suffix("/outputs")?;
    (!device.is_empty() && !device.contains('/')).then_some(device)
}

fn is_under(path: &str, prefix: &str) -> bool {
    path.strip_prefix(prefix)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
}

/// The event's property, or the last non-`value` path segment when the
/// property is the generic `value`.
pub(crate) fn property_key(event: &ProtocolEvent) -> Option<&str> {
    let property = event.property()?;
    if property != "value" {
        return Some(property);
    }
    event
        .path()
        .split('/')
        .filter(|s| !s.is_empty() && *s != "value")
        .next_back()
}

fn numeric(event: &ProtocolEvent) -> Option<f64> {
    match event {
        ProtocolEvent::NumericValue { value, .. } => Some(*value),
        _ => None,
    }
}

fn flag(event: &ProtocolEvent) -> Option<bool> {
    match event {
        ProtocolEvent::BoolValue { value, .. } => Some(*value),
        ProtocolEvent::NumericValue { value, .. } => Some(*value != 0.0),
        _ => None,
    }
}
