use eyre::{Context, Result};
use monitorctl::client::ClientConfig;
use monitorctl::discovery::DiscoveryConfig;
use monitorctl::domain::{DEFAULT_PORT, Endpoint};
use monitorctl::monitor::MonitorConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub connection: ConnectionSection,
    pub discovery: DiscoverySection,
    pub monitor: MonitorSection,
    pub storage: StorageSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSection {
    pub host: String,
    pub port: u16,
    pub keep_alive_secs: u64,
    pub reconnect_base_ms: u64,
    pub max_reconnect_delay_secs: u64,
    pub connect_timeout_ms: u64,
}

impl Default for ConnectionSection {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            keep_alive_secs: 30,
            reconnect_base_ms: 1000,
            max_reconnect_delay_secs: 10,
            connect_timeout_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoverySection {
    pub service_type: String,
    pub scan_timeout_secs: u64,
    pub resolve_timeout_ms: u64,
}

impl Default for DiscoverySection {
    fn default() -> Self {
        Self {
            service_type: monitorctl::discovery::SERVICE_TYPE.to_string(),
            scan_timeout_secs: 10,
            resolve_timeout_ms: 3000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorSection {
    pub preferred_device: Option<String>,
    pub preferred_output: Option<String>,
    pub volume_step: f64,
}

impl Default for MonitorSection {
    fn default() -> Self {
        Self {
            preferred_device: None,
            preferred_output: Some("4".to_string()),
            volume_step: 3.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    pub snapshot_path: PathBuf,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            snapshot_path: dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("monitorctl")
                .join("state.json"),
        }
    }
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try primary location: ~/.config/<project>/<project>.yml
        let project_name = env!("CARGO_PKG_NAME");
        if let Some(config_dir) = dirs::config_dir() {
            let primary_config = config_dir.join(project_name).join(format!("{}.yml", project_name));
            if primary_config.exists() {
                match Self::load_from_file(&primary_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        log::warn!("Failed to load config from {}: {}", primary_config.display(), e);
                    }
                }
            }
        }

        // Try fallback location: ./<project>.yml
        let fallback_config = PathBuf::from(format!("{}.yml", project_name));
        if fallback_config.exists() {
            match Self::load_from_file(&fallback_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    log::warn!("Failed to load config from {}: {}", fallback_config.display(), e);
                }
            }
        }

        log::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        log::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    pub fn client_config(&self) -> ClientConfig {
        let c = &self.connection;
        ClientConfig::default()
            .with_keep_alive(Duration::from_secs(c.keep_alive_secs))
            .with_reconnect(
                Duration::from_millis(c.reconnect_base_ms),
                Duration::from_secs(c.max_reconnect_delay_secs),
            )
            .with_connect_timeout(Duration::from_millis(c.connect_timeout_ms))
    }

    pub fn discovery_config(&self) -> DiscoveryConfig {
        DiscoveryConfig {
            service_type: self.discovery.service_type.clone(),
            ..Default::default()
        }
        .with_scan_timeout(Duration::from_secs(self.discovery.scan_timeout_secs))
        .with_resolve_timeout(Duration::from_millis(self.discovery.resolve_timeout_ms))
    }

    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            preferred_device: self.monitor.preferred_device.clone(),
            preferred_output: self.monitor.preferred_output.clone(),
            volume_step: self.monitor.volume_step,
        }
    }

    /// Endpoint from the config file, with command-line overrides.
    pub fn endpoint(&self, host: Option<&str>, port: Option<u16>) -> Endpoint {
        Endpoint::new(
            host.unwrap_or(&self.connection.host),
            port.unwrap_or(self.connection.port),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.connection.host, "127.0.0.1");
        assert_eq!(config.connection.port, 4710);
        assert_eq!(config.discovery.service_type, "_uamixer._tcp.local.");
        assert_eq!(config.monitor.preferred_output.as_deref(), Some("4"));
        assert!(config.storage.snapshot_path.ends_with("monitorctl/state.json"));
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("monitorctl.yml");
        fs::write(&path, "connection:\n  host: 10.0.0.5\nmonitor:\n  volume_step: 1.5\n").unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.connection.host, "10.0.0.5");
        assert_eq!(config.connection.port, 4710);
        assert_eq!(config.connection.keep_alive_secs, 30);
        assert_eq!(config.monitor.volume_step, 1.5);
    }

    #[test]
    fn test_explicit_missing_path_fails() {
        let dir = TempDir::new().unwrap();
        assert!(Config::load(Some(&dir.path().join("absent.yml"))).is_err());
    }

    #[test]
    fn test_library_configs() {
        let config = Config::default();
        let client = config.client_config();
        assert_eq!(client.keep_alive_interval, Duration::from_secs(30));
        assert_eq!(client.reconnect_base, Duration::from_millis(1000));
        assert_eq!(client.connect_timeout, Duration::from_millis(5000));

        let discovery = config.discovery_config();
        assert_eq!(discovery.scan_timeout, Duration::from_secs(10));
        assert_eq!(discovery.resolve_timeout, Duration::from_millis(3000));

        assert_eq!(config.monitor_config().volume_step, 3.0);
    }

    #[test]
    fn test_endpoint_overrides() {
        let config = Config::default();
        assert_eq!(config.endpoint(None, None), Endpoint::localhost());
        assert_eq!(
            config.endpoint(Some("10.0.0.5"), Some(4711)),
            Endpoint::new("10.0.0.5", 4711)
        );
    }
}
