use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::time::Duration;

use wdog_broker::{BrokerConfig, ScannerConfig, SessionConfig, MAX_REFRESH_MS, MIN_REFRESH_MS};

use crate::{WdogError, WdogResult};

/// Daemon configuration, read from a JSON file. Every field has a
/// default so an empty or missing file runs with sane behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub log_dir: PathBuf,
    pub settings_path: PathBuf,
    /// Adapters to scan; empty means all of them.
    pub adapters: Vec<String>,
    pub scan_interval_secs: u64,
    pub scan_window_secs: u64,
    pub refresh_interval_ms: u64,
    pub reconnect_delay_secs: u64,
    pub reconnect_max_delay_secs: u64,
    pub connect_timeout_secs: u64,
    /// How often the daemon logs a fleet status summary.
    pub status_interval_secs: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("./logs"),
            settings_path: PathBuf::from("./wdog-settings.json"),
            adapters: Vec::new(),
            scan_interval_secs: 60,
            scan_window_secs: 15,
            refresh_interval_ms: 5000,
            reconnect_delay_secs: 10,
            reconnect_max_delay_secs: 120,
            connect_timeout_secs: 30,
            status_interval_secs: 60,
        }
    }
}

impl DaemonConfig {
    /// Load from `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> WdogResult<Self> {
        if !path.exists() {
            log::info!("No config at {path:?}, using defaults");
            return Ok(Self::default());
        }
        let cfg: Self = serde_json::from_str(&fs::read_to_string(path)?)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject values that would wedge the daemon at runtime: zero
    /// intervals spin or stall their loops, and an inverted backoff
    /// range makes the reconnect delay clamp below its floor.
    pub fn validate(&self) -> WdogResult<()> {
        let nonzero = [
            ("scan_interval_secs", self.scan_interval_secs),
            ("scan_window_secs", self.scan_window_secs),
            ("reconnect_delay_secs", self.reconnect_delay_secs),
            ("connect_timeout_secs", self.connect_timeout_secs),
            ("status_interval_secs", self.status_interval_secs),
        ];
        for (name, value) in nonzero {
            if value == 0 {
                return Err(WdogError::InvalidConfig(format!("{name} must be nonzero")));
            }
        }
        if !(MIN_REFRESH_MS..=MAX_REFRESH_MS).contains(&self.refresh_interval_ms) {
            return Err(WdogError::InvalidConfig(format!(
                "refresh_interval_ms must be {MIN_REFRESH_MS}..={MAX_REFRESH_MS}, got {}",
                self.refresh_interval_ms
            )));
        }
        if self.reconnect_max_delay_secs < self.reconnect_delay_secs {
            return Err(WdogError::InvalidConfig(format!(
                "reconnect_max_delay_secs ({}) is below reconnect_delay_secs ({})",
                self.reconnect_max_delay_secs, self.reconnect_delay_secs
            )));
        }
        Ok(())
    }

    pub fn broker_config(&self) -> BrokerConfig {
        BrokerConfig {
            scanner: ScannerConfig {
                adapters: self.adapters.clone(),
                scan_interval: Duration::from_secs(self.scan_interval_secs),
                scan_window: Duration::from_secs(self.scan_window_secs),
            },
            session: SessionConfig {
                reconnect_delay: Duration::from_secs(self.reconnect_delay_secs),
                reconnect_max_delay: Duration::from_secs(self.reconnect_max_delay_secs),
                connect_timeout: Duration::from_secs(self.connect_timeout_secs),
                refresh_interval: Duration::from_millis(self.refresh_interval_ms),
                ..Default::default()
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_defaults() {
        let cfg = DaemonConfig::load(Path::new("/definitely/not/here.json")).unwrap();
        assert_eq!(cfg.scan_interval_secs, 60);
        assert_eq!(cfg.refresh_interval_ms, 5000);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let cfg: DaemonConfig =
            serde_json::from_str(r#"{"scan_interval_secs": 30, "adapters": ["hci1"]}"#).unwrap();
        assert_eq!(cfg.scan_interval_secs, 30);
        assert_eq!(cfg.adapters, vec!["hci1".to_string()]);
        assert_eq!(cfg.reconnect_max_delay_secs, 120);
    }

    #[test]
    fn defaults_validate() {
        assert!(DaemonConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_interval_rejected() {
        let cfg = DaemonConfig {
            reconnect_delay_secs: 0,
            ..Default::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(WdogError::InvalidConfig(msg)) if msg.contains("reconnect_delay_secs")
        ));
    }

    #[test]
    fn inverted_backoff_range_rejected() {
        let cfg = DaemonConfig {
            reconnect_delay_secs: 30,
            reconnect_max_delay_secs: 10,
            ..Default::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(WdogError::InvalidConfig(msg)) if msg.contains("reconnect_max_delay_secs")
        ));
    }

    #[test]
    fn refresh_interval_out_of_range_rejected() {
        let cfg = DaemonConfig {
            refresh_interval_ms: 0,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
        let cfg = DaemonConfig {
            refresh_interval_ms: MAX_REFRESH_MS + 1,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn broker_config_mapping() {
        let cfg = DaemonConfig {
            reconnect_delay_secs: 5,
            scan_window_secs: 8,
            ..Default::default()
        };
        let broker = cfg.broker_config();
        assert_eq!(broker.session.reconnect_delay, Duration::from_secs(5));
        assert_eq!(broker.scanner.scan_window, Duration::from_secs(8));
    }
}
