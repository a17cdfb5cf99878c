//! Daemon front end for the watchdog fleet: loads the daemon config,
//! sets up file logging, starts the broker against the real radio,
//! and logs measurements as they arrive.

pub mod config;
pub mod publisher;

use thiserror::Error;

use wdog_broker::{BleError, BrokerError, SettingsError};

#[derive(Error, Debug)]
pub enum WdogError {
    #[error("I/O Error")]
    Io(#[from] std::io::Error),
    #[error("Config Error")]
    Config(#[from] serde_json::Error),
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
    #[error("Broker Error")]
    Broker(#[from] BrokerError),
    #[error("BLE Error")]
    Ble(#[from] BleError),
    #[error("Settings Error")]
    Settings(#[from] SettingsError),
}

pub type WdogResult<T> = std::result::Result<T, WdogError>;
