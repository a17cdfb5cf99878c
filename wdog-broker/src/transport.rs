use async_trait::async_trait;
use btleplug::api::{Central, Manager as _, Peripheral as _, ScanFilter, WriteType};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use thiserror::Error;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
use tokio::time::Duration;

use wdog_proto::MacAddress;

use crate::{NOTIFY_CHARACTERISTIC, REQUESTED_MTU};

// How long connect() scans an adapter for a not-yet-cached peripheral
const CONNECT_SCAN_WINDOW: Duration = Duration::from_secs(10);

#[derive(Error, Debug)]
pub enum BleError {
    #[error("BLE backend error")]
    Backend(#[from] btleplug::Error),
    #[error("Scan already in progress")]
    Busy,
    #[error("No Bluetooth adapter present")]
    NoAdapter,
    #[error("Device {0} not found")]
    NotFound(MacAddress),
    #[error("Notify characteristic missing")]
    NoCharacteristic,
    #[error("Operation timed out")]
    Timeout,
}

impl BleError {
    /// Transient radio-busy condition worth retrying on the same
    /// adapter before rotating to the next one.
    pub fn is_busy(&self) -> bool {
        match self {
            BleError::Busy => true,
            BleError::Backend(e) => {
                let msg = e.to_string().to_ascii_lowercase();
                msg.contains("in progress") || msg.contains("busy")
            }
            _ => false,
        }
    }
}

/// One advertisement seen during a scan window.
#[derive(Debug, Clone)]
pub struct Advertisement {
    pub mac: MacAddress,
    pub name: String,
}

/// Radio abstraction used by the scanner and by sessions. All
/// operations are fallible and retryable; error recovery policy lives
/// in the callers, not here.
#[async_trait]
pub trait BleTransport: Send + Sync {
    /// Names of the adapters available on this host.
    async fn adapter_names(&self) -> Result<Vec<String>, BleError>;

    /// Scan one adapter for `window`, returning every named
    /// advertisement observed.
    async fn scan(&self, adapter: &str, window: Duration) -> Result<Vec<Advertisement>, BleError>;

    /// Open a connection to the given device.
    async fn connect(&self, mac: MacAddress) -> Result<Box<dyn DeviceLink>, BleError>;
}

/// A live connection to one device.
#[async_trait]
pub trait DeviceLink: Send {
    /// Subscribe to the notification characteristic; raw fragments
    /// arrive on the returned channel until the link drops.
    async fn subscribe(&mut self) -> Result<UnboundedReceiver<Vec<u8>>, BleError>;

    /// Request a larger MTU. Failure degrades to more fragmentation,
    /// never a dead connection.
    async fn request_mtu(&mut self, mtu: u16) -> Result<u16, BleError>;

    /// Write to the characteristic, optionally requiring an ack.
    async fn write(&mut self, payload: &[u8], require_ack: bool) -> Result<(), BleError>;

    /// Tear the connection down; must be safe to call on every exit
    /// path.
    async fn close(&mut self);
}

/// Production transport backed by btleplug.
pub struct BtleTransport {
    manager: Manager,
}

impl BtleTransport {
    pub async fn new() -> Result<Self, BleError> {
        Ok(Self {
            manager: Manager::new().await?,
        })
    }

    async fn adapters(&self) -> Result<Vec<Adapter>, BleError> {
        let adapters = self.manager.adapters().await?;
        if adapters.is_empty() {
            return Err(BleError::NoAdapter);
        }
        Ok(adapters)
    }

    async fn adapter_named(&self, name: &str) -> Result<Adapter, BleError> {
        let adapters = self.adapters().await?;
        if name.is_empty() {
            return Ok(adapters.into_iter().next().ok_or(BleError::NoAdapter)?);
        }
        for adapter in adapters {
            if adapter.adapter_info().await?.contains(name) {
                return Ok(adapter);
            }
        }
        Err(BleError::NoAdapter)
    }

    async fn find_peripheral(
        &self,
        adapter: &Adapter,
        mac: MacAddress,
    ) -> Result<Option<Peripheral>, BleError> {
        for peripheral in adapter.peripherals().await? {
            if peripheral.address().into_inner() == mac.0 {
                return Ok(Some(peripheral));
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl BleTransport for BtleTransport {
    async fn adapter_names(&self) -> Result<Vec<String>, BleError> {
        let mut names = Vec::new();
        for adapter in self.adapters().await? {
            names.push(adapter.adapter_info().await?);
        }
        Ok(names)
    }

    async fn scan(&self, adapter: &str, window: Duration) -> Result<Vec<Advertisement>, BleError> {
        let adapter = self.adapter_named(adapter).await?;

        adapter.start_scan(ScanFilter::default()).await?;
        tokio::time::sleep(window).await;

        let mut found = Vec::new();
        for peripheral in adapter.peripherals().await? {
            let Ok(Some(properties)) = peripheral.properties().await else {
                continue;
            };
            if let Some(name) = properties.local_name {
                found.push(Advertisement {
                    mac: MacAddress(peripheral.address().into_inner()),
                    name,
                });
            }
        }

        adapter.stop_scan().await.ok();
        Ok(found)
    }

    async fn connect(&self, mac: MacAddress) -> Result<Box<dyn DeviceLink>, BleError> {
        for adapter in self.adapters().await? {
            let peripheral = match self.find_peripheral(&adapter, mac).await? {
                Some(p) => Some(p),
                None => {
                    // Not in the adapter cache; scan briefly so the
                    // peripheral object materializes
                    adapter.start_scan(ScanFilter::default()).await?;
                    tokio::time::sleep(CONNECT_SCAN_WINDOW).await;
                    adapter.stop_scan().await.ok();
                    self.find_peripheral(&adapter, mac).await?
                }
            };

            if let Some(peripheral) = peripheral {
                peripheral.connect().await?;
                peripheral.discover_services().await?;
                return Ok(Box::new(BtleLink { peripheral }));
            }
        }
        Err(BleError::NotFound(mac))
    }
}

struct BtleLink {
    peripheral: Peripheral,
}

impl BtleLink {
    fn characteristic(&self) -> Result<btleplug::api::Characteristic, BleError> {
        self.peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == NOTIFY_CHARACTERISTIC)
            .ok_or(BleError::NoCharacteristic)
    }
}

#[async_trait]
impl DeviceLink for BtleLink {
    async fn subscribe(&mut self) -> Result<UnboundedReceiver<Vec<u8>>, BleError> {
        let characteristic = self.characteristic()?;
        self.peripheral.subscribe(&characteristic).await?;

        let mut notifications = self.peripheral.notifications().await?;
        let (tx, rx) = unbounded_channel();
        tokio::spawn(async move {
            while let Some(notification) = notifications.next().await {
                if notification.uuid != NOTIFY_CHARACTERISTIC {
                    continue;
                }
                if tx.send(notification.value).is_err() {
                    break;
                }
            }
            // Stream end means the peripheral disconnected; dropping tx
            // closes the session's fragment channel
        });
        Ok(rx)
    }

    async fn request_mtu(&mut self, mtu: u16) -> Result<u16, BleError> {
        // btleplug delegates MTU negotiation to the platform stack;
        // reassembly handles fragmented delivery either way
        log::debug!(
            "MTU {mtu:} requested for {:}, negotiation left to the host stack",
            self.peripheral.address()
        );
        Ok(REQUESTED_MTU)
    }

    async fn write(&mut self, payload: &[u8], require_ack: bool) -> Result<(), BleError> {
        let characteristic = self.characteristic()?;
        let write_type = if require_ack {
            WriteType::WithResponse
        } else {
            WriteType::WithoutResponse
        };
        self.peripheral
            .write(&characteristic, payload, write_type)
            .await?;
        Ok(())
    }

    async fn close(&mut self) {
        if let Err(e) = self.peripheral.disconnect().await {
            log::warn!(
                "Failed to cleanly disconnect {:}: {e:}",
                self.peripheral.address()
            );
        }
    }
}
