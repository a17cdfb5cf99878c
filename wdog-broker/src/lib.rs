//! The `wdog-broker` crate defines the supervision layer for Power
//! Watchdog BLE meters: discovery, per-device connection sessions, and
//! the fleet controller that owns device configuration.
//!
//! The crate exposes a top-level [`fleet()`] entry point that wires up
//! and returns an [`actix`] actor handle, coordinating the following
//! responsibilities:
//! 1. Scan the configured Bluetooth adapters for advertisements that
//!    match the watchdog name patterns via [`DiscoveryScanner`], which
//!    rotates across adapters and retries transient "scan already in
//!    progress" failures so one stuck adapter cannot stall discovery.
//! 2. Run one [`DeviceSession`] task per enabled device. Each session
//!    owns its radio connection and drives the
//!    connect / handshake / stream state machine, reassembling the
//!    notification byte stream into packets and reconnecting with
//!    doubling backoff whenever the link drops or goes silent.
//! 3. Track every known device in [`FleetController`], the single
//!    owner of the identity-to-config table. It persists configuration
//!    through the [`SettingsStore`] boundary so enablement and roles
//!    survive restarts, and forwards decoded measurements and role
//!    changes to the [`BusPublisher`] collaborator.
//!
//! The real radio sits behind the [`BleTransport`] /[`DeviceLink`]
//! traits, with the [`btleplug`]-backed [`BtleTransport`] as the
//! production implementation; tests substitute mock transports.

mod broker;
mod fleet;
mod publish;
mod scanner;
mod session;
mod settings;
mod transport;

pub use broker::{fleet, BrokerConfig, BrokerError};
pub use fleet::{
    DeviceConfig, DeviceDiscovered, DeviceRuntimeState, DeviceView, FleetController, FleetError,
    FleetSnapshot, Role, SessionUpdate, SetCustomName, SetDiscoveryEnabled, SetEnabled,
    SetPosition, SetRefreshInterval, SetRole,
};
pub use publish::BusPublisher;
pub use scanner::{Discovered, DiscoveryScanner, ScannerConfig};
pub use session::{DeviceSession, SessionConfig, SessionEvent, SessionHandle, SessionState};
pub use settings::{GlobalSettings, InMemorySettings, JsonSettingsStore, SettingsError, SettingsStore};
pub use transport::{Advertisement, BleError, BleTransport, BtleTransport, DeviceLink};

/// GATT characteristic used for both notifications and the handshake
/// write
pub const NOTIFY_CHARACTERISTIC: uuid::Uuid =
    uuid::Uuid::from_u128(0x0000ff01_0000_1000_8000_00805f9b34fb);

/// The device sends packets larger than the default BLE MTU; failing
/// to negotiate this just means more fragments to reassemble
pub const REQUESTED_MTU: u16 = 230;

/// Refresh interval bounds accepted from the bus (milliseconds)
pub const MIN_REFRESH_MS: u64 = 100;
pub const MAX_REFRESH_MS: u64 = 10_000;

// How many times a busy adapter is retried before rotating to the next
const SCAN_BUSY_RETRIES: u32 = 3;
const SCAN_BUSY_DELAY_MS: u64 = 500;
