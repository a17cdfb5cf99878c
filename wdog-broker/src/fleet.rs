use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use actix::{Actor, Context, Handler, Message, MessageResult};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{mpsc::UnboundedSender, watch};
use tokio::time::Duration;

use wdog_proto::{DeviceIdentity, LineMeasurement, MacAddress};

use crate::publish::BusPublisher;
use crate::session::{DeviceSession, SessionConfig, SessionEvent, SessionHandle, SessionState};
use crate::settings::{GlobalSettings, SettingsError, SettingsStore};
use crate::transport::BleTransport;
use crate::{MAX_REFRESH_MS, MIN_REFRESH_MS};

pub const MAX_POSITION: u8 = 2;

#[derive(Error, Debug)]
pub enum FleetError {
    #[error("Unknown device {0}")]
    UnknownDevice(MacAddress),
    #[error("Unknown role {0:?}")]
    InvalidRole(String),
    #[error("Position {0} out of range")]
    InvalidPosition(u8),
    #[error("Refresh interval {0} ms out of range")]
    InvalidRefreshInterval(u64),
    #[error("Settings store failure")]
    Settings(#[from] SettingsError),
}

/// The electrical role a watchdog's measurements are published under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Grid,
    Genset,
    PvInverter,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Grid => "grid",
            Role::Genset => "genset",
            Role::PvInverter => "pv_inverter",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = FleetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "grid" => Ok(Role::Grid),
            "genset" => Ok(Role::Genset),
            "pv_inverter" => Ok(Role::PvInverter),
            other => Err(FleetError::InvalidRole(other.to_string())),
        }
    }
}

/// Persisted per-device configuration. The advertised name is stored so
/// identity can be re-derived on restart without seeing the device on
/// the air first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub role: Role,
    pub custom_name: String,
    pub position: u8,
    pub refresh_interval_ms: u64,
    pub enabled: bool,
    pub advertised_name: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            role: Role::Grid,
            custom_name: "Power Watchdog".to_string(),
            position: 0,
            refresh_interval_ms: 5000,
            enabled: false,
            advertised_name: String::new(),
        }
    }
}

impl DeviceConfig {
    pub fn new(advertised_name: &str) -> Self {
        Self {
            advertised_name: advertised_name.to_string(),
            ..Default::default()
        }
    }
}

/// Live, non-persisted state for one device.
#[derive(Debug, Clone)]
pub struct DeviceRuntimeState {
    pub state: SessionState,
    pub last_seen: Option<DateTime<Local>>,
    pub lines: Vec<LineMeasurement>,
}

impl Default for DeviceRuntimeState {
    fn default() -> Self {
        Self {
            state: SessionState::Idle,
            last_seen: None,
            lines: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DeviceView {
    pub identity: DeviceIdentity,
    pub config: DeviceConfig,
    pub runtime: DeviceRuntimeState,
}

struct FleetEntry {
    identity: DeviceIdentity,
    config: DeviceConfig,
    runtime: DeviceRuntimeState,
    session: Option<SessionHandle>,
}

#[derive(Message, Debug)]
#[rtype(result = "()")]
pub struct DeviceDiscovered {
    pub identity: DeviceIdentity,
    pub advertised_name: String,
}

#[derive(Message, Debug)]
#[rtype(result = "Result<(), FleetError>")]
pub struct SetEnabled {
    pub mac: MacAddress,
    pub enabled: bool,
}

#[derive(Message, Debug)]
#[rtype(result = "Result<(), FleetError>")]
pub struct SetRole {
    pub mac: MacAddress,
    pub role: Role,
}

#[derive(Message, Debug)]
#[rtype(result = "Result<(), FleetError>")]
pub struct SetCustomName {
    pub mac: MacAddress,
    pub name: String,
}

#[derive(Message, Debug)]
#[rtype(result = "Result<(), FleetError>")]
pub struct SetPosition {
    pub mac: MacAddress,
    pub position: u8,
}

#[derive(Message, Debug)]
#[rtype(result = "Result<(), FleetError>")]
pub struct SetRefreshInterval {
    pub mac: MacAddress,
    pub interval_ms: u64,
}

#[derive(Message, Debug)]
#[rtype(result = "Result<(), FleetError>")]
pub struct SetDiscoveryEnabled {
    pub enabled: bool,
}

#[derive(Message, Debug)]
#[rtype(result = "()")]
pub struct SessionUpdate(pub SessionEvent);

#[derive(Message, Debug)]
#[rtype(result = "Vec<DeviceView>")]
pub struct FleetSnapshot;

/// Single owner of the device table. All configuration changes flow
/// through here so persistence, session lifecycle, and bus registration
/// stay consistent with each other.
pub struct FleetController {
    devices: HashMap<MacAddress, FleetEntry>,
    transport: Arc<dyn BleTransport>,
    settings: Arc<dyn SettingsStore>,
    publisher: Arc<dyn BusPublisher>,
    session_cfg: SessionConfig,
    events_tx: UnboundedSender<SessionEvent>,
    discovery_tx: watch::Sender<bool>,
}

impl FleetController {
    pub fn new(
        transport: Arc<dyn BleTransport>,
        settings: Arc<dyn SettingsStore>,
        publisher: Arc<dyn BusPublisher>,
        session_cfg: SessionConfig,
        events_tx: UnboundedSender<SessionEvent>,
        discovery_tx: watch::Sender<bool>,
    ) -> Self {
        Self {
            devices: HashMap::new(),
            transport,
            settings,
            publisher,
            session_cfg,
            events_tx,
            discovery_tx,
        }
    }

    /// Rebuild the device table from the settings store and restart
    /// sessions for every enabled device. Entries that no longer
    /// classify are skipped with a warning rather than failing the
    /// whole restore.
    pub fn restore_from_settings(&mut self) -> Result<(), FleetError> {
        let stored = self.settings.load_devices()?;
        for (id, config) in stored {
            let mac = match MacAddress::from_settings_id(&id) {
                Ok(mac) => mac,
                Err(e) => {
                    log::warn!("Skipping settings entry {id:?}: {e:}");
                    continue;
                }
            };
            let Some(identity) = DeviceIdentity::classify(mac, &config.advertised_name) else {
                log::warn!(
                    "Skipping {mac:}: stored name {:?} does not classify",
                    config.advertised_name
                );
                continue;
            };

            log::info!(
                "Restored {mac:} role {:} enabled {:}",
                config.role,
                config.enabled
            );
            self.publisher.announce_device(&identity, &config);

            let session = if config.enabled {
                self.publisher.register(&identity, config.role, &config);
                Some(self.spawn_session(&identity, &config))
            } else {
                None
            };

            self.devices.insert(
                mac,
                FleetEntry {
                    identity,
                    config,
                    runtime: DeviceRuntimeState::default(),
                    session,
                },
            );
        }
        Ok(())
    }

    fn spawn_session(&self, identity: &DeviceIdentity, config: &DeviceConfig) -> SessionHandle {
        let cfg = SessionConfig {
            refresh_interval: Duration::from_millis(config.refresh_interval_ms),
            ..self.session_cfg.clone()
        };
        DeviceSession::spawn(
            identity.clone(),
            cfg,
            self.transport.clone(),
            self.events_tx.clone(),
        )
    }

    /// Persistence failures degrade to in-memory state for this
    /// process lifetime; they never reject the operation.
    fn persist(&self, mac: MacAddress, config: &DeviceConfig) {
        if let Err(e) = self.settings.save_device(&mac.settings_id(), config) {
            log::error!("Failed to persist {mac:}: {e:}, continuing in memory");
        }
    }

    fn entry_mut(&mut self, mac: MacAddress) -> Result<&mut FleetEntry, FleetError> {
        self.devices
            .get_mut(&mac)
            .ok_or(FleetError::UnknownDevice(mac))
    }

    fn discovered(&mut self, identity: DeviceIdentity, advertised_name: String) {
        let mac = identity.mac;
        if self.devices.contains_key(&mac) {
            log::trace!("{mac:} already known");
            return;
        }

        log::info!("New watchdog {mac:} ({advertised_name:}), disabled until enabled");
        let config = DeviceConfig::new(&advertised_name);
        self.persist(mac, &config);
        self.publisher.announce_device(&identity, &config);
        self.devices.insert(
            mac,
            FleetEntry {
                identity,
                config,
                runtime: DeviceRuntimeState::default(),
                session: None,
            },
        );
    }

    fn set_enabled(&mut self, mac: MacAddress, enabled: bool) -> Result<(), FleetError> {
        let entry = self.entry_mut(mac)?;
        if entry.config.enabled == enabled && entry.session.is_some() == enabled {
            return Ok(());
        }
        let identity = entry.identity.clone();
        let mut config = entry.config.clone();
        config.enabled = enabled;
        self.persist(mac, &config);

        if enabled {
            log::info!("Enabling {mac:} as {:}", config.role);
            let session = self.spawn_session(&identity, &config);
            if let Some(entry) = self.devices.get_mut(&mac) {
                entry.config = config.clone();
                if let Some(old) = entry.session.replace(session) {
                    old.disable();
                }
            }
            self.publisher.register(&identity, config.role, &config);
        } else {
            log::info!("Disabling {mac:}");
            if let Some(entry) = self.devices.get_mut(&mac) {
                entry.config = config.clone();
                if let Some(session) = entry.session.take() {
                    session.disable();
                }
            }
            self.publisher.retire(&identity, config.role);
        }
        Ok(())
    }

    fn set_role(&mut self, mac: MacAddress, role: Role) -> Result<(), FleetError> {
        let entry = self.entry_mut(mac)?;
        let previous = entry.config.role;
        if previous == role {
            return Ok(());
        }
        let identity = entry.identity.clone();
        let mut config = entry.config.clone();
        config.role = role;
        self.persist(mac, &config);

        if let Some(entry) = self.devices.get_mut(&mac) {
            entry.config = config.clone();
        }

        // A running device moves between roles atomically from the
        // bus consumer's point of view
        if config.enabled {
            self.publisher.retire(&identity, previous);
            self.publisher.register(&identity, role, &config);
        }
        log::info!("{mac:} role {previous:} -> {role:}");
        Ok(())
    }

    fn set_custom_name(&mut self, mac: MacAddress, name: String) -> Result<(), FleetError> {
        let entry = self.entry_mut(mac)?;
        let mut config = entry.config.clone();
        config.custom_name = name;
        self.persist(mac, &config);
        self.entry_mut(mac)?.config = config;
        Ok(())
    }

    fn set_position(&mut self, mac: MacAddress, position: u8) -> Result<(), FleetError> {
        if position > MAX_POSITION {
            return Err(FleetError::InvalidPosition(position));
        }
        let entry = self.entry_mut(mac)?;
        let mut config = entry.config.clone();
        config.position = position;
        self.persist(mac, &config);
        self.entry_mut(mac)?.config = config;
        Ok(())
    }

    fn set_refresh_interval(&mut self, mac: MacAddress, interval_ms: u64) -> Result<(), FleetError> {
        if !(MIN_REFRESH_MS..=MAX_REFRESH_MS).contains(&interval_ms) {
            return Err(FleetError::InvalidRefreshInterval(interval_ms));
        }
        let entry = self.entry_mut(mac)?;
        let mut config = entry.config.clone();
        config.refresh_interval_ms = interval_ms;
        self.persist(mac, &config);

        let entry = self.entry_mut(mac)?;
        entry.config = config;
        if let Some(session) = &entry.session {
            session.set_refresh_interval(Duration::from_millis(interval_ms));
        }
        Ok(())
    }

    fn set_discovery_enabled(&mut self, enabled: bool) -> Result<(), FleetError> {
        let mut globals = self.settings.load_globals().unwrap_or_else(|e| {
            log::error!("Failed to load global settings: {e:}, using defaults");
            GlobalSettings::default()
        });
        if globals.discovery_enabled != enabled {
            globals.discovery_enabled = enabled;
            if let Err(e) = self.settings.save_globals(&globals) {
                log::error!("Failed to persist global settings: {e:}, continuing in memory");
            }
        }
        log::info!("Discovery {}", if enabled { "enabled" } else { "disabled" });
        self.publisher.set_global_flags(&globals);
        self.discovery_tx.send(enabled).ok();
        Ok(())
    }

    fn session_update(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Measurements { mac, lines } => {
                let Some(entry) = self.devices.get_mut(&mac) else {
                    return;
                };
                entry.runtime.lines = lines.clone();
                entry.runtime.last_seen = Some(Local::now());
                let error_code = lines.iter().map(|l| l.error_code).max().unwrap_or(0);
                self.publisher
                    .publish(&entry.identity, entry.config.role, &lines, error_code);
            }
            SessionEvent::StateChanged { mac, state } => {
                if let Some(entry) = self.devices.get_mut(&mac) {
                    log::debug!("{mac:} -> {state:?}");
                    entry.runtime.state = state;
                }
            }
            SessionEvent::Notice { mac, command } => {
                log::warn!("{mac:} sent {command:?} notification");
            }
            SessionEvent::ConnectionError { mac, error } => {
                log::warn!("{mac:} connection error: {error:}");
            }
        }
    }

    fn snapshot(&self) -> Vec<DeviceView> {
        self.devices
            .values()
            .map(|entry| DeviceView {
                identity: entry.identity.clone(),
                config: entry.config.clone(),
                runtime: entry.runtime.clone(),
            })
            .collect()
    }
}

impl Actor for FleetController {
    type Context = Context<Self>;

    fn started(&mut self, _ctx: &mut Self::Context) {
        log::info!("Fleet controller started with {} devices", self.devices.len());
    }
}

impl Handler<DeviceDiscovered> for FleetController {
    type Result = ();

    fn handle(&mut self, msg: DeviceDiscovered, _ctx: &mut Self::Context) {
        self.discovered(msg.identity, msg.advertised_name);
    }
}

impl Handler<SetEnabled> for FleetController {
    type Result = Result<(), FleetError>;

    fn handle(&mut self, msg: SetEnabled, _ctx: &mut Self::Context) -> Self::Result {
        self.set_enabled(msg.mac, msg.enabled)
    }
}

impl Handler<SetRole> for FleetController {
    type Result = Result<(), FleetError>;

    fn handle(&mut self, msg: SetRole, _ctx: &mut Self::Context) -> Self::Result {
        self.set_role(msg.mac, msg.role)
    }
}

impl Handler<SetCustomName> for FleetController {
    type Result = Result<(), FleetError>;

    fn handle(&mut self, msg: SetCustomName, _ctx: &mut Self::Context) -> Self::Result {
        self.set_custom_name(msg.mac, msg.name)
    }
}

impl Handler<SetPosition> for FleetController {
    type Result = Result<(), FleetError>;

    fn handle(&mut self, msg: SetPosition, _ctx: &mut Self::Context) -> Self::Result {
        self.set_position(msg.mac, msg.position)
    }
}

impl Handler<SetRefreshInterval> for FleetController {
    type Result = Result<(), FleetError>;

    fn handle(&mut self, msg: SetRefreshInterval, _ctx: &mut Self::Context) -> Self::Result {
        self.set_refresh_interval(msg.mac, msg.interval_ms)
    }
}

impl Handler<SetDiscoveryEnabled> for FleetController {
    type Result = Result<(), FleetError>;

    fn handle(&mut self, msg: SetDiscoveryEnabled, _ctx: &mut Self::Context) -> Self::Result {
        self.set_discovery_enabled(msg.enabled)
    }
}

impl Handler<SessionUpdate> for FleetController {
    type Result = ();

    fn handle(&mut self, msg: SessionUpdate, _ctx: &mut Self::Context) {
        self.session_update(msg.0);
    }
}

impl Handler<FleetSnapshot> for FleetController {
    type Result = MessageResult<FleetSnapshot>;

    fn handle(&mut self, _msg: FleetSnapshot, _ctx: &mut Self::Context) -> Self::Result {
        MessageResult(self.snapshot())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tokio::sync::mpsc::unbounded_channel;
    use wdog_proto::{AmperageClass, Generation, LineCount};

    use crate::settings::{GlobalSettings, InMemorySettings};
    use crate::transport::{Advertisement, BleError, DeviceLink};

    struct NullTransport;

    #[async_trait]
    impl BleTransport for NullTransport {
        async fn adapter_names(&self) -> Result<Vec<String>, BleError> {
            Ok(vec!["hci0".into()])
        }

        async fn scan(&self, _: &str, _: Duration) -> Result<Vec<Advertisement>, BleError> {
            Ok(Vec::new())
        }

        async fn connect(&self, mac: MacAddress) -> Result<Box<dyn DeviceLink>, BleError> {
            Err(BleError::NotFound(mac))
        }
    }

    #[derive(Default)]
    struct RecordingPublisher {
        calls: Mutex<Vec<String>>,
    }

    impl RecordingPublisher {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }
    }

    impl BusPublisher for RecordingPublisher {
        fn announce_device(&self, identity: &DeviceIdentity, _: &DeviceConfig) {
            self.record(format!("announce {}", identity.mac));
        }

        fn register(&self, identity: &DeviceIdentity, role: Role, _: &DeviceConfig) {
            self.record(format!("register {} {role}", identity.mac));
        }

        fn retire(&self, identity: &DeviceIdentity, role: Role) {
            self.record(format!("retire {} {role}", identity.mac));
        }

        fn publish(&self, identity: &DeviceIdentity, role: Role, lines: &[LineMeasurement], error_code: u8) {
            self.record(format!(
                "publish {} {role} {} {error_code}",
                identity.mac,
                lines.len()
            ));
        }

        fn set_global_flags(&self, globals: &GlobalSettings) {
            self.record(format!("globals discovery={}", globals.discovery_enabled));
        }
    }

    struct Fixture {
        controller: FleetController,
        publisher: Arc<RecordingPublisher>,
        settings: Arc<InMemorySettings>,
        discovery_rx: watch::Receiver<bool>,
    }

    fn fixture() -> Fixture {
        let publisher = Arc::new(RecordingPublisher::default());
        let settings = Arc::new(InMemorySettings::default());
        let (events_tx, _events_rx) = unbounded_channel();
        let (discovery_tx, discovery_rx) = watch::channel(true);
        let controller = FleetController::new(
            Arc::new(NullTransport),
            settings.clone(),
            publisher.clone(),
            SessionConfig::default(),
            events_tx,
            discovery_tx,
        );
        Fixture {
            controller,
            publisher,
            settings,
            discovery_rx,
        }
    }

    fn identity() -> DeviceIdentity {
        DeviceIdentity {
            mac: MacAddress([0x26, 0xec, 0x4a, 0xe4, 0x69, 0xa5]),
            generation: Generation::Gen2,
            model_code: "E7".into(),
            line_count: LineCount::Dual,
            amperage: AmperageClass::A50,
        }
    }

    #[tokio::test]
    async fn discovery_is_idempotent_and_persists_disabled() {
        let mut fx = fixture();
        fx.controller
            .discovered(identity(), "WD_E7_26ec4ae469a5".into());
        fx.controller
            .discovered(identity(), "WD_E7_26ec4ae469a5".into());

        assert_eq!(fx.controller.devices.len(), 1);
        let announces = fx
            .publisher
            .calls()
            .iter()
            .filter(|c| c.starts_with("announce"))
            .count();
        assert_eq!(announces, 1);

        let stored = fx.settings.load_devices().unwrap();
        let cfg = stored.get("26ec4ae469a5").unwrap();
        assert!(!cfg.enabled);
        assert_eq!(cfg.role, Role::Grid);
        assert_eq!(cfg.refresh_interval_ms, 5000);
    }

    #[tokio::test]
    async fn enable_spawns_one_session_and_registers() {
        let mut fx = fixture();
        fx.controller
            .discovered(identity(), "WD_E7_26ec4ae469a5".into());
        let mac = identity().mac;

        fx.controller.set_enabled(mac, true).unwrap();
        assert!(fx.controller.devices[&mac].session.is_some());
        assert!(fx.settings.load_devices().unwrap()["26ec4ae469a5"].enabled);

        // Second enable is a no-op
        fx.controller.set_enabled(mac, true).unwrap();
        let registers = fx
            .publisher
            .calls()
            .iter()
            .filter(|c| c.starts_with("register"))
            .count();
        assert_eq!(registers, 1);

        fx.controller.set_enabled(mac, false).unwrap();
        assert!(fx.controller.devices[&mac].session.is_none());
        assert!(fx
            .publisher
            .calls()
            .contains(&format!("retire {mac} grid")));
    }

    #[tokio::test]
    async fn unknown_device_rejected() {
        let mut fx = fixture();
        let mac = MacAddress([9, 9, 9, 9, 9, 9]);
        assert!(matches!(
            fx.controller.set_enabled(mac, true),
            Err(FleetError::UnknownDevice(_))
        ));
        assert!(matches!(
            fx.controller.set_role(mac, Role::Genset),
            Err(FleetError::UnknownDevice(_))
        ));
    }

    #[tokio::test]
    async fn position_and_refresh_validation() {
        let mut fx = fixture();
        fx.controller
            .discovered(identity(), "WD_E7_26ec4ae469a5".into());
        let mac = identity().mac;

        assert!(matches!(
            fx.controller.set_position(mac, 3),
            Err(FleetError::InvalidPosition(3))
        ));
        fx.controller.set_position(mac, 2).unwrap();

        assert!(matches!(
            fx.controller.set_refresh_interval(mac, 99),
            Err(FleetError::InvalidRefreshInterval(99))
        ));
        assert!(matches!(
            fx.controller.set_refresh_interval(mac, 10_001),
            Err(FleetError::InvalidRefreshInterval(_))
        ));
        fx.controller.set_refresh_interval(mac, 100).unwrap();
        fx.controller.set_refresh_interval(mac, 10_000).unwrap();

        let stored = fx.settings.load_devices().unwrap();
        assert_eq!(stored["26ec4ae469a5"].position, 2);
        assert_eq!(stored["26ec4ae469a5"].refresh_interval_ms, 10_000);
    }

    #[tokio::test]
    async fn role_change_retires_then_registers() {
        let mut fx = fixture();
        fx.controller
            .discovered(identity(), "WD_E7_26ec4ae469a5".into());
        let mac = identity().mac;
        fx.controller.set_enabled(mac, true).unwrap();

        fx.controller.set_role(mac, Role::Genset).unwrap();
        let calls = fx.publisher.calls();
        let retire = calls.iter().position(|c| c == &format!("retire {mac} grid"));
        let register = calls
            .iter()
            .position(|c| c == &format!("register {mac} genset"));
        assert!(retire.is_some() && register.is_some());
        assert!(retire < register);

        // Same role again publishes nothing new
        let before = fx.publisher.calls().len();
        fx.controller.set_role(mac, Role::Genset).unwrap();
        assert_eq!(fx.publisher.calls().len(), before);
    }

    #[tokio::test]
    async fn restore_starts_enabled_devices_and_skips_bad_entries() {
        let fx = fixture();
        let mut enabled_cfg = DeviceConfig::new("WD_E7_26ec4ae469a5");
        enabled_cfg.enabled = true;
        enabled_cfg.role = Role::PvInverter;
        fx.settings.save_device("26ec4ae469a5", &enabled_cfg).unwrap();
        fx.settings
            .save_device("aabbccddeeff", &DeviceConfig::new("NotAWatchdog"))
            .unwrap();

        let mut fx = fx;
        fx.controller.restore_from_settings().unwrap();

        assert_eq!(fx.controller.devices.len(), 1);
        let mac = identity().mac;
        assert!(fx.controller.devices[&mac].session.is_some());
        assert!(fx
            .publisher
            .calls()
            .contains(&format!("register {mac} pv_inverter")));
    }

    #[tokio::test]
    async fn discovery_toggle_persists_and_signals() {
        let mut fx = fixture();
        fx.controller.set_discovery_enabled(false).unwrap();

        assert!(!fx.settings.load_globals().unwrap().discovery_enabled);
        assert!(!*fx.discovery_rx.borrow());
        assert!(fx
            .publisher
            .calls()
            .contains(&"globals discovery=false".to_string()));
    }

    #[tokio::test]
    async fn measurements_update_runtime_and_publish_max_error() {
        let mut fx = fixture();
        fx.controller
            .discovered(identity(), "WD_E7_26ec4ae469a5".into());
        let mac = identity().mac;
        fx.controller.set_enabled(mac, true).unwrap();

        let healthy = LineMeasurement {
            input_voltage: 120.1,
            ..Default::default()
        };
        let faulted = LineMeasurement {
            error_code: 7,
            ..Default::default()
        };

        fx.controller.session_update(SessionEvent::Measurements {
            mac,
            lines: vec![healthy, faulted],
        });

        let entry = &fx.controller.devices[&mac];
        assert_eq!(entry.runtime.lines.len(), 2);
        assert!(entry.runtime.last_seen.is_some());
        assert!(fx
            .publisher
            .calls()
            .contains(&format!("publish {mac} grid 2 7")));

        fx.controller.session_update(SessionEvent::StateChanged {
            mac,
            state: SessionState::Streaming,
        });
        assert_eq!(
            fx.controller.devices[&mac].runtime.state,
            SessionState::Streaming
        );
    }

    #[test]
    fn role_strings_round_trip() {
        for role in [Role::Grid, Role::Genset, Role::PvInverter] {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
        }
        assert!(matches!(
            "solar".parse::<Role>(),
            Err(FleetError::InvalidRole(_))
        ));
    }
}
