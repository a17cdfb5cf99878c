use actix::{Actor, Addr};
use futures::prelude::*;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc::unbounded_channel, watch};
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::fleet::{DeviceDiscovered, FleetController, FleetError, SessionUpdate};
use crate::publish::BusPublisher;
use crate::scanner::{Discovered, DiscoveryScanner, ScannerConfig};
use crate::session::SessionConfig;
use crate::settings::{GlobalSettings, SettingsStore};
use crate::transport::BleTransport;

#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("Fleet setup failure")]
    Fleet(#[from] FleetError),
}

#[derive(Debug, Clone, Default)]
pub struct BrokerConfig {
    pub scanner: ScannerConfig,
    pub session: SessionConfig,
}

/// Wire up and start the fleet: restore persisted devices, start the
/// controller actor, bridge session and discovery channels into it,
/// and kick off the background scanner. The returned address is the
/// sole control surface.
pub async fn fleet(
    cfg: BrokerConfig,
    transport: Arc<dyn BleTransport>,
    settings: Arc<dyn SettingsStore>,
    publisher: Arc<dyn BusPublisher>,
) -> Result<Addr<FleetController>, BrokerError> {
    let globals = match settings.load_globals() {
        Ok(globals) => globals,
        Err(e) => {
            log::warn!("Failed to load global settings, using defaults: {e:}");
            GlobalSettings::default()
        }
    };
    publisher.set_global_flags(&globals);

    let (events_tx, events_rx) = unbounded_channel();
    let (found_tx, found_rx) = unbounded_channel::<Discovered>();
    let (discovery_tx, discovery_rx) = watch::channel(globals.discovery_enabled);

    let mut controller = FleetController::new(
        transport.clone(),
        settings,
        publisher,
        cfg.session,
        events_tx,
        discovery_tx,
    );
    controller.restore_from_settings()?;
    let addr = controller.start();

    let events_addr = addr.clone();
    tokio::spawn(async move {
        let mut events = UnboundedReceiverStream::new(events_rx);
        while let Some(event) = events.next().await {
            events_addr.do_send(SessionUpdate(event));
        }
        log::warn!("Session event stream closed");
    });

    let found_addr = addr.clone();
    tokio::spawn(async move {
        let mut found = UnboundedReceiverStream::new(found_rx);
        while let Some(discovered) = found.next().await {
            found_addr.do_send(DeviceDiscovered {
                identity: discovered.identity,
                advertised_name: discovered.advertised_name,
            });
        }
        log::warn!("Discovery stream closed");
    });

    DiscoveryScanner::spawn(transport, cfg.scanner, found_tx, discovery_rx);

    Ok(addr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tokio::time::{sleep, Duration};

    use crate::fleet::{DeviceConfig, FleetSnapshot, Role, SetEnabled};
    use crate::settings::InMemorySettings;
    use crate::transport::{Advertisement, BleError, DeviceLink};
    use wdog_proto::{DeviceIdentity, LineMeasurement, MacAddress};

    struct OneDeviceTransport;

    #[async_trait]
    impl BleTransport for OneDeviceTransport {
        async fn adapter_names(&self) -> Result<Vec<String>, BleError> {
            Ok(vec!["hci0".into()])
        }

        async fn scan(&self, _: &str, _: Duration) -> Result<Vec<Advertisement>, BleError> {
            Ok(vec![Advertisement {
                mac: MacAddress([0x26, 0xec, 0x4a, 0xe4, 0x69, 0xa5]),
                name: "WD_E5_26ec4ae469a5".into(),
            }])
        }

        async fn connect(&self, mac: MacAddress) -> Result<Box<dyn DeviceLink>, BleError> {
            Err(BleError::NotFound(mac))
        }
    }

    struct NullPublisher;

    impl BusPublisher for NullPublisher {
        fn announce_device(&self, _: &DeviceIdentity, _: &DeviceConfig) {}
        fn register(&self, _: &DeviceIdentity, _: Role, _: &DeviceConfig) {}
        fn retire(&self, _: &DeviceIdentity, _: Role) {}
        fn publish(&self, _: &DeviceIdentity, _: Role, _: &[LineMeasurement], _: u8) {}
        fn set_global_flags(&self, _: &GlobalSettings) {}
    }

    #[actix::test]
    async fn scanner_feeds_fleet_and_enable_round_trips() {
        let cfg = BrokerConfig {
            scanner: ScannerConfig {
                scan_window: Duration::from_millis(1),
                ..Default::default()
            },
            ..Default::default()
        };
        let addr = fleet(
            cfg,
            Arc::new(OneDeviceTransport),
            Arc::new(InMemorySettings::default()),
            Arc::new(NullPublisher),
        )
        .await
        .unwrap();

        let mac = MacAddress([0x26, 0xec, 0x4a, 0xe4, 0x69, 0xa5]);
        let mut views = Vec::new();
        for _ in 0..50 {
            views = addr.send(FleetSnapshot).await.unwrap();
            if !views.is_empty() {
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(views.len(), 1);
        assert_eq!(views[0].identity.mac, mac);
        assert!(!views[0].config.enabled);

        addr.send(SetEnabled { mac, enabled: true })
            .await
            .unwrap()
            .unwrap();
        let views = addr.send(FleetSnapshot).await.unwrap();
        assert!(views[0].config.enabled);
    }
}
