//! Runs the fleet against the real Bluetooth stack with a throwaway
//! settings file. Needs an adapter and at least one watchdog in range;
//! enable discovered devices with the fleet-sim test or by editing the
//! settings file.

use std::sync::Arc;

use tokio::time::Duration;

use wdog_broker::{fleet, BrokerConfig, BtleTransport, FleetSnapshot, JsonSettingsStore};
use wdogd::publisher::LogPublisher;

#[actix::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    log::info!("Initializing fleet against the host Bluetooth stack");

    let transport = BtleTransport::new().await.map_err(|e| {
        log::error!("Error opening Bluetooth stack {e:}");
        e
    })?;
    let settings = JsonSettingsStore::open("./live-radio-settings.json")?;

    let addr = fleet(
        BrokerConfig::default(),
        Arc::new(transport),
        Arc::new(settings),
        Arc::new(LogPublisher),
    )
    .await
    .map_err(|e| {
        log::error!("Error creating fleet {e:}");
        e
    })?;

    loop {
        tokio::time::sleep(Duration::from_secs(30)).await;
        for view in addr.send(FleetSnapshot).await? {
            log::info!(
                "{:} ({:}) state {:?}, enabled {:}",
                view.identity.mac,
                view.config.advertised_name,
                view.runtime.state,
                view.config.enabled
            );
        }
    }
}
