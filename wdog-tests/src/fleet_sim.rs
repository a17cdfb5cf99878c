//! Runs the full fleet stack against a simulated radio: one fake dual
//! line watchdog that streams synthetic DLReports. Useful for checking
//! the discovery, enable, and publish paths without hardware.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
use tokio::time::Duration;

use wdog_broker::{
    fleet, Advertisement, BleError, BleTransport, BrokerConfig, DeviceLink, FleetSnapshot,
    InMemorySettings, ScannerConfig, SetEnabled, SetRefreshInterval,
};
use wdog_proto::{MacAddress, DL_DATA_SIZE, PACKET_IDENTIFIER, PACKET_TAIL};
use wdogd::publisher::LogPublisher;

const SIM_MAC: MacAddress = MacAddress([0x26, 0xec, 0x4a, 0xe4, 0x69, 0xa5]);
const SIM_NAME: &str = "WD_E7_26ec4ae469a5";

fn dl_block(volts: f64, amps: f64) -> Vec<u8> {
    let mut block = vec![0u8; DL_DATA_SIZE];
    let scaled_v = (volts * 10000.0) as i32;
    let scaled_a = (amps * 10000.0) as i32;
    let scaled_w = (volts * amps * 10000.0) as i32;
    let scaled_hz = (60.0_f64 * 100.0) as i32;
    block[0..4].copy_from_slice(&scaled_v.to_be_bytes());
    block[4..8].copy_from_slice(&scaled_a.to_be_bytes());
    block[8..12].copy_from_slice(&scaled_w.to_be_bytes());
    block[20..24].copy_from_slice(&scaled_v.to_be_bytes());
    block[27] = 72; // temperature
    block[28..32].copy_from_slice(&scaled_hz.to_be_bytes());
    block
}

fn dl_report(message_id: u8) -> Vec<u8> {
    let mut body = dl_block(120.1, 12.5);
    body.extend(dl_block(119.8, 8.2));

    let mut frame = PACKET_IDENTIFIER.to_be_bytes().to_vec();
    frame.push(1);
    frame.push(message_id);
    frame.push(1); // DLReport
    frame.extend_from_slice(&(body.len() as u16).to_be_bytes());
    frame.extend_from_slice(&body);
    frame.extend_from_slice(&PACKET_TAIL.to_be_bytes());
    frame
}

struct SimTransport;

#[async_trait]
impl BleTransport for SimTransport {
    async fn adapter_names(&self) -> Result<Vec<String>, BleError> {
        Ok(vec!["sim0".into()])
    }

    async fn scan(&self, _: &str, _: Duration) -> Result<Vec<Advertisement>, BleError> {
        Ok(vec![Advertisement {
            mac: SIM_MAC,
            name: SIM_NAME.into(),
        }])
    }

    async fn connect(&self, _: MacAddress) -> Result<Box<dyn DeviceLink>, BleError> {
        log::info!("Sim device connected");
        Ok(Box::new(SimLink { stream: None }))
    }
}

struct SimLink {
    stream: Option<tokio::task::JoinHandle<()>>,
}

#[async_trait]
impl DeviceLink for SimLink {
    async fn subscribe(&mut self) -> Result<UnboundedReceiver<Vec<u8>>, BleError> {
        let (tx, rx) = unbounded_channel();
        self.stream = Some(tokio::spawn(async move {
            let mut message_id = 0u8;
            loop {
                tokio::time::sleep(Duration::from_secs(2)).await;
                message_id = message_id.wrapping_add(1);
                let frame = dl_report(message_id);
                // Exercise reassembly by splitting every frame
                let half = frame.len() / 2;
                if tx.send(frame[..half].to_vec()).is_err() {
                    break;
                }
                if tx.send(frame[half..].to_vec()).is_err() {
                    break;
                }
            }
        }));
        Ok(rx)
    }

    async fn request_mtu(&mut self, mtu: u16) -> Result<u16, BleError> {
        Ok(mtu)
    }

    async fn write(&mut self, payload: &[u8], _: bool) -> Result<(), BleError> {
        log::info!("Sim device got {} byte write", payload.len());
        Ok(())
    }

    async fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            stream.abort();
        }
    }
}

#[actix::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    log::info!("Initializing fleet against the simulated radio");

    let cfg = BrokerConfig {
        scanner: ScannerConfig {
            scan_interval: Duration::from_secs(10),
            scan_window: Duration::from_millis(100),
            ..Default::default()
        },
        ..Default::default()
    };

    let addr = fleet(
        cfg,
        Arc::new(SimTransport),
        Arc::new(InMemorySettings::default()),
        Arc::new(LogPublisher),
    )
    .await
    .map_err(|e| {
        log::error!("Error creating fleet {e:}");
        e
    })?;

    // Wait for the scanner to surface the sim device, then enable it
    loop {
        tokio::time::sleep(Duration::from_millis(250)).await;
        if !addr.send(FleetSnapshot).await?.is_empty() {
            break;
        }
    }
    addr.send(SetEnabled {
        mac: SIM_MAC,
        enabled: true,
    })
    .await??;

    // Speed the device up mid-stream after a while
    tokio::time::sleep(Duration::from_secs(10)).await;
    addr.send(SetRefreshInterval {
        mac: SIM_MAC,
        interval_ms: 1000,
    })
    .await??;

    loop {
        tokio::time::sleep(Duration::from_secs(10)).await;
        for view in addr.send(FleetSnapshot).await? {
            log::info!(
                "{:} state {:?}, {} lines cached",
                view.identity.mac,
                view.runtime.state,
                view.runtime.lines.len()
            );
        }
    }
}
