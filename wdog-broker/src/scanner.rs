use std::sync::Arc;

use tokio::sync::{mpsc::UnboundedSender, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};

use wdog_proto::DeviceIdentity;

use crate::transport::BleTransport;
use crate::{SCAN_BUSY_DELAY_MS, SCAN_BUSY_RETRIES};

#[derive(Debug, Clone)]
pub struct ScannerConfig {
    /// Adapters to scan; empty means every adapter the host reports.
    pub adapters: Vec<String>,
    pub scan_interval: Duration,
    pub scan_window: Duration,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            adapters: Vec::new(),
            scan_interval: Duration::from_secs(60),
            scan_window: Duration::from_secs(15),
        }
    }
}

/// An eligible watchdog seen on the air. The raw name is kept alongside
/// the classified identity so it can be persisted and re-classified on
/// restart.
#[derive(Debug, Clone)]
pub struct Discovered {
    pub identity: DeviceIdentity,
    pub advertised_name: String,
}

/// Periodic adapter sweep that classifies advertisements and forwards
/// eligible devices. Deduplication is not its job; the fleet layer
/// treats repeat discoveries as no-ops.
pub struct DiscoveryScanner;

impl DiscoveryScanner {
    pub fn spawn(
        transport: Arc<dyn BleTransport>,
        cfg: ScannerConfig,
        found: UnboundedSender<Discovered>,
        mut enabled: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            log::info!("Discovery scanner starting, interval {:?}", cfg.scan_interval);
            loop {
                if !*enabled.borrow() {
                    tokio::select! {
                        _ = found.closed() => break,
                        res = enabled.changed() => {
                            if res.is_err() {
                                break;
                            }
                            continue;
                        }
                    }
                }

                Self::sweep(transport.as_ref(), &cfg, &found).await;

                tokio::select! {
                    _ = found.closed() => break,
                    _ = sleep(cfg.scan_interval) => {}
                    res = enabled.changed() => {
                        if res.is_err() {
                            break;
                        }
                    }
                }
            }
            log::info!("Discovery scanner stopped");
        })
    }

    /// One pass over every configured adapter. A busy adapter is
    /// retried a few times, then the sweep rotates on so one stuck
    /// radio cannot stall the rest.
    async fn sweep(
        transport: &dyn BleTransport,
        cfg: &ScannerConfig,
        found: &UnboundedSender<Discovered>,
    ) {
        let adapters = if cfg.adapters.is_empty() {
            match transport.adapter_names().await {
                Ok(names) => names,
                Err(e) => {
                    log::warn!("Unable to enumerate adapters: {e:}");
                    return;
                }
            }
        } else {
            cfg.adapters.clone()
        };

        for adapter in &adapters {
            let mut attempt = 0;
            loop {
                match transport.scan(adapter, cfg.scan_window).await {
                    Ok(advertisements) => {
                        log::debug!(
                            "Scan on {adapter:} saw {} advertisements",
                            advertisements.len()
                        );
                        for ad in advertisements {
                            let Some(identity) = DeviceIdentity::classify(ad.mac, &ad.name) else {
                                continue;
                            };
                            log::info!(
                                "Found watchdog {:} ({:}) on {adapter:}",
                                identity.mac,
                                ad.name
                            );
                            found
                                .send(Discovered {
                                    identity,
                                    advertised_name: ad.name,
                                })
                                .ok();
                        }
                        break;
                    }
                    Err(e) if e.is_busy() && attempt < SCAN_BUSY_RETRIES => {
                        attempt += 1;
                        log::debug!("Adapter {adapter:} busy, retry {attempt:}");
                        sleep(Duration::from_millis(SCAN_BUSY_DELAY_MS)).await;
                    }
                    Err(e) => {
                        log::warn!("Scan failed on {adapter:}: {e:}");
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tokio::sync::mpsc::unbounded_channel;
    use wdog_proto::{Generation, MacAddress};

    use crate::transport::{Advertisement, BleError, DeviceLink};

    struct FlakyTransport {
        busy_before_ok: Mutex<u32>,
        scans: Mutex<u32>,
    }

    #[async_trait]
    impl BleTransport for FlakyTransport {
        async fn adapter_names(&self) -> Result<Vec<String>, BleError> {
            Ok(vec!["hci0".into()])
        }

        async fn scan(&self, _: &str, _: Duration) -> Result<Vec<Advertisement>, BleError> {
            *self.scans.lock().unwrap() += 1;
            {
                let mut busy = self.busy_before_ok.lock().unwrap();
                if *busy > 0 {
                    *busy -= 1;
                    return Err(BleError::Busy);
                }
            }
            Ok(vec![
                Advertisement {
                    mac: MacAddress([0x26, 0xec, 0x4a, 0xe4, 0x69, 0xa5]),
                    name: "WD_E7_26ec4ae469a5".into(),
                },
                Advertisement {
                    mac: MacAddress([1, 2, 3, 4, 5, 6]),
                    name: "iPhone".into(),
                },
            ])
        }

        async fn connect(&self, mac: MacAddress) -> Result<Box<dyn DeviceLink>, BleError> {
            Err(BleError::NotFound(mac))
        }
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn busy_adapter_retried_then_classified() {
        let transport = Arc::new(FlakyTransport {
            busy_before_ok: Mutex::new(3),
            scans: Mutex::new(0),
        });
        let (found_tx, mut found_rx) = unbounded_channel();
        let (_enabled_tx, enabled_rx) = watch::channel(true);

        let _task = DiscoveryScanner::spawn(
            transport.clone(),
            ScannerConfig::default(),
            found_tx,
            enabled_rx,
        );

        let discovered = found_rx.recv().await.unwrap();
        assert_eq!(discovered.identity.generation, Generation::Gen2);
        assert_eq!(discovered.advertised_name, "WD_E7_26ec4ae469a5");
        // Three busy failures consume every retry, then the fourth
        // attempt succeeds
        assert_eq!(*transport.scans.lock().unwrap(), 4);

        // The non-watchdog advertisement never surfaces
        assert!(found_rx.try_recv().is_err());
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn disabled_gate_holds_until_enabled() {
        let transport = Arc::new(FlakyTransport {
            busy_before_ok: Mutex::new(0),
            scans: Mutex::new(0),
        });
        let (found_tx, mut found_rx) = unbounded_channel();
        let (enabled_tx, enabled_rx) = watch::channel(false);

        let _task = DiscoveryScanner::spawn(
            transport.clone(),
            ScannerConfig::default(),
            found_tx,
            enabled_rx,
        );

        // Give the gated task a chance to (incorrectly) scan
        tokio::task::yield_now().await;
        assert_eq!(*transport.scans.lock().unwrap(), 0);

        enabled_tx.send(true).unwrap();
        assert!(found_rx.recv().await.is_some());
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn scanner_exits_when_receiver_dropped() {
        let transport = Arc::new(FlakyTransport {
            busy_before_ok: Mutex::new(0),
            scans: Mutex::new(0),
        });
        let (found_tx, found_rx) = unbounded_channel();
        let (_enabled_tx, enabled_rx) = watch::channel(true);

        let task = DiscoveryScanner::spawn(
            transport,
            ScannerConfig::default(),
            found_tx,
            enabled_rx,
        );

        drop(found_rx);
        task.await.unwrap();
    }
}
