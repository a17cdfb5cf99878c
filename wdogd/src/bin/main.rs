use std::path::PathBuf;
use std::sync::Arc;

use tracing_appender::rolling;
use tracing_log::LogTracer;
use tracing_subscriber::FmtSubscriber;

use wdog_broker::{fleet, BtleTransport, FleetSnapshot, JsonSettingsStore, SessionState};
use wdogd::{config::DaemonConfig, publisher::LogPublisher, WdogResult};

#[actix::main]
async fn main() -> WdogResult<()> {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("./wdogd.json"));
    let config = DaemonConfig::load(&config_path)?;

    LogTracer::init().expect("Unable to set up log tracer");

    let log = rolling::daily(&config.log_dir, "wdogd");
    let (nb, _guard) = tracing_appender::non_blocking(log);

    let sub = FmtSubscriber::builder()
        .with_max_level(tracing::Level::DEBUG)
        .with_writer(nb)
        .finish();

    tracing::subscriber::set_global_default(sub).expect("Unable to set up tracing subscriber");

    log::info!("wdogd starting with config {config_path:?}");

    let transport = Arc::new(BtleTransport::new().await?);
    let settings = Arc::new(JsonSettingsStore::open(&config.settings_path)?);
    let addr = fleet(
        config.broker_config(),
        transport,
        settings,
        Arc::new(LogPublisher),
    )
    .await?;

    let mut status = tokio::time::interval(tokio::time::Duration::from_secs(
        config.status_interval_secs,
    ));
    status.tick().await;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                log::info!("Shutdown requested");
                break;
            }
            _ = status.tick() => {
                match addr.send(FleetSnapshot).await {
                    Ok(views) => {
                        let streaming = views
                            .iter()
                            .filter(|v| v.runtime.state == SessionState::Streaming)
                            .count();
                        let enabled = views.iter().filter(|v| v.config.enabled).count();
                        log::info!(
                            "Fleet status: {} known, {enabled:} enabled, {streaming:} streaming",
                            views.len()
                        );
                    }
                    Err(e) => {
                        log::error!("Fleet controller unreachable: {e:}, exiting");
                        break;
                    }
                }
            }
        }
    }

    Ok(())
}
