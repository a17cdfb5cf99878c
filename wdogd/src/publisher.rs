use serde_json::json;

use wdog_broker::{BusPublisher, DeviceConfig, GlobalSettings, Role};
use wdog_proto::{DeviceIdentity, LineMeasurement};

/// Publisher that writes everything to the log. Stands in for a real
/// bus integration while still exercising the full fleet data path.
pub struct LogPublisher;

impl LogPublisher {
    fn line_summary(index: usize, line: &LineMeasurement) -> String {
        let mut summary = format!(
            "L{}: {:.1}V {:.1}A {:.0}W {:.2}Hz",
            index + 1,
            line.output_voltage,
            line.current,
            line.power,
            line.frequency
        );
        if line.error_code != 0 {
            summary.push_str(&format!(" err {}", line.error_code));
        }
        if line.boosting {
            summary.push_str(" boost");
        }
        summary
    }
}

impl BusPublisher for LogPublisher {
    fn announce_device(&self, identity: &DeviceIdentity, cfg: &DeviceConfig) {
        log::info!(
            "Device {:} ({:}) known, enabled {:}",
            identity.mac,
            cfg.advertised_name,
            cfg.enabled
        );
    }

    fn register(&self, identity: &DeviceIdentity, role: Role, cfg: &DeviceConfig) {
        log::info!(
            "Registered {:} as {role:} ({:?})",
            identity.mac,
            cfg.custom_name
        );
    }

    fn retire(&self, identity: &DeviceIdentity, role: Role) {
        log::info!("Retired {:} from {role:}", identity.mac);
    }

    fn publish(
        &self,
        identity: &DeviceIdentity,
        role: Role,
        lines: &[LineMeasurement],
        error_code: u8,
    ) {
        for (index, line) in lines.iter().enumerate() {
            log::info!(
                "{:} [{role:}] {}",
                identity.mac,
                Self::line_summary(index, line)
            );
        }
        if error_code != 0 {
            log::warn!("{:} reporting error code {error_code:}", identity.mac);
        }
        log::debug!(
            "{}",
            json!({
                "device": identity.mac.settings_id(),
                "role": role.as_str(),
                "lines": lines,
            })
        );
    }

    fn set_global_flags(&self, globals: &GlobalSettings) {
        log::info!(
            "Global flags: discovery {:}, load reporting {:}, metering authority {:}",
            globals.discovery_enabled,
            globals.load_reporting_mode,
            globals.metering_authority
        );
    }
}
