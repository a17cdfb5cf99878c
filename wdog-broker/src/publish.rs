use wdog_proto::{DeviceIdentity, LineMeasurement};

use crate::fleet::{DeviceConfig, Role};
use crate::settings::GlobalSettings;

/// Outbound boundary toward whatever consumes fleet data. The fleet
/// controller calls these synchronously from its handlers, so
/// implementations should hand off quickly rather than block.
pub trait BusPublisher: Send + Sync {
    /// A device became known (discovered or restored), regardless of
    /// whether it is enabled.
    fn announce_device(&self, identity: &DeviceIdentity, cfg: &DeviceConfig);

    /// A device is now enabled under the given role.
    fn register(&self, identity: &DeviceIdentity, role: Role, cfg: &DeviceConfig);

    /// A device left the given role, either disabled or reassigned.
    fn retire(&self, identity: &DeviceIdentity, role: Role);

    /// Fresh measurements for one device. `error_code` is the maximum
    /// error code across its lines, zero when healthy.
    fn publish(
        &self,
        identity: &DeviceIdentity,
        role: Role,
        lines: &[LineMeasurement],
        error_code: u8,
    );

    /// Fleet-wide flags changed or were loaded at startup.
    fn set_global_flags(&self, globals: &GlobalSettings);
}
