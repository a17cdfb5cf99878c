//! Wire protocol and data model for the Hughes Power Watchdog
//! surge protector / AC line meter.
//!
//! The device speaks a framed binary protocol over a single GATT
//! characteristic. Each BLE notification carries (potentially partial)
//! packet data:
//!
//! ```text
//! [0x24797740]  4-byte identifier
//! [version]     1 byte
//! [msgId]       1 byte
//! [cmd]         1 byte  (1=DLReport, 2=ErrorReport, 14=Alarm)
//! [dataLen]     2 bytes (big-endian)
//! [body]        dataLen bytes
//! [0x7121]      2-byte tail
//! ```
//!
//! A DLReport body is one 34-byte DLData block per AC line (30A models
//! report one line, 50A models report L1 then L2). This crate is purely
//! computational: frame reassembly, packet validation, measurement
//! decoding, and advertised-name classification. Connection handling
//! lives in the `wdog-broker` crate.

mod device;
mod frame;
mod report;

pub use device::{AmperageClass, DeviceIdentity, Generation, LineCount, MacAddress, MacParseError};
pub use frame::{Command, FrameReassembler, Packet};
pub use report::{decode_dl_report, LineMeasurement, ReportError};

/// 4-byte packet identifier, big-endian on the wire
pub const PACKET_IDENTIFIER: u32 = 0x2479_7740;

/// 2-byte packet tail, big-endian on the wire
pub const PACKET_TAIL: u16 = 0x7121;

/// identifier (4) + version (1) + msgId (1) + cmd (1) + dataLen (2)
pub const HEADER_SIZE: usize = 9;

pub const TAIL_SIZE: usize = 2;

/// Reassembly buffer cap; pathological input past this resets the buffer
pub const MAX_BUFFER_SIZE: usize = 8192;

/// Size of one DLData measurement block (one AC line)
pub const DL_DATA_SIZE: usize = 34;

/// Handshake payload written (with ack) to start the data stream:
/// ASCII `!%!%,protocol,open,`
pub const HANDSHAKE_PAYLOAD: &[u8] = b"!%!%,protocol,open,";
