use serde::Serialize;
use thiserror::Error;

use crate::{device::LineCount, DL_DATA_SIZE};

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("DLReport body length {got:} does not match {expected:} for line count")]
    BodyLength { got: usize, expected: usize },
}

/// Decoded power data for a single AC line, in engineering units.
///
/// `energy` is a cumulative kWh counter since device reset; it is only
/// monotonic within one connected session, never across reconnects.
/// `error_code` (0-14) and `status` are device-reported pass-through
/// values; interpreting them is a front-end concern.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct LineMeasurement {
    /// Volts, before regulation
    pub input_voltage: f64,
    /// Volts, after regulation
    pub output_voltage: f64,
    /// Amps
    pub current: f64,
    /// Watts
    pub power: f64,
    /// kWh, cumulative since device reset
    pub energy: f64,
    /// Hz
    pub frequency: f64,
    pub error_code: u8,
    pub status: u8,
    pub boosting: bool,
    /// Degrees C; models that do not report temperature send zero
    pub temperature_c: Option<u8>,
}

/// Decode a DLReport body into one [`LineMeasurement`] per AC line.
///
/// The expected block count comes from the device identity, not from
/// the body length: a body that does not match `lines * 34` exactly is
/// malformed and rejected.
pub fn decode_dl_report(
    body: &[u8],
    line_count: LineCount,
) -> Result<Vec<LineMeasurement>, ReportError> {
    let expected = line_count.lines() * DL_DATA_SIZE;
    if body.len() != expected {
        return Err(ReportError::BodyLength {
            got: body.len(),
            expected,
        });
    }

    Ok(body.chunks_exact(DL_DATA_SIZE).map(decode_block).collect())
}

/// Decode one 34-byte DLData block.
///
/// Field layout (big-endian i32 unless noted):
/// ```text
/// [0:4]   input voltage  (/10000 = V)
/// [4:8]   current        (/10000 = A)
/// [8:12]  power          (/10000 = W)
/// [12:16] energy         (/10000 = kWh)
/// [16:20] reserved
/// [20:24] output voltage (/10000 = V)
/// [24]    backlight
/// [25]    neutral detection
/// [26]    boost flag
/// [27]    temperature
/// [28:32] frequency      (/100 = Hz)
/// [32]    error code
/// [33]    status
/// ```
fn decode_block(block: &[u8]) -> LineMeasurement {
    let temperature = block[27];
    LineMeasurement {
        input_voltage: be_i32(block, 0) as f64 / 10_000.0,
        current: be_i32(block, 4) as f64 / 10_000.0,
        power: be_i32(block, 8) as f64 / 10_000.0,
        energy: be_i32(block, 12) as f64 / 10_000.0,
        output_voltage: be_i32(block, 20) as f64 / 10_000.0,
        boosting: block[26] == 1,
        temperature_c: (temperature != 0).then_some(temperature),
        frequency: be_i32(block, 28) as f64 / 100.0,
        error_code: block[32],
        status: block[33],
    }
}

fn be_i32(bytes: &[u8], at: usize) -> i32 {
    i32::from_be_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}
