use crate::{HEADER_SIZE, MAX_BUFFER_SIZE, PACKET_IDENTIFIER, PACKET_TAIL, TAIL_SIZE};

/// Packet command IDs as sent by the device. Anything not in the
/// known set is carried as [`Command::Unknown`] rather than rejected,
/// so newer firmware does not desync the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    DlReport,
    ErrorReport,
    Alarm,
    Unknown(u8),
}

impl From<u8> for Command {
    fn from(raw: u8) -> Self {
        match raw {
            1 => Command::DlReport,
            2 => Command::ErrorReport,
            14 => Command::Alarm,
            other => Command::Unknown(other),
        }
    }
}

/// One validated protocol packet: identifier and tail verified, body
/// length matching the declared dataLen field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub version: u8,
    pub message_id: u8,
    pub command: Command,
    pub body: Vec<u8>,
}

/// Stateful reassembler turning arbitrarily fragmented notification
/// payloads into complete packets. Long-lived: one instance per BLE
/// connection, accumulating unconsumed bytes across [`feed`] calls.
///
/// Malformed input never errors out; the reassembler resynchronizes on
/// the next identifier and drops garbage silently (logged at debug).
///
/// [`feed`]: FrameReassembler::feed
#[derive(Debug, Default)]
pub struct FrameReassembler {
    buf: Vec<u8>,
}

impl FrameReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Discard any buffered bytes, e.g. when a connection is torn down.
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Append one raw fragment and drain every complete packet it
    /// makes available. Returns an empty vec while a frame is still
    /// partial.
    pub fn feed(&mut self, fragment: &[u8]) -> Vec<Packet> {
        self.buf.extend_from_slice(fragment);

        if self.buf.len() > MAX_BUFFER_SIZE {
            log::warn!("RX buffer overflow ({} bytes), clearing", self.buf.len());
            self.buf.clear();
            return Vec::new();
        }

        let mut packets = Vec::new();
        while let Some(packet) = self.next_packet() {
            packets.push(packet);
        }
        packets
    }

    /// Extract one complete packet from the front of the buffer, or
    /// None if more data is needed.
    fn next_packet(&mut self) -> Option<Packet> {
        loop {
            self.seek_identifier();

            if self.buf.len() < HEADER_SIZE {
                return None;
            }

            let data_len = u16::from_be_bytes([self.buf[7], self.buf[8]]) as usize;
            if data_len > MAX_BUFFER_SIZE {
                log::debug!("Invalid dataLen {data_len:}, skipping identifier");
                self.buf.drain(..4);
                continue;
            }

            let total_len = HEADER_SIZE + data_len + TAIL_SIZE;
            if self.buf.len() < total_len {
                return None;
            }

            let tail_at = HEADER_SIZE + data_len;
            let tail = u16::from_be_bytes([self.buf[tail_at], self.buf[tail_at + 1]]);
            if tail != PACKET_TAIL {
                // Not a real frame boundary. Drop a single byte of the
                // false identifier and rescan, so a valid frame whose
                // start overlaps the garbage is still recovered.
                log::debug!("Bad packet tail {tail:#06x}, resynchronizing");
                self.buf.drain(..1);
                continue;
            }

            let packet = Packet {
                version: self.buf[4],
                message_id: self.buf[5],
                command: Command::from(self.buf[6]),
                body: self.buf[HEADER_SIZE..tail_at].to_vec(),
            };
            self.buf.drain(..total_len);
            return Some(packet);
        }
    }

    /// Drop leading bytes until the buffer starts with the 4-byte
    /// identifier (keeping a partial-identifier suffix intact).
    fn seek_identifier(&mut self) {
        let magic = PACKET_IDENTIFIER.to_be_bytes();
        if let Some(at) = self
            .buf
            .windows(magic.len())
            .position(|window| window == magic)
        {
            if at > 0 {
                self.buf.drain(..at);
            }
        } else {
            // No identifier present; keep the last 3 bytes in case the
            // identifier is split across fragments.
            let keep = self.buf.len().min(magic.len() - 1);
            let cut = self.buf.len() - keep;
            if cut > 0 {
                self.buf.drain(..cut);
            }
        }
    }
}
