use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MacParseError {
    #[error("Invalid MAC address {0:?}")]
    Invalid(String),
}

/// Bluetooth device address, the stable identity key for a watchdog.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MacAddress(pub [u8; 6]);

impl MacAddress {
    /// Colon-free lowercase form used as the persistent settings key,
    /// e.g. `26ec4ae469a5`.
    pub fn settings_id(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }

    pub fn from_settings_id(id: &str) -> Result<Self, MacParseError> {
        if id.len() != 12 || !id.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(MacParseError::Invalid(id.to_string()));
        }
        let mut bytes = [0u8; 6];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&id[i * 2..i * 2 + 2], 16)
                .map_err(|_| MacParseError::Invalid(id.to_string()))?;
        }
        Ok(MacAddress(bytes))
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

impl fmt::Debug for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:}")
    }
}

impl FromStr for MacAddress {
    type Err = MacParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 6 {
            return Err(MacParseError::Invalid(s.to_string()));
        }
        let mut bytes = [0u8; 6];
        for (byte, part) in bytes.iter_mut().zip(parts) {
            *byte = u8::from_str_radix(part, 16).map_err(|_| MacParseError::Invalid(s.to_string()))?;
        }
        Ok(MacAddress(bytes))
    }
}

/// Hardware generation; both speak the same framed protocol but
/// advertise under different name patterns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Generation {
    Gen1,
    Gen2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AmperageClass {
    A30,
    A50,
}

/// How many DLData blocks a DLReport from this device carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LineCount {
    Single,
    Dual,
}

impl LineCount {
    pub fn lines(&self) -> usize {
        match self {
            LineCount::Single => 1,
            LineCount::Dual => 2,
        }
    }
}

/// Device identity derived once from the advertised name at discovery
/// time, immutable thereafter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub mac: MacAddress,
    pub generation: Generation,
    pub model_code: String,
    pub line_count: LineCount,
    pub amperage: AmperageClass,
}

impl DeviceIdentity {
    /// Classify an advertised name, pairing it with the advertisement's
    /// address. Returns None for anything that is not an eligible
    /// watchdog:
    ///
    /// - Gen2 advertises `WD_{2-char type}_{12-hex serial}`; the second
    ///   type character selects the model class (`5`/`6` single-line
    ///   30A, `7`/`8`/`9` dual-line 50A; other digits are not known
    ///   models and are skipped)
    /// - Gen1 advertises a 19-character name starting `PM` (padded with
    ///   trailing spaces up to 27), third character `S`/`D` selecting
    ///   single/dual line
    pub fn classify(mac: MacAddress, advertised_name: &str) -> Option<Self> {
        if advertised_name.starts_with("WD_") {
            return Self::classify_gen2(mac, advertised_name);
        }
        if advertised_name.starts_with("PM") {
            return Self::classify_gen1(mac, advertised_name);
        }
        None
    }

    fn classify_gen2(mac: MacAddress, name: &str) -> Option<Self> {
        let parts: Vec<&str> = name.split('_').collect();
        if parts.len() != 3 {
            return None;
        }
        let model = parts[1];
        let serial = parts[2];
        if model.len() != 2 || serial.len() != 12 || !serial.chars().all(|c| c.is_ascii_hexdigit())
        {
            return None;
        }

        let (line_count, amperage) = match model.chars().nth(1)? {
            '5' | '6' => (LineCount::Single, AmperageClass::A30),
            '7' | '8' | '9' => (LineCount::Dual, AmperageClass::A50),
            _ => return None,
        };

        Some(Self {
            mac,
            generation: Generation::Gen2,
            model_code: model.to_string(),
            line_count,
            amperage,
        })
    }

    fn classify_gen1(mac: MacAddress, name: &str) -> Option<Self> {
        if name.len() > 27 {
            return None;
        }
        let trimmed = name.trim_end_matches(' ');
        if trimmed.len() != 19 {
            return None;
        }

        let (line_count, amperage) = match trimmed.chars().nth(2)? {
            'S' => (LineCount::Single, AmperageClass::A30),
            'D' => (LineCount::Dual, AmperageClass::A50),
            _ => return None,
        };

        Some(Self {
            mac,
            generation: Generation::Gen1,
            model_code: trimmed[..3].to_string(),
            line_count,
            amperage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mac() -> MacAddress {
        MacAddress([0x26, 0xec, 0x4a, 0xe4, 0x69, 0xa5])
    }

    #[test]
    fn mac_display_and_parse() {
        let parsed: MacAddress = "26:EC:4A:E4:69:A5".parse().unwrap();
        assert_eq!(parsed, mac());
        assert_eq!(parsed.to_string(), "26:EC:4A:E4:69:A5");
        assert_eq!(parsed.settings_id(), "26ec4ae469a5");
        assert_eq!(MacAddress::from_settings_id("26ec4ae469a5").unwrap(), mac());
        assert!("26:EC:4A".parse::<MacAddress>().is_err());
        assert!(MacAddress::from_settings_id("26ec4ae469").is_err());
    }

    #[test]
    fn gen2_single_line_models() {
        for name in [
            "WD_E5_26ec4ae469a5",
            "WD_E6_aabbccddeeff",
            "WD_V5_112233445566",
            "WD_V6_deadbeef1234",
        ] {
            let identity = DeviceIdentity::classify(mac(), name).unwrap();
            assert_eq!(identity.generation, Generation::Gen2);
            assert_eq!(identity.line_count, LineCount::Single);
            assert_eq!(identity.amperage, AmperageClass::A30);
        }
    }

    #[test]
    fn gen2_dual_line_models() {
        for name in [
            "WD_E7_26ec4ae469a5",
            "WD_E8_aabbccddeeff",
            "WD_E9_112233445566",
            "WD_V7_deadbeef1234",
            "WD_V8_abcdef012345",
            "WD_V9_ffffffffffff",
        ] {
            let identity = DeviceIdentity::classify(mac(), name).unwrap();
            assert_eq!(identity.generation, Generation::Gen2);
            assert_eq!(identity.line_count, LineCount::Dual);
            assert_eq!(identity.amperage, AmperageClass::A50);
        }
    }

    #[test]
    fn gen2_model_code_preserved() {
        let identity = DeviceIdentity::classify(mac(), "WD_E7_26ec4ae469a5").unwrap();
        assert_eq!(identity.model_code, "E7");
        assert_eq!(identity.mac, mac());
    }

    #[test]
    fn gen2_unknown_model_digit_ignored() {
        assert!(DeviceIdentity::classify(mac(), "WD_E3_abcdef123456").is_none());
        assert!(DeviceIdentity::classify(mac(), "WD_X_abcdef123456").is_none());
    }

    #[test]
    fn gen2_malformed_names_ignored() {
        assert!(DeviceIdentity::classify(mac(), "WD_E7").is_none());
        assert!(DeviceIdentity::classify(mac(), "WD_E7_abc_extra").is_none());
        assert!(DeviceIdentity::classify(mac(), "WD_E7_nothexchars1").is_none());
        assert!(DeviceIdentity::classify(mac(), "WD_E7_26ec4ae469").is_none());
    }

    #[test]
    fn gen1_single_and_dual() {
        let single = format!("PMS{}", "A".repeat(16));
        let identity = DeviceIdentity::classify(mac(), &single).unwrap();
        assert_eq!(identity.generation, Generation::Gen1);
        assert_eq!(identity.line_count, LineCount::Single);
        assert_eq!(identity.amperage, AmperageClass::A30);
        assert_eq!(identity.model_code, "PMS");

        let dual = format!("PMD{}", "B".repeat(16));
        let identity = DeviceIdentity::classify(mac(), &dual).unwrap();
        assert_eq!(identity.line_count, LineCount::Dual);
        assert_eq!(identity.amperage, AmperageClass::A50);
    }

    #[test]
    fn gen1_trailing_padding_trimmed() {
        let padded = format!("PMD{}{}", "C".repeat(16), " ".repeat(8));
        assert_eq!(padded.len(), 27);
        let identity = DeviceIdentity::classify(mac(), &padded).unwrap();
        assert_eq!(identity.line_count, LineCount::Dual);
    }

    #[test]
    fn gen1_malformed_names_ignored() {
        assert!(DeviceIdentity::classify(mac(), "PM").is_none());
        assert!(DeviceIdentity::classify(mac(), "PMD_short").is_none());
        assert!(DeviceIdentity::classify(mac(), "PMD12345").is_none());
        let unknown_third = format!("PMX{}", "D".repeat(16));
        assert!(DeviceIdentity::classify(mac(), &unknown_third).is_none());
    }

    #[test]
    fn unrelated_names_ignored() {
        assert!(DeviceIdentity::classify(mac(), "").is_none());
        assert!(DeviceIdentity::classify(mac(), "iPhone").is_none());
        assert!(DeviceIdentity::classify(mac(), "SomeOtherBLE").is_none());
    }
}
