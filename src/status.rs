//! Decoding of the printer's query replies.

use crate::error::{PrinterError, Result};
use crate::protocol::InfoKey;

/// Progress reported by `GET_PRINT_STATUS`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PrintStatus {
    pub page: u16,
    pub progress1: u8,
    pub progress2: u8,
}

impl PrintStatus {
    /// Short or missing replies read as all zero.
    pub fn from_reply(data: &[u8]) -> Self {
        if data.len() < 4 {
            return Self::default();
        }
        Self {
            page: u16::from_be_bytes([data[0], data[1]]),
            progress1: data[2],
            progress2: data[3],
        }
    }
}

/// Device state from `HEARTBEAT`. Which fields are present depends on the
/// printer model, which is told apart by the reply length.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Heartbeat {
    pub closing_state: Option<u8>,
    pub power_level: Option<u8>,
    pub paper_state: Option<u8>,
    pub rfid_read_state: Option<u8>,
}

impl Heartbeat {
    /// Decodes a `HEARTBEAT` reply payload.
    ///
    /// Fields a model does not report stay `None`; unknown lengths decode to
    /// all `None`.
    pub fn from_reply(data: &[u8]) -> Self {
        let at = |i: usize| data.get(i).copied();
        match data.len() {
            20 => Self {
                paper_state: at(18),
                rfid_read_state: at(19),
                ..Self::default()
            },
            19 => Self {
                closing_state: at(15),
                power_level: at(16),
                paper_state: at(17),
                rfid_read_state: at(18),
            },
            13 => Self {
                closing_state: at(9),
                power_level: at(10),
                paper_state: at(11),
                rfid_read_state: at(12),
            },
            10 => Self {
                closing_state: at(8),
                power_level: at(9),
                rfid_read_state: at(8),
                ..Self::default()
            },
            9 => Self {
                closing_state: at(8),
                ..Self::default()
            },
            _ => Self::default(),
        }
    }
}

/// Label roll information from `GET_RFID`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RfidInfo {
    pub uuid: String,
    pub barcode: String,
    pub serial: String,
    pub total_len: u16,
    pub used_len: u16,
    pub label_type: u8,
}

impl RfidInfo {
    /// `Ok(None)` when the printer reports no tag.
    pub fn from_reply(data: &[u8]) -> Result<Option<Self>> {
        if data.first().is_none_or(|&b| b == 0) {
            return Ok(None);
        }
        let mut reader = Reader { data, pos: 0 };
        let uuid = hex::encode(reader.take(8)?);
        let barcode = reader.string()?;
        let serial = reader.string()?;
        let total_len = reader.u16()?;
        let used_len = reader.u16()?;
        let label_type = reader.take(1)?[0];
        Ok(Some(Self {
            uuid,
            barcode,
            serial,
            total_len,
            used_len,
            label_type,
        }))
    }
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self.pos + n;
        let bytes = self.data.get(self.pos..end).ok_or_else(|| {
            PrinterError::MalformedFrame(format!(
                "reply ends at {} bytes, needed {}",
                self.data.len(),
                end
            ))
        })?;
        self.pos = end;
        Ok(bytes)
    }

    fn u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    /// Length-prefixed string.
    fn string(&mut self) -> Result<String> {
        let len = self.take(1)?[0] as usize;
        Ok(String::from_utf8_lossy(self.take(len)?).into_owned())
    }
}

/// Value returned by `GET_INFO`.
#[derive(Debug, Clone, PartialEq)]
pub enum InfoValue {
    Number(u64),
    /// Firmware or hardware version, sent as hundredths.
    Version(f64),
    /// Device serial, hex encoded.
    Serial(String),
}

impl InfoValue {
    /// Decodes a `GET_INFO` reply payload.
    ///
    /// - `key`: the key that was requested, which decides the value's shape
    /// - `data`: big-endian number bytes, or the raw serial
    pub fn from_reply(key: InfoKey, data: &[u8]) -> Self {
        let number = data
            .iter()
            .fold(0u64, |acc, &b| acc.wrapping_shl(8) | b as u64);
        match key {
            InfoKey::DeviceSerial => InfoValue::Serial(hex::encode(data)),
            InfoKey::SoftVersion | InfoKey::HardVersion => InfoValue::Version(number as f64 / 100.0),
            _ => InfoValue::Number(number),
        }
    }
}
