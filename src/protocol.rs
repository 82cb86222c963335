use std::fmt;

use bytes::BytesMut;
use tracing::warn;

use crate::error::{PrinterError, Result};

/// Start marker of every frame.
pub const FRAME_HEAD: [u8; 2] = [0x55, 0x55];
/// End marker of every frame.
pub const FRAME_TAIL: [u8; 2] = [0xAA, 0xAA];
/// Bytes a frame adds around its payload: head, type, length, checksum, tail.
pub const FRAME_OVERHEAD: usize = 7;
/// Largest payload a single frame can carry (the length field is one byte).
pub const MAX_PAYLOAD: usize = u8::MAX as usize;
/// Reply type the printer uses to report a failed command.
pub const ERROR_REPLY: u8 = 0xDB;
/// Reply type the printer uses for requests it does not implement.
pub const UNIMPLEMENTED_REPLY: u8 = 0x00;
/// Packet type of one raster line.
pub const PRINT_BITMAP_ROW: u8 = 0x85;

/// Request codes understood by the printer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RequestCode {
    GetInfo = 64,
    GetRfid = 26,
    Heartbeat = 220,
    SetLabelType = 35,
    SetLabelDensity = 33,
    StartPrint = 1,
    EndPrint = 243,
    StartPagePrint = 3,
    EndPagePrint = 227,
    AllowPrintClear = 32,
    SetDimension = 19,
    SetQuantity = 21,
    GetPrintStatus = 163,
}

impl RequestCode {
    pub const ALL: [RequestCode; 13] = [
        RequestCode::GetInfo,
        RequestCode::GetRfid,
        RequestCode::Heartbeat,
        RequestCode::SetLabelType,
        RequestCode::SetLabelDensity,
        RequestCode::StartPrint,
        RequestCode::EndPrint,
        RequestCode::StartPagePrint,
        RequestCode::EndPagePrint,
        RequestCode::AllowPrintClear,
        RequestCode::SetDimension,
        RequestCode::SetQuantity,
        RequestCode::GetPrintStatus,
    ];

    /// Wire value of the request.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Distance between this request's code and the code of its reply.
    ///
    /// `GetInfo` replies are keyed by the requested info key instead; see
    /// [`InfoKey`].
    pub fn response_offset(self) -> u8 {
        match self {
            RequestCode::SetLabelType
            | RequestCode::SetLabelDensity
            | RequestCode::AllowPrintClear
            | RequestCode::GetPrintStatus => 16,
            _ => 1,
        }
    }

    /// Upper-case command name, as used in job errors and logs.
    pub fn name(self) -> &'static str {
        match self {
            RequestCode::GetInfo => "GET_INFO",
            RequestCode::GetRfid => "GET_RFID",
            RequestCode::Heartbeat => "HEARTBEAT",
            RequestCode::SetLabelType => "SET_LABEL_TYPE",
            RequestCode::SetLabelDensity => "SET_LABEL_DENSITY",
            RequestCode::StartPrint => "START_PRINT",
            RequestCode::EndPrint => "END_PRINT",
            RequestCode::StartPagePrint => "START_PAGE_PRINT",
            RequestCode::EndPagePrint => "END_PAGE_PRINT",
            RequestCode::AllowPrintClear => "ALLOW_PRINT_CLEAR",
            RequestCode::SetDimension => "SET_DIMENSION",
            RequestCode::SetQuantity => "SET_QUANTITY",
            RequestCode::GetPrintStatus => "GET_PRINT_STATUS",
        }
    }
}

impl fmt::Display for RequestCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl TryFrom<u8> for RequestCode {
    type Error = u8;

    fn try_from(code: u8) -> std::result::Result<Self, u8> {
        RequestCode::ALL
            .into_iter()
            .find(|r| r.code() == code)
            .ok_or(code)
    }
}

/// Keys accepted by `GET_INFO`. The reply code is the request code plus the key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum InfoKey {
    Density = 1,
    PrintSpeed = 2,
    LabelType = 3,
    LanguageType = 6,
    AutoShutdownTime = 7,
    DeviceType = 8,
    SoftVersion = 9,
    Battery = 10,
    DeviceSerial = 11,
    HardVersion = 12,
}

/// One protocol packet: a type code and up to 255 bytes of data.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Packet {
    packet_type: u8,
    data: Vec<u8>,
}

impl Packet {
    /// Builds a packet.
    ///
    /// - `packet_type`: request code or reply code
    /// - `data`: payload, at most [`MAX_PAYLOAD`] bytes
    ///
    /// Returns `PayloadTooLarge` when `data` does not fit one frame.
    pub fn new(packet_type: u8, data: impl Into<Vec<u8>>) -> Result<Self> {
        let data = data.into();
        if data.len() > MAX_PAYLOAD {
            return Err(PrinterError::PayloadTooLarge(data.len()));
        }
        Ok(Self { packet_type, data })
    }

    /// Caller guarantees `data.len() <= MAX_PAYLOAD`.
    pub(crate) fn from_parts(packet_type: u8, data: Vec<u8>) -> Self {
        debug_assert!(data.len() <= MAX_PAYLOAD);
        Self { packet_type, data }
    }

    pub fn packet_type(&self) -> u8 {
        self.packet_type
    }

    /// Payload without framing.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// Length of this packet once framed.
    pub fn frame_len(&self) -> usize {
        self.data.len() + FRAME_OVERHEAD
    }

    /// Checksum byte this packet is framed with.
    pub fn checksum(&self) -> u8 {
        checksum(self.packet_type, &self.data)
    }

    /// Frames the packet for the wire.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.frame_len());
        out.extend_from_slice(&FRAME_HEAD);
        out.push(self.packet_type);
        out.push(self.data.len() as u8);
        out.extend_from_slice(&self.data);
        out.push(self.checksum());
        out.extend_from_slice(&FRAME_TAIL);
        out
    }
}

/// XOR of the type byte, the length byte and every data byte.
pub fn checksum(packet_type: u8, data: &[u8]) -> u8 {
    data.iter()
        .fold(packet_type ^ data.len() as u8, |acc, b| acc ^ b)
}

/// Builds a wire frame for `packet_type` carrying `data`.
pub fn encode(packet_type: u8, data: &[u8]) -> Result<Vec<u8>> {
    Ok(Packet::new(packet_type, data)?.to_bytes())
}

/// Total frame length announced by a buffer, once the length byte is in.
pub fn frame_length(buffer: &[u8]) -> Option<usize> {
    if buffer.len() < 4 {
        return None;
    }
    Some(buffer[3] as usize + FRAME_OVERHEAD)
}

/// Parses exactly one frame. The checksum is trusted; see [`decode_checked`].
pub fn decode(frame: &[u8]) -> Result<Packet> {
    let expected = frame_length(frame).ok_or_else(|| {
        PrinterError::MalformedFrame(format!("frame too short ({} bytes)", frame.len()))
    })?;
    if frame.len() != expected {
        return Err(PrinterError::MalformedFrame(format!(
            "frame is {} bytes but its length byte announces {}",
            frame.len(),
            expected
        )));
    }
    if frame[..2] != FRAME_HEAD {
        return Err(PrinterError::MalformedFrame(format!(
            "bad start marker {:02x}{:02x}",
            frame[0], frame[1]
        )));
    }
    if frame[expected - 2..] != FRAME_TAIL {
        return Err(PrinterError::MalformedFrame(format!(
            "bad end marker {:02x}{:02x}",
            frame[expected - 2],
            frame[expected - 1]
        )));
    }
    Ok(Packet::from_parts(frame[2], frame[4..expected - 3].to_vec()))
}

/// Like [`decode`], but also rejects frames whose checksum does not match.
pub fn decode_checked(frame: &[u8]) -> Result<Packet> {
    let packet = decode(frame)?;
    let actual = frame[frame.len() - 3];
    let expected = packet.checksum();
    if actual != expected {
        return Err(PrinterError::ChecksumMismatch { expected, actual });
    }
    Ok(packet)
}

/// Accumulates bytes read from a transport and splits them into packets.
///
/// Reads may end anywhere inside a frame, so bytes are kept until the frame
/// they belong to is complete. The link is lossy: bytes that cannot belong to
/// a frame are dropped and parsing picks up at the next start marker.
#[derive(Debug, Default)]
pub struct PacketBuffer {
    buffer: BytesMut,
    verify_checksum: bool,
    discarded: usize,
}

impl PacketBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop complete frames whose checksum does not match instead of
    /// trusting them.
    pub fn with_checksum_verification(mut self, verify: bool) -> Self {
        self.verify_checksum = verify;
        self
    }

    /// Appends bytes as they came off the link.
    pub fn push(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Bytes held but not yet taken as a packet.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Total bytes dropped as noise since this buffer was created.
    pub fn discarded(&self) -> usize {
        self.discarded
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Takes the next complete packet off the front of the buffer.
    ///
    /// Returns `None` while the frame at the front is still incomplete.
    /// Bytes in front of a start marker, and frame candidates that turn out
    /// malformed, are discarded with a warning and never fail the read.
    pub fn next_packet(&mut self) -> Option<Packet> {
        loop {
            if self.buffer.len() >= 2 && self.buffer[..2] != FRAME_HEAD {
                self.resync(0);
                continue;
            }
            let len = frame_length(&self.buffer)?;
            if self.buffer.len() < len {
                return None;
            }
            let frame = &self.buffer[..len];
            let decoded = if self.verify_checksum {
                decode_checked(frame)
            } else {
                decode(frame)
            };
            match decoded {
                Ok(packet) => {
                    let _ = self.buffer.split_to(len);
                    return Some(packet);
                }
                Err(e @ PrinterError::ChecksumMismatch { .. }) => {
                    warn!("dropping {len} byte frame: {e}");
                    self.discarded += len;
                    let _ = self.buffer.split_to(len);
                }
                Err(e) => {
                    // The start marker was noise; a real frame may begin
                    // inside the bytes it claimed.
                    warn!("dropping frame candidate: {e}");
                    self.resync(FRAME_HEAD.len());
                }
            }
        }
    }

    /// Drops everything up to the next start marker at or after `from`.
    fn resync(&mut self, from: usize) {
        let from = from.min(self.buffer.len());
        let skip = self.buffer[from..]
            .windows(2)
            .position(|w| w == FRAME_HEAD)
            .map(|pos| pos + from)
            .unwrap_or_else(|| match self.buffer.last() {
                Some(&b) if b == FRAME_HEAD[0] && self.buffer.len() > from => {
                    self.buffer.len() - 1
                }
                _ => self.buffer.len(),
            });
        if skip > 0 {
            warn!("discarding {skip} bytes while looking for a frame start");
        }
        self.discarded += skip;
        let _ = self.buffer.split_to(skip);
    }
}
