//! niimbot library: print labels on niimbot-style thermal printers over BLE
//! or an RFCOMM serial link.
//!
//! Main modules:
//! - protocol: frame codec, request codes, inbound frame buffer
//! - transport: transport trait and byte-stream (RFCOMM) transport
//! - ble: BLE characteristic transport
//! - printer: request/response engine and the print job sequence
//! - raster: bitmap to line-print packets
//! - status: decoding of query replies
//! - trace: frame tracing sink
//! - dithering: image files to printable bitmaps

pub mod ble;
pub mod dithering;
pub mod error;
pub mod printer;
pub mod protocol;
pub mod raster;
pub mod status;
pub mod trace;
pub mod transport;

/// BLE API: connect to a printer by address
pub use ble::{connect, BleConfig, BleTransport};
pub use error::{PrinterError, Result};
/// Print engine
pub use printer::{NoResponsePolicy, Printer, PrinterConfig};
/// Codec (frames, request codes)
pub use protocol::{decode, encode, frame_length, InfoKey, Packet, RequestCode};
pub use raster::{encode_bitmap, Bitmap, MonoBitmap};
pub use status::{Heartbeat, InfoValue, PrintStatus, RfidInfo};
pub use trace::{Direction, FrameEvent, FrameSink, TracingSink};
pub use transport::{StreamTransport, Transport};
