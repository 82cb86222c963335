use std::io;

use thiserror::Error;

use crate::protocol::RequestCode;

/// Error type for every printer operation.
#[derive(Debug, Error)]
pub enum PrinterError {
    /// The link could not be established or was lost.
    #[error("connection error: {0}")]
    Connection(String),

    #[error("bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The printer answered with the explicit error frame (type 0xDB).
    #[error("printer reported an error (data {data:02x?})")]
    PrinterReported { data: Vec<u8> },

    /// The printer answered with the "unimplemented" sentinel frame.
    #[error("printer does not implement request {request:#04x}")]
    Unimplemented { request: u8 },

    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("checksum mismatch: expected {expected:#04x}, got {actual:#04x}")]
    ChecksumMismatch { expected: u8, actual: u8 },

    #[error("no response to {0}")]
    NoResponse(RequestCode),

    #[error("printer rejected {0}")]
    Rejected(RequestCode),

    #[error("payload of {0} bytes exceeds the 255 byte frame limit")]
    PayloadTooLarge(usize),

    #[error("invalid bitmap: {0}")]
    InvalidBitmap(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    /// A print job aborted; `step` names the command that failed.
    #[error("print job failed at {step}: {source}")]
    JobFailed {
        step: &'static str,
        #[source]
        source: Box<PrinterError>,
    },
}

impl PrinterError {
    /// True for transport failures (connect, read, write).
    pub fn is_connection(&self) -> bool {
        match self {
            PrinterError::Connection(_) | PrinterError::Bluetooth(_) | PrinterError::Io(_) => true,
            PrinterError::JobFailed { source, .. } => source.is_connection(),
            _ => false,
        }
    }

    /// True when the printer (or the bytes it sent) violated the protocol.
    pub fn is_protocol(&self) -> bool {
        match self {
            PrinterError::PrinterReported { .. }
            | PrinterError::Unimplemented { .. }
            | PrinterError::MalformedFrame(_)
            | PrinterError::ChecksumMismatch { .. } => true,
            PrinterError::JobFailed { source, .. } => source.is_protocol(),
            _ => false,
        }
    }

    pub(crate) fn at_step(self, step: &'static str) -> Self {
        PrinterError::JobFailed {
            step,
            source: Box::new(self),
        }
    }
}

pub type Result<T> = std::result::Result<T, PrinterError>;
