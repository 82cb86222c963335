//! Bitmap to line-print packets.
//!
//! Every row becomes one packet of type [`PRINT_BITMAP_ROW`]:
//!
//! ```text
//! row (u16 BE) | 00 00 00 | 01 | ceil(width / 8) bytes, MSB = leftmost pixel
//! ```
//!
//! A set bit burns a dot. The three zero bytes are per-row dot-count hints the
//! printer accepts as zero.

use crate::error::{PrinterError, Result};
use crate::protocol::{Packet, MAX_PAYLOAD, PRINT_BITMAP_ROW};

/// Bytes in front of the packed pixels of every row.
pub const ROW_HEADER_LEN: usize = 6;
/// Widest row that still fits in one packet.
pub const MAX_WIDTH: usize = (MAX_PAYLOAD - ROW_HEADER_LEN) * 8;
/// Tallest bitmap whose row count fits the 16-bit dimension field.
pub const MAX_HEIGHT: usize = u16::MAX as usize;

/// A rectangular one-bit image. `ink(x, y)` is true where the printer should
/// burn a dot.
pub trait Bitmap {
    fn width(&self) -> usize;
    fn height(&self) -> usize;
    fn ink(&self, x: usize, y: usize) -> bool;
}

/// Row-major bitmap held in memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonoBitmap {
    width: usize,
    height: usize,
    pixels: Vec<bool>,
}

impl MonoBitmap {
    /// A bitmap with no ink.
    pub fn blank(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            pixels: vec![false; width * height],
        }
    }

    pub fn from_fn(width: usize, height: usize, mut ink: impl FnMut(usize, usize) -> bool) -> Self {
        let mut pixels = Vec::with_capacity(width * height);
        for y in 0..height {
            for x in 0..width {
                pixels.push(ink(x, y));
            }
        }
        Self {
            width,
            height,
            pixels,
        }
    }

    pub fn from_pixels(width: usize, height: usize, pixels: Vec<bool>) -> Result<Self> {
        let expected = width
            .checked_mul(height)
            .ok_or_else(|| PrinterError::InvalidBitmap("width*height overflow".into()))?;
        if pixels.len() != expected {
            return Err(PrinterError::InvalidBitmap(format!(
                "{} pixels given for a {}x{} bitmap",
                pixels.len(),
                width,
                height
            )));
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    pub fn set(&mut self, x: usize, y: usize, ink: bool) {
        if x < self.width && y < self.height {
            self.pixels[y * self.width + x] = ink;
        }
    }
}

impl Bitmap for MonoBitmap {
    fn width(&self) -> usize {
        self.width
    }

    fn height(&self) -> usize {
        self.height
    }

    fn ink(&self, x: usize, y: usize) -> bool {
        self.pixels[y * self.width + x]
    }
}

impl<B: Bitmap + ?Sized> Bitmap for &B {
    fn width(&self) -> usize {
        (**self).width()
    }

    fn height(&self) -> usize {
        (**self).height()
    }

    fn ink(&self, x: usize, y: usize) -> bool {
        (**self).ink(x, y)
    }
}

/// Packs row `y` eight pixels per byte, most significant bit first, padding
/// the last byte with zero bits.
pub fn pack_row<B: Bitmap + ?Sized>(bitmap: &B, y: usize) -> Vec<u8> {
    let width = bitmap.width();
    let mut out = vec![0u8; width.div_ceil(8)];
    for x in 0..width {
        if bitmap.ink(x, y) {
            out[x / 8] |= 0x80 >> (x % 8);
        }
    }
    out
}

/// Lazily yields one row packet per bitmap row, top to bottom.
#[derive(Debug, Clone)]
pub struct RasterPackets<'a, B: ?Sized> {
    bitmap: &'a B,
    row: usize,
}

impl<B: Bitmap + ?Sized> Iterator for RasterPackets<'_, B> {
    type Item = Packet;

    fn next(&mut self) -> Option<Packet> {
        let y = self.row;
        if y >= self.bitmap.height() {
            return None;
        }
        self.row += 1;

        let packed = pack_row(self.bitmap, y);
        let mut data = Vec::with_capacity(ROW_HEADER_LEN + packed.len());
        data.extend_from_slice(&(y as u16).to_be_bytes());
        data.extend_from_slice(&[0, 0, 0]);
        data.push(1);
        data.extend(packed);
        Some(Packet::from_parts(PRINT_BITMAP_ROW, data))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.bitmap.height().saturating_sub(self.row);
        (left, Some(left))
    }
}

impl<B: Bitmap + ?Sized> ExactSizeIterator for RasterPackets<'_, B> {}

/// Checks that `bitmap` fits the row packet format and returns the packet
/// sequence for it. Calling this again on the same bitmap yields the same
/// packets.
pub fn encode_bitmap<B: Bitmap + ?Sized>(bitmap: &B) -> Result<RasterPackets<'_, B>> {
    let (width, height) = (bitmap.width(), bitmap.height());
    if width == 0 || height == 0 {
        return Err(PrinterError::InvalidBitmap(format!(
            "{width}x{height} bitmap is empty"
        )));
    }
    if width > MAX_WIDTH {
        return Err(PrinterError::InvalidBitmap(format!(
            "width {width} exceeds the {MAX_WIDTH} pixel row limit"
        )));
    }
    if height > MAX_HEIGHT {
        return Err(PrinterError::InvalidBitmap(format!(
            "height {height} exceeds the {MAX_HEIGHT} row limit"
        )));
    }
    Ok(RasterPackets { bitmap, row: 0 })
}
