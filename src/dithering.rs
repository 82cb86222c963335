//! Image preparation: grayscale images to printable bitmaps.
//!
//! This sits outside the print engine, which only ever sees a [`MonoBitmap`].
//! Dark pixels become ink.

use std::path::Path;

use image::imageops::{self, FilterType};
use image::{GrayImage, Luma};

use crate::error::Result;
use crate::raster::MonoBitmap;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ImageDithering {
    #[default]
    Threshold,
    FloydSteinberg,
    Atkinson,
    Bayer,
}

const MIDPOINT: u8 = 128;

/// Applies Atkinson dithering in place: 6/8 of the quantisation error is
/// spread over six neighbours, which keeps highlights clean on thermal paper.
pub fn atkinson_dither(img: &mut GrayImage) {
    let (width, height) = img.dimensions();
    let (w, h) = (width as i64, height as i64);
    let mut levels: Vec<i16> = img.as_raw().iter().map(|&p| p as i16).collect();
    const NEIGHBOURS: [(i64, i64); 6] = [(1, 0), (2, 0), (-1, 1), (0, 1), (1, 1), (0, 2)];

    for y in 0..h {
        for x in 0..w {
            let idx = (y * w + x) as usize;
            let old = levels[idx].clamp(0, 255);
            let new = if old >= MIDPOINT as i16 { 255 } else { 0 };
            levels[idx] = new;
            let spread = (old - new) / 8;
            for (dx, dy) in NEIGHBOURS {
                let (nx, ny) = (x + dx, y + dy);
                if nx >= 0 && nx < w && ny < h {
                    levels[(ny * w + nx) as usize] += spread;
                }
            }
        }
    }

    for (dst, level) in img.iter_mut().zip(levels) {
        *dst = level.clamp(0, 255) as u8;
    }
}

/// Applies ordered dithering with a 4x4 Bayer matrix in place.
pub fn bayer_dither(img: &mut GrayImage) {
    const BAYER_MATRIX: [[u8; 4]; 4] = [[0, 8, 2, 10], [12, 4, 14, 6], [3, 11, 1, 9], [15, 7, 13, 5]];

    for (x, y, pixel) in img.enumerate_pixels_mut() {
        // Thresholds sit in the middle of each of the 16 bands.
        let threshold = BAYER_MATRIX[(y % 4) as usize][(x % 4) as usize] as u16 * 16 + 8;
        pixel[0] = if pixel[0] as u16 >= threshold { 255 } else { 0 };
    }
}

/// Binarises `img` with `dithering` and turns dark pixels into ink.
pub fn to_bitmap(img: &GrayImage, dithering: ImageDithering) -> MonoBitmap {
    let mut gray = img.clone();
    match dithering {
        ImageDithering::Threshold => {}
        ImageDithering::FloydSteinberg => imageops::dither(&mut gray, &imageops::BiLevel),
        ImageDithering::Atkinson => atkinson_dither(&mut gray),
        ImageDithering::Bayer => bayer_dither(&mut gray),
    }
    let (width, height) = gray.dimensions();
    MonoBitmap::from_fn(width as usize, height as usize, |x, y| {
        let Luma([level]) = *gray.get_pixel(x as u32, y as u32);
        level < MIDPOINT
    })
}

/// Loads an image file, scales it down to at most `max_width` dots wide
/// (keeping the aspect ratio) and converts it with [`to_bitmap`].
pub fn load_bitmap(
    path: impl AsRef<Path>,
    max_width: Option<u32>,
    dithering: ImageDithering,
) -> Result<MonoBitmap> {
    let mut gray = image::open(path)?.to_luma8();
    if let Some(max_width) = max_width {
        let (width, height) = gray.dimensions();
        if width > max_width && max_width > 0 {
            let scaled_height = ((height as u64 * max_width as u64) / width as u64).max(1) as u32;
            gray = imageops::resize(&gray, max_width, scaled_height, FilterType::Lanczos3);
        }
    }
    Ok(to_bitmap(&gray, dithering))
}
