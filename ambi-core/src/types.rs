//! Shared value types for the capture → LED pipeline.
//!
//! [`Frame`] is a borrowed view over a capture buffer; it is never owned by
//! the core. [`Color`] sequences are owned and reused across frames.

use serde::{Deserialize, Serialize};

use crate::error::AmbiError;

// ── Color ────────────────────────────────────────────────────────

/// One LED color, 8 bits per channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Color {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
}

impl Color {
    pub const BLACK: Color = Color::new(0, 0, 0);

    pub const fn new(red: u8, green: u8, blue: u8) -> Self {
        Self { red, green, blue }
    }

    /// Overwrite in place.
    pub fn set(&mut self, red: u8, green: u8, blue: u8) {
        self.red = red;
        self.green = green;
        self.blue = blue;
    }

    /// Packed `0xRRGGBB`, as carried by the Hyperion `Color` command.
    pub const fn to_rgb24(self) -> u32 {
        ((self.red as u32) << 16) | ((self.green as u32) << 8) | self.blue as u32
    }

    pub const fn from_rgb24(rgb: u32) -> Self {
        Self::new((rgb >> 16) as u8, (rgb >> 8) as u8, rgb as u8)
    }
}

/// Ordered perimeter colors. Index 0 is the top-left LED, walking
/// clockwise.
pub type ColorSequence = Vec<Color>;

// ── PixelFormat ──────────────────────────────────────────────────

/// Pixel layout of a captured buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    /// 4 bytes per pixel: Red, Green, Blue, Alpha.
    #[default]
    Rgba8888,
    /// 2 bytes per pixel, little-endian `RRRRRGGG GGGBBBBB`.
    Rgb565,
}

impl PixelFormat {
    /// Bytes consumed by a single pixel in this format.
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Rgba8888 => 4,
            PixelFormat::Rgb565 => 2,
        }
    }

    /// Decode the pixel starting at `px` to 8-bit RGB.
    ///
    /// `px` must hold at least [`bytes_per_pixel`](Self::bytes_per_pixel)
    /// bytes.
    #[inline]
    pub fn decode(self, px: &[u8]) -> Color {
        match self {
            PixelFormat::Rgba8888 => Color::new(px[0], px[1], px[2]),
            PixelFormat::Rgb565 => {
                let pixel = u16::from_le_bytes([px[0], px[1]]);
                let r = ((pixel >> 11) & 0x1F) as u8;
                let g = ((pixel >> 5) & 0x3F) as u8;
                let b = (pixel & 0x1F) as u8;
                Color::new((r << 3) | (r >> 2), (g << 2) | (g >> 4), (b << 3) | (b >> 2))
            }
        }
    }
}

// ── Frame ────────────────────────────────────────────────────────

/// A borrowed view over one captured screen buffer.
///
/// The buffer holds `height` rows of `row_stride` bytes; inside a row,
/// pixels are `pixel_stride` bytes apart. Both strides may exceed the
/// packed size because capture surfaces pad rows and pixels.
#[derive(Debug, Clone, Copy)]
pub struct Frame<'a> {
    data: &'a [u8],
    width: usize,
    height: usize,
    row_stride: usize,
    pixel_stride: usize,
    format: PixelFormat,
}

impl<'a> Frame<'a> {
    /// Wrap a buffer, checking that it covers the advertised geometry.
    pub fn new(
        data: &'a [u8],
        width: usize,
        height: usize,
        row_stride: usize,
        pixel_stride: usize,
        format: PixelFormat,
    ) -> Result<Self, AmbiError> {
        if width == 0 || height == 0 {
            return Err(AmbiError::InvalidFrame("zero-sized frame"));
        }
        if pixel_stride < format.bytes_per_pixel() {
            return Err(AmbiError::InvalidFrame("pixel stride smaller than pixel"));
        }
        if row_stride < width * pixel_stride {
            return Err(AmbiError::InvalidFrame("row stride smaller than row"));
        }
        let expected = (height - 1) * row_stride + width * pixel_stride;
        if data.len() < expected {
            return Err(AmbiError::FrameTooShort {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            data,
            width,
            height,
            row_stride,
            pixel_stride,
            format,
        })
    }

    /// Wrap a tightly packed buffer (`row_stride = width * bpp`).
    pub fn packed(
        data: &'a [u8],
        width: usize,
        height: usize,
        format: PixelFormat,
    ) -> Result<Self, AmbiError> {
        let bpp = format.bytes_per_pixel();
        Self::new(data, width, height, width * bpp, bpp, format)
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn row_stride(&self) -> usize {
        self.row_stride
    }

    pub fn pixel_stride(&self) -> usize {
        self.pixel_stride
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// Decoded color at `(x, y)`; black outside the frame.
    #[inline]
    pub fn pixel(&self, x: usize, y: usize) -> Color {
        if x >= self.width || y >= self.height {
            return Color::BLACK;
        }
        let offset = y * self.row_stride + x * self.pixel_stride;
        self.format.decode(&self.data[offset..])
    }
}

// ── LedTopology ──────────────────────────────────────────────────

/// LED counts along each screen axis.
///
/// The strip runs `count_x` LEDs along the top and bottom edges and
/// `count_y` along the left and right edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct LedTopology {
    pub count_x: u32,
    pub count_y: u32,
}

impl LedTopology {
    pub const fn new(count_x: u32, count_y: u32) -> Self {
        Self { count_x, count_y }
    }

    /// `2 * (count_x + count_y)`, never less than one.
    pub fn total_leds(&self) -> usize {
        (2 * (self.count_x as usize + self.count_y as usize)).max(1)
    }

    /// A layout with no LEDs at all is a configuration error.
    pub fn validate(&self) -> Result<(), AmbiError> {
        if self.count_x == 0 && self.count_y == 0 {
            return Err(AmbiError::InvalidTopology {
                count_x: self.count_x,
                count_y: self.count_y,
            });
        }
        Ok(())
    }
}

// ── CropRect ─────────────────────────────────────────────────────

/// The part of a frame left after removing black borders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CropRect {
    pub x: usize,
    pub y: usize,
    pub width: usize,
    pub height: usize,
}

impl CropRect {
    /// The whole frame.
    pub fn full(frame: &Frame<'_>) -> Self {
        Self {
            x: 0,
            y: 0,
            width: frame.width(),
            height: frame.height(),
        }
    }

    /// Remove `border_x` columns from the left and right and `border_y`
    /// rows from the top and bottom. Returns `None` when nothing is left.
    pub fn inset(width: usize, height: usize, border_x: usize, border_y: usize) -> Option<Self> {
        let w = width.checked_sub(border_x * 2)?;
        let h = height.checked_sub(border_y * 2)?;
        if w == 0 || h == 0 {
            return None;
        }
        Some(Self {
            x: border_x,
            y: border_y,
            width: w,
            height: h,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

// ── Tests ────────────────────────────────────────────────────────
