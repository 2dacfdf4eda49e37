//! Perimeter sampling: cropped frame → per-LED colors.
//!
//! LEDs are walked clockwise from the top-left corner:
//!
//! ```text
//!   0 → → → count_x-1
//!   ↑               ↓
//!   ↑   cropped     ↓   right edge, top → bottom
//!   ↑   rectangle   ↓
//!   ← ← ← ← ← ← ← ← ←   bottom edge, right → left
//! ```
//!
//! The output buffer is reused when its length already matches the
//! topology, so steady-state extraction does not allocate.

use serde::{Deserialize, Serialize};

use crate::types::{Color, ColorSequence, CropRect, Frame, LedTopology};

/// Sampling stride of the average-color mode, in both axes.
const AVERAGE_SAMPLE_STEP: usize = 4;

/// What the extractor emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractMode {
    /// One color per LED along the perimeter.
    #[default]
    Perimeter,
    /// A single color averaged over the whole crop, for sinks that only
    /// take one flat color.
    Average,
}

/// Resamples a cropped frame into a [`ColorSequence`].
#[derive(Debug, Clone, Copy)]
pub struct LedDataExtractor {
    topology: LedTopology,
    mode: ExtractMode,
}

impl LedDataExtractor {
    pub fn new(topology: LedTopology, mode: ExtractMode) -> Self {
        Self { topology, mode }
    }

    pub fn topology(&self) -> LedTopology {
        self.topology
    }

    pub fn mode(&self) -> ExtractMode {
        self.mode
    }

    /// Length of every sequence this extractor produces.
    pub fn output_len(&self) -> usize {
        match self.mode {
            ExtractMode::Perimeter => self.topology.total_leds(),
            ExtractMode::Average => 1,
        }
    }

    /// Fill `out` from `crop` within `frame`.
    pub fn extract(&self, frame: &Frame<'_>, crop: &CropRect, out: &mut ColorSequence) {
        match self.mode {
            ExtractMode::Perimeter => extract_perimeter(frame, crop, self.topology, out),
            ExtractMode::Average => extract_average(frame, crop, out),
        }
    }
}

/// Resize `out` to `len`, reallocating only on a length change.
fn ensure_len(out: &mut ColorSequence, len: usize) {
    if out.len() != len {
        out.clear();
        out.resize(len, Color::BLACK);
    }
}

/// Sample the pixel nearest the center of each LED's segment.
#[inline]
fn segment_center(i: usize, step: f32, len: usize) -> usize {
    ((i as f32 * step + step / 2.0) as usize).min(len - 1)
}

/// Walk the four edges of `crop`, writing one color per LED.
pub fn extract_perimeter(
    frame: &Frame<'_>,
    crop: &CropRect,
    topology: LedTopology,
    out: &mut ColorSequence,
) {
    let total = topology.total_leds();
    ensure_len(out, total);

    if crop.is_empty() {
        out.fill(Color::BLACK);
        return;
    }

    let count_x = topology.count_x as usize;
    let count_y = topology.count_y as usize;
    let left = crop.x;
    let top = crop.y;
    let right = crop.x + crop.width - 1;
    let bottom = crop.y + crop.height - 1;

    let mut idx = 0;

    if count_x > 0 {
        let step = crop.width as f32 / count_x as f32;
        for i in 0..count_x {
            let x = left + segment_center(i, step, crop.width);
            out[idx] = frame.pixel(x, top);
            idx += 1;
        }
    }

    if count_y > 0 {
        let step = crop.height as f32 / count_y as f32;
        for i in 0..count_y {
            let y = top + segment_center(i, step, crop.height);
            out[idx] = frame.pixel(right, y);
            idx += 1;
        }
    }

    if count_x > 0 {
        let step = crop.width as f32 / count_x as f32;
        for i in 0..count_x {
            let x = left + segment_center(count_x - 1 - i, step, crop.width);
            out[idx] = frame.pixel(x, bottom);
            idx += 1;
        }
    }

    if count_y > 0 {
        let step = crop.height as f32 / count_y as f32;
        for i in 0..count_y {
            let y = top + segment_center(count_y - 1 - i, step, crop.height);
            out[idx] = frame.pixel(left, y);
            idx += 1;
        }
    }

    // Only the degenerate 0x0 layout leaves slots unwritten.
    out[idx..].fill(Color::BLACK);
}

/// Average every 4th pixel in both axes into a single color.
pub fn extract_average(frame: &Frame<'_>, crop: &CropRect, out: &mut ColorSequence) {
    ensure_len(out, 1);

    let (mut r, mut g, mut b, mut count) = (0u64, 0u64, 0u64, 0u64);
    for y in (crop.y..crop.y + crop.height).step_by(AVERAGE_SAMPLE_STEP) {
        for x in (crop.x..crop.x + crop.width).step_by(AVERAGE_SAMPLE_STEP) {
            let c = frame.pixel(x, y);
            r += c.red as u64;
            g += c.green as u64;
            b += c.blue as u64;
            count += 1;
        }
    }

    out[0] = if count == 0 {
        Color::BLACK
    } else {
        Color::new((r / count) as u8, (g / count) as u8, (b / count) as u8)
    };
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PixelFormat;

    /// RGBA frame where every pixel encodes its own coordinates.
    fn coordinate_frame(width: usize, height: usize) -> Vec<u8> {
        let mut buf = vec![0u8; width * height * 4];
        for y in 0..height {
            for x in 0..width {
                let off = (y * width + x) * 4;
                buf[off] = x as u8;
                buf[off + 1] = y as u8;
                buf[off + 2] = 7;
            }
        }
        buf
    }

    fn at(x: u8, y: u8) -> Color {
        Color::new(x, y, 7)
    }

    #[test]
    fn perimeter_walks_clockwise() {
        let buf = coordinate_frame(40, 20);
        let frame = Frame::packed(&buf, 40, 20, PixelFormat::Rgba8888).unwrap();
        let ex = LedDataExtractor::new(LedTopology::new(4, 2), ExtractMode::Perimeter);

        let mut out = Vec::new();
        ex.extract(&frame, &CropRect::full(&frame), &mut out);

        // step_x = 10 → centers 5, 15, 25, 35; step_y = 10 → centers 5, 15.
        let expected = vec![
            at(5, 0),
            at(15, 0),
            at(25, 0),
            at(35, 0),
            at(39, 5),
            at(39, 15),
            at(35, 19),
            at(25, 19),
            at(15, 19),
            at(5, 19),
            at(0, 15),
            at(0, 5),
        ];
        assert_eq!(out, expected);
    }

    #[test]
    fn crop_offsets_the_walk() {
        let buf = coordinate_frame(40, 20);
        let frame = Frame::packed(&buf, 40, 20, PixelFormat::Rgba8888).unwrap();
        let crop = CropRect::inset(40, 20, 10, 5).unwrap();
        let mut out = Vec::new();
        extract_perimeter(&frame, &crop, LedTopology::new(2, 1), &mut out);

        // crop 20x10 at (10, 5): step_x 10 → 5, 15; step_y 10 → 5.
        assert_eq!(
            out,
            vec![
                at(15, 5),
                at(25, 5),
                at(29, 10),
                at(25, 14),
                at(15, 14),
                at(10, 10),
            ]
        );
    }

    #[test]
    fn zero_topology_yields_one_black_led() {
        let buf = vec![255u8; 8 * 8 * 4];
        let frame = Frame::packed(&buf, 8, 8, PixelFormat::Rgba8888).unwrap();
        let mut out = vec![Color::new(1, 2, 3)];
        extract_perimeter(&frame, &CropRect::full(&frame), LedTopology::new(0, 0), &mut out);
        assert_eq!(out, vec![Color::BLACK]);
    }

    #[test]
    fn more_leds_than_pixels_clamps() {
        let buf = coordinate_frame(3, 3);
        let frame = Frame::packed(&buf, 3, 3, PixelFormat::Rgba8888).unwrap();
        let mut out = Vec::new();
        extract_perimeter(&frame, &CropRect::full(&frame), LedTopology::new(10, 10), &mut out);
        assert_eq!(out.len(), 40);
        assert!(out.iter().all(|c| c.red <= 2 && c.green <= 2));
    }

    #[test]
    fn buffer_reused_when_length_matches() {
        let buf = coordinate_frame(16, 16);
        let frame = Frame::packed(&buf, 16, 16, PixelFormat::Rgba8888).unwrap();
        let mut out = Vec::with_capacity(64);
        out.resize(8, Color::BLACK);
        let ptr = out.as_ptr();
        extract_perimeter(&frame, &CropRect::full(&frame), LedTopology::new(2, 2), &mut out);
        assert_eq!(out.as_ptr(), ptr);
        assert_eq!(out.len(), 8);
    }

    #[test]
    fn rgb565_decoded_during_walk() {
        let pixel = 0xF800u16.to_le_bytes(); // pure red
        let buf: Vec<u8> = std::iter::repeat(pixel).take(4 * 4).flatten().collect();
        let frame = Frame::packed(&buf, 4, 4, PixelFormat::Rgb565).unwrap();
        let mut out = Vec::new();
        extract_perimeter(&frame, &CropRect::full(&frame), LedTopology::new(1, 1), &mut out);
        assert!(out.iter().all(|c| *c == Color::new(255, 0, 0)));
    }

    #[test]
    fn average_mode_single_color() {
        let mut buf = vec![0u8; 8 * 8 * 4];
        for px in buf.chunks_mut(4) {
            px[0] = 100;
            px[1] = 50;
            px[2] = 10;
        }
        let frame = Frame::packed(&buf, 8, 8, PixelFormat::Rgba8888).unwrap();
        let ex = LedDataExtractor::new(LedTopology::new(10, 5), ExtractMode::Average);
        assert_eq!(ex.output_len(), 1);

        let mut out = vec![Color::BLACK; 30];
        ex.extract(&frame, &CropRect::full(&frame), &mut out);
        assert_eq!(out, vec![Color::new(100, 50, 10)]);
    }

    #[test]
    fn empty_crop_is_black() {
        let buf = vec![255u8; 4 * 4 * 4];
        let frame = Frame::packed(&buf, 4, 4, PixelFormat::Rgba8888).unwrap();
        let mut out = Vec::new();
        extract_perimeter(&frame, &CropRect::default(), LedTopology::new(1, 1), &mut out);
        assert_eq!(out, vec![Color::BLACK; 4]);
        extract_average(&frame, &CropRect::default(), &mut out);
        assert_eq!(out, vec![Color::BLACK]);
    }
}
