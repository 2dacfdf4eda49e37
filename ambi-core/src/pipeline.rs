//! Per-frame orchestration: border check, crop, extraction.
//!
//! The pipeline owns the border detector and the output buffer; callers
//! hand it borrowed capture buffers and get a borrowed sequence back.
//! Frame-level failures are transient and only cost the one frame.

use crate::border::{BorderProcessor, BorderThresholds};
use crate::error::AmbiError;
use crate::extract::{extract_average, ExtractMode, LedDataExtractor};
use crate::types::{Color, ColorSequence, CropRect, Frame, LedTopology, PixelFormat};

/// Pipeline tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineConfig {
    pub topology: LedTopology,
    pub mode: ExtractMode,
    /// Crop detected black borders before extraction.
    pub remove_borders: bool,
    /// Channels below this value count as black.
    pub black_threshold: u8,
    /// Run border detection on every Nth frame.
    pub border_check_interval: u32,
    pub border_thresholds: BorderThresholds,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            topology: LedTopology::new(16, 9),
            mode: ExtractMode::Perimeter,
            remove_borders: true,
            black_threshold: 10,
            border_check_interval: 60,
            border_thresholds: BorderThresholds::default(),
        }
    }
}

/// A packed RGB image borrowed from the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RgbImage<'a> {
    pub data: &'a [u8],
    pub width: usize,
    pub height: usize,
}

/// Capture buffer → [`ColorSequence`] or cropped [`RgbImage`].
#[derive(Debug)]
pub struct FramePipeline {
    config: PipelineConfig,
    border: BorderProcessor,
    extractor: LedDataExtractor,
    frames_since_check: u32,
    offset_x: usize,
    offset_y: usize,
    dimensions: Option<(usize, usize)>,
    output: ColorSequence,
    rgb: Vec<u8>,
}

impl FramePipeline {
    pub fn new(config: PipelineConfig) -> Result<Self, AmbiError> {
        config.topology.validate()?;
        if config.border_check_interval == 0 {
            return Err(AmbiError::InvalidConfig(
                "border check interval must be at least 1".into(),
            ));
        }
        let extractor = LedDataExtractor::new(config.topology, config.mode);
        Ok(Self {
            config,
            border: BorderProcessor::with_thresholds(
                config.black_threshold,
                config.border_thresholds,
            ),
            extractor,
            frames_since_check: 0,
            offset_x: 0,
            offset_y: 0,
            dimensions: None,
            output: Vec::with_capacity(extractor.output_len()),
            rgb: Vec::new(),
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Offsets currently applied to every frame.
    pub fn border_offsets(&self) -> (usize, usize) {
        (self.offset_x, self.offset_y)
    }

    /// Wrap a raw capture buffer and process it.
    pub fn process_buffer(
        &mut self,
        data: &[u8],
        width: usize,
        height: usize,
        row_stride: usize,
        pixel_stride: usize,
        format: PixelFormat,
    ) -> Result<&[Color], AmbiError> {
        let frame = Frame::new(data, width, height, row_stride, pixel_stride, format)?;
        self.process(&frame)
    }

    /// Run one frame through border detection and extraction.
    pub fn process(&mut self, frame: &Frame<'_>) -> Result<&[Color], AmbiError> {
        let crop = self.prepare(frame)?;
        self.extractor.extract(frame, &crop, &mut self.output);
        Ok(&self.output)
    }

    /// Wrap a raw capture buffer and crop it to packed RGB.
    pub fn process_image_buffer(
        &mut self,
        data: &[u8],
        width: usize,
        height: usize,
        row_stride: usize,
        pixel_stride: usize,
        format: PixelFormat,
    ) -> Result<RgbImage<'_>, AmbiError> {
        let frame = Frame::new(data, width, height, row_stride, pixel_stride, format)?;
        self.process_image(&frame)
    }

    /// Border-cropped frame as packed RGB, for controllers that map
    /// images onto their LEDs themselves. Average mode yields a 1x1 image.
    pub fn process_image(&mut self, frame: &Frame<'_>) -> Result<RgbImage<'_>, AmbiError> {
        let crop = self.prepare(frame)?;
        self.rgb.clear();

        if self.config.mode == ExtractMode::Average {
            extract_average(frame, &crop, &mut self.output);
            let c = self.output[0];
            self.rgb.extend_from_slice(&[c.red, c.green, c.blue]);
            return Ok(RgbImage {
                data: &self.rgb,
                width: 1,
                height: 1,
            });
        }

        self.rgb.reserve(crop.width * crop.height * 3);
        for y in crop.y..crop.y + crop.height {
            for x in crop.x..crop.x + crop.width {
                let c = frame.pixel(x, y);
                self.rgb.extend_from_slice(&[c.red, c.green, c.blue]);
            }
        }
        Ok(RgbImage {
            data: &self.rgb,
            width: crop.width,
            height: crop.height,
        })
    }

    /// Track frame size and borders, and return the crop for this frame.
    fn prepare(&mut self, frame: &Frame<'_>) -> Result<CropRect, AmbiError> {
        let dims = (frame.width(), frame.height());
        if self.dimensions != Some(dims) {
            if self.dimensions.is_some() {
                tracing::info!(width = dims.0, height = dims.1, "frame size changed");
            }
            self.dimensions = Some(dims);
            self.border.reset();
            self.offset_x = 0;
            self.offset_y = 0;
            self.frames_since_check = 0;
        }

        if self.detects_borders() {
            self.update_border(frame);
        }

        CropRect::inset(frame.width(), frame.height(), self.offset_x, self.offset_y)
            .ok_or(AmbiError::InvalidFrame("border covers the whole frame"))
    }

    /// Average mode always excludes letterbox bars from its mean.
    fn detects_borders(&self) -> bool {
        self.config.remove_borders || self.config.mode == ExtractMode::Average
    }

    fn update_border(&mut self, frame: &Frame<'_>) {
        self.frames_since_check += 1;
        if self.frames_since_check < self.config.border_check_interval {
            return;
        }
        self.frames_since_check = 0;

        // Unknown estimates keep the last crop in place.
        if let Some(border) = self.border.process(frame) {
            if border.is_known() && (border.offset_x, border.offset_y) != (self.offset_x, self.offset_y) {
                tracing::debug!(x = border.offset_x, y = border.offset_y, "crop updated");
                self.offset_x = border.offset_x;
                self.offset_y = border.offset_y;
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    /// Black bars of `by` rows top and bottom around a solid color.
    fn letterboxed(width: usize, height: usize, by: usize, rgb: [u8; 3]) -> Vec<u8> {
        let mut buf = vec![0u8; width * height * 4];
        for y in by..height - by {
            for x in 0..width {
                let off = (y * width + x) * 4;
                buf[off..off + 3].copy_from_slice(&rgb);
            }
        }
        buf
    }

    fn config(interval: u32) -> PipelineConfig {
        PipelineConfig {
            topology: LedTopology::new(4, 2),
            border_check_interval: interval,
            ..PipelineConfig::default()
        }
    }

    #[test]
    fn rejects_empty_topology() {
        let cfg = PipelineConfig {
            topology: LedTopology::new(0, 0),
            ..PipelineConfig::default()
        };
        assert!(FramePipeline::new(cfg).unwrap_err().is_config());
    }

    #[test]
    fn letterbox_cropped_after_border_settles() {
        let (w, h) = (40, 30);
        let buf = letterboxed(w, h, 5, [200, 100, 50]);
        let mut p = FramePipeline::new(config(1)).unwrap();

        // Before the debounce passes, the top LEDs see the black bar.
        let first = p.process_buffer(&buf, w, h, w * 4, 4, PixelFormat::Rgba8888).unwrap();
        assert_eq!(first[0], Color::BLACK);

        for _ in 0..11 {
            p.process_buffer(&buf, w, h, w * 4, 4, PixelFormat::Rgba8888).unwrap();
        }
        assert_eq!(p.border_offsets(), (0, 5));
        let out = p.process_buffer(&buf, w, h, w * 4, 4, PixelFormat::Rgba8888).unwrap();
        assert_eq!(out.len(), 12);
        assert!(out.iter().all(|c| *c == Color::new(200, 100, 50)));
    }

    #[test]
    fn border_checked_only_every_nth_frame() {
        let (w, h) = (40, 30);
        let buf = letterboxed(w, h, 5, [200, 100, 50]);
        let mut p = FramePipeline::new(config(60)).unwrap();
        for _ in 0..59 {
            p.process_buffer(&buf, w, h, w * 4, 4, PixelFormat::Rgba8888).unwrap();
        }
        assert_eq!(p.border.consistent_frames() + p.border.inconsistent_frames(), 0);
        p.process_buffer(&buf, w, h, w * 4, 4, PixelFormat::Rgba8888).unwrap();
        assert_eq!(p.border.inconsistent_frames(), 1);
    }

    #[test]
    fn unknown_border_keeps_last_crop() {
        let (w, h) = (40, 30);
        let content = letterboxed(w, h, 5, [200, 100, 50]);
        let black = vec![0u8; w * h * 4];
        let mut p = FramePipeline::new(config(1)).unwrap();
        for _ in 0..12 {
            p.process_buffer(&content, w, h, w * 4, 4, PixelFormat::Rgba8888).unwrap();
        }
        assert_eq!(p.border_offsets(), (0, 5));

        for _ in 0..700 {
            p.process_buffer(&black, w, h, w * 4, 4, PixelFormat::Rgba8888).unwrap();
        }
        assert_eq!(p.border_offsets(), (0, 5));
    }

    #[test]
    fn short_buffer_is_transient() {
        let mut p = FramePipeline::new(config(1)).unwrap();
        let err = p
            .process_buffer(&[0u8; 16], 10, 10, 40, 4, PixelFormat::Rgba8888)
            .unwrap_err();
        assert!(err.is_transient());
    }

    #[test]
    fn average_mode_single_led() {
        let (w, h) = (16, 16);
        let buf = letterboxed(w, h, 0, [90, 60, 30]);
        let cfg = PipelineConfig {
            mode: ExtractMode::Average,
            ..config(1)
        };
        let mut p = FramePipeline::new(cfg).unwrap();
        let out = p.process_buffer(&buf, w, h, w * 4, 4, PixelFormat::Rgba8888).unwrap();
        assert_eq!(out, &[Color::new(90, 60, 30)]);
    }

    #[test]
    fn average_mode_crops_even_without_border_removal() {
        let (w, h) = (40, 32);
        let buf = letterboxed(w, h, 8, [120, 80, 40]);
        let cfg = PipelineConfig {
            mode: ExtractMode::Average,
            remove_borders: false,
            ..config(1)
        };
        let mut p = FramePipeline::new(cfg).unwrap();
        for _ in 0..11 {
            p.process_buffer(&buf, w, h, w * 4, 4, PixelFormat::Rgba8888).unwrap();
        }
        assert_eq!(p.border_offsets(), (0, 8));
        let out = p.process_buffer(&buf, w, h, w * 4, 4, PixelFormat::Rgba8888).unwrap();
        assert_eq!(out, &[Color::new(120, 80, 40)]);
    }

    #[test]
    fn perimeter_mode_keeps_bars_without_border_removal() {
        let (w, h) = (40, 30);
        let buf = letterboxed(w, h, 5, [200, 100, 50]);
        let cfg = PipelineConfig {
            remove_borders: false,
            ..config(1)
        };
        let mut p = FramePipeline::new(cfg).unwrap();
        for _ in 0..20 {
            p.process_buffer(&buf, w, h, w * 4, 4, PixelFormat::Rgba8888).unwrap();
        }
        assert_eq!(p.border_offsets(), (0, 0));
    }

    #[test]
    fn image_is_cropped_to_content() {
        let (w, h) = (40, 30);
        let buf = letterboxed(w, h, 5, [9, 8, 7]);
        let mut p = FramePipeline::new(config(1)).unwrap();

        let img = p.process_image_buffer(&buf, w, h, w * 4, 4, PixelFormat::Rgba8888).unwrap();
        assert_eq!((img.width, img.height), (40, 30));
        assert_eq!(&img.data[..3], &[0, 0, 0]);

        for _ in 0..11 {
            p.process_image_buffer(&buf, w, h, w * 4, 4, PixelFormat::Rgba8888).unwrap();
        }
        assert_eq!(p.border_offsets(), (0, 5));
        let img = p.process_image_buffer(&buf, w, h, w * 4, 4, PixelFormat::Rgba8888).unwrap();
        assert_eq!((img.width, img.height), (40, 20));
        assert_eq!(img.data.len(), 40 * 20 * 3);
        assert!(img.data.chunks_exact(3).all(|px| px == [9, 8, 7]));
    }

    #[test]
    fn average_mode_image_is_one_pixel() {
        let (w, h) = (16, 16);
        let buf = letterboxed(w, h, 0, [90, 60, 30]);
        let cfg = PipelineConfig {
            mode: ExtractMode::Average,
            ..config(1)
        };
        let mut p = FramePipeline::new(cfg).unwrap();
        let img = p.process_image_buffer(&buf, w, h, w * 4, 4, PixelFormat::Rgba8888).unwrap();
        assert_eq!(img, RgbImage { data: &[90, 60, 30], width: 1, height: 1 });
    }

    #[test]
    fn resolution_change_resets_crop() {
        let content = letterboxed(40, 30, 5, [200, 100, 50]);
        let mut p = FramePipeline::new(config(1)).unwrap();
        for _ in 0..12 {
            p.process_buffer(&content, 40, 30, 160, 4, PixelFormat::Rgba8888).unwrap();
        }
        assert_eq!(p.border_offsets(), (0, 5));

        let other = letterboxed(20, 20, 0, [1, 1, 1]);
        p.process_buffer(&other, 20, 20, 80, 4, PixelFormat::Rgba8888).unwrap();
        assert_eq!(p.border_offsets(), (0, 0));
    }
}
